//! Dispatch engine and control API
//!
//! [`DispatchEngine`] is the transport-agnostic surface the rest of the
//! product drives: provision slots, connect them, distribute recipients,
//! pace sends, trigger immediate bursts, read stats. Every tenant's state
//! lives inside one [`TenantRuntime`] entry, so an operation scoped to one
//! tenant structurally cannot touch another's slots, queues, or counters.

use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use courier_core::{
    AssignmentQueue, CadenceConfig, DispatchError, DriverRegistry, EngineConfig, OutboundMessage,
    Priority, RecipientDirectory, RecipientId, Result, SlotNumber, TenantId,
};

use crate::distributor::{self, Distribution};
use crate::events::{EngineEvent, EngineEventReceiver, EngineEventSender};
use crate::managers::slot::SlotConnectionManager;
use crate::managers::stats::{CadenceRunState, StatsSnapshot, TenantStats};
use crate::pool::SlotPool;
use crate::scheduler::{self, AdaptivePacer};

/// Default invitation sent when no per-tenant template is configured
const DEFAULT_TEMPLATE: &str =
    "You have been selected for an interview.\n\nReply:\n1 - Start now\n2 - Decline";

// ----------------------------------------------------------------------------
// Tenant Runtime
// ----------------------------------------------------------------------------

/// All engine state belonging to one tenant
///
/// The field set mirrors the isolation boundary: nothing in here is reachable
/// except through the owning tenant's entry in the engine map.
pub struct TenantRuntime {
    pub(crate) tenant: TenantId,
    pub(crate) pool: SlotPool,
    pub(crate) queue: Mutex<AssignmentQueue>,
    pub(crate) cadence_config: RwLock<CadenceConfig>,
    pub(crate) template: RwLock<OutboundMessage>,
    pub(crate) run_state: Mutex<CadenceRunState>,
    pub(crate) stats: TenantStats,
    pub(crate) pacer: Mutex<AdaptivePacer>,
    pub(crate) driver_order: RwLock<Vec<String>>,
    pub(crate) events: EngineEventSender,
    worker: Mutex<Option<WorkerControl>>,
}

struct WorkerControl {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TenantRuntime {
    fn new(tenant: TenantId, slots: u16, config: &EngineConfig) -> Self {
        let (events, _) = tokio::sync::broadcast::channel(256);
        Self {
            pool: SlotPool::new(tenant.clone(), slots, config.connect.failure_window),
            tenant,
            queue: Mutex::new(AssignmentQueue::new()),
            cadence_config: RwLock::new(config.cadence.clone()),
            template: RwLock::new(OutboundMessage::text(DEFAULT_TEMPLATE)),
            run_state: Mutex::new(CadenceRunState::default()),
            stats: TenantStats::new(),
            pacer: Mutex::new(AdaptivePacer::new()),
            driver_order: RwLock::new(config.driver_order.clone()),
            events,
            worker: Mutex::new(None),
        }
    }

    fn order_snapshot(&self) -> Vec<String> {
        self.driver_order
            .read()
            .expect("driver order lock poisoned")
            .clone()
    }
}

/// Returned by `activate_immediate` after the synchronous validations pass
#[derive(Debug, Clone)]
pub struct ImmediateActivation {
    pub tenant: TenantId,
    pub slot: SlotNumber,
    pub assignment_id: Uuid,
}

// ----------------------------------------------------------------------------
// Dispatch Engine
// ----------------------------------------------------------------------------

/// Multi-tenant outbound dispatch engine
pub struct DispatchEngine {
    config: EngineConfig,
    manager: Arc<SlotConnectionManager>,
    directory: Arc<RecipientDirectory>,
    tenants: DashMap<TenantId, Arc<TenantRuntime>>,
}

impl DispatchEngine {
    pub fn new(config: EngineConfig, registry: DriverRegistry) -> Self {
        let manager = Arc::new(SlotConnectionManager::new(
            Arc::new(registry),
            config.connect.clone(),
        ));
        Self {
            config,
            manager,
            directory: Arc::new(RecipientDirectory::new()),
            tenants: DashMap::new(),
        }
    }

    pub fn directory(&self) -> &RecipientDirectory {
        &self.directory
    }

    // ------------------------------------------------------------------
    // Slot provisioning and connection
    // ------------------------------------------------------------------

    /// Provision the tenant's slot pool with the engine default count
    pub fn init_slots(&self, tenant: &TenantId) -> Result<()> {
        self.init_slots_with(tenant, self.config.slots_per_tenant)
    }

    /// Provision the tenant's slot pool; idempotent for an existing tenant
    pub fn init_slots_with(&self, tenant: &TenantId, slots: u16) -> Result<()> {
        if slots == 0 {
            return Err(DispatchError::config_error("slot count must be at least 1"));
        }
        if self.tenants.contains_key(tenant) {
            debug!(%tenant, "slots already initialized");
            return Ok(());
        }
        let runtime = Arc::new(TenantRuntime::new(tenant.clone(), slots, &self.config));
        self.tenants.insert(tenant.clone(), runtime);
        info!(%tenant, slots, "tenant provisioned");
        Ok(())
    }

    /// Establish one slot's connection, walking the driver fallback order
    pub async fn connect_slot(&self, tenant: &TenantId, number: SlotNumber) -> Result<()> {
        let rt = self.tenant_runtime(tenant)?;
        let slot = rt
            .pool
            .get(number)
            .ok_or_else(|| DispatchError::slot_not_found(&courier_core::SlotId::new(
                tenant.clone(),
                number,
            )))?;
        self.manager
            .connect_slot(&slot, rt.order_snapshot(), rt.events.clone())
            .await
    }

    /// Connect every slot in the pool; returns how many ended up connected
    pub async fn connect_all_slots(&self, tenant: &TenantId) -> Result<usize> {
        let rt = self.tenant_runtime(tenant)?;
        let numbers: Vec<SlotNumber> = rt.pool.iter().map(|s| s.number()).collect();
        for number in numbers {
            let _ = self.connect_slot(tenant, number).await;
        }
        Ok(rt.pool.eligible_count())
    }

    /// Operator-initiated disconnect; queued work is purged back to the
    /// distributor for rebinding and auto-reconnect is suppressed
    pub async fn disconnect_slot(&self, tenant: &TenantId, number: SlotNumber) -> Result<()> {
        let rt = self.tenant_runtime(tenant)?;
        let slot = rt
            .pool
            .get(number)
            .ok_or_else(|| DispatchError::slot_not_found(&courier_core::SlotId::new(
                tenant.clone(),
                number,
            )))?;

        self.manager.disconnect_slot(&slot, &rt.events).await?;

        let moved = {
            let mut queue = rt.queue.lock().expect("queue lock poisoned");
            distributor::rebind_purged_slot(&rt.pool, &mut queue, number)
        };
        info!(%tenant, slot = %number, moved, "slot purged");
        Ok(())
    }

    /// Override the tenant's driver fallback order
    pub fn set_driver_order(&self, tenant: &TenantId, order: Vec<String>) -> Result<()> {
        let rt = self.tenant_runtime(tenant)?;
        *rt.driver_order.write().expect("driver order lock poisoned") = order;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Recipients and distribution
    // ------------------------------------------------------------------

    /// Associate a recipient with the tenant's recipient set
    pub fn register_recipient(&self, tenant: &TenantId, recipient: RecipientId) -> Result<()> {
        self.tenant_runtime(tenant)?;
        self.directory.register(tenant, recipient);
        Ok(())
    }

    /// Assign recipients to eligible slots in rotation
    ///
    /// Recipients are registered to the tenant as a side effect, so a later
    /// inbound reply can resolve back to it.
    pub fn distribute(
        &self,
        tenant: &TenantId,
        recipients: &[RecipientId],
        priority: Priority,
    ) -> Result<Distribution> {
        let rt = self.tenant_runtime(tenant)?;

        let distribution = {
            let mut queue = rt.queue.lock().expect("queue lock poisoned");
            distributor::distribute(&rt.pool, &mut queue, recipients, priority)?
        };
        for assignment in &distribution.assignments {
            self.directory.register(tenant, assignment.recipient.clone());
        }
        Ok(distribution)
    }

    /// Withdraw a recipient from any tenant's pending queue (they replied)
    pub fn withdraw_recipient(&self, recipient: &RecipientId) -> usize {
        let mut withdrawn = 0;
        for entry in self.tenants.iter() {
            let mut queue = entry.value().queue.lock().expect("queue lock poisoned");
            if queue.cancel(recipient) {
                withdrawn += 1;
            }
        }
        if withdrawn > 0 {
            debug!(%recipient, withdrawn, "recipient withdrawn from pending queues");
        }
        withdrawn
    }

    // ------------------------------------------------------------------
    // Cadence control
    // ------------------------------------------------------------------

    /// Replace the tenant's pacing policy
    pub fn configure_cadence(&self, tenant: &TenantId, config: CadenceConfig) -> Result<()> {
        config.validate().map_err(DispatchError::config_error)?;
        let rt = self.tenant_runtime(tenant)?;
        *rt.cadence_config.write().expect("cadence config lock poisoned") = config;
        Ok(())
    }

    /// Replace the tenant's outbound message template
    pub fn set_message(&self, tenant: &TenantId, message: OutboundMessage) -> Result<()> {
        let rt = self.tenant_runtime(tenant)?;
        *rt.template.write().expect("template lock poisoned") = message;
        Ok(())
    }

    /// Start (or resume) the tenant's cadence loop
    pub fn start_cadence(&self, tenant: &TenantId) -> Result<()> {
        let rt = self.tenant_runtime(tenant)?;
        self.ensure_worker(&rt);
        Ok(())
    }

    /// Stop the tenant's cadence loop
    ///
    /// `is_active` is false when this returns; an in-flight batch finishes,
    /// no new batch starts, and queued assignments survive for resumption.
    pub fn stop_cadence(&self, tenant: &TenantId) -> Result<()> {
        let rt = self.tenant_runtime(tenant)?;
        {
            let mut run_state = rt.run_state.lock().expect("run state lock poisoned");
            run_state.is_active = false;
        }
        if let Some(worker) = rt.worker.lock().expect("worker lock poisoned").take() {
            let _ = worker.stop_tx.send(true);
        }
        let _ = rt.events.send(EngineEvent::CadenceStopped {
            tenant: tenant.clone(),
        });
        info!(%tenant, "cadence stopped");
        Ok(())
    }

    /// Run one batch inline; operability hook independent of the worker
    pub async fn process_cadence(&self, tenant: &TenantId) -> Result<()> {
        let rt = self.tenant_runtime(tenant)?;
        scheduler::process_batch(&rt, &self.manager, &self.config).await;
        Ok(())
    }

    /// Reply-triggered burst
    ///
    /// Synchronously resolves the owning tenant (explicit hint first, then
    /// the directory's most-recent-association rule) and validates that the
    /// tenant has a connected slot and owns the recipient — aborting with a
    /// typed reason before any send otherwise. On success the first send
    /// starts within the configured base delay; remaining queued work keeps
    /// ticked pacing.
    pub async fn activate_immediate(
        &self,
        tenant_hint: Option<&TenantId>,
        recipient: &RecipientId,
    ) -> Result<ImmediateActivation> {
        // An explicit tenant is authoritative: membership is validated, not
        // re-resolved. Resolution runs only when the owner is unknown.
        let tenant = match tenant_hint {
            Some(tenant) => tenant.clone(),
            None => self.directory.resolve(recipient)?,
        };

        let rt = self
            .tenants
            .get(&tenant)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DispatchError::no_active_slot(&tenant))?;

        if !self.directory.is_member(&tenant, recipient) {
            return Err(DispatchError::recipient_not_owned(&tenant, recipient));
        }
        if rt.pool.eligible_count() == 0 {
            return Err(DispatchError::no_active_slot(&tenant));
        }

        let base_delay = {
            let mut config = rt.cadence_config.write().expect("cadence config lock poisoned");
            config.immediate_mode = true;
            config.base_delay
        };

        // Claim the assignment out of the tick queue in the same critical
        // section that created it: the burst owns this send, and a second
        // trigger for the same recipient finds nothing left to claim
        let (assignment, claimed) = {
            let mut queue = rt.queue.lock().expect("queue lock poisoned");
            let mut distribution = distributor::distribute(
                &rt.pool,
                &mut queue,
                std::slice::from_ref(recipient),
                Priority::Immediate,
            )?;
            let assignment = distribution
                .assignments
                .pop()
                .ok_or_else(|| DispatchError::config_error("recipient has no digits"))?;
            let claimed = queue.take_recipient(recipient);
            (assignment, claimed)
        };

        // Remaining queued work keeps ticked pacing
        self.ensure_worker(&rt);

        if let Some(assignment) = claimed {
            let manager = Arc::clone(&self.manager);
            let engine_config = self.config.clone();
            let burst_rt = Arc::clone(&rt);
            tokio::spawn(async move {
                tokio::time::sleep(base_delay).await;
                let config = {
                    burst_rt
                        .cadence_config
                        .read()
                        .expect("cadence config lock poisoned")
                        .clone()
                };
                let _ = scheduler::send_with_retries(
                    &burst_rt,
                    &manager,
                    &assignment,
                    &config,
                    &engine_config,
                )
                .await;
            });
        }

        info!(%tenant, %recipient, slot = %assignment.slot, "immediate cadence activated");
        Ok(ImmediateActivation {
            tenant,
            slot: assignment.slot,
            assignment_id: assignment.id,
        })
    }

    /// One-off send outside any cadence (confirmations, interview prompts)
    ///
    /// Routes through the tenant's first eligible slot with the same retry
    /// budget as scheduled sends; spending it surfaces `SendExhausted`.
    pub async fn send_direct(
        &self,
        tenant: &TenantId,
        recipient: &RecipientId,
        message: &OutboundMessage,
    ) -> Result<courier_core::SendReceipt> {
        let rt = self.tenant_runtime(tenant)?;
        let slot = rt
            .pool
            .eligible()
            .into_iter()
            .next()
            .ok_or_else(|| DispatchError::no_active_slot(tenant))?;

        let budget = {
            let config = rt.cadence_config.read().expect("cadence config lock poisoned");
            config.max_retries.max(1)
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.manager.send(&slot, recipient, message, &rt.events).await {
                Ok(receipt) => {
                    rt.stats.record_sent();
                    return Ok(receipt);
                }
                Err(error) if attempts < budget && error.is_transient() => {
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                Err(_) => {
                    rt.stats.record_error();
                    return Err(DispatchError::SendExhausted {
                        recipient: recipient.clone(),
                        attempts,
                    });
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// True counters; never an assumed state
    pub fn get_stats(&self, tenant: &TenantId) -> Result<StatsSnapshot> {
        let rt = self.tenant_runtime(tenant)?;
        let (queued, queue_depths) = {
            let queue = rt.queue.lock().expect("queue lock poisoned");
            let depths = queue
                .depth_by_slot()
                .into_iter()
                .map(|(slot, depth)| (slot.get(), depth))
                .collect();
            (queue.pending_count(), depths)
        };
        let cadence_active = {
            rt.run_state
                .lock()
                .expect("run state lock poisoned")
                .is_active
        };

        Ok(StatsSnapshot {
            active_slots: rt.pool.eligible_count(),
            total_connections: rt.pool.len(),
            cadence_active,
            total_sent: rt.stats.total_sent(),
            total_errors: rt.stats.total_errors(),
            success_rate: rt.stats.success_rate(),
            queued,
            queue_depths,
        })
    }

    /// Subscribe to the tenant's engine events (slot state changes, pairing
    /// artifacts, cadence lifecycle)
    pub fn subscribe(&self, tenant: &TenantId) -> Result<EngineEventReceiver> {
        let rt = self.tenant_runtime(tenant)?;
        Ok(rt.events.subscribe())
    }

    /// Snapshot of one slot's lifecycle state name
    pub fn slot_state(&self, tenant: &TenantId, number: SlotNumber) -> Result<&'static str> {
        let rt = self.tenant_runtime(tenant)?;
        rt.pool
            .get(number)
            .map(|slot| slot.state_name())
            .ok_or_else(|| {
                DispatchError::slot_not_found(&courier_core::SlotId::new(tenant.clone(), number))
            })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn tenant_runtime(&self, tenant: &TenantId) -> Result<Arc<TenantRuntime>> {
        self.tenants
            .get(tenant)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DispatchError::tenant_unknown(tenant))
    }

    /// Mark the cadence active and make sure a worker is running
    fn ensure_worker(&self, rt: &Arc<TenantRuntime>) {
        {
            let mut run_state = rt.run_state.lock().expect("run state lock poisoned");
            run_state.is_active = true;
        }

        let mut worker = rt.worker.lock().expect("worker lock poisoned");
        let running = worker
            .as_ref()
            .map(|w| !w.handle.is_finished())
            .unwrap_or(false);
        if running {
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = scheduler::spawn_worker(
            Arc::clone(rt),
            Arc::clone(&self.manager),
            self.config.clone(),
            stop_rx,
        );
        *worker = Some(WorkerControl { stop_tx, handle });
        let _ = rt.events.send(EngineEvent::CadenceStarted {
            tenant: rt.tenant.clone(),
        });
        info!(tenant = %rt.tenant, "cadence worker started");
    }
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("tenants", &self.tenants.len())
            .finish()
    }
}
