//! Slot handles and the per-tenant slot pool
//!
//! A [`SlotHandle`] wraps one physical connection's state machine together
//! with the two pieces of synchronization the concurrency model requires:
//! a short-lived state mutex (the only critical section for lifecycle
//! mutation) and an async send gate serializing sends on the connection.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use courier_core::slot::SlotAuditEntry;
use courier_core::{SlotEvent, SlotId, SlotNumber, SlotState, SlotTransitionError, TenantId};

/// Audit entries retained per slot
const AUDIT_LIMIT: usize = 64;

// ----------------------------------------------------------------------------
// Failure Window
// ----------------------------------------------------------------------------

/// Consecutive send failures within a sliding window
///
/// Any successful send clears the run; failures older than the window age
/// out, so a slow trickle of errors does not degrade a slot.
#[derive(Debug)]
pub struct FailureWindow {
    failures: VecDeque<Instant>,
    window: Duration,
}

impl FailureWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            failures: VecDeque::new(),
            window,
        }
    }

    /// Record a failure and return the consecutive count within the window
    pub fn record_failure(&mut self) -> u32 {
        let now = Instant::now();
        self.failures.push_back(now);
        self.expire(now);
        self.failures.len() as u32
    }

    pub fn record_success(&mut self) {
        self.failures.clear();
    }

    pub fn current(&mut self) -> u32 {
        self.expire(Instant::now());
        self.failures.len() as u32
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&front) = self.failures.front() {
            if now.duration_since(front) > self.window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Slot Handle
// ----------------------------------------------------------------------------

/// One physical connection: lifecycle state plus its synchronization
#[derive(Debug)]
pub struct SlotHandle {
    pub id: SlotId,
    /// Lifecycle state; lock held only for transitions and reads, never
    /// across driver I/O
    state: Mutex<SlotState>,
    /// Serializes sends so one physical connection never races itself
    send_gate: tokio::sync::Mutex<()>,
    /// Operator-initiated disconnect suppresses auto-reconnect
    manually_disconnected: AtomicBool,
    failures: Mutex<FailureWindow>,
    reconnect_attempts: AtomicU32,
    audit: Mutex<VecDeque<SlotAuditEntry>>,
}

impl SlotHandle {
    pub fn new(id: SlotId, failure_window: Duration) -> Self {
        Self {
            id,
            state: Mutex::new(SlotState::new_disconnected()),
            send_gate: tokio::sync::Mutex::new(()),
            manually_disconnected: AtomicBool::new(false),
            failures: Mutex::new(FailureWindow::new(failure_window)),
            reconnect_attempts: AtomicU32::new(0),
            audit: Mutex::new(VecDeque::new()),
        }
    }

    pub fn number(&self) -> SlotNumber {
        self.id.number
    }

    /// Apply a lifecycle event under the state lock
    pub fn apply(&self, event: SlotEvent) -> Result<SlotAuditEntry, SlotTransitionError> {
        let mut state = self.state.lock().expect("slot state lock poisoned");
        let current = state.clone();
        let transition = current.transition(event)?;
        *state = transition.new_state;
        drop(state);

        let mut audit = self.audit.lock().expect("slot audit lock poisoned");
        audit.push_back(transition.audit.clone());
        while audit.len() > AUDIT_LIMIT {
            audit.pop_front();
        }
        Ok(transition.audit)
    }

    /// Snapshot of the current lifecycle state
    pub fn state(&self) -> SlotState {
        self.state.lock().expect("slot state lock poisoned").clone()
    }

    pub fn state_name(&self) -> &'static str {
        self.state
            .lock()
            .expect("slot state lock poisoned")
            .state_name()
    }

    /// Read under the lock so eligibility always reflects the latest
    /// transition
    pub fn is_eligible(&self) -> bool {
        self.state
            .lock()
            .expect("slot state lock poisoned")
            .is_eligible()
    }

    pub fn can_attempt_send(&self) -> bool {
        self.state
            .lock()
            .expect("slot state lock poisoned")
            .can_attempt_send()
    }

    pub fn active_driver(&self) -> Option<String> {
        self.state
            .lock()
            .expect("slot state lock poisoned")
            .driver_name()
            .map(str::to_string)
    }

    pub fn identity(&self) -> Option<String> {
        self.state
            .lock()
            .expect("slot state lock poisoned")
            .identity()
            .map(str::to_string)
    }

    /// Exclusive send permit; held across the driver call by design
    pub async fn acquire_send_gate(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.send_gate.lock().await
    }

    pub fn set_manually_disconnected(&self, value: bool) {
        self.manually_disconnected.store(value, Ordering::SeqCst);
    }

    pub fn is_manually_disconnected(&self) -> bool {
        self.manually_disconnected.load(Ordering::SeqCst)
    }

    pub fn record_send_failure(&self) -> u32 {
        self.failures
            .lock()
            .expect("failure window lock poisoned")
            .record_failure()
    }

    pub fn record_send_success(&self) {
        self.failures
            .lock()
            .expect("failure window lock poisoned")
            .record_success();
    }

    pub fn next_reconnect_attempt(&self) -> u32 {
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst)
    }

    pub fn reset_reconnect_attempts(&self) {
        self.reconnect_attempts.store(0, Ordering::SeqCst);
    }

    /// Recent lifecycle transitions, oldest first
    pub fn audit_trail(&self) -> Vec<SlotAuditEntry> {
        self.audit
            .lock()
            .expect("slot audit lock poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Slot Pool
// ----------------------------------------------------------------------------

/// The set of slots belonging to one tenant
#[derive(Debug)]
pub struct SlotPool {
    tenant: TenantId,
    slots: Vec<std::sync::Arc<SlotHandle>>,
}

impl SlotPool {
    /// Provision `count` slots numbered 1..=count
    pub fn new(tenant: TenantId, count: u16, failure_window: Duration) -> Self {
        let slots = (1..=count)
            .map(|n| {
                std::sync::Arc::new(SlotHandle::new(
                    SlotId::new(tenant.clone(), SlotNumber::new(n)),
                    failure_window,
                ))
            })
            .collect();
        Self { tenant, slots }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, number: SlotNumber) -> Option<std::sync::Arc<SlotHandle>> {
        self.slots.iter().find(|s| s.number() == number).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &std::sync::Arc<SlotHandle>> {
        self.slots.iter()
    }

    /// Slots currently eligible to carry traffic, ascending slot number
    pub fn eligible(&self) -> Vec<std::sync::Arc<SlotHandle>> {
        let mut eligible: Vec<_> = self
            .slots
            .iter()
            .filter(|s| s.is_eligible())
            .cloned()
            .collect();
        eligible.sort_by_key(|s| s.number());
        eligible
    }

    pub fn eligible_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_eligible()).count()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
