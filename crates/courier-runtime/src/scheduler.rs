//! Cadence scheduling
//!
//! One worker task per tenant drains queued assignments in batches on a
//! fixed tick, pacing individual sends with the configured delay and an
//! adaptive multiplier driven by the trailing error rate. Stopping is
//! cooperative: the stop signal is observed on batch boundaries, so an
//! in-flight batch always completes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use courier_core::{CadenceConfig, EngineConfig, RecipientAssignment};

use crate::engine::TenantRuntime;
use crate::events::EngineEvent;
use crate::managers::slot::SlotConnectionManager;

/// Trailing outcomes considered by the adaptive pacer
const PACER_WINDOW: usize = 20;
/// Upper bound on the adaptive delay multiplier
const PACER_MAX_MULTIPLIER: u32 = 8;

// ----------------------------------------------------------------------------
// Adaptive Pacer
// ----------------------------------------------------------------------------

/// Scales the inter-send delay with the trailing error rate
///
/// Error rate at or above one half doubles the multiplier (bounded), below
/// one quarter halves it back toward the base delay; in between it holds.
#[derive(Debug)]
pub struct AdaptivePacer {
    outcomes: VecDeque<bool>,
    multiplier: u32,
}

impl AdaptivePacer {
    pub fn new() -> Self {
        Self {
            outcomes: VecDeque::with_capacity(PACER_WINDOW),
            multiplier: 1,
        }
    }

    /// Record one send outcome and recompute the multiplier
    pub fn record(&mut self, success: bool) {
        self.outcomes.push_back(success);
        while self.outcomes.len() > PACER_WINDOW {
            self.outcomes.pop_front();
        }

        let errors = self.outcomes.iter().filter(|ok| !**ok).count();
        let rate = errors as f64 / self.outcomes.len() as f64;
        if rate >= 0.5 {
            self.multiplier = (self.multiplier * 2).min(PACER_MAX_MULTIPLIER);
        } else if rate < 0.25 {
            self.multiplier = (self.multiplier / 2).max(1);
        }
    }

    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    /// Delay to apply between sends under the given config
    pub fn effective_delay(&self, config: &CadenceConfig) -> Duration {
        if config.adaptive_mode {
            config.base_delay * self.multiplier
        } else {
            config.base_delay
        }
    }
}

impl Default for AdaptivePacer {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Cadence Worker
// ----------------------------------------------------------------------------

/// Spawn the per-tenant scheduling loop
///
/// The loop is independent per tenant: its tick, its stop signal, its
/// backlog. One tenant's pacing can never starve another's.
pub(crate) fn spawn_worker(
    rt: Arc<TenantRuntime>,
    manager: Arc<SlotConnectionManager>,
    engine_config: EngineConfig,
    mut stop_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // First tick after one full interval; immediate work goes through
        // the burst path, not the loop
        let start = tokio::time::Instant::now() + engine_config.tick_interval;
        let mut ticker = tokio::time::interval_at(start, engine_config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let active = {
                        let run_state = rt.run_state.lock().expect("run state lock poisoned");
                        run_state.is_active
                    };
                    if !active {
                        continue;
                    }
                    process_batch(&rt, &manager, &engine_config).await;
                }
            }
        }
        debug!(tenant = %rt.tenant, "cadence worker stopped");
    })
}

/// Drain and send one batch; used by the worker and by the manual tick
pub(crate) async fn process_batch(
    rt: &Arc<TenantRuntime>,
    manager: &Arc<SlotConnectionManager>,
    engine_config: &EngineConfig,
) {
    let config = {
        rt.cadence_config
            .read()
            .expect("cadence config lock poisoned")
            .clone()
    };

    let batch = {
        let mut queue = rt.queue.lock().expect("queue lock poisoned");
        queue.take_batch(config.batch_size)
    };
    if batch.is_empty() {
        let mut run_state = rt.run_state.lock().expect("run state lock poisoned");
        run_state.mark_tick();
        return;
    }

    debug!(tenant = %rt.tenant, size = batch.len(), "processing batch");

    for (i, assignment) in batch.iter().enumerate() {
        let delivered = send_with_retries(rt, manager, assignment, &config, engine_config).await;
        {
            let mut pacer = rt.pacer.lock().expect("pacer lock poisoned");
            pacer.record(delivered);
        }

        if i + 1 < batch.len() {
            let delay = {
                let pacer = rt.pacer.lock().expect("pacer lock poisoned");
                pacer.effective_delay(&config)
            };
            tokio::time::sleep(delay).await;
        }
    }

    let mut run_state = rt.run_state.lock().expect("run state lock poisoned");
    run_state.mark_tick();
}

/// Attempt one assignment up to the retry budget
///
/// Transient failures back off briefly and retry; a structural driver
/// rejection stops early. Exhaustion retires the assignment and counts one
/// error, exactly once.
pub(crate) async fn send_with_retries(
    rt: &Arc<TenantRuntime>,
    manager: &Arc<SlotConnectionManager>,
    assignment: &RecipientAssignment,
    config: &CadenceConfig,
    engine_config: &EngineConfig,
) -> bool {
    let Some(slot) = rt.pool.get(assignment.slot) else {
        // Pool was reshaped under us; put the work back
        let mut queue = rt.queue.lock().expect("queue lock poisoned");
        queue.requeue(&assignment.recipient);
        return false;
    };

    let message = {
        rt.template
            .read()
            .expect("template lock poisoned")
            .clone()
    };

    let budget = config.max_retries.max(1);
    for attempt in 1..=budget {
        match manager
            .send(&slot, &assignment.recipient, &message, &rt.events)
            .await
        {
            Ok(_) => {
                {
                    let mut queue = rt.queue.lock().expect("queue lock poisoned");
                    queue.complete_sent(&assignment.recipient);
                }
                rt.stats.record_sent();
                return true;
            }
            Err(error) => {
                {
                    let mut queue = rt.queue.lock().expect("queue lock poisoned");
                    queue.record_failure(&assignment.recipient);
                }
                if !error.is_transient() {
                    warn!(
                        tenant = %rt.tenant,
                        recipient = %assignment.recipient,
                        %error,
                        "non-transient send failure; abandoning retries"
                    );
                    break;
                }
                if attempt < budget {
                    tokio::time::sleep(engine_config.retry_backoff).await;
                }
            }
        }
    }

    {
        let mut queue = rt.queue.lock().expect("queue lock poisoned");
        queue.complete_exhausted(&assignment.recipient);
    }
    rt.stats.record_error();
    let _ = rt.events.send(EngineEvent::AssignmentExhausted {
        tenant: rt.tenant.clone(),
        recipient: assignment.recipient.clone(),
    });
    false
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
