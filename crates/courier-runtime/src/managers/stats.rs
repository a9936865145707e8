//! Per-tenant outcome tracking
//!
//! Counters are plain atomics updated at send completion, so `get_stats`
//! always reflects what actually happened rather than an optimistic view.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use courier_core::Timestamp;

// ----------------------------------------------------------------------------
// Tenant Stats
// ----------------------------------------------------------------------------

/// Monotonic per-tenant send counters
///
/// `total_errors` counts exhausted assignments, incremented once per
/// exhaustion, not once per retry.
#[derive(Debug, Default)]
pub struct TenantStats {
    total_sent: AtomicU64,
    total_errors: AtomicU64,
}

impl TenantStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.total_sent.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn total_sent(&self) -> u64 {
        self.total_sent.load(Ordering::SeqCst)
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::SeqCst)
    }

    /// Fraction of completed assignments that were delivered
    pub fn success_rate(&self) -> f64 {
        let sent = self.total_sent() as f64;
        let errors = self.total_errors() as f64;
        if sent + errors == 0.0 {
            0.0
        } else {
            sent / (sent + errors)
        }
    }
}

// ----------------------------------------------------------------------------
// Cadence Run State
// ----------------------------------------------------------------------------

/// Scheduler activity flag plus tick bookkeeping for one tenant
#[derive(Debug, Clone, Default)]
pub struct CadenceRunState {
    pub is_active: bool,
    pub last_tick: Option<Timestamp>,
    pub batches_run: u64,
}

impl CadenceRunState {
    pub fn mark_tick(&mut self) {
        self.last_tick = Some(Timestamp::now());
        self.batches_run += 1;
    }
}

// ----------------------------------------------------------------------------
// Stats Snapshot
// ----------------------------------------------------------------------------

/// Point-in-time view returned by the control API
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// Slots currently able to carry traffic
    pub active_slots: usize,
    /// Slots provisioned for the tenant
    pub total_connections: usize,
    pub cadence_active: bool,
    pub total_sent: u64,
    pub total_errors: u64,
    pub success_rate: f64,
    /// Assignments waiting for release
    pub queued: usize,
    /// Live queue depth per slot number
    pub queue_depths: HashMap<u16, usize>,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
