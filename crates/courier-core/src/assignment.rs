//! Recipient assignment tracking
//!
//! This module contains the per-tenant assignment table binding recipients to
//! slots. The table is the idempotency anchor for distribution: one
//! non-terminal assignment per recipient, no duplicates. Terminal records
//! move to a bounded history ring for stats and operator inspection.

use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

use serde::{Deserialize, Serialize};

use crate::types::{RecipientId, SlotNumber, Timestamp};

/// Terminal records retained for inspection
const HISTORY_LIMIT: usize = 256;

// ----------------------------------------------------------------------------
// Assignment Types
// ----------------------------------------------------------------------------

/// Send priority attached at distribution time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Normal,
    /// Reply-triggered burst; drained before normal work
    Immediate,
}

/// Lifecycle of one assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentStatus {
    /// Waiting for the scheduler to release it
    Queued,
    /// Delivered; terminal
    Sent,
    /// Last attempt failed; retries remain
    Failed,
    /// Retry budget spent; terminal
    Exhausted,
}

impl AssignmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AssignmentStatus::Sent | AssignmentStatus::Exhausted)
    }
}

/// Binding of one recipient to one slot for an eventual send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientAssignment {
    pub id: Uuid,
    pub recipient: RecipientId,
    pub slot: SlotNumber,
    pub priority: Priority,
    pub status: AssignmentStatus,
    /// Send attempts made so far
    pub attempts: u32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl RecipientAssignment {
    fn new(recipient: RecipientId, slot: SlotNumber, priority: Priority) -> Self {
        let now = Timestamp::now();
        Self {
            id: Uuid::new_v4(),
            recipient,
            slot,
            priority,
            status: AssignmentStatus::Queued,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

// ----------------------------------------------------------------------------
// Assignment Queue
// ----------------------------------------------------------------------------

/// Per-tenant assignment table with FIFO release order
///
/// Lives behind the tenant's queue mutex; every method is a short critical
/// section with no I/O.
#[derive(Debug, Default)]
pub struct AssignmentQueue {
    /// Live (non-terminal) assignments, one per recipient
    live: HashMap<RecipientId, RecipientAssignment>,
    /// Release order among queued recipients
    order: VecDeque<RecipientId>,
    /// Terminal records, newest last
    history: VecDeque<RecipientAssignment>,
}

impl AssignmentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent insert: an existing non-terminal assignment for the
    /// recipient is returned as-is and `created` is false
    pub fn get_or_insert(
        &mut self,
        recipient: RecipientId,
        slot: SlotNumber,
        priority: Priority,
    ) -> (RecipientAssignment, bool) {
        if let Some(existing) = self.live.get(&recipient) {
            return (existing.clone(), false);
        }
        let assignment = RecipientAssignment::new(recipient.clone(), slot, priority);
        self.live.insert(recipient.clone(), assignment.clone());
        self.order.push_back(recipient);
        (assignment, true)
    }

    pub fn get(&self, recipient: &RecipientId) -> Option<&RecipientAssignment> {
        self.live.get(recipient)
    }

    /// Number of live assignments bound to the given slot
    pub fn depth(&self, slot: SlotNumber) -> usize {
        self.live.values().filter(|a| a.slot == slot).count()
    }

    /// Live assignments awaiting release
    pub fn pending_count(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Pop up to `n` assignments for sending, immediate priority first,
    /// FIFO within each priority class
    ///
    /// Popped assignments stay live (still non-terminal) until completed, so
    /// re-distribution during an in-flight batch remains a no-op.
    pub fn take_batch(&mut self, n: usize) -> Vec<RecipientAssignment> {
        let mut batch = Vec::with_capacity(n.min(self.order.len()));

        for pass in [Priority::Immediate, Priority::Normal] {
            let mut remaining = VecDeque::with_capacity(self.order.len());
            while let Some(recipient) = self.order.pop_front() {
                let matches_pass = self
                    .live
                    .get(&recipient)
                    .map(|a| a.priority == pass)
                    .unwrap_or(false);
                if matches_pass && batch.len() < n {
                    if let Some(a) = self.live.get(&recipient) {
                        batch.push(a.clone());
                    }
                } else {
                    remaining.push_back(recipient);
                }
            }
            self.order = remaining;
        }

        batch
    }

    /// Pop one specific recipient for an out-of-band send
    ///
    /// Returns `None` when the recipient has no queued assignment (already
    /// taken by a tick worker, terminal, or never distributed).
    pub fn take_recipient(&mut self, recipient: &RecipientId) -> Option<RecipientAssignment> {
        if !self.order.contains(recipient) {
            return None;
        }
        self.order.retain(|r| r != recipient);
        self.live.get(recipient).cloned()
    }

    /// Record a failed attempt; the assignment stays live for retry
    pub fn record_failure(&mut self, recipient: &RecipientId) {
        if let Some(a) = self.live.get_mut(recipient) {
            a.attempts += 1;
            a.status = AssignmentStatus::Failed;
            a.updated_at = Timestamp::now();
        }
    }

    /// Mark delivered and retire to history
    pub fn complete_sent(&mut self, recipient: &RecipientId) {
        if let Some(mut a) = self.live.remove(recipient) {
            a.attempts += 1;
            a.status = AssignmentStatus::Sent;
            a.updated_at = Timestamp::now();
            self.push_history(a);
        }
        self.order.retain(|r| r != recipient);
    }

    /// Mark exhausted after the retry budget is spent and retire to history
    pub fn complete_exhausted(&mut self, recipient: &RecipientId) {
        if let Some(mut a) = self.live.remove(recipient) {
            a.status = AssignmentStatus::Exhausted;
            a.updated_at = Timestamp::now();
            self.push_history(a);
        }
        self.order.retain(|r| r != recipient);
    }

    /// Return an in-flight assignment to the queue (slot purge, engine
    /// shutdown mid-batch)
    pub fn requeue(&mut self, recipient: &RecipientId) {
        if let Some(a) = self.live.get_mut(recipient) {
            a.status = AssignmentStatus::Queued;
            a.updated_at = Timestamp::now();
            if !self.order.contains(recipient) {
                self.order.push_back(recipient.clone());
            }
        }
    }

    /// Withdraw a recipient entirely (they replied; no further outreach)
    pub fn cancel(&mut self, recipient: &RecipientId) -> bool {
        self.order.retain(|r| r != recipient);
        self.live.remove(recipient).is_some()
    }

    /// Move every queued assignment off `slot`, rebinding each via the
    /// provided chooser; used when a slot is purged. Returns how many were
    /// rebound. A chooser returning `None` leaves the assignment in place.
    pub fn rebind_slot<F>(&mut self, slot: SlotNumber, mut choose: F) -> usize
    where
        F: FnMut() -> Option<SlotNumber>,
    {
        let mut moved = 0;
        for a in self.live.values_mut() {
            if a.slot == slot && a.status != AssignmentStatus::Sent {
                if let Some(target) = choose() {
                    a.slot = target;
                    a.updated_at = Timestamp::now();
                    moved += 1;
                }
            }
        }
        moved
    }

    /// Per-slot live depth snapshot
    pub fn depth_by_slot(&self) -> HashMap<SlotNumber, usize> {
        let mut depths: HashMap<SlotNumber, usize> = HashMap::new();
        for a in self.live.values() {
            *depths.entry(a.slot).or_default() += 1;
        }
        depths
    }

    /// Recently retired assignments, newest last
    pub fn history(&self) -> impl Iterator<Item = &RecipientAssignment> {
        self.history.iter()
    }

    fn push_history(&mut self, assignment: RecipientAssignment) {
        self.history.push_back(assignment);
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient(n: u64) -> RecipientId {
        RecipientId::new(format!("55119{n:08}"))
    }

    #[test]
    fn test_idempotent_insert() {
        let mut queue = AssignmentQueue::new();
        let (first, created) = queue.get_or_insert(recipient(1), SlotNumber::new(1), Priority::Normal);
        assert!(created);

        let (second, created) =
            queue.get_or_insert(recipient(1), SlotNumber::new(2), Priority::Immediate);
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.slot, SlotNumber::new(1));
        assert_eq!(queue.pending_count(), 1);
    }

    #[test]
    fn test_terminal_allows_reinsert() {
        let mut queue = AssignmentQueue::new();
        let (first, _) = queue.get_or_insert(recipient(1), SlotNumber::new(1), Priority::Normal);
        queue.complete_sent(&recipient(1));

        let (second, created) =
            queue.get_or_insert(recipient(1), SlotNumber::new(1), Priority::Normal);
        assert!(created);
        assert_ne!(second.id, first.id);
    }

    #[test]
    fn test_immediate_drains_first() {
        let mut queue = AssignmentQueue::new();
        queue.get_or_insert(recipient(1), SlotNumber::new(1), Priority::Normal);
        queue.get_or_insert(recipient(2), SlotNumber::new(1), Priority::Immediate);
        queue.get_or_insert(recipient(3), SlotNumber::new(1), Priority::Normal);

        let batch = queue.take_batch(2);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].recipient, recipient(2));
        assert_eq!(batch[1].recipient, recipient(1));
        assert_eq!(queue.pending_count(), 1);
    }

    #[test]
    fn test_exhaustion_retires_assignment() {
        let mut queue = AssignmentQueue::new();
        queue.get_or_insert(recipient(1), SlotNumber::new(1), Priority::Normal);
        queue.take_batch(1);
        queue.record_failure(&recipient(1));
        queue.record_failure(&recipient(1));
        queue.complete_exhausted(&recipient(1));

        assert!(queue.get(&recipient(1)).is_none());
        let last = queue.history().last().unwrap();
        assert_eq!(last.status, AssignmentStatus::Exhausted);
        assert_eq!(last.attempts, 2);
    }

    #[test]
    fn test_requeue_after_take() {
        let mut queue = AssignmentQueue::new();
        queue.get_or_insert(recipient(1), SlotNumber::new(1), Priority::Normal);
        let batch = queue.take_batch(1);
        assert_eq!(batch.len(), 1);
        assert_eq!(queue.pending_count(), 0);

        queue.requeue(&recipient(1));
        assert_eq!(queue.pending_count(), 1);
        assert_eq!(
            queue.get(&recipient(1)).unwrap().status,
            AssignmentStatus::Queued
        );
    }

    #[test]
    fn test_rebind_slot() {
        let mut queue = AssignmentQueue::new();
        queue.get_or_insert(recipient(1), SlotNumber::new(1), Priority::Normal);
        queue.get_or_insert(recipient(2), SlotNumber::new(1), Priority::Normal);
        queue.get_or_insert(recipient(3), SlotNumber::new(2), Priority::Normal);

        let moved = queue.rebind_slot(SlotNumber::new(1), || Some(SlotNumber::new(2)));
        assert_eq!(moved, 2);
        assert_eq!(queue.depth(SlotNumber::new(2)), 3);
        assert_eq!(queue.depth(SlotNumber::new(1)), 0);
    }

    #[test]
    fn test_cancel_removes_pending() {
        let mut queue = AssignmentQueue::new();
        queue.get_or_insert(recipient(1), SlotNumber::new(1), Priority::Normal);
        assert!(queue.cancel(&recipient(1)));
        assert!(queue.is_empty());
        assert!(!queue.cancel(&recipient(1)));
    }
}
