//! Round-robin recipient distribution
//!
//! Assigns pending recipients to eligible slots in rotation. Selection is
//! least-queue-depth with ties broken by the lowest slot number, which makes
//! distribution deterministic: starting from an idle pool it degenerates to
//! plain rotation, and with uneven depths it pulls the pool back toward
//! balance.

use std::collections::HashMap;

use tracing::debug;

use courier_core::{
    AssignmentQueue, DispatchError, Priority, RecipientAssignment, RecipientId, Result, SlotNumber,
};

use crate::pool::SlotPool;

// ----------------------------------------------------------------------------
// Distribution
// ----------------------------------------------------------------------------

/// Outcome of one distribute call
#[derive(Debug)]
pub struct Distribution {
    /// One entry per input recipient, existing assignments included
    pub assignments: Vec<RecipientAssignment>,
    /// How many assignments this call created (the rest already existed)
    pub created: usize,
}

/// Assign recipients to eligible slots in rotation
///
/// Fails with `NoEligibleSlots` before creating anything when the pool has
/// no `Connected` slot; re-distributing a recipient with a live assignment
/// is a no-op that returns the existing assignment.
pub fn distribute(
    pool: &SlotPool,
    queue: &mut AssignmentQueue,
    recipients: &[RecipientId],
    priority: Priority,
) -> Result<Distribution> {
    let eligible = pool.eligible();
    if eligible.is_empty() {
        return Err(DispatchError::no_eligible_slots(pool.tenant()));
    }

    let mut depths: HashMap<SlotNumber, usize> = eligible
        .iter()
        .map(|slot| {
            let number = slot.number();
            (number, queue.depth(number))
        })
        .collect();
    let eligible_numbers: Vec<SlotNumber> = eligible.iter().map(|s| s.number()).collect();

    let mut assignments = Vec::with_capacity(recipients.len());
    let mut created = 0;

    for recipient in recipients {
        if recipient.is_empty() {
            debug!(tenant = %pool.tenant(), "skipping recipient with no digits");
            continue;
        }

        let target = next_slot(&eligible_numbers, &depths)
            .expect("eligible set is non-empty");
        let (assignment, was_created) =
            queue.get_or_insert(recipient.clone(), target, priority);
        if was_created {
            *depths.entry(assignment.slot).or_default() += 1;
            created += 1;
        }
        assignments.push(assignment);
    }

    debug!(
        tenant = %pool.tenant(),
        requested = recipients.len(),
        created,
        slots = eligible_numbers.len(),
        "distribution complete"
    );

    Ok(Distribution {
        assignments,
        created,
    })
}

/// Rebind a purged slot's queued assignments across the remaining eligible
/// slots; returns how many moved
///
/// With zero eligible slots the assignments stay queued on their old slot
/// number, to be rebound by a later distribute call or reconnect — they are
/// never dropped.
pub fn rebind_purged_slot(
    pool: &SlotPool,
    queue: &mut AssignmentQueue,
    purged: SlotNumber,
) -> usize {
    let eligible: Vec<SlotNumber> = pool
        .eligible()
        .iter()
        .map(|s| s.number())
        .filter(|&n| n != purged)
        .collect();
    if eligible.is_empty() {
        debug!(tenant = %pool.tenant(), slot = %purged, "no eligible slots; purged queue parked");
        return 0;
    }

    let mut depths: HashMap<SlotNumber, usize> = eligible
        .iter()
        .map(|&n| (n, queue.depth(n)))
        .collect();

    queue.rebind_slot(purged, || {
        let target = next_slot(&eligible, &depths)?;
        *depths.entry(target).or_default() += 1;
        Some(target)
    })
}

/// Deterministic slot choice: least depth, ties to the lowest number
fn next_slot(eligible: &[SlotNumber], depths: &HashMap<SlotNumber, usize>) -> Option<SlotNumber> {
    eligible
        .iter()
        .copied()
        .min_by_key(|n| (depths.get(n).copied().unwrap_or(0), *n))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
