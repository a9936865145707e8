//! Error types for the courier dispatch engine
//!
//! Two layers: [`DriverError`] is what a session driver reports for a single
//! operation, and [`DispatchError`] is the engine-level taxonomy surfaced
//! through the control API. Transient driver errors are consumed by the
//! retry loops in the scheduler and never escape it; structural errors abort
//! the triggering call immediately.

use crate::types::{RecipientId, SlotId, TenantId};

// ----------------------------------------------------------------------------
// Driver Errors
// ----------------------------------------------------------------------------

/// Failure reported by a session driver for one connect/send/disconnect call
///
/// The driver itself never retries; classification here is what the slot
/// manager and scheduler base their retry policy on.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    #[error("provider unreachable: {reason}")]
    Unreachable { reason: String },
    #[error("authentication rejected by provider: {reason}")]
    AuthRejected { reason: String },
    #[error("rate limited by provider: {reason}")]
    RateLimited { reason: String },
    #[error("driver failure: {reason}")]
    Unknown { reason: String },
}

impl DriverError {
    pub fn unreachable<S: Into<String>>(reason: S) -> Self {
        DriverError::Unreachable {
            reason: reason.into(),
        }
    }

    pub fn auth_rejected<S: Into<String>>(reason: S) -> Self {
        DriverError::AuthRejected {
            reason: reason.into(),
        }
    }

    pub fn rate_limited<S: Into<String>>(reason: S) -> Self {
        DriverError::RateLimited {
            reason: reason.into(),
        }
    }

    pub fn unknown<S: Into<String>>(reason: S) -> Self {
        DriverError::Unknown {
            reason: reason.into(),
        }
    }

    /// Whether a retry with the same driver can plausibly succeed
    ///
    /// `AuthRejected` is structural: retrying without re-pairing cannot help.
    pub fn is_transient(&self) -> bool {
        !matches!(self, DriverError::AuthRejected { .. })
    }
}

// ----------------------------------------------------------------------------
// Dispatch Errors
// ----------------------------------------------------------------------------

/// Engine-level error taxonomy surfaced through the control API
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// No slot in the tenant's pool is in a state that can carry traffic
    #[error("no eligible slots for tenant {tenant}")]
    NoEligibleSlots { tenant: TenantId },

    /// No tenant owns the given recipient
    #[error("no tenant resolved for recipient {recipient}")]
    TenantUnresolved { recipient: RecipientId },

    /// The tenant exists but has zero connected slots
    #[error("tenant {tenant} has no active slot")]
    NoActiveSlot { tenant: TenantId },

    /// The recipient is not a member of the tenant's recipient set
    #[error("recipient {recipient} is not owned by tenant {tenant}")]
    RecipientNotOwned {
        tenant: TenantId,
        recipient: RecipientId,
    },

    /// Terminal outcome after the per-send retry budget is spent
    #[error("send to {recipient} exhausted after {attempts} attempts")]
    SendExhausted {
        recipient: RecipientId,
        attempts: u32,
    },

    #[error("unknown tenant {tenant}; call init_slots first")]
    TenantUnknown { tenant: TenantId },

    #[error("slot {slot} not found")]
    SlotNotFound { slot: SlotId },

    #[error("invalid configuration: {reason}")]
    Configuration { reason: String },

    /// Internal channel closed or lagged (engine event stream, driver events)
    #[error("channel error: {message}")]
    Channel { message: String },
}

impl DispatchError {
    pub fn no_eligible_slots(tenant: &TenantId) -> Self {
        DispatchError::NoEligibleSlots {
            tenant: tenant.clone(),
        }
    }

    pub fn tenant_unresolved(recipient: &RecipientId) -> Self {
        DispatchError::TenantUnresolved {
            recipient: recipient.clone(),
        }
    }

    pub fn no_active_slot(tenant: &TenantId) -> Self {
        DispatchError::NoActiveSlot {
            tenant: tenant.clone(),
        }
    }

    pub fn recipient_not_owned(tenant: &TenantId, recipient: &RecipientId) -> Self {
        DispatchError::RecipientNotOwned {
            tenant: tenant.clone(),
            recipient: recipient.clone(),
        }
    }

    pub fn tenant_unknown(tenant: &TenantId) -> Self {
        DispatchError::TenantUnknown {
            tenant: tenant.clone(),
        }
    }

    pub fn slot_not_found(slot: &SlotId) -> Self {
        DispatchError::SlotNotFound { slot: slot.clone() }
    }

    pub fn config_error<S: Into<String>>(reason: S) -> Self {
        DispatchError::Configuration {
            reason: reason.into(),
        }
    }

    pub fn channel_error<S: Into<String>>(message: S) -> Self {
        DispatchError::Channel {
            message: message.into(),
        }
    }

    /// Structural errors abort the triggering call and must reach the caller
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            DispatchError::NoEligibleSlots { .. }
                | DispatchError::TenantUnresolved { .. }
                | DispatchError::NoActiveSlot { .. }
                | DispatchError::RecipientNotOwned { .. }
        )
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, DispatchError>;
pub type DriverResult<T> = core::result::Result<T, DriverError>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TenantId;

    #[test]
    fn test_transient_classification() {
        assert!(DriverError::unreachable("timeout").is_transient());
        assert!(DriverError::rate_limited("429").is_transient());
        assert!(DriverError::unknown("socket reset").is_transient());
        assert!(!DriverError::auth_rejected("401").is_transient());
    }

    #[test]
    fn test_structural_classification() {
        let tenant = TenantId::new("acme");
        let recipient = RecipientId::new("5511999990000");

        assert!(DispatchError::no_eligible_slots(&tenant).is_structural());
        assert!(DispatchError::tenant_unresolved(&recipient).is_structural());
        assert!(DispatchError::no_active_slot(&tenant).is_structural());
        assert!(DispatchError::recipient_not_owned(&tenant, &recipient).is_structural());
        assert!(!DispatchError::from(DriverError::unreachable("x")).is_structural());
    }
}
