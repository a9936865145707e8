//! Slot lifecycle state machine
//!
//! Provides type-safe connection lifecycle management for one physical slot.
//! States are linear: a transition consumes the current state, so invalid
//! edges are unrepresentable at runtime and every accepted edge produces an
//! audit entry.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::driver::PairingArtifact;
use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Slot State Types
// ----------------------------------------------------------------------------

/// Lifecycle state of one physical connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SlotState {
    /// No connection; the slot may be awaiting a reconnect
    Disconnected(DisconnectedState),
    /// A driver is establishing the transport
    Connecting(ConnectingState),
    /// Transport up, waiting on user-mediated pairing
    AwaitingAuth(AwaitingAuthState),
    /// Authenticated and able to carry traffic
    Connected(ConnectedState),
    /// Transport reported open but sends are failing
    Degraded(DegradedState),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DisconnectedState {
    /// Identity from the last successful authentication, if any
    pub last_identity: Option<String>,
    pub last_seen: Option<Timestamp>,
    /// Connect attempts that ended in failure since the last success
    pub failed_attempts: u32,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectingState {
    /// Driver currently attempting the connection
    pub driver: String,
    pub started: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwaitingAuthState {
    pub driver: String,
    /// Artifact to surface to the operator, verbatim
    pub artifact: PairingArtifact,
    pub since: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedState {
    pub driver: String,
    /// Resolved provider identity (phone/account identifier)
    pub identity: String,
    pub connected_since: Timestamp,
    pub last_activity: Timestamp,
    pub messages_sent: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradedState {
    pub driver: String,
    pub identity: String,
    pub since: Timestamp,
    pub last_activity: Timestamp,
    pub messages_sent: u64,
    pub reason: String,
}

// ----------------------------------------------------------------------------
// Transition Events
// ----------------------------------------------------------------------------

/// Events that drive slot state transitions
#[derive(Debug, Clone)]
pub enum SlotEvent {
    /// Begin a connect attempt with the named driver
    ConnectRequested { driver: String },
    /// Driver emitted a pairing artifact
    PairingIssued { artifact: PairingArtifact },
    /// Driver reported successful authentication
    AuthSucceeded { identity: String },
    /// Connect or auth attempt failed (driver error or timeout)
    AttemptFailed { reason: String },
    /// A send completed successfully
    SendSucceeded,
    /// Repeated send failures crossed the degrade threshold
    Degrade { reason: String },
    /// Transport closed or failure threshold crossed while degraded
    ConnectionLost { reason: String },
    /// Operator-initiated disconnect; suppresses auto-reconnect
    ManualDisconnect,
}

impl SlotEvent {
    fn name(&self) -> &'static str {
        match self {
            SlotEvent::ConnectRequested { .. } => "ConnectRequested",
            SlotEvent::PairingIssued { .. } => "PairingIssued",
            SlotEvent::AuthSucceeded { .. } => "AuthSucceeded",
            SlotEvent::AttemptFailed { .. } => "AttemptFailed",
            SlotEvent::SendSucceeded => "SendSucceeded",
            SlotEvent::Degrade { .. } => "Degrade",
            SlotEvent::ConnectionLost { .. } => "ConnectionLost",
            SlotEvent::ManualDisconnect => "ManualDisconnect",
        }
    }
}

// ----------------------------------------------------------------------------
// Transition Results
// ----------------------------------------------------------------------------

/// Result of an accepted transition
#[derive(Debug, Clone)]
pub struct SlotTransition {
    pub new_state: SlotState,
    pub audit: SlotAuditEntry,
}

/// Audit trail entry for one transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotAuditEntry {
    pub at: Timestamp,
    pub from_state: String,
    pub to_state: String,
    pub event: String,
}

/// Rejected transition (invalid edge for the current state)
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid slot transition: {event} while {state}")]
pub struct SlotTransitionError {
    pub state: String,
    pub event: String,
}

// ----------------------------------------------------------------------------
// State Machine Implementation
// ----------------------------------------------------------------------------

impl SlotState {
    /// Initial state for a freshly provisioned slot
    pub fn new_disconnected() -> Self {
        SlotState::Disconnected(DisconnectedState::default())
    }

    pub fn state_name(&self) -> &'static str {
        match self {
            SlotState::Disconnected(_) => "Disconnected",
            SlotState::Connecting(_) => "Connecting",
            SlotState::AwaitingAuth(_) => "AwaitingAuth",
            SlotState::Connected(_) => "Connected",
            SlotState::Degraded(_) => "Degraded",
        }
    }

    /// Eligible to be assigned new traffic by the distributor
    pub fn is_eligible(&self) -> bool {
        matches!(self, SlotState::Connected(_))
    }

    /// A send may be attempted (degraded slots keep trying; success recovers
    /// them, further failures disconnect them)
    pub fn can_attempt_send(&self) -> bool {
        matches!(self, SlotState::Connected(_) | SlotState::Degraded(_))
    }

    /// Name of the driver currently bound to this slot, if any
    pub fn driver_name(&self) -> Option<&str> {
        match self {
            SlotState::Connecting(s) => Some(&s.driver),
            SlotState::AwaitingAuth(s) => Some(&s.driver),
            SlotState::Connected(s) => Some(&s.driver),
            SlotState::Degraded(s) => Some(&s.driver),
            SlotState::Disconnected(_) => None,
        }
    }

    /// Resolved identity once authenticated
    pub fn identity(&self) -> Option<&str> {
        match self {
            SlotState::Connected(s) => Some(&s.identity),
            SlotState::Degraded(s) => Some(&s.identity),
            SlotState::Disconnected(s) => s.last_identity.as_deref(),
            _ => None,
        }
    }

    /// Process an event, consuming the current state
    pub fn transition(self, event: SlotEvent) -> Result<SlotTransition, SlotTransitionError> {
        let from_state = self.state_name().to_string();
        let event_name = event.name().to_string();
        let now = Timestamp::now();

        let new_state = match (self, event) {
            // From Disconnected
            (SlotState::Disconnected(_), SlotEvent::ConnectRequested { driver }) => {
                SlotState::Connecting(ConnectingState {
                    driver,
                    started: now,
                })
            }

            // From Connecting
            (SlotState::Connecting(s), SlotEvent::PairingIssued { artifact }) => {
                SlotState::AwaitingAuth(AwaitingAuthState {
                    driver: s.driver,
                    artifact,
                    since: now,
                })
            }
            (SlotState::Connecting(s), SlotEvent::AuthSucceeded { identity }) => {
                // Session restore: some providers authenticate without a
                // fresh pairing round
                SlotState::Connected(ConnectedState {
                    driver: s.driver,
                    identity,
                    connected_since: now,
                    last_activity: now,
                    messages_sent: 0,
                })
            }

            // From AwaitingAuth
            (SlotState::AwaitingAuth(s), SlotEvent::PairingIssued { artifact }) => {
                // Providers rotate pairing artifacts while unattended
                SlotState::AwaitingAuth(AwaitingAuthState {
                    driver: s.driver,
                    artifact,
                    since: s.since,
                })
            }
            (SlotState::AwaitingAuth(s), SlotEvent::AuthSucceeded { identity }) => {
                SlotState::Connected(ConnectedState {
                    driver: s.driver,
                    identity,
                    connected_since: now,
                    last_activity: now,
                    messages_sent: 0,
                })
            }

            // Failed connect/auth attempts fall back to Disconnected; the
            // manager decides whether another driver gets a turn
            (SlotState::Connecting(_), SlotEvent::AttemptFailed { reason })
            | (SlotState::AwaitingAuth(_), SlotEvent::AttemptFailed { reason }) => {
                SlotState::Disconnected(DisconnectedState {
                    last_identity: None,
                    last_seen: Some(now),
                    failed_attempts: 1,
                    reason: Some(reason),
                })
            }

            // From Connected
            (SlotState::Connected(mut s), SlotEvent::SendSucceeded) => {
                s.last_activity = now;
                s.messages_sent += 1;
                SlotState::Connected(s)
            }
            (SlotState::Connected(s), SlotEvent::Degrade { reason }) => {
                SlotState::Degraded(DegradedState {
                    driver: s.driver,
                    identity: s.identity,
                    since: now,
                    last_activity: s.last_activity,
                    messages_sent: s.messages_sent,
                    reason,
                })
            }

            // From Degraded: one successful send recovers the slot
            (SlotState::Degraded(s), SlotEvent::SendSucceeded) => {
                SlotState::Connected(ConnectedState {
                    driver: s.driver,
                    identity: s.identity,
                    connected_since: s.since,
                    last_activity: now,
                    messages_sent: s.messages_sent + 1,
                })
            }

            (SlotState::Connected(s), SlotEvent::ConnectionLost { reason }) => {
                SlotState::Disconnected(DisconnectedState {
                    last_identity: Some(s.identity),
                    last_seen: Some(s.last_activity),
                    failed_attempts: 0,
                    reason: Some(reason),
                })
            }
            (SlotState::Degraded(s), SlotEvent::ConnectionLost { reason }) => {
                SlotState::Disconnected(DisconnectedState {
                    last_identity: Some(s.identity),
                    last_seen: Some(s.last_activity),
                    failed_attempts: 0,
                    reason: Some(reason),
                })
            }

            // Manual disconnect is reachable from every state
            (state, SlotEvent::ManualDisconnect) => {
                SlotState::Disconnected(DisconnectedState {
                    last_identity: state.identity().map(str::to_string),
                    last_seen: Some(now),
                    failed_attempts: 0,
                    reason: Some("manual disconnect".to_string()),
                })
            }

            (state, event) => {
                return Err(SlotTransitionError {
                    state: state.state_name().to_string(),
                    event: event.name().to_string(),
                })
            }
        };

        let audit = SlotAuditEntry {
            at: now,
            from_state,
            to_state: new_state.state_name().to_string(),
            event: event_name,
        };

        Ok(SlotTransition { new_state, audit })
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.state_name())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> PairingArtifact {
        PairingArtifact::new("primary", b"qr")
    }

    fn connect(state: SlotState) -> SlotState {
        state
            .transition(SlotEvent::ConnectRequested {
                driver: "primary".into(),
            })
            .unwrap()
            .new_state
    }

    #[test]
    fn test_full_lifecycle() {
        let state = SlotState::new_disconnected();
        let state = connect(state);
        assert_eq!(state.state_name(), "Connecting");

        let state = state
            .transition(SlotEvent::PairingIssued { artifact: artifact() })
            .unwrap()
            .new_state;
        assert_eq!(state.state_name(), "AwaitingAuth");
        assert!(!state.is_eligible());

        let state = state
            .transition(SlotEvent::AuthSucceeded {
                identity: "5511988880000".into(),
            })
            .unwrap()
            .new_state;
        assert_eq!(state.state_name(), "Connected");
        assert!(state.is_eligible());
        assert_eq!(state.identity(), Some("5511988880000"));
    }

    #[test]
    fn test_session_restore_skips_pairing() {
        let state = connect(SlotState::new_disconnected());
        let state = state
            .transition(SlotEvent::AuthSucceeded {
                identity: "5511988880000".into(),
            })
            .unwrap()
            .new_state;
        assert_eq!(state.state_name(), "Connected");
    }

    #[test]
    fn test_degrade_and_recover() {
        let state = connect(SlotState::new_disconnected());
        let state = state
            .transition(SlotEvent::AuthSucceeded { identity: "id".into() })
            .unwrap()
            .new_state;
        let state = state
            .transition(SlotEvent::Degrade {
                reason: "3 consecutive send failures".into(),
            })
            .unwrap()
            .new_state;
        assert_eq!(state.state_name(), "Degraded");
        assert!(!state.is_eligible());
        assert!(state.can_attempt_send());

        let state = state.transition(SlotEvent::SendSucceeded).unwrap().new_state;
        assert_eq!(state.state_name(), "Connected");
    }

    #[test]
    fn test_connection_lost_keeps_identity() {
        let state = connect(SlotState::new_disconnected());
        let state = state
            .transition(SlotEvent::AuthSucceeded { identity: "id".into() })
            .unwrap()
            .new_state;
        let state = state
            .transition(SlotEvent::ConnectionLost {
                reason: "stream closed".into(),
            })
            .unwrap()
            .new_state;
        assert_eq!(state.state_name(), "Disconnected");
        assert_eq!(state.identity(), Some("id"));
    }

    #[test]
    fn test_manual_disconnect_from_any_state() {
        let state = SlotState::new_disconnected()
            .transition(SlotEvent::ManualDisconnect)
            .unwrap()
            .new_state;
        assert_eq!(state.state_name(), "Disconnected");

        let state = connect(SlotState::new_disconnected())
            .transition(SlotEvent::ManualDisconnect)
            .unwrap()
            .new_state;
        assert_eq!(state.state_name(), "Disconnected");
    }

    #[test]
    fn test_invalid_edges_rejected() {
        let state = SlotState::new_disconnected();
        let err = state.transition(SlotEvent::SendSucceeded).unwrap_err();
        assert_eq!(err.state, "Disconnected");
        assert_eq!(err.event, "SendSucceeded");

        let state = connect(SlotState::new_disconnected());
        assert!(state
            .transition(SlotEvent::ConnectRequested {
                driver: "backup".into()
            })
            .is_err());
    }

    #[test]
    fn test_audit_entry_records_edge() {
        let state = SlotState::new_disconnected();
        let transition = state
            .transition(SlotEvent::ConnectRequested {
                driver: "primary".into(),
            })
            .unwrap();
        assert_eq!(transition.audit.from_state, "Disconnected");
        assert_eq!(transition.audit.to_state, "Connecting");
        assert_eq!(transition.audit.event, "ConnectRequested");
    }
}
