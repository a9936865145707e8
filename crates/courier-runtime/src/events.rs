//! Engine event stream
//!
//! Per-tenant broadcast channel surfacing slot lifecycle changes and pairing
//! artifacts to whoever drives the control API. Events are advisory; every
//! state they describe can also be read back through `get_stats` and the
//! slot handles.

use courier_core::{PairingArtifact, RecipientId, SlotId, TenantId};

/// Events broadcast to control-API subscribers
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A slot moved between lifecycle states
    SlotStateChanged {
        slot: SlotId,
        from: String,
        to: String,
    },
    /// A driver requires out-of-band pairing; the artifact is verbatim
    PairingRequired {
        slot: SlotId,
        artifact: PairingArtifact,
    },
    /// Every driver in the fallback order was exhausted for this attempt
    SlotConnectFailed { slot: SlotId, reason: String },
    /// The tenant's cadence loop started
    CadenceStarted { tenant: TenantId },
    /// The tenant's cadence loop was stopped
    CadenceStopped { tenant: TenantId },
    /// An assignment spent its retry budget
    AssignmentExhausted {
        tenant: TenantId,
        recipient: RecipientId,
    },
}

/// Broadcast sender alias used throughout the runtime
pub type EngineEventSender = tokio::sync::broadcast::Sender<EngineEvent>;

/// Subscriber half handed out by the engine
pub type EngineEventReceiver = tokio::sync::broadcast::Receiver<EngineEvent>;
