//! Core types and contracts for the courier outbound dispatch engine
//!
//! This crate holds everything the runtime and drivers share: tenant-scoped
//! identifiers, the error taxonomy, pacing/connection configuration, the
//! [`SessionDriver`] contract with its event model, the slot lifecycle state
//! machine, the recipient assignment table, and the tenant resolution
//! directory. It contains no tasks and spawns nothing; all orchestration
//! lives in `courier-runtime`.

pub mod assignment;
pub mod config;
pub mod driver;
pub mod errors;
pub mod resolver;
pub mod slot;
pub mod types;

// Re-export the types nearly every consumer touches
pub use assignment::{AssignmentQueue, AssignmentStatus, Priority, RecipientAssignment};
pub use config::{CadenceConfig, ConnectConfig, EngineConfig};
pub use driver::{
    DriverEvent, DriverEventSender, DriverEvents, DriverRegistry, PairingArtifact, SessionDriver,
};
pub use errors::{DispatchError, DriverError, DriverResult, Result};
pub use resolver::RecipientDirectory;
pub use slot::{SlotEvent, SlotState, SlotTransition, SlotTransitionError};
pub use types::{
    OutboundMessage, RecipientId, SendReceipt, SlotId, SlotNumber, TenantId, Timestamp,
};
