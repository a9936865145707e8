//! Courier dispatch runtime
//!
//! The engine that keeps several messaging-provider connections ("slots")
//! alive per tenant, rotates outbound recipients across the healthy ones,
//! paces sends under a configurable cadence, and supports a reply-triggered
//! immediate burst. Built on the contracts in `courier-core`.
//!
//! ## Architecture
//!
//! - [`pool`] — slot handles and the per-tenant pool
//! - [`managers::slot`] — connection lifecycle: driver fallback, reconnect
//!   with backoff, degradation on repeated send failures
//! - [`distributor`] — deterministic round-robin recipient assignment
//! - [`scheduler`] — per-tenant cadence loops with adaptive pacing
//! - [`engine`] — the transport-agnostic control API
//! - [`drivers::memory`] — scriptable stub driver for tests and demos
//!
//! ```no_run
//! use courier_core::{DriverRegistry, EngineConfig, Priority, RecipientId, TenantId};
//! use courier_runtime::{DispatchEngine, MemoryDriver};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> courier_core::Result<()> {
//! let mut registry = DriverRegistry::new();
//! registry.register(Arc::new(MemoryDriver::new("primary")));
//!
//! let engine = DispatchEngine::new(EngineConfig::default(), registry);
//! let tenant = TenantId::new("acme");
//!
//! engine.init_slots(&tenant)?;
//! engine.connect_all_slots(&tenant).await?;
//! engine.distribute(&tenant, &[RecipientId::new("5511996612253")], Priority::Normal)?;
//! engine.start_cadence(&tenant)?;
//! # Ok(())
//! # }
//! ```

pub mod distributor;
pub mod drivers;
pub mod engine;
pub mod events;
pub mod managers;
pub mod pool;
pub mod scheduler;

pub use distributor::Distribution;
pub use drivers::{AuthScript, MemoryDriver};
pub use engine::{DispatchEngine, ImmediateActivation, TenantRuntime};
pub use events::{EngineEvent, EngineEventReceiver, EngineEventSender};
pub use managers::{SlotConnectionManager, StatsSnapshot};
pub use pool::{SlotHandle, SlotPool};
pub use scheduler::AdaptivePacer;
