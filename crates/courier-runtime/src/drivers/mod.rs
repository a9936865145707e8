//! Bundled session drivers
//!
//! Only the in-memory stub lives here; real provider drivers are separate
//! crates implementing [`courier_core::SessionDriver`].

pub mod memory;

pub use memory::{AuthScript, MemoryDriver};
