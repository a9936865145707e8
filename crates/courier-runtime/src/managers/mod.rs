//! Stateful managers for the dispatch runtime

pub mod slot;
pub mod stats;

pub use slot::SlotConnectionManager;
pub use stats::{CadenceRunState, StatsSnapshot, TenantStats};
