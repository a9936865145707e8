//! HTTP gateway session driver
//!
//! Implements [`courier_core::SessionDriver`] against an external provider
//! gateway process speaking HTTP/JSON. The gateway mediates the actual
//! messaging provider; pairing tokens pass through this crate as opaque
//! artifacts and come back out unmodified.
//!
//! Register alongside other drivers for fallback:
//!
//! ```no_run
//! use courier_core::DriverRegistry;
//! use courier_gateway::{GatewayConfig, GatewayDriver};
//! use std::sync::Arc;
//!
//! # fn main() -> courier_core::DriverResult<()> {
//! let config = GatewayConfig::new(
//!     url::Url::parse("http://localhost:8080/").unwrap(),
//!     std::env::var("GATEWAY_TOKEN").unwrap_or_default(),
//! );
//! let mut registry = DriverRegistry::new();
//! registry.register(Arc::new(GatewayDriver::new("gateway", config)?));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod error;

pub use config::GatewayConfig;
pub use driver::GatewayDriver;
pub use error::GatewayError;
