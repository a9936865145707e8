//! Configuration for the courier dispatch engine
//!
//! Cadence pacing, connection establishment, and engine-wide defaults. Every
//! value here is per-tenant at runtime; the structs carry the defaults the
//! production system ran with.

use core::time::Duration;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Cadence Configuration
// ----------------------------------------------------------------------------

/// Per-tenant pacing policy, read by the scheduler on every tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CadenceConfig {
    /// Delay between consecutive sends within a batch
    pub base_delay: Duration,
    /// Maximum assignments drained per tick
    pub batch_size: usize,
    /// Per-send retry budget before an assignment is exhausted
    pub max_retries: u32,
    /// Scale the inter-send delay with the trailing error rate
    pub adaptive_mode: bool,
    /// Reply-triggered burst mode flag
    pub immediate_mode: bool,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            batch_size: 10,
            max_retries: 3,
            adaptive_mode: true,
            immediate_mode: false,
        }
    }
}

impl CadenceConfig {
    /// Validate operator-supplied values before applying them
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be at least 1".into());
        }
        if self.base_delay.is_zero() {
            return Err("base_delay must be non-zero".into());
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Connection Configuration
// ----------------------------------------------------------------------------

/// Connection establishment and health policy for slots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectConfig {
    /// Bound on one driver's connect-plus-auth handshake before falling back
    /// to the next driver in the tenant's order
    pub connect_timeout: Duration,
    /// Initial reconnect backoff after an unintended disconnect
    pub reconnect_initial: Duration,
    /// Upper bound on the exponential reconnect backoff
    pub reconnect_max: Duration,
    /// Consecutive send failures that move a Connected slot to Degraded
    pub degrade_threshold: u32,
    /// Consecutive send failures that move a Degraded slot to Disconnected
    pub disconnect_threshold: u32,
    /// Sliding window over which consecutive failures are counted
    pub failure_window: Duration,
    /// Bound on a single driver send call
    pub send_timeout: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
            degrade_threshold: 3,
            disconnect_threshold: 6,
            failure_window: Duration::from_secs(60),
            send_timeout: Duration::from_secs(15),
        }
    }
}

impl ConnectConfig {
    /// Backoff delay for the given reconnect attempt (0-based), doubling up
    /// to the configured cap
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(16);
        let delay = self
            .reconnect_initial
            .saturating_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX));
        delay.min(self.reconnect_max)
    }
}

// ----------------------------------------------------------------------------
// Engine Configuration
// ----------------------------------------------------------------------------

/// Engine-wide defaults applied when a tenant is provisioned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Slots created per tenant by init_slots when no count is given
    pub slots_per_tenant: u16,
    /// Scheduler tick interval
    pub tick_interval: Duration,
    /// Fixed backoff between retries of one failed send
    pub retry_backoff: Duration,
    /// Connection policy shared by all slots
    pub connect: ConnectConfig,
    /// Starting cadence config for newly provisioned tenants
    pub cadence: CadenceConfig,
    /// Driver fallback order (driver names); empty means registration order
    pub driver_order: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slots_per_tenant: 3,
            tick_interval: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(250),
            connect: ConnectConfig::default(),
            cadence: CadenceConfig::default(),
            driver_order: Vec::new(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadence_defaults() {
        let config = CadenceConfig::default();
        assert_eq!(config.base_delay, Duration::from_millis(1000));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_retries, 3);
        assert!(config.adaptive_mode);
        assert!(!config.immediate_mode);
    }

    #[test]
    fn test_cadence_validation() {
        let mut config = CadenceConfig::default();
        assert!(config.validate().is_ok());

        config.batch_size = 0;
        assert!(config.validate().is_err());

        config.batch_size = 1;
        config.base_delay = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reconnect_backoff_is_bounded() {
        let config = ConnectConfig::default();
        assert_eq!(config.reconnect_delay(0), Duration::from_secs(1));
        assert_eq!(config.reconnect_delay(1), Duration::from_secs(2));
        assert_eq!(config.reconnect_delay(3), Duration::from_secs(8));
        assert_eq!(config.reconnect_delay(10), Duration::from_secs(60));
        assert_eq!(config.reconnect_delay(u32::MAX), Duration::from_secs(60));
    }
}
