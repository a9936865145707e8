//! Error types for the gateway driver

use courier_core::DriverError;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors specific to the HTTP gateway transport
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("gateway returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid endpoint path: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("unexpected gateway payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("session {0} is not open on this driver")]
    SessionNotOpen(String),
}

/// Map gateway failures onto the engine's driver taxonomy
///
/// Auth-shaped HTTP statuses are structural; throttling maps to the
/// retryable `RateLimited`; connectivity and server-side trouble is
/// `Unreachable`.
impl From<GatewayError> for DriverError {
    fn from(error: GatewayError) -> Self {
        match &error {
            GatewayError::Request(e) if e.is_timeout() || e.is_connect() => {
                DriverError::unreachable(error.to_string())
            }
            GatewayError::Request(_) => DriverError::unknown(error.to_string()),
            GatewayError::Status { status, .. } => match status {
                401 | 403 => DriverError::auth_rejected(error.to_string()),
                429 => DriverError::rate_limited(error.to_string()),
                500..=599 => DriverError::unreachable(error.to_string()),
                _ => DriverError::unknown(error.to_string()),
            },
            GatewayError::SessionNotOpen(_) => DriverError::unreachable(error.to_string()),
            GatewayError::InvalidEndpoint(_) | GatewayError::Payload(_) => {
                DriverError::unknown(error.to_string())
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
