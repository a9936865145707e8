//! Gateway driver configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Connection settings for one provider gateway
///
/// The gateway is an external process speaking HTTP/JSON; the provider's
/// own wire protocol stays behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway base URL, e.g. `http://localhost:8080/`
    pub base_url: Url,
    /// Bearer token for the gateway's API
    pub api_token: String,
    /// Per-request timeout
    #[serde(default = "default_request_timeout", with = "duration_millis")]
    pub request_timeout: Duration,
    /// How often to poll session status while awaiting authentication
    #[serde(default = "default_poll_interval", with = "duration_millis")]
    pub status_poll_interval: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

impl GatewayConfig {
    pub fn new(base_url: Url, api_token: impl Into<String>) -> Self {
        Self {
            base_url,
            api_token: api_token.into(),
            request_timeout: default_request_timeout(),
            status_poll_interval: default_poll_interval(),
        }
    }

    /// Resolve an API path against the base URL
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path)
    }
}

/// Durations serialized as integer milliseconds
mod duration_millis {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
