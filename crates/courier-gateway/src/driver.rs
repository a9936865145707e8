//! Session driver speaking HTTP/JSON to a provider gateway
//!
//! The gateway owns the provider's real wire protocol; this driver starts
//! sessions, relays pairing tokens verbatim, polls authentication status,
//! and posts outbound messages. It performs no retries of its own.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use courier_core::{
    DriverError, DriverEvent, DriverEvents, DriverResult, OutboundMessage, PairingArtifact,
    RecipientId, SendReceipt, SessionDriver, SlotId, Timestamp,
};

use crate::config::GatewayConfig;
use crate::error::GatewayError;

// ----------------------------------------------------------------------------
// Wire Types
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StartSessionResponse {
    state: SessionState,
    #[serde(default)]
    pairing_token: Option<String>,
    #[serde(default)]
    identity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionStatusResponse {
    state: SessionState,
    #[serde(default)]
    pairing_token: Option<String>,
    #[serde(default)]
    identity: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SessionState {
    Pairing,
    Connected,
    Closed,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    to: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_b64: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    message_id: Option<String>,
}

// ----------------------------------------------------------------------------
// Gateway Driver
// ----------------------------------------------------------------------------

/// [`SessionDriver`] implementation over one provider gateway
///
/// Cloning is cheap; the open-session map is shared so a clone handed to a
/// background watcher observes disconnects.
#[derive(Clone)]
pub struct GatewayDriver {
    name: String,
    config: GatewayConfig,
    client: reqwest::Client,
    /// Open sessions; removing an entry stops its status watcher
    sessions: std::sync::Arc<DashMap<SlotId, ()>>,
}

impl GatewayDriver {
    pub fn new(name: impl Into<String>, config: GatewayConfig) -> DriverResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DriverError::unknown(format!("http client: {e}")))?;
        Ok(Self {
            name: name.into(),
            config,
            client,
            sessions: std::sync::Arc::new(DashMap::new()),
        })
    }

    fn session_path(&self, slot: &SlotId, tail: &str) -> Result<url::Url, GatewayError> {
        let path = format!("sessions/{}/{}/{}", slot.tenant, slot.number, tail);
        Ok(self.config.endpoint(path.trim_end_matches('/'))?)
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: url::Url,
        body: Option<serde_json::Value>,
    ) -> Result<T, GatewayError> {
        let mut request = self.client.post(url).bearer_auth(&self.config.api_token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        Self::parse(response).await
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: url::Url,
    ) -> Result<T, GatewayError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.config.api_token)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn parse<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }

    fn artifact_from_token(&self, token: &str) -> PairingArtifact {
        PairingArtifact::new(self.name.clone(), token.as_bytes())
    }

    /// Poll session status until it connects or closes, forwarding events;
    /// exits when the session entry is removed
    fn spawn_status_watcher(
        &self,
        slot: SlotId,
        tx: courier_core::DriverEventSender,
        mut authenticated: bool,
    ) {
        let driver = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(driver.config.status_poll_interval).await;
                if !driver.sessions.contains_key(&slot) {
                    return;
                }

                let url = match driver.session_path(&slot, "status") {
                    Ok(url) => url,
                    Err(error) => {
                        warn!(slot = %slot, %error, "bad status endpoint");
                        return;
                    }
                };
                let status: SessionStatusResponse = match driver.get_json(url).await {
                    Ok(status) => status,
                    Err(error) => {
                        debug!(slot = %slot, %error, "status poll failed");
                        continue;
                    }
                };

                match status.state {
                    SessionState::Pairing => {
                        if let Some(token) = status.pairing_token {
                            let _ = tx.send(DriverEvent::PairingRequired {
                                artifact: driver.artifact_from_token(&token),
                            });
                        }
                    }
                    SessionState::Connected if !authenticated => {
                        authenticated = true;
                        let identity = status.identity.unwrap_or_default();
                        let _ = tx.send(DriverEvent::Authenticated { identity });
                    }
                    SessionState::Connected => {}
                    SessionState::Closed => {
                        driver.sessions.remove(&slot);
                        let _ = tx.send(DriverEvent::Closed {
                            reason: status.reason.unwrap_or_else(|| "gateway closed session".into()),
                        });
                        return;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl SessionDriver for GatewayDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self, slot: &SlotId) -> DriverResult<DriverEvents> {
        let url = self
            .session_path(slot, "start")
            .map_err(DriverError::from)?;
        let started: StartSessionResponse =
            self.post_json(url, None).await.map_err(DriverError::from)?;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        self.sessions.insert(slot.clone(), ());

        let mut authenticated = false;
        match started.state {
            SessionState::Pairing => {
                if let Some(token) = &started.pairing_token {
                    let _ = tx.send(DriverEvent::PairingRequired {
                        artifact: self.artifact_from_token(token),
                    });
                }
            }
            SessionState::Connected => {
                authenticated = true;
                let _ = tx.send(DriverEvent::Authenticated {
                    identity: started.identity.unwrap_or_default(),
                });
            }
            SessionState::Closed => {
                self.sessions.remove(slot);
                return Err(DriverError::unreachable("gateway refused the session"));
            }
        }

        self.spawn_status_watcher(slot.clone(), tx, authenticated);
        Ok(rx)
    }

    async fn send(
        &self,
        slot: &SlotId,
        recipient: &RecipientId,
        message: &OutboundMessage,
    ) -> DriverResult<SendReceipt> {
        if !self.sessions.contains_key(slot) {
            return Err(GatewayError::SessionNotOpen(slot.to_string()).into());
        }

        let url = self
            .session_path(slot, "messages")
            .map_err(DriverError::from)?;
        let media_b64 = message.media.as_ref().map(|bytes| {
            use base64::Engine as _;
            base64::engine::general_purpose::STANDARD.encode(bytes)
        });
        let request = SendMessageRequest {
            to: recipient.as_str(),
            body: &message.body,
            media_b64,
        };
        let body = serde_json::to_value(&request).map_err(GatewayError::from)?;

        let response: SendMessageResponse =
            self.post_json(url, Some(body)).await.map_err(DriverError::from)?;

        Ok(SendReceipt {
            provider_message_id: response.message_id,
            sent_at: Timestamp::now(),
        })
    }

    async fn disconnect(&self, slot: &SlotId) -> DriverResult<()> {
        self.sessions.remove(slot);
        let url = self
            .session_path(slot, "stop")
            .map_err(DriverError::from)?;
        let _: serde_json::Value = self.post_json(url, None).await.map_err(DriverError::from)?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
