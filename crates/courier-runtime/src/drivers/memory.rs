//! In-memory session driver
//!
//! Deterministic stand-in for a real provider client, used by the test
//! suites and the CLI demo. Connection outcomes are scripted per driver
//! instance: authenticate immediately, demand pairing first, or refuse
//! outright. Send failures can be injected globally or for the next N
//! calls.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use courier_core::{
    DriverError, DriverEvent, DriverEventSender, DriverEvents, DriverResult, OutboundMessage,
    PairingArtifact, RecipientId, SendReceipt, SessionDriver, SlotId, Timestamp,
};

// ----------------------------------------------------------------------------
// Behavior
// ----------------------------------------------------------------------------

/// How a connect attempt plays out
#[derive(Debug, Clone)]
pub enum AuthScript {
    /// Emit `Authenticated` right away (restored session)
    Immediate,
    /// Emit a pairing artifact, then authenticate after the delay if one is
    /// given; otherwise wait for [`MemoryDriver::authenticate`]
    PairFirst { auto_auth_after: Option<Duration> },
    /// Fail every connect attempt
    Refuse,
}

#[derive(Debug)]
struct SentRecord {
    slot: SlotId,
    recipient: RecipientId,
    body: String,
}

// ----------------------------------------------------------------------------
// Memory Driver
// ----------------------------------------------------------------------------

/// Scriptable in-memory driver
pub struct MemoryDriver {
    name: String,
    auth: AuthScript,
    /// Fail every send while set
    fail_all_sends: AtomicBool,
    /// Fail exactly this many upcoming sends
    fail_next_sends: AtomicU32,
    /// Artificial per-send latency
    send_latency: Option<Duration>,
    sessions: DashMap<SlotId, DriverEventSender>,
    sent: Mutex<Vec<SentRecord>>,
    identity_counter: AtomicU64,
}

impl MemoryDriver {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            auth: AuthScript::Immediate,
            fail_all_sends: AtomicBool::new(false),
            fail_next_sends: AtomicU32::new(0),
            send_latency: None,
            sessions: DashMap::new(),
            sent: Mutex::new(Vec::new()),
            identity_counter: AtomicU64::new(0),
        }
    }

    pub fn with_auth(mut self, auth: AuthScript) -> Self {
        self.auth = auth;
        self
    }

    /// Shorthand for a driver that rejects every connect
    pub fn refusing<S: Into<String>>(name: S) -> Self {
        Self::new(name).with_auth(AuthScript::Refuse)
    }

    pub fn with_send_latency(mut self, latency: Duration) -> Self {
        self.send_latency = Some(latency);
        self
    }

    pub fn set_fail_all_sends(&self, fail: bool) {
        self.fail_all_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_next_sends(&self, count: u32) {
        self.fail_next_sends.store(count, Ordering::SeqCst);
    }

    /// Complete a `PairFirst` handshake by hand
    pub fn authenticate(&self, slot: &SlotId) {
        if let Some(tx) = self.sessions.get(slot) {
            let identity = self.next_identity();
            let _ = tx.send(DriverEvent::Authenticated { identity });
        }
    }

    /// Simulate a provider-initiated close on an established slot
    pub fn close_slot(&self, slot: &SlotId, reason: &str) {
        if let Some((_, tx)) = self.sessions.remove(slot) {
            let _ = tx.send(DriverEvent::Closed {
                reason: reason.to_string(),
            });
        }
    }

    pub fn is_session_open(&self, slot: &SlotId) -> bool {
        self.sessions.contains_key(slot)
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("sent log lock poisoned").len()
    }

    /// Bodies sent to the given recipient, in order
    pub fn sent_to(&self, recipient: &RecipientId) -> Vec<String> {
        self.sent
            .lock()
            .expect("sent log lock poisoned")
            .iter()
            .filter(|r| &r.recipient == recipient)
            .map(|r| r.body.clone())
            .collect()
    }

    /// Sends carried by the given slot
    pub fn sent_via(&self, slot: &SlotId) -> usize {
        self.sent
            .lock()
            .expect("sent log lock poisoned")
            .iter()
            .filter(|r| &r.slot == slot)
            .count()
    }

    fn next_identity(&self) -> String {
        let n = self.identity_counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{:04}", self.name, n)
    }

    fn should_fail_send(&self) -> bool {
        if self.fail_all_sends.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SessionDriver for MemoryDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self, slot: &SlotId) -> DriverResult<DriverEvents> {
        if matches!(self.auth, AuthScript::Refuse) {
            return Err(DriverError::unreachable(format!(
                "{} refuses connections",
                self.name
            )));
        }

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        self.sessions.insert(slot.clone(), tx.clone());

        match &self.auth {
            AuthScript::Immediate => {
                let _ = tx.send(DriverEvent::Authenticated {
                    identity: self.next_identity(),
                });
            }
            AuthScript::PairFirst { auto_auth_after } => {
                let artifact =
                    PairingArtifact::new(self.name.clone(), format!("pair:{slot}").as_bytes());
                let _ = tx.send(DriverEvent::PairingRequired { artifact });
                if let Some(delay) = *auto_auth_after {
                    let identity = self.next_identity();
                    let delayed = tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = delayed.send(DriverEvent::Authenticated { identity });
                    });
                }
            }
            AuthScript::Refuse => unreachable!(),
        }

        Ok(rx)
    }

    async fn send(
        &self,
        slot: &SlotId,
        recipient: &RecipientId,
        message: &OutboundMessage,
    ) -> DriverResult<SendReceipt> {
        if !self.sessions.contains_key(slot) {
            return Err(DriverError::unreachable(format!("{slot} is not connected")));
        }
        if let Some(latency) = self.send_latency {
            tokio::time::sleep(latency).await;
        }
        if self.should_fail_send() {
            return Err(DriverError::unreachable("injected send failure"));
        }

        self.sent.lock().expect("sent log lock poisoned").push(SentRecord {
            slot: slot.clone(),
            recipient: recipient.clone(),
            body: message.body.clone(),
        });

        Ok(SendReceipt {
            provider_message_id: Some(uuid::Uuid::new_v4().to_string()),
            sent_at: Timestamp::now(),
        })
    }

    async fn disconnect(&self, slot: &SlotId) -> DriverResult<()> {
        self.sessions.remove(slot);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{SlotNumber, TenantId};

    fn slot() -> SlotId {
        SlotId::new(TenantId::new("acme"), SlotNumber::new(1))
    }

    #[tokio::test]
    async fn test_immediate_auth() {
        let driver = MemoryDriver::new("mem");
        let mut events = driver.connect(&slot()).await.unwrap();
        match events.recv().await {
            Some(DriverEvent::Authenticated { identity }) => {
                assert!(identity.starts_with("mem-"));
            }
            other => panic!("expected Authenticated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pair_first_then_manual_auth() {
        let driver = MemoryDriver::new("mem").with_auth(AuthScript::PairFirst {
            auto_auth_after: None,
        });
        let mut events = driver.connect(&slot()).await.unwrap();
        assert!(matches!(
            events.recv().await,
            Some(DriverEvent::PairingRequired { .. })
        ));

        driver.authenticate(&slot());
        assert!(matches!(
            events.recv().await,
            Some(DriverEvent::Authenticated { .. })
        ));
    }

    #[tokio::test]
    async fn test_refusing_driver() {
        let driver = MemoryDriver::refusing("down");
        assert!(driver.connect(&slot()).await.is_err());
    }

    #[tokio::test]
    async fn test_send_requires_session() {
        let driver = MemoryDriver::new("mem");
        let err = driver
            .send(
                &slot(),
                &RecipientId::new("5511999990000"),
                &OutboundMessage::text("hi"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_fail_next_sends_decrements() {
        let driver = MemoryDriver::new("mem");
        let _events = driver.connect(&slot()).await.unwrap();
        driver.fail_next_sends(2);

        let recipient = RecipientId::new("5511999990000");
        let message = OutboundMessage::text("hi");
        assert!(driver.send(&slot(), &recipient, &message).await.is_err());
        assert!(driver.send(&slot(), &recipient, &message).await.is_err());
        assert!(driver.send(&slot(), &recipient, &message).await.is_ok());
        assert_eq!(driver.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_close_slot_emits_closed() {
        let driver = MemoryDriver::new("mem");
        let mut events = driver.connect(&slot()).await.unwrap();
        let _ = events.recv().await; // Authenticated

        driver.close_slot(&slot(), "provider kicked us");
        match events.recv().await {
            Some(DriverEvent::Closed { reason }) => assert_eq!(reason, "provider kicked us"),
            other => panic!("expected Closed, got {other:?}"),
        }
    }
}
