//! Session driver abstraction
//!
//! This module provides a unified interface over the underlying
//! messaging-provider client libraries, enabling clean separation between
//! dispatch logic and provider plumbing. Several drivers may be registered
//! for the same logical slot; the slot manager walks them as ordered
//! fallback candidates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::DriverResult;
use crate::types::{OutboundMessage, RecipientId, SendReceipt, SlotId};

// ----------------------------------------------------------------------------
// Pairing Artifact
// ----------------------------------------------------------------------------

/// Out-of-band authentication artifact (QR payload, pairing code, ...)
///
/// Opaque to the engine: it is surfaced to the operator verbatim and, when
/// persisted, must be handed back to the same driver unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingArtifact {
    /// Name of the driver that produced the artifact
    pub driver: String,
    /// Base64-encoded opaque blob
    pub blob: String,
}

impl PairingArtifact {
    pub fn new<D: Into<String>>(driver: D, raw: &[u8]) -> Self {
        use base64::Engine as _;
        Self {
            driver: driver.into(),
            blob: base64::engine::general_purpose::STANDARD.encode(raw),
        }
    }

    /// Decode the blob for handing back to its driver
    pub fn decode(&self) -> DriverResult<Vec<u8>> {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD
            .decode(&self.blob)
            .map_err(|e| crate::errors::DriverError::unknown(format!("bad artifact: {e}")))
    }
}

// ----------------------------------------------------------------------------
// Driver Events
// ----------------------------------------------------------------------------

/// Connection-state events emitted by a driver after `connect`
///
/// Authentication is asynchronous and user-mediated, so pairing artifacts
/// arrive on this stream rather than as a return value.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    /// The provider requires out-of-band pairing before the slot can carry
    /// traffic
    PairingRequired { artifact: PairingArtifact },
    /// Authentication completed; the slot's resolved identity is known
    Authenticated { identity: String },
    /// The transport closed (driver-initiated or provider-initiated)
    Closed { reason: String },
}

/// Receiving half of a driver's event stream for one slot
pub type DriverEvents = mpsc::UnboundedReceiver<DriverEvent>;

/// Sending half, held by driver implementations
pub type DriverEventSender = mpsc::UnboundedSender<DriverEvent>;

// ----------------------------------------------------------------------------
// Session Driver Trait
// ----------------------------------------------------------------------------

/// Uniform contract over one messaging-provider client library
///
/// Implementations perform no retries of their own; failures are reported as
/// typed [`DriverError`](crate::errors::DriverError)s and policy lives in
/// the slot manager and scheduler.
#[async_trait]
pub trait SessionDriver: Send + Sync {
    /// Stable driver identifier used in fallback ordering
    fn name(&self) -> &str;

    /// Begin establishing the given slot's connection
    ///
    /// Returns the event stream for this attempt. Pairing and authentication
    /// outcomes arrive on the stream.
    async fn connect(&self, slot: &SlotId) -> DriverResult<DriverEvents>;

    /// Send one message through an established slot
    async fn send(
        &self,
        slot: &SlotId,
        recipient: &RecipientId,
        message: &OutboundMessage,
    ) -> DriverResult<SendReceipt>;

    /// Tear down the slot's connection
    async fn disconnect(&self, slot: &SlotId) -> DriverResult<()>;
}

// ----------------------------------------------------------------------------
// Driver Registry
// ----------------------------------------------------------------------------

/// Ordered set of registered drivers
///
/// Registration order is the default fallback order; tenants may override it
/// by name. New providers are added by implementing [`SessionDriver`] and
/// registering here, not by branching call sites.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: Vec<std::sync::Arc<dyn SessionDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: std::sync::Arc<dyn SessionDriver>) {
        self.drivers.push(driver);
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Look up a driver by its stable name
    pub fn get(&self, name: &str) -> Option<std::sync::Arc<dyn SessionDriver>> {
        self.drivers.iter().find(|d| d.name() == name).cloned()
    }

    /// Fallback candidates in the given preference order
    ///
    /// Names not present in the registry are skipped; an empty preference
    /// list yields registration order.
    pub fn ordered(&self, preference: &[String]) -> Vec<std::sync::Arc<dyn SessionDriver>> {
        if preference.is_empty() {
            return self.drivers.clone();
        }
        preference
            .iter()
            .filter_map(|name| self.get(name))
            .collect()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.drivers.iter().map(|d| d.name()).collect();
        f.debug_struct("DriverRegistry")
            .field("drivers", &names)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
