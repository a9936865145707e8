//! Core types for the courier dispatch engine
//!
//! This module defines the fundamental identifiers used throughout the engine,
//! using newtype patterns for semantic validation and type safety. Slot numbers
//! are tenant-local; the composite [`SlotId`] is the only key that crosses
//! component boundaries.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

// ----------------------------------------------------------------------------
// Tenant Identifier
// ----------------------------------------------------------------------------

/// Unique identifier for a tenant (client/account boundary)
///
/// All engine state is partitioned by this key. Two tenants never share
/// slots, queues, or counters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    /// Create a new tenant id from any string-like value
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Get the raw string form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ----------------------------------------------------------------------------
// Slot Identifiers
// ----------------------------------------------------------------------------

/// Tenant-local slot number (1..N)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SlotNumber(u16);

impl SlotNumber {
    /// Create a new slot number; numbering starts at 1
    pub fn new(n: u16) -> Self {
        Self(n)
    }

    /// Get the raw slot number
    pub fn get(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for SlotNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite key identifying one physical connection
///
/// Slot numbers alone are meaningless outside their tenant; every driver and
/// manager call carries the full composite so cross-tenant mixups are
/// unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotId {
    pub tenant: TenantId,
    pub number: SlotNumber,
}

impl SlotId {
    pub fn new(tenant: TenantId, number: SlotNumber) -> Self {
        Self { tenant, number }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/slot-{}", self.tenant, self.number)
    }
}

// ----------------------------------------------------------------------------
// Recipient Identifier
// ----------------------------------------------------------------------------

/// Normalized recipient identifier (phone-style, digits only)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecipientId(String);

impl RecipientId {
    /// Create a recipient id, stripping non-digit characters so that
    /// `+55 (11) 9...` and `5511...` compare equal
    pub fn new<S: AsRef<str>>(raw: S) -> Self {
        let digits: String = raw.as_ref().chars().filter(|c| c.is_ascii_digit()).collect();
        Self(digits)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A recipient with no digits at all cannot be routed
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecipientId {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Milliseconds since the Unix epoch
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(ms)
    }

    pub fn saturating_add_millis(&self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ----------------------------------------------------------------------------
// Outbound Message
// ----------------------------------------------------------------------------

/// Payload handed to a driver for delivery
///
/// The engine treats the body as opaque text; media attachments are byte
/// blobs the driver encodes however its provider requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Text body
    pub body: String,
    /// Optional media attachment (opaque to the engine)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Vec<u8>>,
}

impl OutboundMessage {
    pub fn text<S: Into<String>>(body: S) -> Self {
        Self {
            body: body.into(),
            media: None,
        }
    }
}

/// Driver acknowledgement for a completed send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Provider-assigned message id, when the provider reports one
    pub provider_message_id: Option<String>,
    /// When the driver confirmed the send
    pub sent_at: Timestamp,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_normalization() {
        let a = RecipientId::new("+55 (11) 99661-2253");
        let b = RecipientId::new("5511996612253");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "5511996612253");
    }

    #[test]
    fn test_recipient_without_digits_is_empty() {
        let r = RecipientId::new("not-a-number");
        assert!(r.is_empty());
    }

    #[test]
    fn test_slot_id_display() {
        let slot = SlotId::new(TenantId::new("acme"), SlotNumber::new(2));
        assert_eq!(slot.to_string(), "acme/slot-2");
    }

    #[test]
    fn test_slot_numbers_are_tenant_local() {
        let a = SlotId::new(TenantId::new("acme"), SlotNumber::new(1));
        let b = SlotId::new(TenantId::new("globex"), SlotNumber::new(1));
        assert_ne!(a, b);
    }

    #[test]
    fn test_timestamp_ordering() {
        let earlier = Timestamp::from_millis(1_000);
        let later = earlier.saturating_add_millis(500);
        assert!(later > earlier);
        assert_eq!(later.as_millis(), 1_500);
    }
}
