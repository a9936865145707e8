//! Tenant resolution for inbound recipients
//!
//! The production system grew ad-hoc "which client does this phone belong
//! to" checks at several call sites; here resolution is one deterministic
//! function over a tenant-namespaced directory. Ambiguity (the same
//! recipient registered under several tenants) resolves to the most recent
//! association; equal timestamps break on lexicographic tenant id so the
//! result is a pure function of the directory contents.

use dashmap::DashMap;
use std::collections::HashMap;

use crate::errors::{DispatchError, Result};
use crate::types::{RecipientId, TenantId, Timestamp};

// ----------------------------------------------------------------------------
// Recipient Directory
// ----------------------------------------------------------------------------

/// Tenant-namespaced recipient registry
///
/// Membership is stored per tenant; the only cross-tenant operation is
/// [`resolve`](RecipientDirectory::resolve), which scans each tenant's own
/// namespace and never mutates any of them.
#[derive(Debug, Default)]
pub struct RecipientDirectory {
    by_tenant: DashMap<TenantId, HashMap<RecipientId, Timestamp>>,
}

impl RecipientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a recipient with a tenant, stamping the association time
    pub fn register(&self, tenant: &TenantId, recipient: RecipientId) {
        self.register_at(tenant, recipient, Timestamp::now());
    }

    /// Associate with an explicit timestamp (imports, tests)
    pub fn register_at(&self, tenant: &TenantId, recipient: RecipientId, at: Timestamp) {
        self.by_tenant
            .entry(tenant.clone())
            .or_default()
            .insert(recipient, at);
    }

    /// Drop one association
    pub fn unregister(&self, tenant: &TenantId, recipient: &RecipientId) -> bool {
        self.by_tenant
            .get_mut(tenant)
            .map(|mut members| members.remove(recipient).is_some())
            .unwrap_or(false)
    }

    /// Drop a tenant's entire namespace
    pub fn clear_tenant(&self, tenant: &TenantId) {
        self.by_tenant.remove(tenant);
    }

    /// Whether the recipient belongs to the tenant's recipient set
    pub fn is_member(&self, tenant: &TenantId, recipient: &RecipientId) -> bool {
        self.by_tenant
            .get(tenant)
            .map(|members| members.contains_key(recipient))
            .unwrap_or(false)
    }

    /// Number of recipients registered under the tenant
    pub fn member_count(&self, tenant: &TenantId) -> usize {
        self.by_tenant
            .get(tenant)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    /// Resolve which tenant owns a recipient
    ///
    /// Most recent association wins; ties break on lexicographic tenant id.
    /// Returns `TenantUnresolved` when no tenant has the recipient.
    pub fn resolve(&self, recipient: &RecipientId) -> Result<TenantId> {
        let mut best: Option<(TenantId, Timestamp)> = None;

        for entry in self.by_tenant.iter() {
            if let Some(&at) = entry.value().get(recipient) {
                let candidate = (entry.key().clone(), at);
                best = match best {
                    None => Some(candidate),
                    Some(current) => {
                        let newer = candidate.1 > current.1
                            || (candidate.1 == current.1 && candidate.0 < current.0);
                        if newer {
                            Some(candidate)
                        } else {
                            Some(current)
                        }
                    }
                };
            }
        }

        best.map(|(tenant, _)| tenant)
            .ok_or_else(|| DispatchError::tenant_unresolved(recipient))
    }

}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> RecipientId {
        RecipientId::new("5511996612253")
    }

    #[test]
    fn test_unknown_recipient_unresolved() {
        let directory = RecipientDirectory::new();
        let err = directory.resolve(&recipient()).unwrap_err();
        assert!(matches!(err, DispatchError::TenantUnresolved { .. }));
    }

    #[test]
    fn test_single_owner_resolves() {
        let directory = RecipientDirectory::new();
        let tenant = TenantId::new("acme");
        directory.register(&tenant, recipient());
        assert_eq!(directory.resolve(&recipient()).unwrap(), tenant);
    }

    #[test]
    fn test_most_recent_association_wins() {
        let directory = RecipientDirectory::new();
        let older = TenantId::new("acme");
        let newer = TenantId::new("globex");
        directory.register_at(&older, recipient(), Timestamp::from_millis(1_000));
        directory.register_at(&newer, recipient(), Timestamp::from_millis(2_000));

        assert_eq!(directory.resolve(&recipient()).unwrap(), newer);
    }

    #[test]
    fn test_equal_timestamps_break_on_tenant_id() {
        let directory = RecipientDirectory::new();
        let a = TenantId::new("acme");
        let b = TenantId::new("globex");
        directory.register_at(&b, recipient(), Timestamp::from_millis(1_000));
        directory.register_at(&a, recipient(), Timestamp::from_millis(1_000));

        assert_eq!(directory.resolve(&recipient()).unwrap(), a);
    }

    #[test]
    fn test_unregister_and_membership() {
        let directory = RecipientDirectory::new();
        let tenant = TenantId::new("acme");
        directory.register(&tenant, recipient());
        assert!(directory.is_member(&tenant, &recipient()));

        assert!(directory.unregister(&tenant, &recipient()));
        assert!(!directory.is_member(&tenant, &recipient()));
        assert!(directory.resolve(&recipient()).is_err());
    }
}
