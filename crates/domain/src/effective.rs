//! Materialized per-user permission sets.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use grantline_core::{OrganizationId, UserId};
use serde::{Deserialize, Serialize};

use crate::permission::PermissionKey;

/// The union of permissions a user holds in one organization.
///
/// Derived and disposable: always reconstructable from the role and
/// assignment stores, replaced atomically on recompute, never patched in
/// place. Losing every cached copy costs latency, not correctness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectivePermissionSet {
    /// User the set was computed for.
    pub user_id: UserId,
    /// Organization scope of the computation.
    pub organization_id: OrganizationId,
    /// Granted `RESOURCE:ACTION` keys.
    pub permission_keys: BTreeSet<PermissionKey>,
    /// When the set was computed from the stores.
    pub computed_at: DateTime<Utc>,
}

impl EffectivePermissionSet {
    /// Creates a set from already-collected permission keys.
    #[must_use]
    pub fn new(
        user_id: UserId,
        organization_id: OrganizationId,
        permission_keys: BTreeSet<PermissionKey>,
        computed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            organization_id,
            permission_keys,
            computed_at,
        }
    }

    /// Creates an empty set, used when a user holds no active assignments.
    #[must_use]
    pub fn empty(
        user_id: UserId,
        organization_id: OrganizationId,
        computed_at: DateTime<Utc>,
    ) -> Self {
        Self::new(user_id, organization_id, BTreeSet::new(), computed_at)
    }

    /// Returns whether the set grants the requested pair.
    #[must_use]
    pub fn grants(&self, resource: &str, action: &str) -> bool {
        self.permission_keys
            .iter()
            .any(|key| key.resource() == resource && key.action() == action)
    }

    /// Returns whether the set contains the given key.
    #[must_use]
    pub fn contains(&self, key: &PermissionKey) -> bool {
        self.permission_keys.contains(key)
    }

    /// Returns the number of granted keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.permission_keys.len()
    }

    /// Returns whether the set grants nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.permission_keys.is_empty()
    }
}
