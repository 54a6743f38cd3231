use std::time::Duration;

use async_trait::async_trait;
use grantline_core::{AuthzResult, OrganizationId, RoleId, UserId};
use grantline_domain::EffectivePermissionSet;

/// Cache port for materialized effective permission sets.
///
/// A derived, disposable view over the role and assignment stores: entries
/// are replaced whole, never patched, and losing the entire tier costs a
/// recomputation spike, not correctness.
#[async_trait]
pub trait PermissionCache: Send + Sync {
    /// Returns the cached set for `(user, organization)`, or `None` on miss.
    async fn get(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> AuthzResult<Option<EffectivePermissionSet>>;

    /// Stores a freshly computed set under the given time-to-live.
    async fn put(&self, set: EffectivePermissionSet, ttl: Duration) -> AuthzResult<()>;

    /// Evicts the entry for one `(user, organization)` pair.
    async fn invalidate(&self, user_id: UserId, organization_id: OrganizationId)
    -> AuthzResult<()>;

    /// Evicts every entry belonging to an organization.
    async fn invalidate_organization(&self, organization_id: OrganizationId) -> AuthzResult<()>;

    /// Evicts every entry affected by a role change.
    ///
    /// Computing which users hold the role is itself a store query, so the
    /// default trades precision for bounded complexity and evicts the whole
    /// organization. Implementations holding a reverse role-to-users index
    /// may override with precise fan-out.
    async fn invalidate_role(
        &self,
        _role_id: RoleId,
        organization_id: OrganizationId,
    ) -> AuthzResult<()> {
        self.invalidate_organization(organization_id).await
    }
}
