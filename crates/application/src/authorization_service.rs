use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use grantline_core::{
    AuthzError, AuthzResult, OrganizationId, PermissionId, RoleId, UserId,
};
use grantline_domain::{EffectivePermissionSet, Permission, RemovalReason, Role, RoleAssignment};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::assignment_service::AssignmentService;
use crate::catalog_service::CatalogService;
use crate::engine_config::EngineConfig;
use crate::permission_cache::PermissionCache;
use crate::request_context::RequestContext;
use crate::role_service::{CreateRoleInput, RoleService};

type FlightKey = (UserId, OrganizationId);

/// The public façade of the authorization engine.
///
/// Queries are cache-aside over the permission cache with single-flight
/// recomputation; mutations delegate to the role and assignment services
/// (store write, then event emission) and evict the affected cache entries
/// before returning, so a caller that observed a successful mutation never
/// reads its own stale data from this process.
#[derive(Clone)]
pub struct AuthorizationService {
    roles: RoleService,
    assignments: AssignmentService,
    catalog: CatalogService,
    cache: Arc<dyn PermissionCache>,
    config: EngineConfig,
    flights: Arc<Mutex<HashMap<FlightKey, Arc<Mutex<()>>>>>,
}

impl AuthorizationService {
    /// Creates the façade from its collaborating services.
    #[must_use]
    pub fn new(
        roles: RoleService,
        assignments: AssignmentService,
        catalog: CatalogService,
        cache: Arc<dyn PermissionCache>,
        config: EngineConfig,
    ) -> Self {
        Self {
            roles,
            assignments,
            catalog,
            cache,
            config,
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    // Query API.

    /// Returns whether the user holds the `(resource, action)` permission in
    /// the organization.
    ///
    /// A `false` result is a normal negative answer, not an error; internal
    /// failures surface as errors, never as grants.
    pub async fn has_permission(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        organization_id: OrganizationId,
        resource: &str,
        action: &str,
    ) -> AuthzResult<bool> {
        let set = self
            .effective_set_within_deadline(ctx, user_id, organization_id)
            .await?;

        Ok(set.grants(resource, action))
    }

    /// Answers a batch of permission checks from one cache fetch.
    pub async fn check_permissions(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        organization_id: OrganizationId,
        requests: &[(String, String)],
    ) -> AuthzResult<Vec<bool>> {
        let set = self
            .effective_set_within_deadline(ctx, user_id, organization_id)
            .await?;

        Ok(requests
            .iter()
            .map(|(resource, action)| set.grants(resource, action))
            .collect())
    }

    /// Fails with `AccessDenied` unless the user holds the permission.
    pub async fn require_permission(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        organization_id: OrganizationId,
        resource: &str,
        action: &str,
    ) -> AuthzResult<()> {
        if self
            .has_permission(ctx, user_id, organization_id, resource, action)
            .await?
        {
            return Ok(());
        }

        Err(AuthzError::AccessDenied(format!(
            "user '{user_id}' is missing permission '{resource}:{action}' in organization '{organization_id}'"
        )))
    }

    /// Returns the user's whole effective permission set.
    pub async fn effective_permissions(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> AuthzResult<EffectivePermissionSet> {
        self.effective_set_within_deadline(ctx, user_id, organization_id)
            .await
    }

    /// Lists active roles visible to the organization.
    pub async fn list_roles(&self, organization_id: OrganizationId) -> AuthzResult<Vec<Role>> {
        self.roles.list_roles(organization_id).await
    }

    /// Returns a role visible to the organization.
    pub async fn get_role(
        &self,
        role_id: RoleId,
        organization_id: OrganizationId,
    ) -> AuthzResult<Role> {
        self.roles.get_role(role_id, organization_id).await
    }

    /// Lists the permission catalog.
    pub async fn list_permissions(&self) -> AuthzResult<Vec<Permission>> {
        self.catalog.list_permissions().await
    }

    /// Resolves a `(resource, action)` pair against the catalog.
    pub async fn resolve_permission(
        &self,
        resource: &str,
        action: &str,
    ) -> AuthzResult<Permission> {
        self.catalog.resolve(resource, action).await
    }

    /// Lists a user's active assignments in the organization.
    pub async fn list_active_assignments(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> AuthzResult<Vec<RoleAssignment>> {
        self.assignments
            .list_active_assignments(user_id, organization_id)
            .await
    }

    // Mutation API. Ordering per call: store write, event emission, cache
    // invalidation, return.

    /// Creates a custom role.
    pub async fn create_role(
        &self,
        ctx: &RequestContext,
        organization_id: OrganizationId,
        input: CreateRoleInput,
        actor: UserId,
    ) -> AuthzResult<Role> {
        let role = self
            .roles
            .create_role(ctx, organization_id, input, actor)
            .await?;

        self.invalidate_role_scope(role.id, organization_id).await;
        Ok(role)
    }

    /// Replaces a custom role's permission set.
    pub async fn update_role_permissions(
        &self,
        ctx: &RequestContext,
        role_id: RoleId,
        organization_id: OrganizationId,
        new_permission_ids: BTreeSet<PermissionId>,
        actor: UserId,
    ) -> AuthzResult<Role> {
        let role = self
            .roles
            .update_role_permissions(ctx, role_id, organization_id, new_permission_ids, actor)
            .await?;

        self.invalidate_role_scope(role_id, organization_id).await;
        Ok(role)
    }

    /// Soft-deletes a custom role and cascades its assignments.
    pub async fn delete_role(
        &self,
        ctx: &RequestContext,
        role_id: RoleId,
        organization_id: OrganizationId,
        actor: UserId,
    ) -> AuthzResult<()> {
        self.roles
            .delete_role(ctx, role_id, organization_id, actor)
            .await?;

        self.invalidate_role_scope(role_id, organization_id).await;
        Ok(())
    }

    /// Assigns a role to a user; idempotent on retry.
    pub async fn assign_role(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        role_id: RoleId,
        organization_id: OrganizationId,
        assigned_by: UserId,
        expires_at: Option<DateTime<Utc>>,
    ) -> AuthzResult<RoleAssignment> {
        let assignment = self
            .assignments
            .assign(ctx, user_id, role_id, organization_id, assigned_by, expires_at)
            .await?;

        self.invalidate_user_scope(user_id, organization_id).await;
        Ok(assignment)
    }

    /// Removes a user's role assignment.
    pub async fn remove_role(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        role_id: RoleId,
        organization_id: OrganizationId,
        removed_by: UserId,
        reason: Option<RemovalReason>,
    ) -> AuthzResult<()> {
        self.assignments
            .remove(ctx, user_id, role_id, organization_id, removed_by, reason)
            .await?;

        self.invalidate_user_scope(user_id, organization_id).await;
        Ok(())
    }

    /// Extends a user's role assignment expiry.
    pub async fn extend_assignment(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        role_id: RoleId,
        organization_id: OrganizationId,
        new_expires_at: DateTime<Utc>,
    ) -> AuthzResult<RoleAssignment> {
        let assignment = self
            .assignments
            .extend(ctx, user_id, role_id, organization_id, new_expires_at)
            .await?;

        self.invalidate_user_scope(user_id, organization_id).await;
        Ok(assignment)
    }

    // Effective set computation.

    async fn effective_set_within_deadline(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> AuthzResult<EffectivePermissionSet> {
        let deadline = ctx
            .deadline
            .unwrap_or_else(|| Instant::now() + self.config.check_timeout);

        match tokio::time::timeout_at(deadline, self.effective_set(user_id, organization_id))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(AuthzError::Timeout(format!(
                "permission check for user '{user_id}' in organization '{organization_id}' \
                 missed its deadline"
            ))),
        }
    }

    /// Cache-aside lookup with single-flight recomputation.
    ///
    /// Concurrent misses for the same key elect one leader; the rest wait on
    /// the flight and re-probe instead of issuing duplicate store queries.
    async fn effective_set(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> AuthzResult<EffectivePermissionSet> {
        match self.cache.get(user_id, organization_id).await {
            Ok(Some(set)) => return Ok(set),
            Ok(None) => {}
            Err(error) => {
                warn!(%error, %user_id, %organization_id, "permission cache read failed, computing from stores");
                return self.recompute(user_id, organization_id).await;
            }
        }

        let key = (user_id, organization_id);
        let flight = {
            let mut flights = self.flights.lock().await;
            flights
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        // One task at a time passes this point per key; followers queue here
        // and find the cache warm when their turn comes.
        let permit = flight.lock().await;
        let result = self.probe_or_recompute(user_id, organization_id).await;
        drop(permit);

        {
            let mut flights = self.flights.lock().await;
            flights.remove(&key);
        }

        result
    }

    async fn probe_or_recompute(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> AuthzResult<EffectivePermissionSet> {
        match self.cache.get(user_id, organization_id).await {
            Ok(Some(set)) => return Ok(set),
            Ok(None) => {}
            Err(error) => {
                warn!(%error, %user_id, %organization_id, "permission cache read failed, computing from stores");
                return self.recompute(user_id, organization_id).await;
            }
        }

        let set = self.recompute(user_id, organization_id).await?;
        if let Err(error) = self.cache.put(set.clone(), self.config.cache_ttl).await {
            warn!(%error, %user_id, %organization_id, "permission cache write failed");
        }

        Ok(set)
    }

    /// Recomputes the effective set from the stores: union of permissions
    /// over the user's active assignments, resolved through active roles and
    /// active catalog entries.
    async fn recompute(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> AuthzResult<EffectivePermissionSet> {
        let assignments = self
            .assignments
            .list_active_assignments(user_id, organization_id)
            .await?;

        let mut permission_ids: BTreeSet<PermissionId> = BTreeSet::new();
        for assignment in assignments {
            let role = self
                .roles
                .find_role(assignment.role_id, organization_id)
                .await?;
            if let Some(role) = role.filter(|role| role.active) {
                permission_ids.extend(role.permission_ids.iter().copied());
            }
        }

        let ids: Vec<PermissionId> = permission_ids.into_iter().collect();
        let permissions = self.catalog.find_by_ids(&ids).await?;
        let keys = permissions
            .into_iter()
            .filter(|permission| permission.active)
            .map(|permission| permission.key())
            .collect();

        Ok(EffectivePermissionSet::new(
            user_id,
            organization_id,
            keys,
            Utc::now(),
        ))
    }

    // Invalidation. A failed eviction is logged, not surfaced: when the
    // cache tier is unreachable, reads fall back to the stores and still
    // observe the committed write.

    async fn invalidate_role_scope(&self, role_id: RoleId, organization_id: OrganizationId) {
        if let Err(error) = self.cache.invalidate_role(role_id, organization_id).await {
            warn!(%error, %role_id, %organization_id, "role cache invalidation failed");
        }
    }

    async fn invalidate_user_scope(&self, user_id: UserId, organization_id: OrganizationId) {
        if let Err(error) = self.cache.invalidate(user_id, organization_id).await {
            warn!(%error, %user_id, %organization_id, "user cache invalidation failed");
        }
    }
}

#[cfg(test)]
mod tests;
