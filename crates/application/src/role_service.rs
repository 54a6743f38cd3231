use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantline_core::{AuthzError, AuthzResult, OrganizationId, PermissionId, RoleId, UserId};
use grantline_domain::{AuthzEvent, AuthzEventKind, Role, RoleAssignment};

use crate::catalog_service::CatalogService;
use crate::engine_config::EngineConfig;
use crate::event_publisher::EventPublisher;
use crate::request_context::RequestContext;

/// Input payload for creating custom roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRoleInput {
    /// Role name, unique among the organization's active roles.
    pub name: String,
    /// Optional human-readable description.
    pub description: Option<String>,
    /// Permissions to attach; must all resolve in the catalog.
    pub permission_ids: BTreeSet<PermissionId>,
}

/// Repository port for role storage.
///
/// Roles are mutated only through [`RoleService`] so that event emission
/// and cache invalidation always fire; nothing writes around it.
#[async_trait]
pub trait RoleRepository: Send + Sync {
    /// Persists a new role.
    ///
    /// Fails with `DuplicateName` when the organization already has an
    /// active role with the same name.
    async fn insert_role(&self, role: Role) -> AuthzResult<Role>;

    /// Replaces a role row guarded by its optimistic version.
    ///
    /// Fails with `ConcurrentModification` when `expected_version` lost the
    /// race, `NotFound` when the row is gone.
    async fn update_role(&self, role: Role, expected_version: i64) -> AuthzResult<Role>;

    /// Soft-deactivates a role and marks all of its active assignments
    /// removed with reason `RoleDeleted`, atomically.
    ///
    /// Returns the deactivated role and the cascaded assignments.
    async fn deactivate_role_cascading(
        &self,
        role_id: RoleId,
        organization_id: OrganizationId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> AuthzResult<(Role, Vec<RoleAssignment>)>;

    /// Finds a role visible to the organization: one of its custom roles or
    /// a global predefined role.
    async fn find_role(
        &self,
        role_id: RoleId,
        organization_id: OrganizationId,
    ) -> AuthzResult<Option<Role>>;

    /// Lists active roles visible to the organization, global predefined
    /// roles unioned with its custom roles.
    async fn list_roles(&self, organization_id: OrganizationId) -> AuthzResult<Vec<Role>>;

    /// Counts the organization's active custom roles.
    async fn count_custom_roles(&self, organization_id: OrganizationId) -> AuthzResult<usize>;
}

/// Application service for role administration.
#[derive(Clone)]
pub struct RoleService {
    roles: Arc<dyn RoleRepository>,
    catalog: CatalogService,
    publisher: Arc<dyn EventPublisher>,
    config: EngineConfig,
}

impl RoleService {
    /// Creates a role service from its dependencies.
    #[must_use]
    pub fn new(
        roles: Arc<dyn RoleRepository>,
        catalog: CatalogService,
        publisher: Arc<dyn EventPublisher>,
        config: EngineConfig,
    ) -> Self {
        Self {
            roles,
            catalog,
            publisher,
            config,
        }
    }

    /// Creates a custom role and announces `RoleCreated`.
    pub async fn create_role(
        &self,
        ctx: &RequestContext,
        organization_id: OrganizationId,
        input: CreateRoleInput,
        actor: UserId,
    ) -> AuthzResult<Role> {
        self.catalog.ensure_known(&input.permission_ids).await?;

        let custom_count = self.roles.count_custom_roles(organization_id).await?;
        if custom_count >= self.config.custom_role_cap {
            return Err(AuthzError::RoleLimitExceeded(format!(
                "organization '{organization_id}' already holds {custom_count} custom roles"
            )));
        }

        let role = Role::new_custom(
            organization_id,
            input.name,
            input.description,
            input.permission_ids,
            actor,
            Utc::now(),
        )?;

        let role = self.roles.insert_role(role).await?;

        self.publish(
            ctx,
            organization_id,
            actor,
            AuthzEventKind::RoleCreated {
                role_id: role.id,
                name: role.name.clone(),
            },
        )
        .await?;

        Ok(role)
    }

    /// Replaces a custom role's permission set and announces `RoleModified`.
    pub async fn update_role_permissions(
        &self,
        ctx: &RequestContext,
        role_id: RoleId,
        organization_id: OrganizationId,
        new_permission_ids: BTreeSet<PermissionId>,
        actor: UserId,
    ) -> AuthzResult<Role> {
        if new_permission_ids.is_empty() {
            return Err(AuthzError::Validation(
                "role must reference at least one permission".to_owned(),
            ));
        }

        self.catalog.ensure_known(&new_permission_ids).await?;

        let role = self.require_role(role_id, organization_id).await?;
        if !role.can_be_modified() {
            return Err(AuthzError::ImmutableRole(format!(
                "role '{}' is {} and cannot be modified",
                role.name,
                role.kind.as_str()
            )));
        }

        let expected_version = role.version;
        let mut updated = role;
        updated.permission_ids = new_permission_ids;
        updated.version += 1;
        updated.updated_at = Some(Utc::now());
        updated.updated_by = Some(actor);

        let updated = self.roles.update_role(updated, expected_version).await?;

        self.publish(
            ctx,
            organization_id,
            actor,
            AuthzEventKind::RoleModified {
                role_id: updated.id,
                name: updated.name.clone(),
            },
        )
        .await?;

        Ok(updated)
    }

    /// Soft-deletes a custom role, cascades its assignments, and announces
    /// `RoleDeleted`.
    pub async fn delete_role(
        &self,
        ctx: &RequestContext,
        role_id: RoleId,
        organization_id: OrganizationId,
        actor: UserId,
    ) -> AuthzResult<()> {
        let role = self.require_role(role_id, organization_id).await?;
        if !role.can_be_modified() {
            return Err(AuthzError::ImmutableRole(format!(
                "role '{}' is {} and cannot be deleted",
                role.name,
                role.kind.as_str()
            )));
        }

        let (role, cascaded) = self
            .roles
            .deactivate_role_cascading(role_id, organization_id, actor, Utc::now())
            .await?;

        self.publish(
            ctx,
            organization_id,
            actor,
            AuthzEventKind::RoleDeleted {
                role_id: role.id,
                name: role.name,
                cascaded_assignments: cascaded.len() as u64,
            },
        )
        .await?;

        Ok(())
    }

    /// Returns a role visible to the organization.
    pub async fn get_role(
        &self,
        role_id: RoleId,
        organization_id: OrganizationId,
    ) -> AuthzResult<Role> {
        self.require_role(role_id, organization_id).await
    }

    /// Finds a role visible to the organization without treating absence as
    /// an error.
    pub async fn find_role(
        &self,
        role_id: RoleId,
        organization_id: OrganizationId,
    ) -> AuthzResult<Option<Role>> {
        self.roles.find_role(role_id, organization_id).await
    }

    /// Lists active roles visible to the organization.
    pub async fn list_roles(&self, organization_id: OrganizationId) -> AuthzResult<Vec<Role>> {
        self.roles.list_roles(organization_id).await
    }

    async fn require_role(
        &self,
        role_id: RoleId,
        organization_id: OrganizationId,
    ) -> AuthzResult<Role> {
        self.roles
            .find_role(role_id, organization_id)
            .await?
            .filter(|role| role.active)
            .ok_or_else(|| {
                AuthzError::NotFound(format!(
                    "role '{role_id}' was not found in organization '{organization_id}'"
                ))
            })
    }

    async fn publish(
        &self,
        ctx: &RequestContext,
        organization_id: OrganizationId,
        actor: UserId,
        kind: AuthzEventKind,
    ) -> AuthzResult<()> {
        self.publisher
            .publish(AuthzEvent::new(
                kind,
                organization_id,
                Some(actor),
                ctx.correlation_id,
                Utc::now(),
            ))
            .await
    }
}
