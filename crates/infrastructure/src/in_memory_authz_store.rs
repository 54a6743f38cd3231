//! In-memory store adapter, used by tests and single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantline_application::{AssignmentRepository, PermissionCatalog, RoleRepository};
use grantline_core::{
    AuthzError, AuthzResult, OrganizationId, PermissionId, RoleId, UserId,
};
use grantline_domain::{Permission, RemovalReason, Role, RoleAssignment};
use tokio::sync::RwLock;

#[derive(Default)]
struct StoreState {
    permissions: Vec<Permission>,
    roles: HashMap<RoleId, Role>,
    assignments: Vec<RoleAssignment>,
}

/// One shared state behind all three store ports.
///
/// Sharing lets the role-deletion cascade touch roles and assignments under
/// a single write lock, mirroring the transaction the PostgreSQL adapters
/// get from the database.
#[derive(Default)]
pub struct InMemoryAuthzStore {
    state: RwLock<StoreState>,
}

impl InMemoryAuthzStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a catalog permission, returning its identifier.
    pub async fn seed_permission(&self, permission: Permission) -> PermissionId {
        let id = permission.id;
        self.state.write().await.permissions.push(permission);
        id
    }

    /// Seeds a role directly, bypassing service validation.
    pub async fn seed_role(&self, role: Role) -> RoleId {
        let id = role.id;
        self.state.write().await.roles.insert(id, role);
        id
    }
}

#[async_trait]
impl PermissionCatalog for InMemoryAuthzStore {
    async fn list_permissions(&self) -> AuthzResult<Vec<Permission>> {
        Ok(self
            .state
            .read()
            .await
            .permissions
            .iter()
            .filter(|permission| permission.active)
            .cloned()
            .collect())
    }

    async fn resolve(&self, resource: &str, action: &str) -> AuthzResult<Option<Permission>> {
        Ok(self
            .state
            .read()
            .await
            .permissions
            .iter()
            .find(|permission| permission.resource == resource && permission.action == action)
            .cloned())
    }

    async fn find_by_ids(&self, ids: &[PermissionId]) -> AuthzResult<Vec<Permission>> {
        Ok(self
            .state
            .read()
            .await
            .permissions
            .iter()
            .filter(|permission| ids.contains(&permission.id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RoleRepository for InMemoryAuthzStore {
    async fn insert_role(&self, role: Role) -> AuthzResult<Role> {
        let mut state = self.state.write().await;

        let conflicting = state.roles.values().any(|existing| {
            existing.active
                && existing.name == role.name
                && match (existing.organization_id, role.organization_id) {
                    (Some(theirs), Some(ours)) => theirs == ours,
                    _ => true,
                }
        });
        if conflicting {
            return Err(AuthzError::DuplicateName(format!(
                "role '{}' already exists",
                role.name
            )));
        }

        state.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn update_role(&self, role: Role, expected_version: i64) -> AuthzResult<Role> {
        let mut state = self.state.write().await;
        let stored = state
            .roles
            .get_mut(&role.id)
            .ok_or_else(|| AuthzError::NotFound(format!("role '{}' was not found", role.id)))?;

        if stored.version != expected_version {
            return Err(AuthzError::ConcurrentModification(format!(
                "role '{}' was modified concurrently",
                role.id
            )));
        }

        *stored = role.clone();
        Ok(role)
    }

    async fn deactivate_role_cascading(
        &self,
        role_id: RoleId,
        organization_id: OrganizationId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> AuthzResult<(Role, Vec<RoleAssignment>)> {
        let mut state = self.state.write().await;

        let role = state
            .roles
            .get_mut(&role_id)
            .filter(|role| role.visible_to(organization_id))
            .ok_or_else(|| AuthzError::NotFound(format!("role '{role_id}' was not found")))?;

        role.active = false;
        role.version += 1;
        role.updated_at = Some(now);
        role.updated_by = Some(actor);
        let role = role.clone();

        let mut cascaded = Vec::new();
        for assignment in state
            .assignments
            .iter_mut()
            .filter(|assignment| assignment.role_id == role_id && assignment.is_active(now))
        {
            assignment.mark_removed(Some(actor), RemovalReason::RoleDeleted, now);
            cascaded.push(assignment.clone());
        }

        Ok((role, cascaded))
    }

    async fn find_role(
        &self,
        role_id: RoleId,
        organization_id: OrganizationId,
    ) -> AuthzResult<Option<Role>> {
        Ok(self
            .state
            .read()
            .await
            .roles
            .get(&role_id)
            .filter(|role| role.visible_to(organization_id))
            .cloned())
    }

    async fn list_roles(&self, organization_id: OrganizationId) -> AuthzResult<Vec<Role>> {
        let mut roles: Vec<Role> = self
            .state
            .read()
            .await
            .roles
            .values()
            .filter(|role| role.active && role.visible_to(organization_id))
            .cloned()
            .collect();

        roles.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(roles)
    }

    async fn count_custom_roles(&self, organization_id: OrganizationId) -> AuthzResult<usize> {
        Ok(self
            .state
            .read()
            .await
            .roles
            .values()
            .filter(|role| role.active && role.organization_id == Some(organization_id))
            .count())
    }
}

#[async_trait]
impl AssignmentRepository for InMemoryAuthzStore {
    async fn insert_assignment(&self, assignment: RoleAssignment) -> AuthzResult<RoleAssignment> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        // An expired but never-removed row for the same pair is settled
        // first, the way the hygiene sweep eventually would.
        for existing in state.assignments.iter_mut().filter(|existing| {
            existing.user_id == assignment.user_id
                && existing.role_id == assignment.role_id
                && existing.removed_at.is_none()
                && existing.expires_at.is_some_and(|expiry| expiry <= now)
        }) {
            existing.mark_removed(None, RemovalReason::Expired, now);
        }

        let duplicate = state.assignments.iter().any(|existing| {
            existing.user_id == assignment.user_id
                && existing.role_id == assignment.role_id
                && existing.removed_at.is_none()
        });
        if duplicate {
            return Err(AuthzError::ConcurrentModification(format!(
                "assignment of role '{}' to user '{}' raced another writer",
                assignment.role_id, assignment.user_id
            )));
        }

        state.assignments.push(assignment.clone());
        Ok(assignment)
    }

    async fn update_assignment(
        &self,
        assignment: RoleAssignment,
        expected_version: i64,
    ) -> AuthzResult<RoleAssignment> {
        let mut state = self.state.write().await;
        let stored = state
            .assignments
            .iter_mut()
            .find(|existing| existing.id == assignment.id)
            .ok_or_else(|| {
                AuthzError::NotFound(format!("assignment '{}' was not found", assignment.id))
            })?;

        if stored.version != expected_version {
            return Err(AuthzError::ConcurrentModification(format!(
                "assignment '{}' was modified concurrently",
                assignment.id
            )));
        }

        *stored = assignment.clone();
        Ok(assignment)
    }

    async fn find_active_assignment(
        &self,
        user_id: UserId,
        role_id: RoleId,
        organization_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> AuthzResult<Option<RoleAssignment>> {
        Ok(self
            .state
            .read()
            .await
            .assignments
            .iter()
            .find(|assignment| {
                assignment.user_id == user_id
                    && assignment.role_id == role_id
                    && assignment.organization_id == organization_id
                    && assignment.is_active(now)
            })
            .cloned())
    }

    async fn list_active_assignments(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> AuthzResult<Vec<RoleAssignment>> {
        Ok(self
            .state
            .read()
            .await
            .assignments
            .iter()
            .filter(|assignment| {
                assignment.user_id == user_id
                    && assignment.organization_id == organization_id
                    && assignment.is_active(now)
            })
            .cloned()
            .collect())
    }

    async fn list_expiring_within(
        &self,
        organization_id: OrganizationId,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AuthzResult<Vec<RoleAssignment>> {
        Ok(self
            .state
            .read()
            .await
            .assignments
            .iter()
            .filter(|assignment| {
                assignment.organization_id == organization_id
                    && assignment.is_active(now)
                    && assignment.expires_at.is_some_and(|expiry| expiry <= until)
            })
            .cloned()
            .collect())
    }

    async fn list_expired_unremoved(
        &self,
        cutoff: DateTime<Utc>,
    ) -> AuthzResult<Vec<RoleAssignment>> {
        Ok(self
            .state
            .read()
            .await
            .assignments
            .iter()
            .filter(|assignment| {
                assignment.removed_at.is_none()
                    && assignment.expires_at.is_some_and(|expiry| expiry <= cutoff)
            })
            .cloned()
            .collect())
    }
}
