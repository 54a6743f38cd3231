//! In-memory fakes shared by the service test modules.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantline_core::{
    AuthzError, AuthzResult, OrganizationId, PermissionId, RoleId, UserId,
};
use grantline_domain::{
    AuthzEvent, AuthzEventKind, EffectivePermissionSet, Permission, RemovalReason, Role,
    RoleAssignment,
};
use tokio::time::Instant;

use crate::assignment_service::{AssignmentRepository, AssignmentService};
use crate::authorization_service::AuthorizationService;
use crate::catalog_service::{CatalogService, PermissionCatalog};
use crate::engine_config::EngineConfig;
use crate::event_publisher::EventPublisher;
use crate::permission_cache::PermissionCache;
use crate::request_context::RequestContext;
use crate::role_service::{CreateRoleInput, RoleRepository, RoleService};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct StoreState {
    permissions: Vec<Permission>,
    roles: HashMap<RoleId, Role>,
    assignments: Vec<RoleAssignment>,
}

/// In-memory role, assignment, and catalog store backing service tests.
#[derive(Default)]
pub(crate) struct FakeStore {
    state: Mutex<StoreState>,
    pub(crate) assignment_reads: AtomicUsize,
    read_delay: Mutex<Option<Duration>>,
}

impl FakeStore {
    pub(crate) fn add_permission(&self, resource: &str, action: &str) -> PermissionId {
        let permission = match Permission::new(resource, action, None, Utc::now()) {
            Ok(permission) => permission,
            Err(error) => panic!("test permission should validate: {error}"),
        };
        let id = permission.id;
        lock(&self.state).permissions.push(permission);
        id
    }

    pub(crate) fn retire_permission(&self, id: PermissionId) {
        let mut state = lock(&self.state);
        if let Some(permission) = state.permissions.iter_mut().find(|p| p.id == id) {
            permission.active = false;
        }
    }

    pub(crate) fn add_predefined_role(&self, name: &str, permission_ids: &[PermissionId]) -> RoleId {
        let role = match Role::new_predefined(
            name,
            None,
            permission_ids.iter().copied().collect(),
            UserId::new(),
            Utc::now(),
        ) {
            Ok(role) => role,
            Err(error) => panic!("test role should validate: {error}"),
        };
        let id = role.id;
        lock(&self.state).roles.insert(id, role);
        id
    }

    pub(crate) fn set_read_delay(&self, delay: Duration) {
        *lock(&self.read_delay) = Some(delay);
    }
}

#[async_trait]
impl PermissionCatalog for FakeStore {
    async fn list_permissions(&self) -> AuthzResult<Vec<Permission>> {
        Ok(lock(&self.state)
            .permissions
            .iter()
            .filter(|permission| permission.active)
            .cloned()
            .collect())
    }

    async fn resolve(&self, resource: &str, action: &str) -> AuthzResult<Option<Permission>> {
        Ok(lock(&self.state)
            .permissions
            .iter()
            .find(|permission| permission.resource == resource && permission.action == action)
            .cloned())
    }

    async fn find_by_ids(&self, ids: &[PermissionId]) -> AuthzResult<Vec<Permission>> {
        Ok(lock(&self.state)
            .permissions
            .iter()
            .filter(|permission| ids.contains(&permission.id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RoleRepository for FakeStore {
    async fn insert_role(&self, role: Role) -> AuthzResult<Role> {
        let mut state = lock(&self.state);
        let organization_id = role.organization_id.unwrap_or_default();
        let duplicate = state.roles.values().any(|existing| {
            existing.active && existing.visible_to(organization_id) && existing.name == role.name
        });
        if duplicate {
            return Err(AuthzError::DuplicateName(format!(
                "role '{}' already exists",
                role.name
            )));
        }

        state.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn update_role(&self, role: Role, expected_version: i64) -> AuthzResult<Role> {
        let mut state = lock(&self.state);
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
        let mut state = lock(&self.state);
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
        Ok(lock(&self.state)
            .roles
            .get(&role_id)
            .filter(|role| role.visible_to(organization_id))
            .cloned())
    }

    async fn list_roles(&self, organization_id: OrganizationId) -> AuthzResult<Vec<Role>> {
        Ok(lock(&self.state)
            .roles
            .values()
            .filter(|role| role.active && role.visible_to(organization_id))
            .cloned()
            .collect())
    }

    async fn count_custom_roles(&self, organization_id: OrganizationId) -> AuthzResult<usize> {
        Ok(lock(&self.state)
            .roles
            .values()
            .filter(|role| {
                role.active && role.organization_id == Some(organization_id)
            })
            .count())
    }
}

#[async_trait]
impl AssignmentRepository for FakeStore {
    async fn insert_assignment(&self, assignment: RoleAssignment) -> AuthzResult<RoleAssignment> {
        let mut state = lock(&self.state);
        let now = Utc::now();
        let duplicate = state.assignments.iter().any(|existing| {
            existing.user_id == assignment.user_id
                && existing.role_id == assignment.role_id
                && existing.is_active(now)
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
        let mut state = lock(&self.state);
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
        Ok(lock(&self.state)
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
        self.assignment_reads.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.read_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(lock(&self.state)
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
        Ok(lock(&self.state)
            .assignments
            .iter()
            .filter(|assignment| {
                assignment.organization_id == organization_id
                    && assignment.is_active(now)
                    && assignment
                        .expires_at
                        .is_some_and(|expiry| expiry <= until)
            })
            .cloned()
            .collect())
    }

    async fn list_expired_unremoved(
        &self,
        cutoff: DateTime<Utc>,
    ) -> AuthzResult<Vec<RoleAssignment>> {
        Ok(lock(&self.state)
            .assignments
            .iter()
            .filter(|assignment| {
                assignment.removed_at.is_none()
                    && assignment
                        .expires_at
                        .is_some_and(|expiry| expiry <= cutoff)
            })
            .cloned()
            .collect())
    }
}

struct CacheEntry {
    set: EffectivePermissionSet,
    expires_at: Instant,
}

/// In-memory permission cache with failure injection and counters.
#[derive(Default)]
pub(crate) struct FakeCache {
    entries: Mutex<HashMap<(UserId, OrganizationId), CacheEntry>>,
    pub(crate) puts: AtomicUsize,
    pub(crate) fail_reads: AtomicBool,
    pub(crate) fail_writes: AtomicBool,
}

#[async_trait]
impl PermissionCache for FakeCache {
    async fn get(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> AuthzResult<Option<EffectivePermissionSet>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AuthzError::CacheUnavailable(
                "injected cache read failure".to_owned(),
            ));
        }

        Ok(lock(&self.entries)
            .get(&(user_id, organization_id))
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.set.clone()))
    }

    async fn put(&self, set: EffectivePermissionSet, ttl: Duration) -> AuthzResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AuthzError::CacheUnavailable(
                "injected cache write failure".to_owned(),
            ));
        }

        self.puts.fetch_add(1, Ordering::SeqCst);
        lock(&self.entries).insert(
            (set.user_id, set.organization_id),
            CacheEntry {
                set,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn invalidate(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> AuthzResult<()> {
        lock(&self.entries).remove(&(user_id, organization_id));
        Ok(())
    }

    async fn invalidate_organization(&self, organization_id: OrganizationId) -> AuthzResult<()> {
        lock(&self.entries).retain(|(_, entry_organization), _| {
            *entry_organization != organization_id
        });
        Ok(())
    }
}

/// Event publisher that records everything it is handed.
#[derive(Default)]
pub(crate) struct RecordingPublisher {
    events: Mutex<Vec<AuthzEvent>>,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: AuthzEvent) -> AuthzResult<()> {
        lock(&self.events).push(event);
        Ok(())
    }
}

/// Fully wired engine over the in-memory fakes.
pub(crate) struct TestEngine {
    store: Arc<FakeStore>,
    cache: Arc<FakeCache>,
    publisher: Arc<RecordingPublisher>,
    config: EngineConfig,
}

impl TestEngine {
    pub(crate) fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub(crate) fn with_role_cap(custom_role_cap: usize) -> Self {
        Self::with_config(EngineConfig {
            custom_role_cap,
            ..EngineConfig::default()
        })
    }

    pub(crate) fn with_config(config: EngineConfig) -> Self {
        Self {
            store: Arc::new(FakeStore::default()),
            cache: Arc::new(FakeCache::default()),
            publisher: Arc::new(RecordingPublisher::default()),
            config,
        }
    }

    pub(crate) fn store(&self) -> &FakeStore {
        &self.store
    }

    pub(crate) fn cache(&self) -> &FakeCache {
        &self.cache
    }

    pub(crate) fn catalog_service(&self) -> CatalogService {
        CatalogService::new(self.store.clone())
    }

    pub(crate) fn role_service(&self) -> RoleService {
        RoleService::new(
            self.store.clone(),
            self.catalog_service(),
            self.publisher.clone(),
            self.config.clone(),
        )
    }

    pub(crate) fn assignment_service(&self) -> AssignmentService {
        AssignmentService::new(self.store.clone(), self.store.clone(), self.publisher.clone())
    }

    pub(crate) fn authorization_service(&self) -> AuthorizationService {
        AuthorizationService::new(
            self.role_service(),
            self.assignment_service(),
            self.catalog_service(),
            self.cache.clone(),
            self.config.clone(),
        )
    }

    pub(crate) fn permission(&self, resource: &str, action: &str) -> PermissionId {
        self.store.add_permission(resource, action)
    }

    pub(crate) fn seed_predefined_role(
        &self,
        name: &str,
        permission_ids: &[PermissionId],
    ) -> RoleId {
        self.store.add_predefined_role(name, permission_ids)
    }

    pub(crate) async fn seed_custom_role(
        &self,
        organization_id: OrganizationId,
        name: &str,
        permission_ids: &[PermissionId],
    ) -> RoleId {
        let role = self
            .role_service()
            .create_role(
                &RequestContext::default(),
                organization_id,
                create_role_input(name, permission_ids),
                UserId::new(),
            )
            .await;

        match role {
            Ok(role) => role.id,
            Err(error) => panic!("seed role should persist: {error}"),
        }
    }

    pub(crate) fn published_events(&self) -> Vec<AuthzEvent> {
        lock(&self.publisher.events).clone()
    }

    pub(crate) fn assignment_events(&self) -> Vec<AuthzEvent> {
        self.published_events()
            .into_iter()
            .filter(|event| matches!(event.kind, AuthzEventKind::UserRoleAssigned { .. }))
            .collect()
    }

    pub(crate) fn removal_events(&self) -> Vec<(UserId, RemovalReason)> {
        self.published_events()
            .into_iter()
            .filter_map(|event| match event.kind {
                AuthzEventKind::UserRoleRemoved { user_id, reason, .. } => {
                    Some((user_id, reason))
                }
                _ => None,
            })
            .collect()
    }
}

pub(crate) fn create_role_input(name: &str, permission_ids: &[PermissionId]) -> CreateRoleInput {
    CreateRoleInput {
        name: name.to_owned(),
        description: None,
        permission_ids: permission_ids.iter().copied().collect(),
    }
}
