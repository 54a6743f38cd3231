use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use grantline_core::{AuthzError, AuthzResult, OrganizationId, RoleId, UserId};
use grantline_domain::{AuthzEvent, AuthzEventKind, RemovalReason, RoleAssignment};

use crate::event_publisher::EventPublisher;
use crate::request_context::RequestContext;
use crate::role_service::RoleRepository;

/// Repository port for role assignment storage.
#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    /// Persists a new assignment.
    ///
    /// The store enforces at most one active assignment per `(user, role)`;
    /// a racing duplicate insert fails with `ConcurrentModification`, which
    /// a retrying caller resolves by observing the winner.
    async fn insert_assignment(&self, assignment: RoleAssignment) -> AuthzResult<RoleAssignment>;

    /// Replaces an assignment row guarded by its optimistic version.
    async fn update_assignment(
        &self,
        assignment: RoleAssignment,
        expected_version: i64,
    ) -> AuthzResult<RoleAssignment>;

    /// Finds the active assignment for a `(user, role)` pair, evaluating
    /// expiry lazily against `now`.
    async fn find_active_assignment(
        &self,
        user_id: UserId,
        role_id: RoleId,
        organization_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> AuthzResult<Option<RoleAssignment>>;

    /// Lists a user's active assignments within one organization.
    async fn list_active_assignments(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> AuthzResult<Vec<RoleAssignment>>;

    /// Lists active assignments expiring before `until`.
    async fn list_expiring_within(
        &self,
        organization_id: OrganizationId,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AuthzResult<Vec<RoleAssignment>>;

    /// Lists assignments whose expiry elapsed before `cutoff` and that were
    /// never marked removed.
    async fn list_expired_unremoved(
        &self,
        cutoff: DateTime<Utc>,
    ) -> AuthzResult<Vec<RoleAssignment>>;
}

/// Application service for user-role assignment administration.
#[derive(Clone)]
pub struct AssignmentService {
    assignments: Arc<dyn AssignmentRepository>,
    roles: Arc<dyn RoleRepository>,
    publisher: Arc<dyn EventPublisher>,
}

impl AssignmentService {
    /// Creates an assignment service from its dependencies.
    #[must_use]
    pub fn new(
        assignments: Arc<dyn AssignmentRepository>,
        roles: Arc<dyn RoleRepository>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            assignments,
            roles,
            publisher,
        }
    }

    /// Assigns a role to a user, announcing `UserRoleAssigned`.
    ///
    /// Idempotent for safe retries: an existing active assignment is
    /// returned unchanged, without a duplicate row and without re-emitting
    /// the event.
    pub async fn assign(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        role_id: RoleId,
        organization_id: OrganizationId,
        assigned_by: UserId,
        expires_at: Option<DateTime<Utc>>,
    ) -> AuthzResult<RoleAssignment> {
        let role = self
            .roles
            .find_role(role_id, organization_id)
            .await?
            .filter(|role| role.active)
            .ok_or_else(|| {
                AuthzError::NotFound(format!(
                    "role '{role_id}' was not found in organization '{organization_id}'"
                ))
            })?;

        let now = Utc::now();
        if let Some(existing) = self
            .assignments
            .find_active_assignment(user_id, role_id, organization_id, now)
            .await?
        {
            return Ok(existing);
        }

        let assignment = RoleAssignment::new(
            user_id,
            role.id,
            organization_id,
            assigned_by,
            expires_at,
            now,
        );
        let assignment = self.assignments.insert_assignment(assignment).await?;

        self.publish(
            ctx,
            organization_id,
            Some(assigned_by),
            AuthzEventKind::UserRoleAssigned {
                user_id,
                role_id: role.id,
                expires_at: assignment.expires_at,
            },
        )
        .await?;

        Ok(assignment)
    }

    /// Pushes an active assignment's expiry further into the future.
    pub async fn extend(
        &self,
        _ctx: &RequestContext,
        user_id: UserId,
        role_id: RoleId,
        organization_id: OrganizationId,
        new_expires_at: DateTime<Utc>,
    ) -> AuthzResult<RoleAssignment> {
        let now = Utc::now();
        let assignment = self
            .require_active_assignment(user_id, role_id, organization_id, now)
            .await?;

        let expected_version = assignment.version;
        let mut extended = assignment;
        extended.extend(new_expires_at, now)?;

        self.assignments
            .update_assignment(extended, expected_version)
            .await
    }

    /// Removes an active assignment, announcing `UserRoleRemoved`.
    pub async fn remove(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        role_id: RoleId,
        organization_id: OrganizationId,
        removed_by: UserId,
        reason: Option<RemovalReason>,
    ) -> AuthzResult<()> {
        let now = Utc::now();
        let assignment = self
            .require_active_assignment(user_id, role_id, organization_id, now)
            .await?;

        let reason = reason.unwrap_or(RemovalReason::Manual);
        let expected_version = assignment.version;
        let mut removed = assignment;
        removed.mark_removed(Some(removed_by), reason, now);

        self.assignments
            .update_assignment(removed, expected_version)
            .await?;

        self.publish(
            ctx,
            organization_id,
            Some(removed_by),
            AuthzEventKind::UserRoleRemoved {
                user_id,
                role_id,
                reason,
            },
        )
        .await?;

        Ok(())
    }

    /// Lists a user's active assignments, evaluating expiry lazily.
    pub async fn list_active_assignments(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> AuthzResult<Vec<RoleAssignment>> {
        self.assignments
            .list_active_assignments(user_id, organization_id, Utc::now())
            .await
    }

    /// Lists active assignments expiring within the given window.
    pub async fn list_expiring_within(
        &self,
        organization_id: OrganizationId,
        window: Duration,
    ) -> AuthzResult<Vec<RoleAssignment>> {
        let now = Utc::now();
        self.assignments
            .list_expiring_within(organization_id, now + window, now)
            .await
    }

    /// Storage-hygiene sweep over long-expired assignments.
    ///
    /// Marks rows whose expiry elapsed at least `grace` ago as removed with
    /// reason `Expired` and announces each removal. Correctness never
    /// depends on this running: expiry is already observed lazily by every
    /// read path.
    pub async fn sweep_expired(&self, ctx: &RequestContext, grace: Duration) -> AuthzResult<u64> {
        let now = Utc::now();
        let expired = self
            .assignments
            .list_expired_unremoved(now - grace)
            .await?;

        let mut swept = 0u64;
        for assignment in expired {
            let expected_version = assignment.version;
            let mut removed = assignment;
            removed.mark_removed(None, RemovalReason::Expired, now);

            match self
                .assignments
                .update_assignment(removed.clone(), expected_version)
                .await
            {
                Ok(_) => {}
                Err(AuthzError::ConcurrentModification(_)) => {
                    // Another writer touched the row; the next sweep gets it.
                    continue;
                }
                Err(error) => return Err(error),
            }

            self.publish(
                ctx,
                removed.organization_id,
                None,
                AuthzEventKind::UserRoleRemoved {
                    user_id: removed.user_id,
                    role_id: removed.role_id,
                    reason: RemovalReason::Expired,
                },
            )
            .await?;

            swept += 1;
        }

        if swept > 0 {
            tracing::info!(swept, "expired assignments swept");
        }

        Ok(swept)
    }

    async fn require_active_assignment(
        &self,
        user_id: UserId,
        role_id: RoleId,
        organization_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> AuthzResult<RoleAssignment> {
        self.assignments
            .find_active_assignment(user_id, role_id, organization_id, now)
            .await?
            .ok_or_else(|| {
                AuthzError::NotAssigned(format!(
                    "user '{user_id}' has no active assignment to role '{role_id}'"
                ))
            })
    }

    async fn publish(
        &self,
        ctx: &RequestContext,
        organization_id: OrganizationId,
        actor: Option<UserId>,
        kind: AuthzEventKind,
    ) -> AuthzResult<()> {
        self.publisher
            .publish(AuthzEvent::new(
                kind,
                organization_id,
                actor,
                ctx.correlation_id,
                Utc::now(),
            ))
            .await
    }
}
