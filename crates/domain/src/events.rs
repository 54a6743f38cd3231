//! Mutation events announced on the invalidation channel.

use chrono::{DateTime, Utc};
use grantline_core::{CorrelationId, OrganizationId, RoleId, UserId};
use serde::{Deserialize, Serialize};

use crate::assignment::RemovalReason;

/// What changed in a successful mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AuthzEventKind {
    /// A custom role was created.
    RoleCreated {
        /// Created role.
        role_id: RoleId,
        /// Role name at creation time.
        name: String,
    },
    /// A custom role's permission set was replaced.
    RoleModified {
        /// Modified role.
        role_id: RoleId,
        /// Role name at modification time.
        name: String,
    },
    /// A custom role was soft-deleted and its assignments cascaded.
    RoleDeleted {
        /// Deleted role.
        role_id: RoleId,
        /// Role name at deletion time.
        name: String,
        /// Number of assignments deactivated by the cascade.
        cascaded_assignments: u64,
    },
    /// A role was assigned to a user.
    UserRoleAssigned {
        /// Assigned user.
        user_id: UserId,
        /// Assigned role.
        role_id: RoleId,
        /// Expiry carried by the assignment, when temporary.
        expires_at: Option<DateTime<Utc>>,
    },
    /// A role assignment stopped granting.
    UserRoleRemoved {
        /// Affected user.
        user_id: UserId,
        /// Affected role.
        role_id: RoleId,
        /// Why the assignment was removed.
        reason: RemovalReason,
    },
}

impl AuthzEventKind {
    /// Returns a stable action identifier for this event kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoleCreated { .. } => "role.created",
            Self::RoleModified { .. } => "role.modified",
            Self::RoleDeleted { .. } => "role.deleted",
            Self::UserRoleAssigned { .. } => "user_role.assigned",
            Self::UserRoleRemoved { .. } => "user_role.removed",
        }
    }
}

/// A mutation announcement, emitted exactly once per successful mutation.
///
/// Consumed by cache invalidation listeners in-process and by external
/// audit recording; never emitted when the mutation fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthzEvent {
    /// What changed.
    pub kind: AuthzEventKind,
    /// Organization the mutation belongs to.
    pub organization_id: OrganizationId,
    /// User that performed the mutation; `None` for system-initiated sweeps.
    pub actor: Option<UserId>,
    /// When the mutation committed.
    pub occurred_at: DateTime<Utc>,
    /// Tracing correlation identifier passed through from the caller.
    pub correlation_id: CorrelationId,
}

impl AuthzEvent {
    /// Creates an event stamped with the given occurrence time.
    #[must_use]
    pub fn new(
        kind: AuthzEventKind,
        organization_id: OrganizationId,
        actor: Option<UserId>,
        correlation_id: CorrelationId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            organization_id,
            actor,
            occurred_at,
            correlation_id,
        }
    }

    /// Returns the user whose cached permission set this event affects,
    /// when the effect is limited to a single user.
    ///
    /// Role-level events return `None`: the affected user set is unknown
    /// without a reverse index, so consumers evict the whole organization.
    #[must_use]
    pub fn affected_user(&self) -> Option<UserId> {
        match &self.kind {
            AuthzEventKind::UserRoleAssigned { user_id, .. }
            | AuthzEventKind::UserRoleRemoved { user_id, .. } => Some(*user_id),
            AuthzEventKind::RoleCreated { .. }
            | AuthzEventKind::RoleModified { .. }
            | AuthzEventKind::RoleDeleted { .. } => None,
        }
    }
}
