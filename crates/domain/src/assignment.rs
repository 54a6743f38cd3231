//! Time-bounded bindings of users to roles.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use grantline_core::{AssignmentId, AuthzError, AuthzResult, OrganizationId, RoleId, UserId};
use serde::{Deserialize, Serialize};

/// Why an assignment stopped granting permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// An administrator removed the assignment.
    Manual,
    /// The assignment's expiry elapsed and a hygiene sweep recorded it.
    Expired,
    /// The referenced role was deleted and the assignment was cascaded.
    RoleDeleted,
}

impl RemovalReason {
    /// Returns a stable storage value for this reason.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Expired => "expired",
            Self::RoleDeleted => "role_deleted",
        }
    }
}

impl FromStr for RemovalReason {
    type Err = AuthzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "manual" => Ok(Self::Manual),
            "expired" => Ok(Self::Expired),
            "role_deleted" => Ok(Self::RoleDeleted),
            _ => Err(AuthzError::Validation(format!(
                "unknown removal reason value '{value}'"
            ))),
        }
    }
}

/// Binding of a user to a role within one organization.
///
/// The row is append-mostly: expiry and removal are observed states, not
/// deletions, so the history stays available for audit. An assignment
/// contributes permissions only while [`RoleAssignment::is_active`] holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    /// Stable assignment identifier.
    pub id: AssignmentId,
    /// Assigned user.
    pub user_id: UserId,
    /// Assigned role.
    pub role_id: RoleId,
    /// Organization scope of the assignment.
    pub organization_id: OrganizationId,
    /// Assignment timestamp.
    pub assigned_at: DateTime<Utc>,
    /// User that created the assignment.
    pub assigned_by: UserId,
    /// Optional expiry; `None` means the assignment does not expire.
    pub expires_at: Option<DateTime<Utc>>,
    /// Removal timestamp, set once the assignment is revoked.
    pub removed_at: Option<DateTime<Utc>>,
    /// User that removed the assignment.
    pub removed_by: Option<UserId>,
    /// Why the assignment was removed.
    pub removed_reason: Option<RemovalReason>,
    /// Optimistic concurrency version, bumped on every mutation.
    pub version: i64,
}

impl RoleAssignment {
    /// Creates a new assignment.
    ///
    /// An `expires_at` that already passed is accepted; the assignment is
    /// simply never observed as active. Expiry is a lazily evaluated state,
    /// not an input constraint.
    #[must_use]
    pub fn new(
        user_id: UserId,
        role_id: RoleId,
        organization_id: OrganizationId,
        assigned_by: UserId,
        expires_at: Option<DateTime<Utc>>,
        assigned_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AssignmentId::new(),
            user_id,
            role_id,
            organization_id,
            assigned_at,
            assigned_by,
            expires_at,
            removed_at: None,
            removed_by: None,
            removed_reason: None,
            version: 1,
        }
    }

    /// Returns whether the assignment grants permissions at `now`.
    ///
    /// Expiry is evaluated lazily here; no background job is required for an
    /// assignment to stop granting.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.removed_at.is_none() && self.expires_at.is_none_or(|expiry| expiry > now)
    }

    /// Returns whether the assignment carries an expiry.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.expires_at.is_some()
    }

    /// Marks the assignment removed. Terminal with respect to authorization
    /// effect; the row persists for history.
    ///
    /// `removed_by` is `None` for system-initiated removals such as the
    /// expiry sweep.
    pub fn mark_removed(
        &mut self,
        removed_by: Option<UserId>,
        reason: RemovalReason,
        now: DateTime<Utc>,
    ) {
        self.removed_at = Some(now);
        self.removed_by = removed_by;
        self.removed_reason = Some(reason);
        self.version += 1;
    }

    /// Replaces the expiry with a later one.
    ///
    /// The new expiry must be strictly in the future relative to `now`.
    pub fn extend(&mut self, new_expires_at: DateTime<Utc>, now: DateTime<Utc>) -> AuthzResult<()> {
        if new_expires_at <= now {
            return Err(AuthzError::Validation(
                "new expiry must be strictly in the future".to_owned(),
            ));
        }

        self.expires_at = Some(new_expires_at);
        self.version += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use grantline_core::{OrganizationId, RoleId, UserId};
    use proptest::prelude::*;

    use super::{RemovalReason, RoleAssignment};

    fn assignment(expires_in_seconds: Option<i64>) -> RoleAssignment {
        let now = Utc::now();
        RoleAssignment::new(
            UserId::new(),
            RoleId::new(),
            OrganizationId::new(),
            UserId::new(),
            expires_in_seconds.map(|seconds| now + Duration::seconds(seconds)),
            now,
        )
    }

    #[test]
    fn assignment_without_expiry_is_active() {
        let assignment = assignment(None);
        assert!(assignment.is_active(Utc::now()));
    }

    #[test]
    fn expiry_already_in_the_past_is_accepted_but_inactive() {
        let assignment = assignment(Some(-1));
        assert!(!assignment.is_active(Utc::now()));
    }

    #[test]
    fn expired_assignment_is_inactive_without_removal() {
        let assignment = assignment(Some(60));
        let later = Utc::now() + chrono::Duration::seconds(120);
        assert!(!assignment.is_active(later));
        assert!(assignment.removed_at.is_none());
    }

    #[test]
    fn removal_is_terminal() {
        let mut assignment = assignment(None);
        assignment.mark_removed(Some(UserId::new()), RemovalReason::Manual, Utc::now());
        assert!(!assignment.is_active(Utc::now()));
        assert_eq!(assignment.removed_reason, Some(RemovalReason::Manual));
        assert_eq!(assignment.version, 2);
    }

    #[test]
    fn extend_rejects_past_expiry() {
        let mut assignment = assignment(Some(3600));
        let result = assignment.extend(Utc::now() - chrono::Duration::seconds(1), Utc::now());
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn active_iff_not_removed_and_not_expired(
            expiry_offset in -86_400i64..86_400,
            removed in any::<bool>(),
        ) {
            let now = Utc::now();
            let mut assignment = assignment(None);
            assignment.expires_at = Some(now + chrono::Duration::seconds(expiry_offset));
            if removed {
                assignment.mark_removed(Some(UserId::new()), RemovalReason::Manual, now);
            }

            let expected = !removed && expiry_offset > 0;
            prop_assert_eq!(assignment.is_active(now), expected);
        }
    }
}
