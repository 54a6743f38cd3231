use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantline_application::AssignmentRepository;
use grantline_core::{
    AssignmentId, AuthzError, AuthzResult, OrganizationId, RoleId, UserId,
};
use grantline_domain::{RemovalReason, RoleAssignment};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// PostgreSQL-backed role assignment repository.
///
/// A partial unique index over non-removed `(user, role)` rows backs the
/// single-active-assignment invariant; the active predicate itself is
/// evaluated lazily in every query, so expiry needs no background job.
#[derive(Clone)]
pub struct PostgresAssignmentRepository {
    pool: PgPool,
}

impl PostgresAssignmentRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct AssignmentRow {
    id: Uuid,
    user_id: Uuid,
    role_id: Uuid,
    organization_id: Uuid,
    assigned_at: DateTime<Utc>,
    assigned_by: Uuid,
    expires_at: Option<DateTime<Utc>>,
    removed_at: Option<DateTime<Utc>>,
    removed_by: Option<Uuid>,
    removed_reason: Option<String>,
    version: i64,
}

impl TryFrom<AssignmentRow> for RoleAssignment {
    type Error = AuthzError;

    fn try_from(row: AssignmentRow) -> Result<Self, Self::Error> {
        let removed_reason = row
            .removed_reason
            .as_deref()
            .map(RemovalReason::from_str)
            .transpose()
            .map_err(|error| {
                AuthzError::Internal(format!(
                    "invalid stored removal reason for assignment '{}': {error}",
                    row.id
                ))
            })?;

        Ok(RoleAssignment {
            id: AssignmentId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            role_id: RoleId::from_uuid(row.role_id),
            organization_id: OrganizationId::from_uuid(row.organization_id),
            assigned_at: row.assigned_at,
            assigned_by: UserId::from_uuid(row.assigned_by),
            expires_at: row.expires_at,
            removed_at: row.removed_at,
            removed_by: row.removed_by.map(UserId::from_uuid),
            removed_reason,
            version: row.version,
        })
    }
}

const SELECT_ASSIGNMENT: &str = r#"
    SELECT id, user_id, role_id, organization_id, assigned_at, assigned_by,
           expires_at, removed_at, removed_by, removed_reason, version
    FROM authz_assignments
"#;

#[async_trait]
impl AssignmentRepository for PostgresAssignmentRepository {
    async fn insert_assignment(&self, assignment: RoleAssignment) -> AuthzResult<RoleAssignment> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AuthzError::Internal(format!("failed to begin transaction: {error}"))
        })?;

        // Settle an expired but never-removed row for the pair first, the
        // way the hygiene sweep eventually would; the partial unique index
        // only tolerates one non-removed row.
        sqlx::query(
            r#"
            UPDATE authz_assignments
            SET removed_at = $3,
                removed_reason = $4,
                version = version + 1
            WHERE user_id = $1
                AND role_id = $2
                AND removed_at IS NULL
                AND expires_at IS NOT NULL
                AND expires_at <= $3
            "#,
        )
        .bind(assignment.user_id.as_uuid())
        .bind(assignment.role_id.as_uuid())
        .bind(Utc::now())
        .bind(RemovalReason::Expired.as_str())
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AuthzError::Internal(format!("failed to settle expired assignment: {error}"))
        })?;

        sqlx::query(
            r#"
            INSERT INTO authz_assignments (
                id, user_id, role_id, organization_id, assigned_at,
                assigned_by, expires_at, removed_at, removed_by,
                removed_reason, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(assignment.id.as_uuid())
        .bind(assignment.user_id.as_uuid())
        .bind(assignment.role_id.as_uuid())
        .bind(assignment.organization_id.as_uuid())
        .bind(assignment.assigned_at)
        .bind(assignment.assigned_by.as_uuid())
        .bind(assignment.expires_at)
        .bind(assignment.removed_at)
        .bind(assignment.removed_by.map(|id| id.as_uuid()))
        .bind(assignment.removed_reason.map(|reason| reason.as_str()))
        .bind(assignment.version)
        .execute(&mut *transaction)
        .await
        .map_err(|error| map_assignment_conflict(error, &assignment))?;

        transaction.commit().await.map_err(|error| {
            AuthzError::Internal(format!("failed to commit transaction: {error}"))
        })?;

        Ok(assignment)
    }

    async fn update_assignment(
        &self,
        assignment: RoleAssignment,
        expected_version: i64,
    ) -> AuthzResult<RoleAssignment> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE authz_assignments
            SET expires_at = $3,
                removed_at = $4,
                removed_by = $5,
                removed_reason = $6,
                version = $7
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(assignment.id.as_uuid())
        .bind(expected_version)
        .bind(assignment.expires_at)
        .bind(assignment.removed_at)
        .bind(assignment.removed_by.map(|id| id.as_uuid()))
        .bind(assignment.removed_reason.map(|reason| reason.as_str()))
        .bind(assignment.version)
        .execute(&self.pool)
        .await
        .map_err(|error| AuthzError::Internal(format!("failed to update assignment: {error}")))?
        .rows_affected();

        if rows_affected == 0 {
            return Err(self.version_race_or_missing(assignment.id).await);
        }

        Ok(assignment)
    }

    async fn find_active_assignment(
        &self,
        user_id: UserId,
        role_id: RoleId,
        organization_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> AuthzResult<Option<RoleAssignment>> {
        let query = format!(
            "{SELECT_ASSIGNMENT} WHERE user_id = $1 AND role_id = $2 \
             AND organization_id = $3 AND removed_at IS NULL \
             AND (expires_at IS NULL OR expires_at > $4) LIMIT 1"
        );

        let row = sqlx::query_as::<_, AssignmentRow>(query.as_str())
            .bind(user_id.as_uuid())
            .bind(role_id.as_uuid())
            .bind(organization_id.as_uuid())
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| {
                AuthzError::Internal(format!("failed to load assignment: {error}"))
            })?;

        row.map(RoleAssignment::try_from).transpose()
    }

    async fn list_active_assignments(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> AuthzResult<Vec<RoleAssignment>> {
        let query = format!(
            "{SELECT_ASSIGNMENT} WHERE user_id = $1 AND organization_id = $2 \
             AND removed_at IS NULL AND (expires_at IS NULL OR expires_at > $3)"
        );

        let rows = sqlx::query_as::<_, AssignmentRow>(query.as_str())
            .bind(user_id.as_uuid())
            .bind(organization_id.as_uuid())
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| {
                AuthzError::Internal(format!("failed to list assignments: {error}"))
            })?;

        rows.into_iter().map(RoleAssignment::try_from).collect()
    }

    async fn list_expiring_within(
        &self,
        organization_id: OrganizationId,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AuthzResult<Vec<RoleAssignment>> {
        let query = format!(
            "{SELECT_ASSIGNMENT} WHERE organization_id = $1 AND removed_at IS NULL \
             AND expires_at IS NOT NULL AND expires_at > $2 AND expires_at <= $3 \
             ORDER BY expires_at"
        );

        let rows = sqlx::query_as::<_, AssignmentRow>(query.as_str())
            .bind(organization_id.as_uuid())
            .bind(now)
            .bind(until)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| {
                AuthzError::Internal(format!("failed to list expiring assignments: {error}"))
            })?;

        rows.into_iter().map(RoleAssignment::try_from).collect()
    }

    async fn list_expired_unremoved(
        &self,
        cutoff: DateTime<Utc>,
    ) -> AuthzResult<Vec<RoleAssignment>> {
        let query = format!(
            "{SELECT_ASSIGNMENT} WHERE removed_at IS NULL \
             AND expires_at IS NOT NULL AND expires_at <= $1"
        );

        let rows = sqlx::query_as::<_, AssignmentRow>(query.as_str())
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| {
                AuthzError::Internal(format!("failed to list expired assignments: {error}"))
            })?;

        rows.into_iter().map(RoleAssignment::try_from).collect()
    }
}

impl PostgresAssignmentRepository {
    async fn version_race_or_missing(&self, assignment_id: AssignmentId) -> AuthzError {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM authz_assignments WHERE id = $1)",
        )
        .bind(assignment_id.as_uuid())
        .fetch_one(&self.pool)
        .await;

        match exists {
            Ok(true) => AuthzError::ConcurrentModification(format!(
                "assignment '{assignment_id}' was modified concurrently"
            )),
            Ok(false) => {
                AuthzError::NotFound(format!("assignment '{assignment_id}' was not found"))
            }
            Err(error) => AuthzError::Internal(format!(
                "failed to inspect assignment after update race: {error}"
            )),
        }
    }
}

fn map_assignment_conflict(error: sqlx::Error, assignment: &RoleAssignment) -> AuthzError {
    if let sqlx::Error::Database(database_error) = &error
        && database_error.code().as_deref() == Some("23505")
    {
        return AuthzError::ConcurrentModification(format!(
            "assignment of role '{}' to user '{}' raced another writer",
            assignment.role_id, assignment.user_id
        ));
    }

    AuthzError::Internal(format!("failed to create assignment: {error}"))
}
