use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantline_application::RoleRepository;
use grantline_core::{
    AssignmentId, AuthzError, AuthzResult, OrganizationId, PermissionId, RoleId, UserId,
};
use grantline_domain::{RemovalReason, Role, RoleAssignment, RoleKind};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// PostgreSQL-backed role repository.
///
/// Role rows carry an optimistic `version`; every update is a
/// compare-and-swap on it, so conflicting writers fail with
/// `ConcurrentModification` instead of silently losing updates.
#[derive(Clone)]
pub struct PostgresRoleRepository {
    pool: PgPool,
}

impl PostgresRoleRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct RoleRow {
    id: Uuid,
    organization_id: Option<Uuid>,
    name: String,
    description: Option<String>,
    kind: String,
    is_active: bool,
    version: i64,
    created_at: DateTime<Utc>,
    created_by: Uuid,
    updated_at: Option<DateTime<Utc>>,
    updated_by: Option<Uuid>,
    permission_id: Option<Uuid>,
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

const ROLE_WITH_GRANTS: &str = r#"
    SELECT
        roles.id,
        roles.organization_id,
        roles.name,
        roles.description,
        roles.kind,
        roles.is_active,
        roles.version,
        roles.created_at,
        roles.created_by,
        roles.updated_at,
        roles.updated_by,
        grants.permission_id
    FROM authz_roles AS roles
    LEFT JOIN authz_role_permissions AS grants
        ON grants.role_id = roles.id
"#;

#[async_trait]
impl RoleRepository for PostgresRoleRepository {
    async fn insert_role(&self, role: Role) -> AuthzResult<Role> {
        let mut transaction = self.pool.begin().await.map_err(begin_error)?;

        sqlx::query(
            r#"
            INSERT INTO authz_roles (
                id, organization_id, name, description, kind, is_active,
                version, created_at, created_by, updated_at, updated_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(role.id.as_uuid())
        .bind(role.organization_id.map(|id| id.as_uuid()))
        .bind(role.name.as_str())
        .bind(role.description.as_deref())
        .bind(role.kind.as_str())
        .bind(role.active)
        .bind(role.version)
        .bind(role.created_at)
        .bind(role.created_by.as_uuid())
        .bind(role.updated_at)
        .bind(role.updated_by.map(|id| id.as_uuid()))
        .execute(&mut *transaction)
        .await
        .map_err(|error| map_role_conflict(error, role.name.as_str()))?;

        for permission_id in &role.permission_ids {
            sqlx::query(
                r#"
                INSERT INTO authz_role_permissions (role_id, permission_id)
                VALUES ($1, $2)
                ON CONFLICT (role_id, permission_id) DO NOTHING
                "#,
            )
            .bind(role.id.as_uuid())
            .bind(permission_id.as_uuid())
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AuthzError::Internal(format!("failed to persist role grants: {error}"))
            })?;
        }

        transaction.commit().await.map_err(commit_error)?;
        Ok(role)
    }

    async fn update_role(&self, role: Role, expected_version: i64) -> AuthzResult<Role> {
        let mut transaction = self.pool.begin().await.map_err(begin_error)?;

        let rows_affected = sqlx::query(
            r#"
            UPDATE authz_roles
            SET name = $3,
                description = $4,
                is_active = $5,
                version = $6,
                updated_at = $7,
                updated_by = $8
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(role.id.as_uuid())
        .bind(expected_version)
        .bind(role.name.as_str())
        .bind(role.description.as_deref())
        .bind(role.active)
        .bind(role.version)
        .bind(role.updated_at)
        .bind(role.updated_by.map(|id| id.as_uuid()))
        .execute(&mut *transaction)
        .await
        .map_err(|error| AuthzError::Internal(format!("failed to update role: {error}")))?
        .rows_affected();

        if rows_affected == 0 {
            drop(transaction);
            return Err(self.version_race_or_missing(role.id).await);
        }

        sqlx::query("DELETE FROM authz_role_permissions WHERE role_id = $1")
            .bind(role.id.as_uuid())
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AuthzError::Internal(format!("failed to clear role grants: {error}"))
            })?;

        for permission_id in &role.permission_ids {
            sqlx::query(
                r#"
                INSERT INTO authz_role_permissions (role_id, permission_id)
                VALUES ($1, $2)
                ON CONFLICT (role_id, permission_id) DO NOTHING
                "#,
            )
            .bind(role.id.as_uuid())
            .bind(permission_id.as_uuid())
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AuthzError::Internal(format!("failed to persist role grants: {error}"))
            })?;
        }

        transaction.commit().await.map_err(commit_error)?;
        Ok(role)
    }

    async fn deactivate_role_cascading(
        &self,
        role_id: RoleId,
        organization_id: OrganizationId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> AuthzResult<(Role, Vec<RoleAssignment>)> {
        let mut transaction = self.pool.begin().await.map_err(begin_error)?;

        let role_row = sqlx::query_as::<_, RoleRow>(
            r#"
            WITH deactivated AS (
                UPDATE authz_roles
                SET is_active = FALSE,
                    version = version + 1,
                    updated_at = $3,
                    updated_by = $4
                WHERE id = $1
                    AND (organization_id = $2 OR organization_id IS NULL)
                RETURNING *
            )
            SELECT
                deactivated.id,
                deactivated.organization_id,
                deactivated.name,
                deactivated.description,
                deactivated.kind,
                deactivated.is_active,
                deactivated.version,
                deactivated.created_at,
                deactivated.created_by,
                deactivated.updated_at,
                deactivated.updated_by,
                grants.permission_id
            FROM deactivated
            LEFT JOIN authz_role_permissions AS grants
                ON grants.role_id = deactivated.id
            "#,
        )
        .bind(role_id.as_uuid())
        .bind(organization_id.as_uuid())
        .bind(now)
        .bind(actor.as_uuid())
        .fetch_all(&mut *transaction)
        .await
        .map_err(|error| AuthzError::Internal(format!("failed to deactivate role: {error}")))?;

        let role = aggregate_roles(role_row)?
            .into_iter()
            .next()
            .ok_or_else(|| AuthzError::NotFound(format!("role '{role_id}' was not found")))?;

        let assignment_rows = sqlx::query_as::<_, AssignmentRow>(
            r#"
            UPDATE authz_assignments
            SET removed_at = $2,
                removed_by = $3,
                removed_reason = $4,
                version = version + 1
            WHERE role_id = $1
                AND removed_at IS NULL
                AND (expires_at IS NULL OR expires_at > $2)
            RETURNING *
            "#,
        )
        .bind(role_id.as_uuid())
        .bind(now)
        .bind(actor.as_uuid())
        .bind(RemovalReason::RoleDeleted.as_str())
        .fetch_all(&mut *transaction)
        .await
        .map_err(|error| {
            AuthzError::Internal(format!("failed to cascade role deletion: {error}"))
        })?;

        transaction.commit().await.map_err(commit_error)?;

        let cascaded = assignment_rows
            .into_iter()
            .map(RoleAssignment::try_from)
            .collect::<AuthzResult<Vec<_>>>()?;

        Ok((role, cascaded))
    }

    async fn find_role(
        &self,
        role_id: RoleId,
        organization_id: OrganizationId,
    ) -> AuthzResult<Option<Role>> {
        let query = format!(
            "{ROLE_WITH_GRANTS} WHERE roles.id = $1 \
             AND (roles.organization_id = $2 OR roles.organization_id IS NULL)"
        );

        let rows = sqlx::query_as::<_, RoleRow>(query.as_str())
            .bind(role_id.as_uuid())
            .bind(organization_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|error| AuthzError::Internal(format!("failed to load role: {error}")))?;

        Ok(aggregate_roles(rows)?.into_iter().next())
    }

    async fn list_roles(&self, organization_id: OrganizationId) -> AuthzResult<Vec<Role>> {
        let query = format!(
            "{ROLE_WITH_GRANTS} WHERE roles.is_active \
             AND (roles.organization_id = $1 OR roles.organization_id IS NULL) \
             ORDER BY roles.name"
        );

        let rows = sqlx::query_as::<_, RoleRow>(query.as_str())
            .bind(organization_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|error| AuthzError::Internal(format!("failed to list roles: {error}")))?;

        let mut roles = aggregate_roles(rows)?;
        roles.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(roles)
    }

    async fn count_custom_roles(&self, organization_id: OrganizationId) -> AuthzResult<usize> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM authz_roles
            WHERE organization_id = $1 AND is_active
            "#,
        )
        .bind(organization_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|error| AuthzError::Internal(format!("failed to count custom roles: {error}")))?;

        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }
}

impl PostgresRoleRepository {
    async fn version_race_or_missing(&self, role_id: RoleId) -> AuthzError {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM authz_roles WHERE id = $1)",
        )
        .bind(role_id.as_uuid())
        .fetch_one(&self.pool)
        .await;

        match exists {
            Ok(true) => AuthzError::ConcurrentModification(format!(
                "role '{role_id}' was modified concurrently"
            )),
            Ok(false) => AuthzError::NotFound(format!("role '{role_id}' was not found")),
            Err(error) => {
                AuthzError::Internal(format!("failed to inspect role after update race: {error}"))
            }
        }
    }
}

fn aggregate_roles(rows: Vec<RoleRow>) -> AuthzResult<Vec<Role>> {
    let mut by_id: HashMap<Uuid, Role> = HashMap::new();

    for row in rows {
        let kind = RoleKind::from_str(row.kind.as_str()).map_err(|error| {
            AuthzError::Internal(format!(
                "invalid stored role kind '{}' for role '{}': {error}",
                row.kind, row.id
            ))
        })?;

        let role = by_id.entry(row.id).or_insert_with(|| Role {
            id: RoleId::from_uuid(row.id),
            organization_id: row.organization_id.map(OrganizationId::from_uuid),
            name: row.name.clone(),
            description: row.description.clone(),
            kind,
            active: row.is_active,
            permission_ids: BTreeSet::new(),
            version: row.version,
            created_at: row.created_at,
            created_by: UserId::from_uuid(row.created_by),
            updated_at: row.updated_at,
            updated_by: row.updated_by.map(UserId::from_uuid),
        });

        if let Some(permission_id) = row.permission_id {
            role.permission_ids
                .insert(PermissionId::from_uuid(permission_id));
        }
    }

    Ok(by_id.into_values().collect())
}

fn map_role_conflict(error: sqlx::Error, role_name: &str) -> AuthzError {
    if let sqlx::Error::Database(database_error) = &error
        && database_error.code().as_deref() == Some("23505")
    {
        return AuthzError::DuplicateName(format!("role '{role_name}' already exists"));
    }

    AuthzError::Internal(format!("failed to create role: {error}"))
}

fn begin_error(error: sqlx::Error) -> AuthzError {
    AuthzError::Internal(format!("failed to begin transaction: {error}"))
}

fn commit_error(error: sqlx::Error) -> AuthzError {
    AuthzError::Internal(format!("failed to commit transaction: {error}"))
}
