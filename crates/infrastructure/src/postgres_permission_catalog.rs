use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantline_application::PermissionCatalog;
use grantline_core::{AuthzError, AuthzResult, PermissionId};
use grantline_domain::Permission;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// PostgreSQL-backed permission catalog.
#[derive(Clone)]
pub struct PostgresPermissionCatalog {
    pool: PgPool,
}

impl PostgresPermissionCatalog {
    /// Creates a catalog with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct PermissionRow {
    id: Uuid,
    resource: String,
    action: String,
    description: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<PermissionRow> for Permission {
    fn from(row: PermissionRow) -> Self {
        Permission {
            id: PermissionId::from_uuid(row.id),
            resource: row.resource,
            action: row.action,
            description: row.description,
            active: row.is_active,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl PermissionCatalog for PostgresPermissionCatalog {
    async fn list_permissions(&self) -> AuthzResult<Vec<Permission>> {
        let rows = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT id, resource, action, description, is_active, created_at
            FROM authz_permissions
            WHERE is_active
            ORDER BY resource, action
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AuthzError::Internal(format!("failed to list permissions: {error}")))?;

        Ok(rows.into_iter().map(Permission::from).collect())
    }

    async fn resolve(&self, resource: &str, action: &str) -> AuthzResult<Option<Permission>> {
        let row = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT id, resource, action, description, is_active, created_at
            FROM authz_permissions
            WHERE resource = $1 AND action = $2
            LIMIT 1
            "#,
        )
        .bind(resource)
        .bind(action)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AuthzError::Internal(format!("failed to resolve permission: {error}")))?;

        Ok(row.map(Permission::from))
    }

    async fn find_by_ids(&self, ids: &[PermissionId]) -> AuthzResult<Vec<Permission>> {
        let id_values: Vec<Uuid> = ids.iter().map(PermissionId::as_uuid).collect();

        let rows = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT id, resource, action, description, is_active, created_at
            FROM authz_permissions
            WHERE id = ANY($1)
            "#,
        )
        .bind(&id_values)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AuthzError::Internal(format!("failed to load permissions: {error}")))?;

        Ok(rows.into_iter().map(Permission::from).collect())
    }
}
