use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use grantline_core::{AuthzError, AuthzResult, PermissionId};
use grantline_domain::Permission;
use tokio::sync::OnceCell;

/// Repository port for the system-level permission catalog.
///
/// The catalog is effectively immutable at request time; changes are
/// administrative and happen out of the hot path.
#[async_trait]
pub trait PermissionCatalog: Send + Sync {
    /// Lists all active permissions.
    async fn list_permissions(&self) -> AuthzResult<Vec<Permission>>;

    /// Finds the permission for a `(resource, action)` pair.
    async fn resolve(&self, resource: &str, action: &str) -> AuthzResult<Option<Permission>>;

    /// Finds permissions by their identifiers, in no particular order.
    ///
    /// Unknown identifiers are absent from the result rather than errors.
    async fn find_by_ids(&self, ids: &[PermissionId]) -> AuthzResult<Vec<Permission>>;
}

/// Application service over the permission catalog.
///
/// Memoizes the full listing process-locally; everything else delegates.
#[derive(Clone)]
pub struct CatalogService {
    catalog: Arc<dyn PermissionCatalog>,
    listing: Arc<OnceCell<Vec<Permission>>>,
}

impl CatalogService {
    /// Creates a catalog service from a repository implementation.
    #[must_use]
    pub fn new(catalog: Arc<dyn PermissionCatalog>) -> Self {
        Self {
            catalog,
            listing: Arc::new(OnceCell::new()),
        }
    }

    /// Returns all active permissions, memoized after the first load.
    pub async fn list_permissions(&self) -> AuthzResult<Vec<Permission>> {
        let listing = self
            .listing
            .get_or_try_init(|| self.catalog.list_permissions())
            .await?;

        Ok(listing.clone())
    }

    /// Resolves a `(resource, action)` pair to its catalog entry.
    pub async fn resolve(&self, resource: &str, action: &str) -> AuthzResult<Permission> {
        self.catalog
            .resolve(resource, action)
            .await?
            .filter(|permission| permission.active)
            .ok_or_else(|| {
                AuthzError::NotFound(format!("permission '{resource}:{action}' was not found"))
            })
    }

    /// Finds permissions by id.
    pub async fn find_by_ids(&self, ids: &[PermissionId]) -> AuthzResult<Vec<Permission>> {
        self.catalog.find_by_ids(ids).await
    }

    /// Ensures every referenced permission resolves and is active.
    pub async fn ensure_known(&self, ids: &BTreeSet<PermissionId>) -> AuthzResult<()> {
        let id_list: Vec<PermissionId> = ids.iter().copied().collect();
        let found = self.catalog.find_by_ids(&id_list).await?;
        let known: BTreeSet<PermissionId> = found
            .iter()
            .filter(|permission| permission.active)
            .map(|permission| permission.id)
            .collect();

        if let Some(missing) = ids.iter().find(|id| !known.contains(id)) {
            return Err(AuthzError::UnknownPermission(format!(
                "permission '{missing}' does not resolve in the catalog"
            )));
        }

        Ok(())
    }
}
