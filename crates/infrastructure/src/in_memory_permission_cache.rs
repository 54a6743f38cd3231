use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use grantline_application::PermissionCache;
use grantline_core::{AuthzResult, OrganizationId, UserId};
use grantline_domain::EffectivePermissionSet;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct PermissionCacheEntry {
    set: EffectivePermissionSet,
    expires_at: Instant,
}

/// In-memory cache adapter for effective permission sets.
#[derive(Default)]
pub struct InMemoryPermissionCache {
    entries: RwLock<HashMap<(UserId, OrganizationId), PermissionCacheEntry>>,
}

impl InMemoryPermissionCache {
    /// Creates an empty in-memory permission cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PermissionCache for InMemoryPermissionCache {
    async fn get(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> AuthzResult<Option<EffectivePermissionSet>> {
        let key = (user_id, organization_id);

        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&key) {
                if entry.expires_at > Instant::now() {
                    return Ok(Some(entry.set.clone()));
                }
            } else {
                return Ok(None);
            }
        }

        let mut entries = self.entries.write().await;
        if entries
            .get(&key)
            .is_some_and(|entry| entry.expires_at <= Instant::now())
        {
            entries.remove(&key);
        }

        Ok(None)
    }

    async fn put(&self, set: EffectivePermissionSet, ttl: Duration) -> AuthzResult<()> {
        if ttl.is_zero() {
            return Ok(());
        }

        let now = Instant::now();
        let expires_at = now.checked_add(ttl).unwrap_or(now);
        let key = (set.user_id, set.organization_id);

        self.entries
            .write()
            .await
            .insert(key, PermissionCacheEntry { set, expires_at });

        Ok(())
    }

    async fn invalidate(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> AuthzResult<()> {
        self.entries
            .write()
            .await
            .remove(&(user_id, organization_id));
        Ok(())
    }

    async fn invalidate_organization(&self, organization_id: OrganizationId) -> AuthzResult<()> {
        self.entries
            .write()
            .await
            .retain(|(_, entry_organization), _| *entry_organization != organization_id);
        Ok(())
    }
}
