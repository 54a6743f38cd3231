//! Redis-backed permission cache shared across engine processes.

use std::time::Duration;

use async_trait::async_trait;
use grantline_application::PermissionCache;
use grantline_core::{AuthzError, AuthzResult, OrganizationId, UserId};
use grantline_domain::EffectivePermissionSet;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

/// Redis implementation of the permission cache port.
///
/// Entries live under `{prefix}:{organization}:{user}`; a per-organization
/// key set under `{prefix}:org:{organization}` backs bulk eviction without
/// a `SCAN` over the keyspace.
#[derive(Clone)]
pub struct RedisPermissionCache {
    client: redis::Client,
    key_prefix: String,
}

impl RedisPermissionCache {
    /// Creates a cache adapter with a configured Redis client and key prefix.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn entry_key(&self, user_id: UserId, organization_id: OrganizationId) -> String {
        format!("{}:{organization_id}:{user_id}", self.key_prefix)
    }

    fn organization_key(&self, organization_id: OrganizationId) -> String {
        format!("{}:org:{organization_id}", self.key_prefix)
    }

    async fn connection(&self) -> AuthzResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| {
                AuthzError::CacheUnavailable(format!("failed to connect to redis: {error}"))
            })
    }
}

#[async_trait]
impl PermissionCache for RedisPermissionCache {
    async fn get(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> AuthzResult<Option<EffectivePermissionSet>> {
        let mut connection = self.connection().await?;

        let encoded: Option<String> = connection
            .get(self.entry_key(user_id, organization_id))
            .await
            .map_err(|error| {
                AuthzError::CacheUnavailable(format!(
                    "failed to read permission cache entry: {error}"
                ))
            })?;

        encoded
            .as_deref()
            .map(|value| {
                serde_json::from_str::<EffectivePermissionSet>(value).map_err(|error| {
                    AuthzError::Internal(format!(
                        "invalid permission cache entry for user '{user_id}' in \
                         organization '{organization_id}': {error}"
                    ))
                })
            })
            .transpose()
    }

    async fn put(&self, set: EffectivePermissionSet, ttl: Duration) -> AuthzResult<()> {
        if ttl.is_zero() {
            return Ok(());
        }

        let entry_key = self.entry_key(set.user_id, set.organization_id);
        let organization_key = self.organization_key(set.organization_id);
        let value = serde_json::to_string(&set).map_err(|error| {
            AuthzError::Internal(format!("failed to encode permission cache entry: {error}"))
        })?;

        let mut connection = self.connection().await?;
        let ttl_seconds = ttl.as_secs().max(1);

        let () = connection
            .set_ex(entry_key.as_str(), value, ttl_seconds)
            .await
            .map_err(|error| {
                AuthzError::CacheUnavailable(format!(
                    "failed to write permission cache entry: {error}"
                ))
            })?;

        // Track the entry for organization-wide eviction. The set's expiry
        // is refreshed on every put, so it always outlives its members.
        let () = connection
            .sadd(organization_key.as_str(), entry_key.as_str())
            .await
            .map_err(|error| {
                AuthzError::CacheUnavailable(format!(
                    "failed to index permission cache entry: {error}"
                ))
            })?;
        let () = connection
            .expire(organization_key.as_str(), ttl_seconds as i64)
            .await
            .map_err(|error| {
                AuthzError::CacheUnavailable(format!(
                    "failed to refresh permission cache index: {error}"
                ))
            })?;

        Ok(())
    }

    async fn invalidate(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> AuthzResult<()> {
        let entry_key = self.entry_key(user_id, organization_id);
        let organization_key = self.organization_key(organization_id);
        let mut connection = self.connection().await?;

        let () = connection.del(entry_key.as_str()).await.map_err(|error| {
            AuthzError::CacheUnavailable(format!(
                "failed to evict permission cache entry: {error}"
            ))
        })?;
        let () = connection
            .srem(organization_key.as_str(), entry_key.as_str())
            .await
            .map_err(|error| {
                AuthzError::CacheUnavailable(format!(
                    "failed to unindex permission cache entry: {error}"
                ))
            })?;

        Ok(())
    }

    async fn invalidate_organization(&self, organization_id: OrganizationId) -> AuthzResult<()> {
        let organization_key = self.organization_key(organization_id);
        let mut connection = self.connection().await?;

        let members: Vec<String> = connection
            .smembers(organization_key.as_str())
            .await
            .map_err(|error| {
                AuthzError::CacheUnavailable(format!(
                    "failed to list permission cache entries for eviction: {error}"
                ))
            })?;

        if !members.is_empty() {
            let () = connection.del(members).await.map_err(|error| {
                AuthzError::CacheUnavailable(format!(
                    "failed to evict permission cache entries: {error}"
                ))
            })?;
        }

        let () = connection
            .del(organization_key.as_str())
            .await
            .map_err(|error| {
                AuthzError::CacheUnavailable(format!(
                    "failed to drop permission cache index: {error}"
                ))
            })?;

        Ok(())
    }
}
