//! In-process invalidation channel over a tokio broadcast queue.

use std::sync::Arc;

use async_trait::async_trait;
use grantline_application::{EventPublisher, PermissionCache};
use grantline_core::AuthzResult;
use grantline_domain::AuthzEvent;
use tokio::sync::broadcast;
use tracing::warn;

/// Broadcast-backed implementation of the event publisher port.
///
/// Fans every mutation announcement out to all subscribers: cache
/// invalidation listeners and external audit consumers alike. Publishing
/// never blocks the mutation path; a subscriber that falls more than the
/// channel capacity behind misses events and is told so on its next
/// receive.
#[derive(Clone)]
pub struct BroadcastInvalidationChannel {
    sender: broadcast::Sender<AuthzEvent>,
}

impl BroadcastInvalidationChannel {
    /// Creates a channel with the given buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Opens a new subscription receiving all events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AuthzEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for BroadcastInvalidationChannel {
    async fn publish(&self, event: AuthzEvent) -> AuthzResult<()> {
        // A send with no live subscribers is not a failure; the engine
        // invalidates its own cache synchronously regardless.
        let _ = self.sender.send(event);
        Ok(())
    }
}

/// Applies published mutation events to a permission cache.
///
/// This is the cross-process half of cache coherence: each engine process
/// runs one listener over the shared channel so that a mutation committed
/// elsewhere evicts the local cache within the channel's propagation delay.
/// Assignment events evict the single affected `(user, organization)`
/// entry; role events evict the whole organization, since the affected
/// user set is unknown without a reverse index.
pub struct CacheInvalidationListener {
    cache: Arc<dyn PermissionCache>,
    receiver: broadcast::Receiver<AuthzEvent>,
}

impl CacheInvalidationListener {
    /// Creates a listener applying events to the given cache.
    #[must_use]
    pub fn new(cache: Arc<dyn PermissionCache>, receiver: broadcast::Receiver<AuthzEvent>) -> Self {
        Self { cache, receiver }
    }

    /// Consumes events until the channel closes.
    ///
    /// Missed events after a lag leave affected entries to age out within
    /// the cache TTL; the listener keeps applying everything newer.
    pub async fn run(mut self) {
        loop {
            match self.receiver.recv().await {
                Ok(event) => self.apply(&event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        skipped,
                        "invalidation listener lagged; stale entries age out within the cache ttl"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn apply(&self, event: &AuthzEvent) {
        let outcome = match event.affected_user() {
            Some(user_id) => self.cache.invalidate(user_id, event.organization_id).await,
            None => {
                self.cache
                    .invalidate_organization(event.organization_id)
                    .await
            }
        };

        if let Err(error) = outcome {
            warn!(
                %error,
                organization_id = %event.organization_id,
                action = event.kind.as_str(),
                "cache eviction for published event failed"
            );
        }
    }
}
