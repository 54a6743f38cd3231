use async_trait::async_trait;
use grantline_core::AuthzResult;
use grantline_domain::AuthzEvent;

/// Publisher port for the invalidation channel.
///
/// Every successful mutation publishes exactly one event before the
/// mutation call returns; failed mutations publish nothing. Subscribers
/// include in-process cache invalidation listeners and external audit
/// recording.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes a mutation announcement.
    async fn publish(&self, event: AuthzEvent) -> AuthzResult<()>;
}
