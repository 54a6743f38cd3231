use grantline_core::CorrelationId;
use tokio::time::Instant;

/// Per-request metadata threaded explicitly through every engine call.
///
/// Tenant and caller identity are explicit parameters on each operation;
/// this carries only the cross-cutting pieces: the tracing correlation
/// identifier (passed through, never interpreted) and the caller's
/// deadline.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    /// Correlation identifier stamped onto emitted events.
    pub correlation_id: CorrelationId,
    /// Absolute deadline for query operations; when `None` the engine
    /// applies its configured default.
    pub deadline: Option<Instant>,
}

impl RequestContext {
    /// Creates a context with no explicit deadline.
    #[must_use]
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            deadline: None,
        }
    }

    /// Returns the context with the given absolute deadline attached.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(CorrelationId::new())
    }
}
