//! Shared primitives for all Rust crates in Grantline.

#![forbid(unsafe_code)]

/// Identifier newtypes shared across the engine.
pub mod ids;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use ids::{AssignmentId, CorrelationId, OrganizationId, PermissionId, RoleId, UserId};

/// Result type used across Grantline crates.
pub type AuthzResult<T> = Result<T, AuthzError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AuthzResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AuthzError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

/// Error categories surfaced by the authorization engine.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested role, permission, or assignment does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A role with the same name already exists in the organization scope.
    #[error("duplicate role name: {0}")]
    DuplicateName(String),

    /// The organization has reached its custom role cap.
    #[error("role limit exceeded: {0}")]
    RoleLimitExceeded(String),

    /// Predefined roles cannot be modified or deleted.
    #[error("immutable role: {0}")]
    ImmutableRole(String),

    /// A referenced permission does not resolve in the catalog.
    #[error("unknown permission: {0}")]
    UnknownPermission(String),

    /// No active assignment exists for the (user, role) pair.
    #[error("not assigned: {0}")]
    NotAssigned(String),

    /// A concurrent writer won the version race; safe to retry with fresh data.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    /// The caller-supplied deadline elapsed before the store or cache responded.
    #[error("deadline exceeded: {0}")]
    Timeout(String),

    /// The cache tier is unreachable; recovered internally via store fallback.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// The subject lacks the required permission (enforce-and-throw callers only).
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthzError {
    /// Returns whether a caller may retry the failed operation unchanged.
    ///
    /// Only version races are retriable; validation-class errors repeat the
    /// same failure until the caller corrects its input.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_))
    }
}
