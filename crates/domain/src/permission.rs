//! Permission catalog entries and the `RESOURCE:ACTION` key model.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use grantline_core::{AuthzError, AuthzResult, PermissionId};
use serde::{Deserialize, Serialize};

/// Maximum length of a permission resource or action tag.
pub const TAG_MAX_LENGTH: usize = 50;

/// Validates a permission resource or action tag.
///
/// Tags are uppercase words such as `PAYMENTS` or `READ`; only `A`-`Z` and
/// `_` are accepted.
pub fn validate_permission_tag(value: &str) -> AuthzResult<()> {
    if value.is_empty() {
        return Err(AuthzError::Validation(
            "permission tag must not be empty".to_owned(),
        ));
    }

    if value.len() > TAG_MAX_LENGTH {
        return Err(AuthzError::Validation(format!(
            "permission tag must not exceed {TAG_MAX_LENGTH} characters"
        )));
    }

    if !value
        .chars()
        .all(|character| character.is_ascii_uppercase() || character == '_')
    {
        return Err(AuthzError::Validation(format!(
            "permission tag '{value}' must contain only uppercase letters and underscores"
        )));
    }

    Ok(())
}

/// A `RESOURCE:ACTION` capability key.
///
/// This is the unit stored in effective permission sets and tested by
/// membership checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissionKey(String);

impl PermissionKey {
    /// Creates a validated permission key from its resource and action tags.
    pub fn new(resource: &str, action: &str) -> AuthzResult<Self> {
        validate_permission_tag(resource)?;
        validate_permission_tag(action)?;

        Ok(Self(format!("{resource}:{action}")))
    }

    /// Returns the key in `RESOURCE:ACTION` form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the resource tag.
    #[must_use]
    pub fn resource(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }

    /// Returns the action tag.
    #[must_use]
    pub fn action(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }
}

impl Display for PermissionKey {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl FromStr for PermissionKey {
    type Err = AuthzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.splitn(2, ':');
        let resource = parts.next().unwrap_or_default();
        let action = parts.next().ok_or_else(|| {
            AuthzError::Validation(format!(
                "permission key '{value}' must be in RESOURCE:ACTION form"
            ))
        })?;

        Self::new(resource, action)
    }
}

/// A system-level `(resource, action)` capability.
///
/// Permissions are shared across all organizations; organizations compose
/// them into roles but never define their own. Retirement is soft via the
/// `active` flag so referenced rows are never hard-deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Stable permission identifier.
    pub id: PermissionId,
    /// Resource tag, e.g. `PAYMENTS`.
    pub resource: String,
    /// Action tag, e.g. `READ`.
    pub action: String,
    /// Optional human-readable description.
    pub description: Option<String>,
    /// Soft retirement flag; inactive permissions grant nothing.
    pub active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Permission {
    /// Creates a validated permission.
    pub fn new(
        resource: impl Into<String>,
        action: impl Into<String>,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> AuthzResult<Self> {
        let resource = resource.into();
        let action = action.into();
        validate_permission_tag(resource.as_str())?;
        validate_permission_tag(action.as_str())?;

        Ok(Self {
            id: PermissionId::new(),
            resource,
            action,
            description,
            active: true,
            created_at,
        })
    }

    /// Returns the `RESOURCE:ACTION` key for this permission.
    #[must_use]
    pub fn key(&self) -> PermissionKey {
        PermissionKey(format!("{}:{}", self.resource, self.action))
    }

    /// Returns whether this permission grants the requested pair.
    ///
    /// Inactive permissions never match.
    #[must_use]
    pub fn matches(&self, resource: &str, action: &str) -> bool {
        self.active && self.resource == resource && self.action == action
    }
}
