//! Role definitions: organization-scoped bundles of permissions.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use grantline_core::{AuthzError, AuthzResult, OrganizationId, PermissionId, RoleId, UserId};
use serde::{Deserialize, Serialize};

/// Maximum length of a role name.
pub const ROLE_NAME_MAX_LENGTH: usize = 100;

/// Maximum length of a role description.
pub const ROLE_DESCRIPTION_MAX_LENGTH: usize = 500;

/// Distinguishes system-managed roles from organization-created ones.
///
/// Predefined roles are global, immutable, and available to every
/// organization; custom roles belong to exactly one organization and may be
/// edited or deleted by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    /// System-managed role shared by all organizations.
    Predefined,
    /// Organization-created role.
    Custom,
}

impl RoleKind {
    /// Returns a stable storage value for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Predefined => "predefined",
            Self::Custom => "custom",
        }
    }
}

impl FromStr for RoleKind {
    type Err = AuthzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "predefined" => Ok(Self::Predefined),
            "custom" => Ok(Self::Custom),
            _ => Err(AuthzError::Validation(format!(
                "unknown role kind value '{value}'"
            ))),
        }
    }
}

/// A named bundle of permissions scoped to one organization, or global when
/// predefined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Stable role identifier.
    pub id: RoleId,
    /// Owning organization; `None` marks a global predefined role.
    pub organization_id: Option<OrganizationId>,
    /// Role name, lowercase, unique among an organization's active roles.
    pub name: String,
    /// Optional human-readable description.
    pub description: Option<String>,
    /// Predefined or custom.
    pub kind: RoleKind,
    /// Soft deletion flag; inactive roles grant nothing.
    pub active: bool,
    /// Permissions attached to the role.
    pub permission_ids: BTreeSet<PermissionId>,
    /// Optimistic concurrency version, bumped on every mutation.
    pub version: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// User that created the role.
    pub created_by: UserId,
    /// Last mutation timestamp.
    pub updated_at: Option<DateTime<Utc>>,
    /// User that performed the last mutation.
    pub updated_by: Option<UserId>,
}

impl Role {
    /// Creates a validated custom role owned by one organization.
    ///
    /// Names are normalized to lowercase so uniqueness is case-insensitive.
    pub fn new_custom(
        organization_id: OrganizationId,
        name: impl Into<String>,
        description: Option<String>,
        permission_ids: BTreeSet<PermissionId>,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> AuthzResult<Self> {
        let name = validate_role_name(name.into())?;
        validate_role_description(description.as_deref())?;

        if permission_ids.is_empty() {
            return Err(AuthzError::Validation(
                "role must reference at least one permission".to_owned(),
            ));
        }

        Ok(Self {
            id: RoleId::new(),
            organization_id: Some(organization_id),
            name,
            description,
            kind: RoleKind::Custom,
            active: true,
            permission_ids,
            version: 1,
            created_at,
            created_by,
            updated_at: None,
            updated_by: None,
        })
    }

    /// Creates a global predefined role.
    pub fn new_predefined(
        name: impl Into<String>,
        description: Option<String>,
        permission_ids: BTreeSet<PermissionId>,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> AuthzResult<Self> {
        let name = validate_role_name(name.into())?;
        validate_role_description(description.as_deref())?;

        Ok(Self {
            id: RoleId::new(),
            organization_id: None,
            name,
            description,
            kind: RoleKind::Predefined,
            active: true,
            permission_ids,
            version: 1,
            created_at,
            created_by,
            updated_at: None,
            updated_by: None,
        })
    }

    /// Returns whether the role's permission set may be edited.
    ///
    /// Predefined roles are immutable; inactive roles are frozen.
    #[must_use]
    pub fn can_be_modified(&self) -> bool {
        self.kind == RoleKind::Custom && self.active
    }

    /// Returns whether the role is visible to the given organization.
    ///
    /// Global predefined roles are visible everywhere.
    #[must_use]
    pub fn visible_to(&self, organization_id: OrganizationId) -> bool {
        match self.organization_id {
            Some(owner) => owner == organization_id,
            None => true,
        }
    }
}

fn validate_role_name(name: String) -> AuthzResult<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return Err(AuthzError::Validation(
            "role name must not be empty".to_owned(),
        ));
    }

    if name.len() > ROLE_NAME_MAX_LENGTH {
        return Err(AuthzError::Validation(format!(
            "role name must not exceed {ROLE_NAME_MAX_LENGTH} characters"
        )));
    }

    Ok(name)
}

fn validate_role_description(description: Option<&str>) -> AuthzResult<()> {
    if description.is_some_and(|value| value.len() > ROLE_DESCRIPTION_MAX_LENGTH) {
        return Err(AuthzError::Validation(format!(
            "role description must not exceed {ROLE_DESCRIPTION_MAX_LENGTH} characters"
        )));
    }

    Ok(())
}
