use std::env;
use std::time::Duration;

use grantline_core::{AuthzError, AuthzResult};

/// Default time-to-live for cached effective permission sets.
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Default per-organization cap on custom roles.
const DEFAULT_CUSTOM_ROLE_CAP: usize = 50;

/// Default deadline applied to permission checks whose caller supplied none.
const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_millis(200);

/// Default buffer capacity of the invalidation channel.
const DEFAULT_INVALIDATION_CHANNEL_CAPACITY: usize = 1024;

/// Tunable limits of the authorization engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a cached effective permission set stays valid without
    /// explicit invalidation.
    pub cache_ttl: Duration,
    /// Maximum number of active custom roles per organization.
    pub custom_role_cap: usize,
    /// Deadline applied to permission checks when the caller supplies none.
    pub check_timeout: Duration,
    /// Buffer capacity of the invalidation channel; lagging subscribers
    /// past this depth fall back to coarse eviction.
    pub invalidation_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            custom_role_cap: DEFAULT_CUSTOM_ROLE_CAP,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            invalidation_channel_capacity: DEFAULT_INVALIDATION_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from `GRANTLINE_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> AuthzResult<Self> {
        let cache_ttl = optional_env_parse::<u64>("GRANTLINE_CACHE_TTL_SECONDS")?
            .map_or(DEFAULT_CACHE_TTL, Duration::from_secs);
        let custom_role_cap = optional_env_parse::<usize>("GRANTLINE_CUSTOM_ROLE_CAP")?
            .unwrap_or(DEFAULT_CUSTOM_ROLE_CAP);
        let check_timeout = optional_env_parse::<u64>("GRANTLINE_CHECK_TIMEOUT_MS")?
            .map_or(DEFAULT_CHECK_TIMEOUT, Duration::from_millis);
        let invalidation_channel_capacity =
            optional_env_parse::<usize>("GRANTLINE_INVALIDATION_CHANNEL_CAPACITY")?
                .unwrap_or(DEFAULT_INVALIDATION_CHANNEL_CAPACITY);

        if custom_role_cap == 0 {
            return Err(AuthzError::Validation(
                "GRANTLINE_CUSTOM_ROLE_CAP must be at least 1".to_owned(),
            ));
        }

        if invalidation_channel_capacity == 0 {
            return Err(AuthzError::Validation(
                "GRANTLINE_INVALIDATION_CHANNEL_CAPACITY must be at least 1".to_owned(),
            ));
        }

        Ok(Self {
            cache_ttl,
            custom_role_cap,
            check_timeout,
            invalidation_channel_capacity,
        })
    }
}

fn optional_env_parse<T: std::str::FromStr>(name: &str) -> AuthzResult<Option<T>> {
    let Ok(value) = env::var(name) else {
        return Ok(None);
    };

    if value.trim().is_empty() {
        return Ok(None);
    }

    value
        .trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| AuthzError::Validation(format!("invalid {name} value '{value}'")))
}
