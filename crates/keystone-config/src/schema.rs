//! Configuration section types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identity token section.
///
/// ```
/// use keystone_config::TokenSection;
///
/// let section = TokenSection::default();
/// assert_eq!(section.identity_key, "identityKey");
/// assert_eq!(section.expiration_secs, 7200);
/// ```
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TokenSection {
    /// HMAC signing key. Required, at least 6 bytes.
    #[serde(default)]
    pub signing_key: String,

    /// Claim carrying the subject id.
    #[serde(default = "default_identity_key")]
    pub identity_key: String,

    /// Token lifetime in seconds.
    #[serde(default = "default_expiration_secs")]
    pub expiration_secs: u64,
}

impl TokenSection {
    /// Token lifetime.
    #[must_use]
    pub const fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }
}

impl Default for TokenSection {
    fn default() -> Self {
        Self {
            signing_key: String::new(),
            identity_key: default_identity_key(),
            expiration_secs: default_expiration_secs(),
        }
    }
}

impl fmt::Debug for TokenSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSection")
            .field("signing_key", &"<redacted>")
            .field("identity_key", &self.identity_key)
            .field("expiration_secs", &self.expiration_secs)
            .finish()
    }
}

fn default_identity_key() -> String {
    "identityKey".to_string()
}

const fn default_expiration_secs() -> u64 {
    7200
}

/// Authorization section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuthzSection {
    /// Seconds between rule reloads. Zero disables the refresh task.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl AuthzSection {
    /// Reload period, or `None` when periodic refresh is off.
    #[must_use]
    pub const fn refresh_interval(&self) -> Option<Duration> {
        if self.refresh_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.refresh_interval_secs))
        }
    }
}

impl Default for AuthzSection {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

const fn default_refresh_interval_secs() -> u64 {
    10
}

/// Middleware chain section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MiddlewareSection {
    /// Operations that skip authentication and authorization. `None` keeps
    /// the built-in list of health check, user creation and login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<Vec<String>>,

    /// Whether a caller-supplied `x-request-id` is kept.
    #[serde(default = "default_true")]
    pub trust_incoming_request_id: bool,

    /// Replaces token authentication with the `x-user-id` bypass stage.
    /// Development only.
    #[serde(default)]
    pub bypass_authn: bool,
}

impl Default for MiddlewareSection {
    fn default() -> Self {
        Self {
            whitelist: None,
            trust_incoming_request_id: true,
            bypass_authn: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

/// Relational database section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    /// Connection URL. `None` selects the in-memory backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl DatabaseSection {
    /// Pool acquire timeout.
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_acquire_timeout_secs() -> u64 {
    5
}
