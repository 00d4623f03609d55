//! Top-level configuration type.

use crate::{AuthzSection, ConfigError, DatabaseSection, MiddlewareSection, TokenSection};
use keystone_telemetry::logging::create_env_filter;
use keystone_telemetry::LogConfig;
use serde::{Deserialize, Serialize};

/// Shortest accepted signing key, in bytes.
pub const MIN_SIGNING_KEY_LEN: usize = 6;

/// Longest accepted token lifetime, ten years. Matches what the token
/// service is willing to issue.
pub const MAX_TOKEN_EXPIRATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Complete Keystone configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to assemble one from files and
/// the environment.
///
/// ```
/// use keystone_config::KeystoneConfig;
///
/// let config = KeystoneConfig::default();
/// assert_eq!(config.authz.refresh_interval_secs, 10);
/// assert!(config.validate().is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct KeystoneConfig {
    /// Identity tokens.
    #[serde(default)]
    pub token: TokenSection,

    /// Policy authorizer.
    #[serde(default)]
    pub authz: AuthzSection,

    /// Middleware chain.
    #[serde(default)]
    pub middleware: MiddlewareSection,

    /// Relational database.
    #[serde(default)]
    pub database: DatabaseSection,

    /// Log output.
    #[serde(default)]
    pub logging: LogConfig,
}

impl KeystoneConfig {
    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a signing key shorter than
    /// [`MIN_SIGNING_KEY_LEN`], a token expiration of zero or above
    /// [`MAX_TOKEN_EXPIRATION_SECS`], a zero pool size, an
    /// empty database URL, or an unparsable log level.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.signing_key.len() < MIN_SIGNING_KEY_LEN {
            return Err(ConfigError::invalid(
                "token.signing_key",
                format!("must be at least {MIN_SIGNING_KEY_LEN} bytes"),
            ));
        }

        if self.token.expiration_secs == 0 {
            return Err(ConfigError::invalid(
                "token.expiration_secs",
                "must be greater than zero",
            ));
        }

        if self.token.expiration_secs > MAX_TOKEN_EXPIRATION_SECS {
            return Err(ConfigError::invalid(
                "token.expiration_secs",
                format!("must be at most {MAX_TOKEN_EXPIRATION_SECS}"),
            ));
        }

        if self.token.identity_key.trim().is_empty() {
            return Err(ConfigError::invalid(
                "token.identity_key",
                "cannot be empty",
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::invalid(
                "database.max_connections",
                "must be greater than zero",
            ));
        }

        if self
            .database
            .url
            .as_deref()
            .is_some_and(|url| url.trim().is_empty())
        {
            return Err(ConfigError::invalid("database.url", "cannot be empty"));
        }

        if self.logging.enabled {
            create_env_filter(&self.logging.level)
                .map_err(|e| ConfigError::invalid("logging.level", e.to_string()))?;
        }

        Ok(())
    }
}
