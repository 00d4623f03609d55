//! Layered configuration loader.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use keystone_telemetry::LogFormat;
use toml::{Table, Value};
use tracing::debug;

use crate::{ConfigError, KeystoneConfig};

/// Default environment prefix.
pub const ENV_PREFIX: &str = "KEYSTONE";

/// Configuration loader with layered approach.
///
/// Layers apply in this order, later ones overriding earlier ones key by
/// key:
/// 1. Built-in defaults
/// 2. Configuration files (TOML or JSON)
/// 3. Configuration strings
/// 4. `.env` entries
/// 5. Process environment variables
///
/// Steps 4 and 5 only run when an environment prefix is set, and use keys
/// of the form `PREFIX__SECTION__KEY`.
///
/// # Example
///
/// ```no_run
/// use keystone_config::ConfigLoader;
///
/// # fn main() -> Result<(), keystone_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_optional_file("keystone.toml")?
///     .with_dotenv()?
///     .with_env()
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ConfigLoader {
    layers: Table,
    dotenv: BTreeMap<String, String>,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Create a loader holding only the built-in defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every layer merged so far.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.layers = Table::new();
        self
    }

    /// Merge a configuration file. The format follows the extension.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing, unreadable, in an
    /// unsupported format, or not valid TOML/JSON.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::missing_file(path));
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        let layer = match extension.as_deref() {
            Some("toml") => parse_layer(&content, "toml")?,
            Some("json") => parse_layer(&content, "json")?,
            _ => {
                return Err(ConfigError::UnsupportedFormat {
                    format: extension.as_deref().unwrap_or_default().to_string(),
                })
            }
        };

        debug!(path = %path.display(), "configuration file loaded");
        merge_tables(&mut self.layers, layer);
        Ok(self)
    }

    /// Merge a configuration file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Merge configuration text in `format` (`toml` or `json`).
    ///
    /// ```
    /// use keystone_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[token]\nsigning_key = \"Rtg8BPKNEf2mB4mg\"", "toml")
    ///     .unwrap()
    ///     .with_string(r#"{"token": {"expiration_secs": 60}}"#, "json")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.token.signing_key, "Rtg8BPKNEf2mB4mg");
    /// assert_eq!(config.token.expiration_secs, 60);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails or the format is unsupported.
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        let layer = parse_layer(content, format)?;
        merge_tables(&mut self.layers, layer);
        Ok(self)
    }

    /// Use [`ENV_PREFIX`] for environment overrides.
    #[must_use]
    pub fn with_env(self) -> Self {
        self.with_env_prefix(ENV_PREFIX)
    }

    /// Set the environment prefix for overrides, e.g. `KEYSTONE` for
    /// `KEYSTONE__TOKEN__SIGNING_KEY`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Read `.env` from the working directory or its ancestors, if present.
    ///
    /// Entries are kept in the loader and do not touch the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a `.env` file exists but is malformed.
    pub fn with_dotenv(mut self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv_iter() {
            Ok(entries) => {
                for entry in entries {
                    let (key, value) = entry?;
                    self.dotenv.insert(key, value);
                }
                Ok(self)
            }
            Err(err) if err.not_found() => Ok(self),
            Err(err) => Err(err.into()),
        }
    }

    /// Read a specific `.env` file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing or malformed.
    pub fn with_dotenv_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let entries = dotenvy::from_path_iter(path).map_err(|err| {
            if err.not_found() {
                ConfigError::missing_file(path)
            } else {
                err.into()
            }
        })?;
        for entry in entries {
            let (key, value) = entry?;
            self.dotenv.insert(key, value);
        }
        debug!(path = %path.display(), entries = self.dotenv.len(), ".env loaded");
        Ok(self)
    }

    /// Apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a layer does not match the schema, an
    /// override cannot be parsed, or validation fails.
    pub fn load(self) -> Result<KeystoneConfig, ConfigError> {
        let config = self.load_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides without validating.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a layer does not match the schema or an
    /// override cannot be parsed.
    pub fn load_unvalidated(self) -> Result<KeystoneConfig, ConfigError> {
        let mut config: KeystoneConfig = Value::Table(self.layers).try_into()?;

        if let Some(prefix) = &self.env_prefix {
            let mut overrides = self.dotenv;
            overrides.extend(env::vars());
            apply_overrides(&mut config, prefix, overrides)?;
        }

        Ok(config)
    }
}

fn parse_layer(content: &str, format: &str) -> Result<Table, ConfigError> {
    match format.to_lowercase().as_str() {
        "toml" => Ok(toml::from_str(content)?),
        "json" => Ok(serde_json::from_str(content)?),
        other => Err(ConfigError::UnsupportedFormat {
            format: other.to_string(),
        }),
    }
}

fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        if let Value::Table(incoming) = value {
            if let Some(Value::Table(existing)) = base.get_mut(&key) {
                merge_tables(existing, incoming);
                continue;
            }
            base.insert(key, Value::Table(incoming));
        } else {
            base.insert(key, value);
        }
    }
}

fn apply_overrides(
    config: &mut KeystoneConfig,
    prefix: &str,
    vars: impl IntoIterator<Item = (String, String)>,
) -> Result<(), ConfigError> {
    let head = format!("{prefix}__");
    for (key, value) in vars {
        if let Some(path) = key.strip_prefix(&head) {
            apply_env_var(config, &key, path, &value)?;
        }
    }
    Ok(())
}

fn apply_env_var(
    config: &mut KeystoneConfig,
    key: &str,
    path: &str,
    value: &str,
) -> Result<(), ConfigError> {
    let parts: Vec<&str> = path.split("__").collect();

    match parts.as_slice() {
        ["TOKEN", "SIGNING_KEY"] => config.token.signing_key = value.to_string(),
        ["TOKEN", "IDENTITY_KEY"] => config.token.identity_key = value.to_string(),
        ["TOKEN", "EXPIRATION_SECS"] => config.token.expiration_secs = parse_int(key, value)?,

        ["AUTHZ", "REFRESH_INTERVAL_SECS"] => {
            config.authz.refresh_interval_secs = parse_int(key, value)?;
        }

        ["MIDDLEWARE", "WHITELIST"] => {
            config.middleware.whitelist = Some(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|op| !op.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }
        ["MIDDLEWARE", "TRUST_INCOMING_REQUEST_ID"] => {
            config.middleware.trust_incoming_request_id = parse_flag(key, value)?;
        }
        ["MIDDLEWARE", "BYPASS_AUTHN"] => config.middleware.bypass_authn = parse_flag(key, value)?,

        ["DATABASE", "URL"] => {
            config.database.url = if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            };
        }
        ["DATABASE", "MAX_CONNECTIONS"] => {
            config.database.max_connections = parse_int(key, value)?;
        }
        ["DATABASE", "ACQUIRE_TIMEOUT_SECS"] => {
            config.database.acquire_timeout_secs = parse_int(key, value)?;
        }

        ["LOGGING", "ENABLED"] => config.logging.enabled = parse_flag(key, value)?,
        ["LOGGING", "LEVEL"] => config.logging.level = value.to_string(),
        ["LOGGING", "FORMAT"] => {
            config.logging.format = match value.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                _ => {
                    return Err(ConfigError::malformed_env(
                        key,
                        "expected 'json' or 'pretty'",
                    ))
                }
            };
        }

        [_, _] => return Err(ConfigError::UnknownEnvKey { var: key.to_string() }),
        _ => return Err(ConfigError::malformed_env(key, "expected PREFIX__SECTION__KEY")),
    }

    Ok(())
}

fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::malformed_env(key, "expected integer"))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::malformed_env(key, "expected boolean"))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
