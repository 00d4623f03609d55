//! Typed configuration for Keystone services.
//!
//! [`KeystoneConfig`] gathers the settings of every Keystone component:
//!
//! - [`TokenSection`] - signing key, identity claim, token lifetime
//! - [`AuthzSection`] - policy refresh period
//! - [`MiddlewareSection`] - whitelist, request-id trust, authentication bypass
//! - [`DatabaseSection`] - connection URL and pool limits
//! - [`LogConfig`](keystone_telemetry::LogConfig) - log level and format
//!
//! Unknown fields are rejected at every level.
//!
//! # Configuration File Format
//!
//! ```toml
//! [token]
//! signing_key = "Rtg8BPKNEf2mB4mg"
//! identity_key = "identityKey"
//! expiration_secs = 7200
//!
//! [authz]
//! refresh_interval_secs = 10
//!
//! [middleware]
//! whitelist = ["/healthz", "/v1.Keystone/Login"]
//! trust_incoming_request_id = true
//!
//! [database]
//! url = "postgres://keystone@localhost/keystone"
//! max_connections = 10
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! # Environment Variable Overrides
//!
//! With [`ConfigLoader::with_env`], variables named `KEYSTONE__SECTION__KEY`
//! override file values, for example `KEYSTONE__TOKEN__SIGNING_KEY` or
//! `KEYSTONE__MIDDLEWARE__WHITELIST=/healthz,/v1/login`.

#![doc(html_root_url = "https://docs.rs/keystone-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{KeystoneConfig, MAX_TOKEN_EXPIRATION_SECS, MIN_SIGNING_KEY_LEN};
pub use error::ConfigError;
pub use loader::{ConfigLoader, ENV_PREFIX};
pub use schema::{AuthzSection, DatabaseSection, MiddlewareSection, TokenSection};
