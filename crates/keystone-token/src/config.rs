//! Token service configuration.

use std::fmt;
use std::time::Duration;

/// Default name of the claim that carries the subject id.
pub const DEFAULT_IDENTITY_KEY: &str = "identityKey";

/// Default token lifetime.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(2 * 60 * 60);

/// Longest token lifetime the service issues, ten years.
pub const MAX_EXPIRATION: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Configuration for [`TokenService`](crate::TokenService).
///
/// # Example
///
/// ```
/// use keystone_token::TokenConfig;
/// use std::time::Duration;
///
/// let config = TokenConfig::new("Rtg8BPKNEf2mB4mg")
///     .with_identity_key("uid")
///     .with_expiration(Duration::from_secs(900));
///
/// assert_eq!(config.identity_key(), "uid");
/// assert!(config.has_signing_key());
/// ```
#[derive(Clone)]
pub struct TokenConfig {
    signing_key: Vec<u8>,
    identity_key: String,
    expiration: Duration,
    leeway: Duration,
}

impl TokenConfig {
    /// Creates a configuration with the given HMAC key and default claim
    /// name and lifetime.
    #[must_use]
    pub fn new(signing_key: impl AsRef<[u8]>) -> Self {
        Self {
            signing_key: signing_key.as_ref().to_vec(),
            ..Self::default()
        }
    }

    /// Sets the name of the identity claim.
    #[must_use]
    pub fn with_identity_key(mut self, identity_key: impl Into<String>) -> Self {
        self.identity_key = identity_key.into();
        self
    }

    /// Sets the token lifetime.
    #[must_use]
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Sets the clock-skew allowance applied to `nbf` and `exp`.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Returns `true` if a non-empty signing key is set.
    #[must_use]
    pub fn has_signing_key(&self) -> bool {
        !self.signing_key.is_empty()
    }

    pub(crate) fn signing_key(&self) -> &[u8] {
        &self.signing_key
    }

    /// Returns the identity claim name.
    #[must_use]
    pub fn identity_key(&self) -> &str {
        &self.identity_key
    }

    /// Returns the token lifetime.
    #[must_use]
    pub const fn expiration(&self) -> Duration {
        self.expiration
    }

    /// Returns the clock-skew allowance.
    #[must_use]
    pub const fn leeway(&self) -> Duration {
        self.leeway
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            signing_key: Vec::new(),
            identity_key: DEFAULT_IDENTITY_KEY.to_string(),
            expiration: DEFAULT_EXPIRATION,
            leeway: Duration::ZERO,
        }
    }
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("signing_key", &"<redacted>")
            .field("identity_key", &self.identity_key)
            .field("expiration", &self.expiration)
            .field("leeway", &self.leeway)
            .finish()
    }
}
