//! Authorizer configuration.

use std::time::Duration;

/// Default interval between rule reloads.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Maximum depth followed when resolving inherited roles.
pub const MAX_ROLE_DEPTH: usize = 10;

/// Configuration for the [`Authorizer`](crate::Authorizer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizerConfig {
    /// Interval between background reloads. `None` disables refresh.
    pub refresh_interval: Option<Duration>,
    /// Maximum depth followed when resolving inherited roles.
    pub max_role_depth: usize,
    /// Whether to log each decision at debug level.
    pub log_decisions: bool,
}

impl Default for AuthorizerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Some(DEFAULT_REFRESH_INTERVAL),
            max_role_depth: MAX_ROLE_DEPTH,
            log_decisions: false,
        }
    }
}

impl AuthorizerConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the refresh interval. A zero interval disables refresh.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Disable background refresh.
    pub fn without_refresh(mut self) -> Self {
        self.refresh_interval = None;
        self
    }

    /// Set the role resolution depth.
    pub fn with_max_role_depth(mut self, depth: usize) -> Self {
        self.max_role_depth = depth;
        self
    }

    /// Enable or disable decision logging.
    pub fn with_decision_logging(mut self, enabled: bool) -> Self {
        self.log_decisions = enabled;
        self
    }

    /// Configuration for development: decisions are logged.
    pub fn development() -> Self {
        Self::default().with_decision_logging(true)
    }

    /// Configuration for production.
    pub fn production() -> Self {
        Self::default()
    }
}
