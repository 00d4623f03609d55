//! The authenticated caller.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The identity attached to a request once its token has been verified and
/// the backing user record fetched.
///
/// A `Principal` never carries the raw token, so it is safe to log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    /// Subject id embedded in the identity token.
    pub user_id: String,
    /// Display name from the backing record.
    pub username: String,
}

impl Principal {
    /// Creates a principal.
    #[must_use]
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
        }
    }

    /// Returns a string identifier suitable for logging.
    #[must_use]
    pub fn log_id(&self) -> String {
        format!("user:{}", self.user_id)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.user_id, self.username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_id() {
        let principal = Principal::new("user-1", "alice");
        assert_eq!(principal.log_id(), "user:user-1");
        assert_eq!(principal.to_string(), "user-1 (alice)");
    }
}
