//! Operations exempt from authentication and authorization.

use crate::types::Operation;
use std::collections::BTreeSet;

/// Operations that are whitelisted when no explicit list is configured:
/// health checks, user creation and login, on both transports.
pub const DEFAULT_WHITELIST: &[&str] = &[
    "/healthz",
    "/v1/users",
    "/v1/login",
    "/v1.Keystone/Healthz",
    "/v1.Keystone/CreateUser",
    "/v1.Keystone/Login",
];

/// A set of operation identifiers that skip the authentication and
/// authorization stages.
///
/// Entries are RPC full method names or HTTP paths and are matched exactly
/// against [`Operation::name`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Whitelist {
    operations: BTreeSet<String>,
}

impl Whitelist {
    /// Creates a whitelist from operation identifiers.
    pub fn new<I, S>(operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            operations: operations.into_iter().map(Into::into).collect(),
        }
    }

    /// An empty whitelist; every operation is authenticated.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            operations: BTreeSet::new(),
        }
    }

    /// Adds an operation identifier.
    #[must_use]
    pub fn with(mut self, operation: impl Into<String>) -> Self {
        self.operations.insert(operation.into());
        self
    }

    /// Returns `true` if `operation` is exempt.
    #[must_use]
    pub fn contains(&self, operation: &Operation) -> bool {
        self.operations.contains(operation.name())
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns `true` if nothing is exempt.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Iterates the entries in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.operations.iter().map(String::as_str)
    }
}

impl Default for Whitelist {
    fn default() -> Self {
        Self::new(DEFAULT_WHITELIST.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    #[test]
    fn test_default_covers_health_signup_and_login() {
        let whitelist = Whitelist::default();
        assert!(whitelist.contains(&Operation::http(Method::GET, "/healthz")));
        assert!(whitelist.contains(&Operation::http(Method::POST, "/v1/login")));
        assert!(whitelist.contains(&Operation::rpc("/v1.Keystone/CreateUser")));
        assert!(!whitelist.contains(&Operation::rpc("/v1.Keystone/DeleteUser")));
    }

    #[test]
    fn test_matching_is_exact() {
        let whitelist = Whitelist::empty().with("/v1/users");
        assert!(whitelist.contains(&Operation::http(Method::POST, "/v1/users")));
        assert!(!whitelist.contains(&Operation::http(Method::GET, "/v1/users/user-1")));
        assert!(!whitelist.contains(&Operation::http(Method::GET, "/v1/users/")));
    }
}
