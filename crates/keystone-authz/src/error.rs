//! Error types for the authorization crate.

use thiserror::Error;

/// Result type for authorization operations.
pub type AuthzResult<T> = Result<T, AuthzError>;

/// Errors that can occur during authorization.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthzError {
    /// The rule source could not be read.
    #[error("failed to load rules from {source_name}: {message}")]
    SourceLoad {
        /// Name of the rule source.
        source_name: String,
        /// Error message.
        message: String,
    },

    /// A stored rule could not be turned into a [`PolicyRule`](crate::PolicyRule).
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    /// The (subject, object, action) triple is unusable.
    #[error("invalid authorization request: {0}")]
    InvalidRequest(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database error from the SQL rule source.
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AuthzError {
    /// Create a source load error.
    pub fn source_load(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SourceLoad {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Returns true if a later reload may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SourceLoad { .. } => true,
            #[cfg(feature = "postgres")]
            Self::Database(_) => true,
            _ => false,
        }
    }
}
