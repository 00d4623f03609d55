//! Backend error types.

use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors raised by a [`Backend`](crate::Backend).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The database reported an error.
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row with the same key already exists.
    #[error("duplicate key {key} in {table}")]
    Conflict {
        /// Table name.
        table: String,
        /// Key value.
        key: String,
    },

    /// The options or row cannot be expressed as a query.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The backend cannot evaluate this part of the query.
    #[error("unsupported by {backend} backend: {feature}")]
    Unsupported {
        /// Backend name.
        backend: &'static str,
        /// What was asked for.
        feature: String,
    },

    /// The transaction was already committed or rolled back.
    #[error("transaction already finished")]
    TransactionClosed,

    /// An open transaction held the backend for longer than the caller
    /// was willing to wait.
    #[error("{backend} backend busy: a transaction held it for {waited:?}")]
    Busy {
        /// Backend name.
        backend: &'static str,
        /// How long the caller waited.
        waited: std::time::Duration,
    },

    /// The transaction handle belongs to another backend.
    #[error("transaction handle belongs to another backend")]
    ForeignTransaction,

    /// A row could not be converted to or from JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackendError {
    /// Create an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }

    /// Create an unsupported feature error.
    pub fn unsupported(backend: &'static str, feature: impl Into<String>) -> Self {
        Self::Unsupported {
            backend,
            feature: feature.into(),
        }
    }

    /// Returns true for errors caused by the caller's query rather than the
    /// backing store.
    pub fn is_query_error(&self) -> bool {
        matches!(self, Self::InvalidQuery(_) | Self::Unsupported { .. })
    }
}
