//! Error types for Keystone.
//!
//! Every failure that crosses a transport boundary is an [`Error`]. Lower
//! layers keep their own error enums and convert into one of the
//! [`ErrorKind`]s below before returning to the middleware chain.
//!
//! | `ErrorKind` | Reason | HTTP |
//! |---|---|---|
//! | `MissingCredential` | `Unauthenticated.MissingCredential` | 401 |
//! | `TokenInvalid` | `Unauthenticated.TokenInvalid` | 401 |
//! | `Unauthenticated` | `Unauthenticated` | 401 |
//! | `SigningError` | `Unauthenticated.SignToken` | 401 |
//! | `PermissionDenied` | `PermissionDenied` | 403 |
//! | `ValidationFailure` | `InvalidArgument` | 400 |
//! | `NotFound` | `NotFound` | 404 |
//! | `ReadFailure` | `InternalError.DBRead` | 500 |
//! | `WriteFailure` | `InternalError.DBWrite` | 500 |
//! | `Internal` | `InternalError` | 500 |
//!
//! Messages on authentication and authorization errors are fixed. The
//! diagnostic text for those kinds lives in [`Error::detail`], which is
//! logged but never serialized.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

/// Metadata key under which the originating request id is attached.
pub const REQUEST_ID_METADATA_KEY: &str = "X-Request-ID";

/// Result type alias using [`Error`].
pub type KeystoneResult<T> = Result<T, Error>;

/// Classification of every error Keystone can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No bearer credential was presented.
    MissingCredential,
    /// The credential failed verification.
    TokenInvalid,
    /// The credential verified but the caller could not be resolved.
    Unauthenticated,
    /// A token could not be issued.
    SigningError,
    /// The authorizer refused the call.
    PermissionDenied,
    /// The request payload was rejected.
    ValidationFailure,
    /// A lookup matched zero records.
    NotFound,
    /// A backing store read failed.
    ReadFailure,
    /// A backing store write failed.
    WriteFailure,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Returns the stable machine-readable reason for this kind.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::MissingCredential => "Unauthenticated.MissingCredential",
            Self::TokenInvalid => "Unauthenticated.TokenInvalid",
            Self::Unauthenticated => "Unauthenticated",
            Self::SigningError => "Unauthenticated.SignToken",
            Self::PermissionDenied => "PermissionDenied",
            Self::ValidationFailure => "InvalidArgument",
            Self::NotFound => "NotFound",
            Self::ReadFailure => "InternalError.DBRead",
            Self::WriteFailure => "InternalError.DBWrite",
            Self::Internal => "InternalError",
        }
    }

    /// Returns the default HTTP status code for this kind.
    #[must_use]
    pub const fn default_status_code(&self) -> StatusCode {
        match self {
            Self::MissingCredential
            | Self::TokenInvalid
            | Self::Unauthenticated
            | Self::SigningError => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::ValidationFailure => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::ReadFailure | Self::WriteFailure | Self::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns `true` for kinds the caller caused.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::ReadFailure | Self::WriteFailure | Self::Internal | Self::SigningError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Standard error type for Keystone.
///
/// # Example
///
/// ```
/// use keystone_core::{Error, ErrorKind};
///
/// fn check_title(title: &str) -> Result<(), Error> {
///     if title.is_empty() {
///         return Err(Error::validation("title cannot be empty"));
///     }
///     Ok(())
/// }
///
/// let err = check_title("").unwrap_err().with_request_id("req-1");
/// assert_eq!(err.kind(), ErrorKind::ValidationFailure);
/// assert_eq!(err.request_id(), Some("req-1"));
/// ```
#[derive(Error, Debug)]
#[error("{reason}: {message}")]
pub struct Error {
    kind: ErrorKind,
    reason: &'static str,
    message: String,
    detail: Option<String>,
    metadata: BTreeMap<String, String>,
    field_errors: Option<FieldErrors>,
    #[source]
    source: Option<anyhow::Error>,
}

impl Error {
    /// Creates an error of the given kind with a message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            reason: kind.reason(),
            message: message.into(),
            detail: None,
            metadata: BTreeMap::new(),
            field_errors: None,
            source: None,
        }
    }

    /// No credential was presented.
    #[must_use]
    pub fn missing_credential() -> Self {
        Self::new(ErrorKind::MissingCredential, "missing bearer credential")
    }

    /// The credential failed verification.
    #[must_use]
    pub fn token_invalid() -> Self {
        Self::new(ErrorKind::TokenInvalid, "token was invalid")
    }

    /// The caller could not be resolved.
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self::new(ErrorKind::Unauthenticated, "unauthenticated")
    }

    /// A token could not be signed.
    #[must_use]
    pub fn signing() -> Self {
        Self::new(ErrorKind::SigningError, "error occurred while signing the token")
    }

    /// The authorizer refused the call.
    #[must_use]
    pub fn permission_denied() -> Self {
        Self::new(ErrorKind::PermissionDenied, "permission denied")
    }

    /// The payload was rejected.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailure, message)
    }

    /// The payload was rejected with per-field messages.
    #[must_use]
    pub fn validation_with_fields(message: impl Into<String>, field_errors: FieldErrors) -> Self {
        let mut error = Self::validation(message);
        error.field_errors = Some(field_errors);
        error
    }

    /// A lookup matched nothing.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// A backing store read failed.
    #[must_use]
    pub fn read_failure() -> Self {
        Self::new(ErrorKind::ReadFailure, "database read failure")
    }

    /// A backing store write failed.
    #[must_use]
    pub fn write_failure() -> Self {
        Self::new(ErrorKind::WriteFailure, "database write failure")
    }

    /// An unclassified failure.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// The request was cancelled before the operation finished.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::internal("request cancelled").with_reason("InternalError.Cancelled")
    }

    /// The request deadline passed before the operation finished.
    #[must_use]
    pub fn deadline_exceeded() -> Self {
        Self::internal("request deadline exceeded").with_reason("InternalError.Cancelled")
    }

    /// Overrides the reason while keeping the kind.
    #[must_use]
    pub fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = reason;
        self
    }

    /// Replaces the public message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Attaches diagnostic text that is logged but never serialized.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attaches an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Attaches the originating request id.
    #[must_use]
    pub fn with_request_id(self, request_id: impl Into<String>) -> Self {
        self.with_metadata(REQUEST_ID_METADATA_KEY, request_id)
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the reason string.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        self.reason
    }

    /// Returns the public message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the non-public diagnostic text, if any.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Returns all metadata entries.
    #[must_use]
    pub const fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Returns the attached request id, if any.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.metadata
            .get(REQUEST_ID_METADATA_KEY)
            .map(String::as_str)
    }

    /// Returns the per-field validation messages, if any.
    #[must_use]
    pub const fn field_errors(&self) -> Option<&FieldErrors> {
        self.field_errors.as_ref()
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        self.kind.default_status_code()
    }

    /// Converts this error into its serializable envelope.
    #[must_use]
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            code: self.status_code().as_u16(),
            reason: self.reason.to_string(),
            message: self.message.clone(),
            metadata: self.metadata.clone(),
            fields: self.field_errors.as_ref().map(|f| f.fields.clone()),
        }
    }
}

/// Field-specific validation errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldErrors {
    /// Map of field path to list of error messages.
    pub fields: HashMap<String, Vec<String>>,
}

impl FieldErrors {
    /// Creates a new empty `FieldErrors`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an error for a field.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    /// Returns `true` if there are no field errors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the number of fields with errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

/// Serializable error body for JSON transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// HTTP status code.
    pub code: u16,
    /// Machine-readable reason.
    pub reason: String,
    /// Public message.
    pub message: String,
    /// Correlation metadata such as the request id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// Per-field validation messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<HashMap<String, Vec<String>>>,
}
