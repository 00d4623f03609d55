//! Error types for token operations.

use thiserror::Error;

/// Result type for token operations.
pub type TokenResult<T> = Result<T, TokenError>;

/// Errors from issuing, extracting or verifying identity tokens.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TokenError {
    /// No `Authorization` value was present.
    #[error("the authorization credential is missing")]
    MissingCredential,

    /// The credential was present but not of the form `Bearer <token>`.
    #[error("malformed authorization credential: {0}")]
    MalformedCredential(String),

    /// Signature, structure or validity window check failed.
    #[error("token verification failed: {0}")]
    Verification(#[source] jsonwebtoken::errors::Error),

    /// The token verified but carried no usable identity claim.
    #[error("token has no '{0}' claim")]
    MissingIdentity(String),

    /// No signing key is configured.
    #[error("token signing key is not configured")]
    SigningKeyUnset,

    /// The configured lifetime is longer than
    /// [`MAX_EXPIRATION`](crate::MAX_EXPIRATION).
    #[error("token expiration of {0:?} is out of range")]
    ExpirationOutOfRange(std::time::Duration),

    /// The signer rejected the claims.
    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

impl TokenError {
    /// Returns `true` for failures that happened while issuing a token.
    #[must_use]
    pub const fn is_signing_failure(&self) -> bool {
        matches!(
            self,
            Self::SigningKeyUnset | Self::Signing(_) | Self::ExpirationOutOfRange(_)
        )
    }
}

/// Bad signatures and missing identity claims collapse into the same
/// `TokenInvalid` kind. The distinction survives only in the detail text.
impl From<TokenError> for keystone_core::Error {
    fn from(err: TokenError) -> Self {
        let detail = err.to_string();
        match err {
            TokenError::MissingCredential => Self::missing_credential().with_detail(detail),
            TokenError::SigningKeyUnset
            | TokenError::Signing(_)
            | TokenError::ExpirationOutOfRange(_) => Self::signing().with_detail(detail),
            TokenError::MalformedCredential(_)
            | TokenError::Verification(_)
            | TokenError::MissingIdentity(_) => Self::token_invalid().with_detail(detail),
        }
    }
}
