//! Issuing and verifying identity tokens.

use crate::config::{TokenConfig, MAX_EXPIRATION};
use crate::error::{TokenError, TokenResult};
use chrono::{DateTime, Duration as ChronoDuration, SubsecRound, Utc};
use http::header::AUTHORIZATION;
use http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

/// The only credential scheme accepted on the `Authorization` field.
pub const BEARER_SCHEME: &str = "Bearer";

/// A freshly issued token, serializable as a login response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    /// The compact JWS string.
    pub token: String,
    /// When the token stops verifying, in whole seconds like the `exp`
    /// claim.
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies HMAC-signed identity tokens.
///
/// Each token embeds the subject id under the configured identity claim
/// together with `nbf`, `iat` and `exp`. Tokens are stateless and there is
/// no revocation list.
///
/// Construct one service at startup and share it by reference.
///
/// # Example
///
/// ```
/// use keystone_token::{TokenConfig, TokenService};
///
/// let tokens = TokenService::new(TokenConfig::new("Rtg8BPKNEf2mB4mg"));
/// let issued = tokens.issue("user-1").unwrap();
/// assert_eq!(tokens.verify(&issued.token).unwrap(), "user-1");
/// ```
pub struct TokenService {
    config: TokenConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenService {
    /// Creates a token service.
    #[must_use]
    pub fn new(config: TokenConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.signing_key());
        let decoding_key = DecodingKey::from_secret(config.signing_key());

        // HMAC family only. Anything else fails with InvalidAlgorithm.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.leeway = config.leeway().as_secs();
        validation.validate_nbf = true;
        validation.validate_aud = false;

        Self {
            config,
            encoding_key,
            decoding_key,
            validation,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Issues a token for `subject_id` valid from now.
    pub fn issue(&self, subject_id: &str) -> TokenResult<IssuedToken> {
        self.issue_at(subject_id, Utc::now())
    }

    /// Issues a token for `subject_id` as if it were issued at `issued_at`.
    ///
    /// Fails with [`TokenError::ExpirationOutOfRange`] when the configured
    /// lifetime exceeds [`MAX_EXPIRATION`].
    pub fn issue_at(&self, subject_id: &str, issued_at: DateTime<Utc>) -> TokenResult<IssuedToken> {
        if !self.config.has_signing_key() {
            return Err(TokenError::SigningKeyUnset);
        }

        let expiration = self.config.expiration();
        let expires_at = Some(expiration)
            .filter(|expiration| *expiration <= MAX_EXPIRATION)
            .and_then(|expiration| ChronoDuration::from_std(expiration).ok())
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .ok_or(TokenError::ExpirationOutOfRange(expiration))?
            .trunc_subsecs(0);

        let mut claims = Map::new();
        claims.insert(
            self.config.identity_key().to_string(),
            Value::String(subject_id.to_string()),
        );
        claims.insert("nbf".to_string(), Value::from(issued_at.timestamp()));
        claims.insert("iat".to_string(), Value::from(issued_at.timestamp()));
        claims.insert("exp".to_string(), Value::from(expires_at.timestamp()));

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(TokenError::Signing)?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Verifies `token` and returns the subject id it carries.
    pub fn verify(&self, token: &str) -> TokenResult<String> {
        let data = jsonwebtoken::decode::<Map<String, Value>>(
            token,
            &self.decoding_key,
            &self.validation,
        )
        .map_err(|err| {
            debug!(error = %err, "token verification failed");
            TokenError::Verification(err)
        })?;

        match data.claims.get(self.config.identity_key()) {
            Some(Value::String(subject)) if !subject.is_empty() => Ok(subject.clone()),
            _ => Err(TokenError::MissingIdentity(
                self.config.identity_key().to_string(),
            )),
        }
    }

    /// Reads the bearer token from transport metadata.
    ///
    /// HTTP headers and RPC metadata both arrive as a [`HeaderMap`]; the
    /// credential lives under `authorization` in either case. The scheme is
    /// matched case-insensitively.
    pub fn extract_from_request(metadata: &HeaderMap) -> TokenResult<String> {
        let value = metadata
            .get(AUTHORIZATION)
            .ok_or(TokenError::MissingCredential)?;
        let value = value
            .to_str()
            .map_err(|_| TokenError::MalformedCredential("non-ascii value".to_string()))?
            .trim();
        if value.is_empty() {
            return Err(TokenError::MissingCredential);
        }

        let (scheme, token) = value
            .split_once(' ')
            .ok_or_else(|| TokenError::MalformedCredential("expected 'Bearer <token>'".to_string()))?;
        if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
            return Err(TokenError::MalformedCredential(format!(
                "unsupported scheme '{scheme}'"
            )));
        }

        let token = token.trim();
        if token.is_empty() {
            return Err(TokenError::MalformedCredential("empty token".to_string()));
        }
        Ok(token.to_string())
    }

    /// Extracts and verifies the bearer token in one step.
    pub fn verify_request(&self, metadata: &HeaderMap) -> TokenResult<String> {
        let token = Self::extract_from_request(metadata)?;
        self.verify(&token)
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
