//! # Keystone Token
//!
//! Signed, time-bound identity tokens.
//!
//! A [`TokenService`] issues HMAC-SHA256 tokens that embed a subject id and
//! the standard `nbf`, `iat` and `exp` claims, and verifies them again on
//! the way in. Transports hand it their metadata as an [`http::HeaderMap`]
//! so bearer extraction works identically for HTTP headers and RPC
//! metadata.
//!
//! ## Error mapping
//!
//! | [`TokenError`] | Core kind |
//! |---|---|
//! | `MissingCredential` | `MissingCredential` |
//! | `MalformedCredential`, `Verification`, `MissingIdentity` | `TokenInvalid` |
//! | `SigningKeyUnset`, `Signing` | `SigningError` |

#![doc(html_root_url = "https://docs.rs/keystone-token/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod service;

pub use config::{TokenConfig, DEFAULT_EXPIRATION, DEFAULT_IDENTITY_KEY, MAX_EXPIRATION};
pub use error::{TokenError, TokenResult};
pub use service::{IssuedToken, TokenService, BEARER_SCHEME};
