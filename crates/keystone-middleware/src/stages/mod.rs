//! The five chain stages.
//!
//! 1. [`request_id`] - Read or generate the request id and echo it back
//! 2. [`authn`] - Verify the bearer token and resolve the [`Principal`]
//!    ([`bypass`] is a development-only replacement)
//! 3. [`authz`] - Ask the policy enforcer about `(subject, object, action)`
//! 4. [`defaults`] - Fill in request defaults
//! 5. [`validation`] - Reject malformed or invalid payloads
//!
//! [`Principal`]: keystone_core::Principal

pub mod authn;
pub mod authz;
pub mod bypass;
pub mod defaults;
pub mod request_id;
pub mod validation;

pub use authn::{AuthnMiddleware, PrincipalLookup, StaticPrincipalLookup};
pub use authz::AuthzMiddleware;
pub use bypass::{BypassAuthnMiddleware, DEFAULT_BYPASS_USER, USER_ID_HEADER};
pub use defaults::DefaultsMiddleware;
pub use request_id::{RequestIdMiddleware, REQUEST_ID_HEADER};
pub use validation::ValidationMiddleware;
