//! # Keystone Core
//!
//! Core types shared by every Keystone crate:
//!
//! - [`Context`] - Per-request context carrying the request id, principal,
//!   deadline, cancellation signal and typed extensions
//! - [`RequestId`] - Request identifier
//! - [`Principal`] - The authenticated caller
//! - [`Error`] - Cross-transport error with kind, reason and metadata
//! - [`ResourceIdGenerator`] - Prefixed public resource ids

#![doc(html_root_url = "https://docs.rs/keystone-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod error;
mod principal;
mod resource_id;

pub use context::{CancelSignal, Context, RequestId};
pub use error::{
    Error, ErrorEnvelope, ErrorKind, FieldErrors, KeystoneResult, REQUEST_ID_METADATA_KEY,
};
pub use principal::Principal;
pub use resource_id::ResourceIdGenerator;
