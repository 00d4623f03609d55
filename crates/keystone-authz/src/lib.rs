//! Keystone Authorization - deny-override policy evaluation
//!
//! Decides whether a subject may perform an action on an object, given a
//! set of grant, deny and role-assignment rules.
//!
//! # Evaluation
//!
//! 1. Resolve every role the subject holds, following role assignments
//!    transitively (at most ten levels).
//! 2. Collect grant and deny rules whose subject pattern matches the
//!    subject or one of its roles, whose object pattern matches the object,
//!    and whose action pattern matches the action.
//! 3. Any matching deny wins. Otherwise a matching grant allows. Otherwise
//!    the request is denied.
//!
//! # Architecture
//!
//! ```text
//!   RuleSource (static | postgres)
//!          │ load every refresh interval
//!          ▼
//!   ┌──────────────────────┐   swap Arc   ┌──────────────┐
//!   │ Authorizer           │─────────────▶│ RuleSet      │
//!   │ (RwLock<Arc<..>>)    │              │ (immutable)  │
//!   └──────────┬───────────┘              └──────────────┘
//!              │ Enforcer::authorize(subject, object, action)
//!              ▼
//!        authorization stage
//! ```
//!
//! A failed reload is logged and the previous rules stay in force.
//!
//! # Example
//!
//! ```
//! use keystone_authz::{Authorizer, Enforcer, PolicyRule};
//!
//! let authorizer = Authorizer::with_rules([
//!     PolicyRule::grant("role:user", "/posts", "CALL"),
//!     PolicyRule::deny("role:user", "/posts/*", "DELETE"),
//!     PolicyRule::assign("user-1", "role:user"),
//! ]);
//!
//! assert!(authorizer.authorize("user-1", "/posts", "CALL").unwrap());
//! assert!(!authorizer.authorize("user-1", "/posts/42", "DELETE").unwrap());
//! ```

#![doc(html_root_url = "https://docs.rs/keystone-authz/0.1.0")]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod authorizer;
pub mod config;
pub mod error;
pub mod matcher;
pub mod policy;
pub mod rule;
pub mod source;

pub use authorizer::{Authorizer, Enforcer, RefreshHandle};
pub use config::AuthorizerConfig;
pub use error::{AuthzError, AuthzResult};
pub use matcher::Matcher;
pub use policy::{Decision, DenyReason, RuleSet};
pub use rule::{Effect, Permission, PolicyRule};
#[cfg(feature = "postgres")]
pub use source::PgRuleSource;
pub use source::{RuleRow, RuleSource, StaticRuleSource};
