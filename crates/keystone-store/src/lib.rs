//! Keystone Store - generic persistence
//!
//! Typed CRUD for any [`Entity`], driven by composable [`QueryOptions`]
//! and scoped to the caller's tenant through a [`TenantRegistry`].
//!
//! # Overview
//!
//! | Type | Role |
//! |------|------|
//! | [`Datastore`] | Owns the backend, hands out stores, runs transactions |
//! | [`Store`] | `create`, `update`, `delete`, `get`, `list` for one entity |
//! | [`QueryOptions`] | Filters, conditions, clauses, offset and limit |
//! | [`TenantRegistry`] | The scoping key and how to read it from a request |
//! | [`Backend`] | Row storage: [`MemoryBackend`] or `PgBackend` |
//!
//! # Error mapping
//!
//! | Situation | Error kind |
//! |-----------|------------|
//! | `get` matches nothing | `NotFound` |
//! | backend fails on `get` / `list` | `ReadFailure` |
//! | backend fails on `create` / `update` / `delete` / commit | `WriteFailure` |
//! | `delete` matches nothing | no error |
//! | deadline or cancellation | `Internal` with reason `InternalError.Cancelled` |
//!
//! # Example
//!
//! ```
//! use keystone_core::{Context, Principal};
//! use keystone_store::{Datastore, Entity, QueryOptions, TenantRegistry};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Post {
//!     #[serde(default)]
//!     id: i64,
//!     user_id: String,
//!     title: String,
//! }
//!
//! impl Entity for Post {
//!     const TABLE: &'static str = "posts";
//! }
//!
//! # tokio_test::block_on(async {
//! let datastore = Datastore::memory();
//! let tenants = TenantRegistry::new();
//! tenants.register_user_scope("user_id");
//!
//! let ctx = Context::new().with_principal(Principal::new("u1", "alice"));
//! let posts = datastore.store::<Post>();
//! let mut post = Post { id: 0, user_id: "u1".into(), title: "hello".into() };
//! posts.create(&ctx, &mut post).await.unwrap();
//!
//! let opts = QueryOptions::new().with_tenant_scope(&tenants, &ctx);
//! let (count, items) = posts.list(&ctx, &opts).await.unwrap();
//! assert_eq!(count, 1);
//! assert_eq!(items[0].title, "hello");
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/keystone-store/0.1.0")]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
mod entity;
mod error;
pub mod options;
mod store;
mod tenant;

pub use backend::memory::MemoryBackend;
#[cfg(feature = "postgres")]
pub use backend::postgres::{PgBackend, PgConfig};
pub use backend::{Backend, Row, Table, TxHandle};
pub use entity::Entity;
pub use error::{BackendError, BackendResult};
pub use options::{Clause, CompareOp, Condition, QueryOptions, UNBOUNDED};
pub use store::{ActiveTransaction, Datastore, Store};
pub use tenant::{TenantBinding, TenantExtractor, TenantRegistry};
