//! # Keystone Middleware
//!
//! The fixed-order request chain every Keystone transport runs before a
//! business handler, plus the adapters that lower RPC, HTTP and gateway
//! traffic onto it.
//!
//! ## Request flow
//!
//! ```text
//!  RpcAdapter ─┐
//!  HttpAdapter ┼─► Call ─► request_id ─► authn ─► authz ─► defaults ─► validation ─► handler
//!  Gateway ────┘                  │          │        │                     │
//!                                 └──────────┴────────┴─────────────────────┴─► Err + request id
//! ```
//!
//! Each stage either forwards the [`Call`] or short-circuits with a
//! [`keystone_core::Error`]. The request-id stage wraps everything after
//! it, so any error leaving the chain carries the originating request id.
//!
//! ## Example
//!
//! ```
//! use keystone_authz::{Authorizer, PolicyRule};
//! use keystone_core::{Context, KeystoneResult, Principal};
//! use keystone_middleware::stages::*;
//! use keystone_middleware::{Chain, MessageRegistry, RpcAdapter, RpcCode, RpcRequest, Whitelist};
//! use keystone_token::{TokenConfig, TokenService};
//! use std::sync::Arc;
//!
//! async fn list_posts(ctx: Context, _req: ()) -> KeystoneResult<String> {
//!     Ok(format!("posts of {}", ctx.user_id()))
//! }
//!
//! let tokens = Arc::new(TokenService::new(TokenConfig::new("Rtg8BPKNEf2mB4mg")));
//! let whitelist = Arc::new(Whitelist::default());
//! let registry = Arc::new(MessageRegistry::new());
//! let authorizer = Arc::new(Authorizer::with_rules([PolicyRule::grant(
//!     "user-1",
//!     "/v1.Keystone/ListPosts",
//!     "CALL",
//! )]));
//! let users = StaticPrincipalLookup::new().with(Principal::new("user-1", "alice"));
//!
//! let chain = Chain::builder()
//!     .request_id(RequestIdMiddleware::new())
//!     .authentication(AuthnMiddleware::new(tokens.clone(), Arc::new(users), whitelist.clone()))
//!     .authorization(AuthzMiddleware::new(authorizer, whitelist))
//!     .defaults(DefaultsMiddleware::new(registry.clone()))
//!     .validation(ValidationMiddleware::new(registry))
//!     .build();
//! let rpc = RpcAdapter::new(Arc::new(chain)).route("/v1.Keystone/ListPosts", list_posts);
//!
//! let token = tokens.issue("user-1").unwrap().token;
//! let request = RpcRequest::new("/v1.Keystone/ListPosts", ()).with_metadata(
//!     http::header::AUTHORIZATION,
//!     format!("Bearer {token}").parse().unwrap(),
//! );
//! let response = tokio_test::block_on(rpc.unary::<(), String>(request));
//! assert_eq!(response.result.unwrap(), "posts of user-1");
//! ```

#![doc(html_root_url = "https://docs.rs/keystone-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod chain;
pub mod fields;
mod handler;
mod middleware;
mod registry;
pub mod stages;
pub mod transport;
mod types;
mod whitelist;

pub use chain::{BoxedMiddleware, Chain, ChainBuilder, Stage};
pub use handler::Handler;
pub use middleware::{BoxFuture, Middleware, Next};
pub use registry::{Defaults, MessageRegistry, Validate};
pub use transport::{
    Gateway, HttpAdapter, HttpBody, RpcAdapter, RpcCode, RpcRequest, RpcResponse, RpcStatus,
};
pub use types::{AnyMessage, Call, CallResult, Operation, Payload, Reply, Transport, RPC_ACTION};
pub use whitelist::{Whitelist, DEFAULT_WHITELIST};
