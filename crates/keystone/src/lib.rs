//! # Keystone
//!
//! **Request processing core for RPC and HTTP services**
//!
//! Keystone sits between a service's transports and its business handlers:
//!
//! - **Identity tokens** – signed, time-bound bearer tokens ([`token`])
//! - **Policy authorization** – deny-override rules with role inheritance,
//!   refreshed in the background ([`authz`])
//! - **Generic persistence** – typed CRUD with composable query options and
//!   tenant scoping ([`store`])
//! - **Fixed middleware chain** – request id, authentication, authorization,
//!   defaults and validation, identical across RPC, HTTP and the gateway
//!   ([`middleware`])
//!
//! ## Architecture
//!
//! ```text
//!            KeystoneConfig ──► Keystone::builder() ──► Keystone
//!                                                        │
//!      ┌──────────────┬──────────────┬───────────────────┼──────────────┐
//!      ▼              ▼              ▼                   ▼              ▼
//! TokenService   Authorizer     Whitelist         MessageRegistry   Datastore
//!      │              │              │                   │
//!      └──────────────┴──────┬───────┴───────────────────┘
//!                            ▼
//!   RpcAdapter / HttpAdapter / Gateway ─► Chain ─► handler ─► Store<T>
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keystone::prelude::*;
//! use keystone::{ConfigLoader, Keystone};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new()
//!         .with_optional_file("keystone.toml")?
//!         .with_dotenv()?
//!         .with_env()
//!         .load()?;
//!     Keystone::install_telemetry(&config)?;
//!
//!     let keystone = Keystone::builder(config)
//!         .with_principal_lookup(users)
//!         .build()
//!         .await?;
//!     let rpc = keystone.rpc().route("/v1.Keystone/ListPosts", list_posts);
//!     // hand `rpc` to the server
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/keystone/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod keystone;

pub use error::BuildError;
pub use keystone::{Keystone, KeystoneBuilder};

// Re-export component crates
pub use keystone_authz as authz;
pub use keystone_config as config;
pub use keystone_core as core;
pub use keystone_middleware as middleware;
pub use keystone_store as store;
pub use keystone_telemetry as telemetry;
pub use keystone_token as token;

pub use keystone_config::{ConfigError, ConfigLoader, KeystoneConfig};

/// Prelude module for convenient imports.
///
/// ```
/// use keystone::prelude::*;
/// ```
pub mod prelude {
    pub use keystone_core::{Context, Error, ErrorKind, KeystoneResult, Principal, RequestId};

    pub use keystone_authz::{Enforcer, PolicyRule};

    pub use keystone_middleware::stages::{PrincipalLookup, StaticPrincipalLookup};
    pub use keystone_middleware::{
        Defaults, Gateway, HttpAdapter, MessageRegistry, RpcAdapter, RpcCode, RpcRequest,
        RpcResponse, Validate,
    };

    pub use keystone_store::{Datastore, Entity, QueryOptions, Store, TenantRegistry};

    pub use keystone_token::TokenService;
}
