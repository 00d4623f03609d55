//! Tenant scoping.

use crate::options::QueryOptions;
use keystone_core::Context;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::warn;

/// Extracts the tenant value from a request context.
pub type TenantExtractor = Arc<dyn Fn(&Context) -> String + Send + Sync>;

/// A scoping key and the function that yields its value for a request.
#[derive(Clone)]
pub struct TenantBinding {
    key: String,
    extractor: TenantExtractor,
}

impl TenantBinding {
    /// The filter key, e.g. `"user_id"`.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Computes the tenant value for `ctx`.
    pub fn value_for(&self, ctx: &Context) -> String {
        (self.extractor)(ctx)
    }
}

impl fmt::Debug for TenantBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantBinding")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Holds the tenant binding for one service instance.
///
/// The binding is set at most once. Privileged callers skip scoping by not
/// calling [`QueryOptions::with_tenant_scope`]; the registry itself has no
/// notion of privilege.
///
/// ```
/// use keystone_core::{Context, Principal};
/// use keystone_store::{QueryOptions, TenantRegistry};
///
/// let tenants = TenantRegistry::new();
/// tenants.register_user_scope("user_id");
///
/// let ctx = Context::new().with_principal(Principal::new("u1", "alice"));
/// let opts = QueryOptions::new().with_tenant_scope(&tenants, &ctx);
/// assert_eq!(opts.filters()["user_id"], "u1");
/// ```
#[derive(Debug, Default)]
pub struct TenantRegistry {
    binding: OnceLock<TenantBinding>,
}

impl TenantRegistry {
    /// Creates a registry with no binding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the binding. Returns `false` and leaves the existing
    /// binding in place if one was already registered.
    pub fn register<F>(&self, key: impl Into<String>, extractor: F) -> bool
    where
        F: Fn(&Context) -> String + Send + Sync + 'static,
    {
        let key = key.into();
        let binding = TenantBinding {
            key: key.clone(),
            extractor: Arc::new(extractor),
        };
        let registered = self.binding.set(binding).is_ok();
        if !registered {
            warn!(key = %key, "tenant binding already registered, ignoring");
        }
        registered
    }

    /// Registers `key` bound to the authenticated user id.
    pub fn register_user_scope(&self, key: impl Into<String>) -> bool {
        self.register(key, |ctx: &Context| ctx.user_id().to_string())
    }

    /// Returns the binding, if registered.
    pub fn binding(&self) -> Option<&TenantBinding> {
        self.binding.get()
    }

    /// Adds the tenant filter to `opts`. No-op when nothing is registered.
    pub fn scope(&self, opts: QueryOptions, ctx: &Context) -> QueryOptions {
        match self.binding.get() {
            Some(binding) => opts.with_filter(binding.key.clone(), binding.value_for(ctx)),
            None => opts,
        }
    }
}
