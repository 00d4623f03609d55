//! Development-only authentication bypass.
//!
//! Trusts the `x-user-id` metadata instead of verifying a token. Never
//! install this in front of untrusted traffic.

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Call, CallResult};
use keystone_core::{Context, Principal};
use tracing::debug;

/// The metadata key carrying the simulated caller id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The caller assumed when no `x-user-id` is sent.
pub const DEFAULT_BYPASS_USER: &str = "user-000001";

/// Replacement for the authentication stage that attaches a principal
/// without checking any credential.
#[derive(Debug, Clone)]
pub struct BypassAuthnMiddleware {
    default_user: String,
}

impl BypassAuthnMiddleware {
    /// Creates the middleware with [`DEFAULT_BYPASS_USER`] as fallback.
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_user: DEFAULT_BYPASS_USER.to_string(),
        }
    }

    /// Sets the fallback caller id.
    #[must_use]
    pub fn with_default_user(mut self, user_id: impl Into<String>) -> Self {
        self.default_user = user_id.into();
        self
    }
}

impl Default for BypassAuthnMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for BypassAuthnMiddleware {
    fn name(&self) -> &'static str {
        "authentication_bypass"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context,
        call: Call,
        next: Next<'a>,
    ) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            let user_id = call
                .metadata_str(USER_ID_HEADER)
                .unwrap_or(&self.default_user)
                .to_string();
            debug!(user_id = %user_id, "simulated authentication successful");

            ctx.set_principal(Principal::new(user_id, ""));
            next.run(ctx, call).await
        })
    }
}
