//! Request ID middleware.
//!
//! Every call gets an id that shows up in logs, in the reply metadata and
//! in the metadata of any error the chain returns.
//!
//! ## Sources
//!
//! 1. **`x-request-id` metadata**: used verbatim when present and trusted
//! 2. **Generated UUID v7**: otherwise

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Call, CallResult};
use http::HeaderValue;
use keystone_core::{Context, RequestId};
use tracing::Span;

/// The metadata key for request id propagation.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Middleware that reads or generates request ids.
///
/// # Behavior
///
/// 1. Read `x-request-id` (when trusted)
/// 2. Generate a UUID v7 if absent
/// 3. Store the id in the [`Context`]
/// 4. Add the id to the reply metadata, or to the error metadata when a
///    later stage or the handler fails
#[derive(Debug, Clone)]
pub struct RequestIdMiddleware {
    trust_incoming: bool,
}

impl RequestIdMiddleware {
    /// Creates a middleware that accepts inbound ids.
    #[must_use]
    pub fn new() -> Self {
        Self {
            trust_incoming: true,
        }
    }

    /// Creates a middleware that always generates a fresh id.
    #[must_use]
    pub fn generate_only() -> Self {
        Self {
            trust_incoming: false,
        }
    }

    /// Sets whether inbound ids are accepted.
    #[must_use]
    pub fn with_trust_incoming(mut self, trust: bool) -> Self {
        self.trust_incoming = trust;
        self
    }

    fn extract_request_id(&self, call: &Call) -> Option<RequestId> {
        if !self.trust_incoming {
            return None;
        }
        call.metadata_str(REQUEST_ID_HEADER)
            .map(RequestId::from_string)
    }
}

impl Default for RequestIdMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for RequestIdMiddleware {
    fn name(&self) -> &'static str {
        "request_id"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context,
        call: Call,
        next: Next<'a>,
    ) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            let request_id = self
                .extract_request_id(&call)
                .unwrap_or_else(RequestId::new);
            Span::current().record("request_id", request_id.as_str());
            ctx.set_request_id(request_id.clone());

            match next.run(ctx, call).await {
                Ok(mut reply) => {
                    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
                        reply.metadata.insert(REQUEST_ID_HEADER, value);
                    }
                    Ok(reply)
                }
                Err(error) => Err(error.with_request_id(request_id.as_str())),
            }
        })
    }
}
