//! Defaulting middleware.

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::registry::MessageRegistry;
use crate::types::{Call, CallResult};
use keystone_core::Context;
use std::sync::Arc;
use tracing::trace;

/// Applies registered [`Defaults`](crate::Defaults) to the inbound message.
#[derive(Debug)]
pub struct DefaultsMiddleware {
    registry: Arc<MessageRegistry>,
}

impl DefaultsMiddleware {
    /// Creates the middleware.
    pub fn new(registry: Arc<MessageRegistry>) -> Self {
        Self { registry }
    }
}

impl Middleware for DefaultsMiddleware {
    fn name(&self) -> &'static str {
        "defaults"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context,
        mut call: Call,
        next: Next<'a>,
    ) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            if self.registry.apply_defaults(&mut call.payload) {
                trace!(operation = %call.operation, "request defaults applied");
            }
            next.run(ctx, call).await
        })
    }
}
