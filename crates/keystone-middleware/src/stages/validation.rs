//! Validation middleware.
//!
//! Runs the validator registered for the inbound message type. A payload
//! that failed to decode is rejected here, after authentication and
//! authorization have run.

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::registry::MessageRegistry;
use crate::types::{Call, CallResult, Payload};
use keystone_core::{Context, Error};
use std::sync::Arc;
use tracing::debug;

/// Rejects invalid payloads with `ValidationFailure`.
#[derive(Debug)]
pub struct ValidationMiddleware {
    registry: Arc<MessageRegistry>,
}

impl ValidationMiddleware {
    /// Creates the middleware.
    pub fn new(registry: Arc<MessageRegistry>) -> Self {
        Self { registry }
    }
}

impl Middleware for ValidationMiddleware {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context,
        call: Call,
        next: Next<'a>,
    ) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            if let Payload::Malformed(reason) = &call.payload {
                debug!(operation = %call.operation, reason = %reason, "undecodable request body");
                return Err(Error::validation("invalid request body").with_detail(reason.clone()));
            }

            if let Err(error) = self.registry.validate(ctx, &call.payload) {
                debug!(
                    operation = %call.operation,
                    message_type = self.registry.validator_name(&call.payload).unwrap_or_default(),
                    error = %error,
                    "request validation failed"
                );
                return Err(error);
            }

            next.run(ctx, call).await
        })
    }
}
