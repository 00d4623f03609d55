//! Core middleware trait and types.
//!
//! This module defines the [`Middleware`] trait that every chain stage
//! implements. A stage receives the request [`Context`], the [`Call`], and a
//! [`Next`] continuation. It either forwards the call by running `next` or
//! short-circuits by returning an error.
//!
//! # Example
//!
//! ```
//! use keystone_core::Context;
//! use keystone_middleware::{BoxFuture, Call, CallResult, Middleware, Next};
//!
//! struct Audit;
//!
//! impl Middleware for Audit {
//!     fn name(&self) -> &'static str {
//!         "audit"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         ctx: &'a mut Context,
//!         call: Call,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, CallResult> {
//!         Box::pin(async move {
//!             tracing::info!(operation = %call.operation, "audit");
//!             next.run(ctx, call).await
//!         })
//!     }
//! }
//! ```

use crate::types::{Call, CallResult};
use keystone_core::Context;
use std::future::Future;
use std::pin::Pin;

/// A boxed future that returns a value of type `T`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A chain stage.
///
/// # Invariants
///
/// - A stage calls `next.run()` at most once
/// - A stage that rejects the call returns `Err` without calling `next`
/// - A stage never swallows an error returned by downstream stages
pub trait Middleware: Send + Sync + 'static {
    /// Returns the stage name used in logs.
    fn name(&self) -> &'static str;

    /// Processes the call.
    fn process<'a>(
        &'a self,
        ctx: &'a mut Context,
        call: Call,
        next: Next<'a>,
    ) -> BoxFuture<'a, CallResult>;
}

/// Continuation that invokes the rest of the chain.
///
/// Consumed by [`Next::run`], so it can only be invoked once.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    Chain {
        middleware: &'a dyn Middleware,
        next: Box<Next<'a>>,
    },
    Handler(Box<dyn FnOnce(&mut Context, Call) -> BoxFuture<'static, CallResult> + Send + 'a>),
}

impl<'a> Next<'a> {
    /// Creates a `Next` that will invoke `middleware` and then `next`.
    pub(crate) fn new(middleware: &'a dyn Middleware, next: Next<'a>) -> Self {
        Self {
            inner: NextInner::Chain {
                middleware,
                next: Box::new(next),
            },
        }
    }

    /// Creates a terminal `Next` that invokes the business handler.
    pub(crate) fn handler<F>(f: F) -> Self
    where
        F: FnOnce(&mut Context, Call) -> BoxFuture<'static, CallResult> + Send + 'a,
    {
        Self {
            inner: NextInner::Handler(Box::new(f)),
        }
    }

    /// Invokes the next stage or the handler.
    pub async fn run(self, ctx: &mut Context, call: Call) -> CallResult {
        match self.inner {
            NextInner::Chain { middleware, next } => middleware.process(ctx, call, *next).await,
            NextInner::Handler(handler) => handler(ctx, call).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Operation, Payload, Reply};
    use keystone_core::Error;

    struct Tag(&'static str);

    impl Middleware for Tag {
        fn name(&self) -> &'static str {
            self.0
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut Context,
            call: Call,
            next: Next<'a>,
        ) -> BoxFuture<'a, CallResult> {
            Box::pin(async move {
                ctx.set_extension(self.0);
                next.run(ctx, call).await
            })
        }
    }

    struct Reject;

    impl Middleware for Reject {
        fn name(&self) -> &'static str {
            "reject"
        }

        fn process<'a>(
            &'a self,
            _ctx: &'a mut Context,
            _call: Call,
            _next: Next<'a>,
        ) -> BoxFuture<'a, CallResult> {
            Box::pin(async { Err(Error::permission_denied()) })
        }
    }

    fn call() -> Call {
        Call::new(Operation::rpc("/a.B/C"), Payload::new(()))
    }

    #[tokio::test]
    async fn test_next_reaches_handler_with_stage_state() {
        let tag = Tag("tagged");
        let next = Next::new(
            &tag,
            Next::handler(|ctx, _call| {
                let seen = ctx.extension::<&'static str>().copied();
                Box::pin(async move { Ok(Reply::new(seen)) })
            }),
        );

        let mut ctx = Context::new();
        let reply = next.run(&mut ctx, call()).await.unwrap();
        assert_eq!(
            reply.into_message::<Option<&'static str>>().unwrap(),
            Some("tagged")
        );
    }

    #[tokio::test]
    async fn test_short_circuit_skips_handler() {
        let reject = Reject;
        let next = Next::new(
            &reject,
            Next::handler(|_ctx, _call| {
                Box::pin(async { Err(Error::internal("handler must not run")) })
            }),
        );

        let err = next.run(&mut Context::new(), call()).await.unwrap_err();
        assert_eq!(err.reason(), "PermissionDenied");
    }
}
