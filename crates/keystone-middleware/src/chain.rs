//! Fixed-order middleware chain.
//!
//! ## Stages
//!
//! | # | Stage | Rejects with |
//! |---|-------|--------------|
//! | 1 | Request ID | never |
//! | 2 | Authentication | `MissingCredential`, `TokenInvalid`, `Unauthenticated` |
//! | 3 | Authorization | `PermissionDenied` |
//! | 4 | Defaults | never |
//! | 5 | Validation | `ValidationFailure` |
//!
//! Stages are keyed by [`Stage`], so the execution order is the same no
//! matter the order they were registered in. Any stage may be left out.
//! The same `Chain` value is shared by every transport adapter, which is
//! what keeps RPC, HTTP and gateway calls behaving identically.

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Call, CallResult};
use keystone_core::{Context, Error};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info_span, Instrument};

/// A type-erased stage.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Chain position of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Stage {
    /// Stage 1: request id generation or propagation
    RequestId = 1,
    /// Stage 2: credential verification and principal lookup
    Authentication = 2,
    /// Stage 3: policy check
    Authorization = 3,
    /// Stage 4: payload defaulting
    Defaults = 4,
    /// Stage 5: payload validation
    Validation = 5,
}

impl Stage {
    /// Returns the stage name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RequestId => "request_id",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::Defaults => "defaults",
            Self::Validation => "validation",
        }
    }

    /// Returns all stages in execution order.
    #[must_use]
    pub const fn all() -> &'static [Stage] {
        &[
            Self::RequestId,
            Self::Authentication,
            Self::Authorization,
            Self::Defaults,
            Self::Validation,
        ]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The immutable middleware chain.
///
/// # Example
///
/// ```
/// use keystone_core::Context;
/// use keystone_middleware::stages::RequestIdMiddleware;
/// use keystone_middleware::{Call, Chain, Operation, Payload, Reply};
///
/// let chain = Chain::builder()
///     .request_id(RequestIdMiddleware::new())
///     .build();
///
/// let call = Call::new(Operation::rpc("/blog.v1.Blog/Healthz"), Payload::new(()));
/// let reply = tokio_test::block_on(chain.execute(Context::new(), call, |_ctx, _call| {
///     Box::pin(async { Ok(Reply::new("ok")) })
/// }))
/// .unwrap();
/// assert!(reply.metadata.contains_key("x-request-id"));
/// ```
pub struct Chain {
    stages: Vec<(Stage, BoxedMiddleware)>,
}

impl Chain {
    /// Creates a new chain builder.
    #[must_use]
    pub fn builder() -> ChainBuilder {
        ChainBuilder::new()
    }

    /// Runs `call` through every stage and then `handler`.
    ///
    /// The [`Operation`](crate::Operation) is attached to the context as an
    /// extension before the first stage runs, so handlers can read the path
    /// or method name they were invoked for.
    pub async fn execute<H>(&self, ctx: Context, call: Call, handler: H) -> CallResult
    where
        H: FnOnce(&mut Context, Call) -> BoxFuture<'static, CallResult> + Send,
    {
        self.run(ctx, call, None, handler).await
    }

    /// Fails `call` with `error`, running only the request id stage.
    ///
    /// Adapters use this for calls rejected before any handler is chosen,
    /// such as an unknown route or method, so the error carries the same
    /// request id a handler failure would.
    pub async fn reject(&self, ctx: Context, call: Call, error: Error) -> Error {
        let result = self
            .run(ctx, call, Some(Stage::RequestId), move |_ctx, _call| {
                Box::pin(async move { Err(error) })
            })
            .await;
        match result {
            Ok(_) => Error::internal("request id stage replied to a rejected call"),
            Err(error) => error,
        }
    }

    async fn run<H>(
        &self,
        mut ctx: Context,
        call: Call,
        only: Option<Stage>,
        handler: H,
    ) -> CallResult
    where
        H: FnOnce(&mut Context, Call) -> BoxFuture<'static, CallResult> + Send,
    {
        let transport = call.operation.transport().as_str();
        let span = info_span!(
            "keystone.call",
            transport,
            object = %call.operation.object(),
            action = %call.operation.action(),
            request_id = tracing::field::Empty,
        );
        ctx.set_extension(call.operation.clone());

        let next = self.build_chain(only, handler);
        let result = next.run(&mut ctx, call).instrument(span).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(error) => error.reason(),
        };
        metrics::counter!(
            "keystone_requests_total",
            "transport" => transport,
            "outcome" => outcome
        )
        .increment(1);
        debug!(
            transport,
            request_id = ctx.request_id().map(|id| id.as_str()).unwrap_or_default(),
            outcome,
            "call finished"
        );

        result
    }

    fn build_chain<'a, H>(&'a self, only: Option<Stage>, handler: H) -> Next<'a>
    where
        H: FnOnce(&mut Context, Call) -> BoxFuture<'static, CallResult> + Send + 'a,
    {
        self.stages
            .iter()
            .filter(|(stage, _)| only.map_or(true, |only| only == *stage))
            .rev()
            .fold(Next::handler(handler), |next, (_, middleware)| {
                Next::new(middleware.as_ref(), next)
            })
    }

    /// Returns the installed stages in execution order.
    #[must_use]
    pub fn stages(&self) -> Vec<Stage> {
        self.stages.iter().map(|(stage, _)| *stage).collect()
    }

    /// Returns the names of the installed stages in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|(_, mw)| mw.name()).collect()
    }

    /// Returns the number of installed stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Builder for a [`Chain`].
///
/// Each setter fills one fixed slot; setting a slot twice replaces the
/// earlier middleware.
#[derive(Default)]
pub struct ChainBuilder {
    stages: BTreeMap<Stage, BoxedMiddleware>,
}

impl ChainBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `middleware` at `stage`.
    #[must_use]
    pub fn stage(mut self, stage: Stage, middleware: BoxedMiddleware) -> Self {
        self.stages.insert(stage, middleware);
        self
    }

    /// Installs the request-id stage.
    #[must_use]
    pub fn request_id<M: Middleware>(self, middleware: M) -> Self {
        self.stage(Stage::RequestId, Arc::new(middleware))
    }

    /// Installs the authentication stage.
    #[must_use]
    pub fn authentication<M: Middleware>(self, middleware: M) -> Self {
        self.stage(Stage::Authentication, Arc::new(middleware))
    }

    /// Installs the authorization stage.
    #[must_use]
    pub fn authorization<M: Middleware>(self, middleware: M) -> Self {
        self.stage(Stage::Authorization, Arc::new(middleware))
    }

    /// Installs the defaults stage.
    #[must_use]
    pub fn defaults<M: Middleware>(self, middleware: M) -> Self {
        self.stage(Stage::Defaults, Arc::new(middleware))
    }

    /// Installs the validation stage.
    #[must_use]
    pub fn validation<M: Middleware>(self, middleware: M) -> Self {
        self.stage(Stage::Validation, Arc::new(middleware))
    }

    /// Builds the chain.
    #[must_use]
    pub fn build(self) -> Chain {
        Chain {
            stages: self.stages.into_iter().collect(),
        }
    }
}
