//! Business handler abstraction.
//!
//! A handler is any `Fn(Context, Req) -> impl Future<Output =
//! KeystoneResult<Resp>>`. Adapters erase `Req` and `Resp` so handlers of
//! different types can share one routing table.

use crate::middleware::BoxFuture;
use crate::types::{CallResult, Payload, Reply};
use keystone_core::{Context, Error, KeystoneResult};
use std::any::{type_name, Any};
use std::future::Future;
use std::sync::Arc;

/// A business handler invoked after every stage has passed.
pub trait Handler<Req, Resp>: Send + Sync + 'static {
    /// Handles one request.
    fn call(&self, ctx: Context, request: Req) -> BoxFuture<'static, KeystoneResult<Resp>>;
}

impl<F, Fut, Req, Resp> Handler<Req, Resp> for F
where
    F: Fn(Context, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = KeystoneResult<Resp>> + Send + 'static,
{
    fn call(&self, ctx: Context, request: Req) -> BoxFuture<'static, KeystoneResult<Resp>> {
        Box::pin(self(ctx, request))
    }
}

/// A handler with its message types erased.
pub(crate) type ErasedHandler =
    Arc<dyn Fn(Context, Payload) -> BoxFuture<'static, CallResult> + Send + Sync>;

pub(crate) fn erase<Req, Resp, H>(handler: H) -> ErasedHandler
where
    H: Handler<Req, Resp>,
    Req: Any + Send + Sync,
    Resp: Any + Send + Sync,
{
    Arc::new(
        move |ctx: Context, payload: Payload| -> BoxFuture<'static, CallResult> {
            match payload.into_message::<Req>() {
                Ok(request) => {
                    let response = handler.call(ctx, request);
                    Box::pin(async move { response.await.map(Reply::new) })
                }
                Err(Payload::Malformed(reason)) => Box::pin(std::future::ready(Err(
                    Error::validation("invalid request body").with_detail(reason),
                ))),
                Err(Payload::Message(_)) => Box::pin(std::future::ready(Err(Error::internal(
                    "unexpected request message type",
                )
                .with_detail(type_name::<Req>())))),
            }
        },
    )
}
