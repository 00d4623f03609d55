//! JSON-over-HTTP adapter.
//!
//! Routes are matched by method and path pattern (`/posts`, `/posts/*`).
//! The body is decoded before the chain runs, but a decode failure is
//! carried as a malformed payload so authentication and authorization still
//! decide first. Errors are rendered as the JSON error envelope with the
//! status from the error kind.

use super::{
    decode_json, encode_json, encode_reply, error_response, json_response, read_body, DecodeFn,
    EncodeFn,
};
use crate::chain::Chain;
use crate::handler::{erase, ErasedHandler, Handler};
use crate::types::{Call, Operation, Payload};
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use keystone_authz::Matcher;
use keystone_core::{Context, Error};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// The request and response body type.
pub type HttpBody = Full<Bytes>;

struct Route {
    method: Method,
    path: Matcher,
    decode: DecodeFn,
    encode: EncodeFn,
    handler: ErasedHandler,
}

/// Serves JSON HTTP requests through the chain.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use http::{Method, Request, StatusCode};
/// use http_body_util::Full;
/// use keystone_core::{Context, KeystoneResult};
/// use keystone_middleware::{Chain, HttpAdapter};
/// use std::sync::Arc;
///
/// async fn healthz(_ctx: Context, _req: ()) -> KeystoneResult<&'static str> {
///     Ok("ok")
/// }
///
/// let http = HttpAdapter::new(Arc::new(Chain::builder().build()))
///     .route(Method::GET, "/healthz", healthz);
///
/// let request = Request::get("/healthz").body(Full::new(Bytes::new())).unwrap();
/// let response = tokio_test::block_on(http.handle(request));
/// assert_eq!(response.status(), StatusCode::OK);
/// ```
pub struct HttpAdapter {
    chain: Arc<Chain>,
    routes: Vec<Route>,
}

impl HttpAdapter {
    /// Creates an adapter with no routes.
    pub fn new(chain: Arc<Chain>) -> Self {
        Self {
            chain,
            routes: Vec::new(),
        }
    }

    /// Registers `handler` for `method` on paths matching `path`.
    ///
    /// Routes are tried in registration order.
    #[must_use]
    pub fn route<Req, Resp, H>(mut self, method: Method, path: &str, handler: H) -> Self
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Any + Send + Sync,
        Resp: Serialize + Any + Send + Sync,
    {
        self.routes.push(Route {
            method,
            path: Matcher::parse(path),
            decode: decode_json::<Req>,
            encode: encode_json::<Resp>,
            handler: erase(handler),
        });
        self
    }

    /// Serves one request with a fresh context.
    pub async fn handle(&self, request: Request<HttpBody>) -> Response<HttpBody> {
        self.handle_with_context(Context::new(), request).await
    }

    /// Serves one request with a caller-supplied context.
    pub async fn handle_with_context(
        &self,
        ctx: Context,
        request: Request<HttpBody>,
    ) -> Response<HttpBody> {
        let (parts, body) = request.into_parts();
        let path = parts.uri.path().to_string();

        let Some(route) = self
            .routes
            .iter()
            .find(|route| route.method == parts.method && route.path.matches(&path))
        else {
            let error = Error::not_found(format!("no route for {} {path}", parts.method));
            let call = Call::new(Operation::http(parts.method, path), Payload::new(()))
                .with_metadata(parts.headers);
            return error_response(&self.chain.reject(ctx, call, error).await);
        };

        let payload = (route.decode)(&read_body(body).await);
        let call = Call::new(Operation::http(parts.method, path), payload)
            .with_metadata(parts.headers);
        let handler = Arc::clone(&route.handler);

        let result = self
            .chain
            .execute(ctx, call, move |ctx, call| handler(ctx.clone(), call.payload))
            .await
            .and_then(|reply| encode_reply(route.encode, reply));

        match result {
            Ok((metadata, body)) => json_response(StatusCode::OK, metadata, body),
            Err(error) => error_response(&error),
        }
    }
}

impl fmt::Debug for HttpAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let routes: Vec<_> = self
            .routes
            .iter()
            .map(|route| format!("{} {}", route.method, route.path))
            .collect();
        f.debug_struct("HttpAdapter")
            .field("chain", &self.chain)
            .field("routes", &routes)
            .finish()
    }
}
