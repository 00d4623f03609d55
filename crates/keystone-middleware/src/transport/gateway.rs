//! HTTP-to-RPC gateway.
//!
//! Maps an HTTP request onto an RPC full method through a route table and
//! dispatches it through an [`RpcAdapter`]. Only `authorization` and
//! `x-request-id` cross over as RPC metadata. The RPC status comes back as
//! an HTTP status with the JSON error envelope.
//!
//! Calls entering through the gateway are authorized as RPC calls: the
//! object is the full method and the action is `CALL`.

use super::http::HttpBody;
use super::rpc::{RpcAdapter, RpcStatus};
use super::{
    decode_json, encode_json, encode_reply, envelope_response, error_response, json_response,
    read_body, DecodeFn, EncodeFn,
};
use crate::stages::REQUEST_ID_HEADER;
use crate::types::{Call, Operation, Payload};
use http::header::HeaderName;
use http::{HeaderMap, Method, Request, Response, StatusCode};
use keystone_authz::Matcher;
use keystone_core::{Context, Error, ErrorEnvelope};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Metadata keys forwarded from HTTP headers to the RPC call.
pub const FORWARDED_HEADERS: &[&str] = &["authorization", REQUEST_ID_HEADER];

struct GatewayRoute {
    method: Method,
    path: Matcher,
    full_method: String,
    decode: DecodeFn,
    encode: EncodeFn,
}

/// Translates HTTP requests into RPC calls.
pub struct Gateway {
    rpc: Arc<RpcAdapter>,
    routes: Vec<GatewayRoute>,
}

impl Gateway {
    /// Creates a gateway in front of `rpc`.
    pub fn new(rpc: Arc<RpcAdapter>) -> Self {
        Self {
            rpc,
            routes: Vec::new(),
        }
    }

    /// Maps `method` on paths matching `path` to `full_method`, decoding the
    /// body as `Req` and encoding the reply as `Resp`.
    #[must_use]
    pub fn route<Req, Resp>(
        mut self,
        method: Method,
        path: &str,
        full_method: impl Into<String>,
    ) -> Self
    where
        Req: DeserializeOwned + Any + Send + Sync,
        Resp: Serialize + Any,
    {
        self.routes.push(GatewayRoute {
            method,
            path: Matcher::parse(path),
            full_method: full_method.into(),
            decode: decode_json::<Req>,
            encode: encode_json::<Resp>,
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
        let path = parts.uri.path();

        let Some(route) = self
            .routes
            .iter()
            .find(|route| route.method == parts.method && route.path.matches(path))
        else {
            let error = Error::not_found(format!("no route for {} {path}", parts.method));
            let call = Call::new(Operation::http(parts.method.clone(), path), Payload::new(()))
                .with_metadata(forwarded(&parts.headers));
            return error_response(&self.rpc.chain().reject(ctx, call, error).await);
        };
        debug!(path, full_method = %route.full_method, "gateway dispatch");

        let payload = (route.decode)(&read_body(body).await);
        let (metadata, result) = self
            .rpc
            .dispatch(ctx, &route.full_method, forwarded(&parts.headers), payload)
            .await;

        match result.map(|mut reply| {
            reply.metadata = metadata;
            reply
        }) {
            Ok(reply) => match encode_reply(route.encode, reply) {
                Ok((metadata, body)) => json_response(StatusCode::OK, metadata, body),
                Err(error) => error_response(&error),
            },
            Err(status) => status_response(&status),
        }
    }
}

fn forwarded(headers: &HeaderMap) -> HeaderMap {
    let mut metadata = HeaderMap::new();
    for name in FORWARDED_HEADERS {
        if let Some(value) = headers.get(*name) {
            metadata.insert(HeaderName::from_static(name), value.clone());
        }
    }
    metadata
}

fn status_response(status: &RpcStatus) -> Response<HttpBody> {
    let http_status = status.code.http_status();
    let envelope = ErrorEnvelope {
        code: http_status.as_u16(),
        reason: status.reason.clone(),
        message: status.message.clone(),
        metadata: status.metadata.clone(),
        fields: None,
    };
    envelope_response(http_status, &envelope)
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let routes: Vec<_> = self
            .routes
            .iter()
            .map(|route| format!("{} {} -> {}", route.method, route.path, route.full_method))
            .collect();
        f.debug_struct("Gateway")
            .field("rpc", &self.rpc)
            .field("routes", &routes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::stages::RequestIdMiddleware;
    use bytes::Bytes;
    use http::header::AUTHORIZATION;
    use http::HeaderValue;
    use http_body_util::{BodyExt, Full};
    use keystone_core::KeystoneResult;
    use std::collections::BTreeMap;

    async fn whoami(ctx: Context, _req: ()) -> KeystoneResult<String> {
        Ok(ctx
            .extension::<crate::Operation>()
            .map(|op| format!("{} {}", op.action(), op.name()))
            .unwrap_or_default())
    }

    async fn tag_counts(_ctx: Context, _req: ()) -> KeystoneResult<BTreeMap<Vec<u8>, u8>> {
        Ok(BTreeMap::from([(b"rust".to_vec(), 3)]))
    }

    async fn missing(_ctx: Context, _req: ()) -> KeystoneResult<String> {
        Err(Error::not_found("post not found"))
    }

    fn gateway() -> Gateway {
        let chain = Arc::new(Chain::builder().request_id(RequestIdMiddleware::new()).build());
        let rpc = RpcAdapter::new(chain)
            .route("/v1.Keystone/WhoAmI", whoami)
            .route("/v1.Keystone/GetPost", missing)
            .route("/v1.Keystone/TagCounts", tag_counts);
        Gateway::new(Arc::new(rpc))
            .route::<(), String>(Method::GET, "/v1/whoami", "/v1.Keystone/WhoAmI")
            .route::<(), String>(Method::GET, "/v1/posts/*", "/v1.Keystone/GetPost")
            .route::<(), BTreeMap<Vec<u8>, u8>>(
                Method::GET,
                "/v1/tags",
                "/v1.Keystone/TagCounts",
            )
    }

    fn get(uri: &str) -> Request<HttpBody> {
        Request::get(uri)
            .header(REQUEST_ID_HEADER, HeaderValue::from_static("gw-1"))
            .header("x-forwarded-for", HeaderValue::from_static("10.0.0.1"))
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_dispatches_as_rpc_call() {
        let response = gateway().handle(get("/v1/whoami")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "gw-1");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text: String = serde_json::from_slice(&body).unwrap();
        assert_eq!(text, "CALL /v1.Keystone/WhoAmI");
    }

    #[tokio::test]
    async fn test_status_maps_to_http() {
        let response = gateway().handle(get("/v1/posts/post-1")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "gw-1");
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let response = gateway().handle(get("/v1/nothing")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "gw-1");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["reason"], "NotFound");
        assert_eq!(envelope["metadata"]["X-Request-ID"], "gw-1");
    }

    #[tokio::test]
    async fn test_encode_failure_carries_request_id() {
        let response = gateway().handle(get("/v1/tags")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "gw-1");
    }

    #[test]
    fn test_only_credential_and_request_id_are_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        let metadata = forwarded(&headers);
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[AUTHORIZATION], "Bearer t");
    }
}
