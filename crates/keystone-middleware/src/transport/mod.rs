//! Transport adapters.
//!
//! | Adapter | Operation name | Action | Payload |
//! |---------|----------------|--------|---------|
//! | [`RpcAdapter`] | full method | `CALL` | typed message |
//! | [`HttpAdapter`] | request path | HTTP method | JSON body |
//! | [`Gateway`] | full method (via route table) | `CALL` | JSON body |
//!
//! All three drive the same [`Chain`](crate::Chain).

pub mod gateway;
pub mod http;
pub mod rpc;

pub use gateway::Gateway;
pub use http::{HttpAdapter, HttpBody};
pub use rpc::{RpcAdapter, RpcCode, RpcRequest, RpcResponse, RpcStatus};

use crate::stages::REQUEST_ID_HEADER;
use crate::types::{Payload, Reply};
use ::http::header::{HeaderValue, CONTENT_TYPE};
use ::http::{HeaderMap, Response, StatusCode};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use keystone_core::{Error, ErrorEnvelope};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use tracing::error;

type DecodeFn = fn(&[u8]) -> Payload;
type EncodeFn = fn(Reply) -> Result<(HeaderMap, Bytes), Error>;

/// Decodes a JSON body. An empty body decodes as `{}` or, failing that,
/// as `null`, so unit and all-default request types need no body.
fn decode_json<Req>(body: &[u8]) -> Payload
where
    Req: DeserializeOwned + Any + Send + Sync,
{
    let decoded = if body.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_slice::<Req>(b"{}").or_else(|_| serde_json::from_slice::<Req>(b"null"))
    } else {
        serde_json::from_slice::<Req>(body)
    };
    match decoded {
        Ok(message) => Payload::new(message),
        Err(err) => Payload::Malformed(err.to_string()),
    }
}

fn encode_json<Resp>(reply: Reply) -> Result<(HeaderMap, Bytes), Error>
where
    Resp: Serialize + Any,
{
    let metadata = reply.metadata.clone();
    let message = reply
        .into_message::<Resp>()
        .map_err(|_| Error::internal("unexpected response message type"))?;
    let body = serde_json::to_vec(&message)
        .map_err(|err| Error::internal("failed to encode response").with_source(err))?;
    Ok((metadata, Bytes::from(body)))
}

async fn read_body(body: Full<Bytes>) -> Bytes {
    match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    }
}

fn json_response(status: StatusCode, metadata: HeaderMap, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    *response.headers_mut() = metadata;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn envelope_response(status: StatusCode, envelope: &ErrorEnvelope) -> Response<Full<Bytes>> {
    let mut metadata = HeaderMap::new();
    if let Some(value) = envelope
        .metadata
        .get(keystone_core::REQUEST_ID_METADATA_KEY)
        .and_then(|id| HeaderValue::from_str(id).ok())
    {
        metadata.insert(REQUEST_ID_HEADER, value);
    }
    let body = serde_json::to_vec(envelope).unwrap_or_else(|err| {
        error!(error = %err, "failed to encode error envelope");
        br#"{"code":500,"reason":"InternalError","message":"internal error"}"#.to_vec()
    });
    json_response(status, metadata, Bytes::from(body))
}

fn error_response(error: &Error) -> Response<Full<Bytes>> {
    if !error.kind().is_client_error() {
        error!(
            reason = error.reason(),
            request_id = error.request_id().unwrap_or_default(),
            error = ?error,
            "request failed"
        );
    }
    envelope_response(error.status_code(), &error.to_envelope())
}

/// Stamps `error` with the request id a successful chain run left in the
/// reply metadata. Used for failures after the chain, such as encoding.
fn with_reply_request_id(metadata: &HeaderMap, error: Error) -> Error {
    match metadata
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        Some(id) => error.with_request_id(id),
        None => error,
    }
}

/// Encodes `reply` with `encode`, keeping the request id on failure.
fn encode_reply(encode: EncodeFn, reply: Reply) -> Result<(HeaderMap, Bytes), Error> {
    let metadata = reply.metadata.clone();
    encode(reply).map_err(|error| with_reply_request_id(&metadata, error))
}

/// Copies the request id into outbound metadata for errors.
fn error_metadata(error: &Error) -> HeaderMap {
    let mut metadata = HeaderMap::new();
    if let Some(value) = error
        .request_id()
        .and_then(|id| HeaderValue::from_str(id).ok())
    {
        metadata.insert(REQUEST_ID_HEADER, value);
    }
    metadata
}
