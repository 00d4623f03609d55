//! Unary RPC adapter.
//!
//! Models a call as a full method name, a metadata map and a typed
//! message. Errors leave the adapter as an [`RpcStatus`] whose code follows
//! the usual RPC status numbering.

use super::{error_metadata, with_reply_request_id};
use crate::chain::Chain;
use crate::handler::{erase, ErasedHandler, Handler};
use crate::types::{Call, Operation, Payload, Reply};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use keystone_core::{Context, Error, ErrorKind};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// RPC status codes used by Keystone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum RpcCode {
    /// Success.
    Ok = 0,
    /// Unclassified failure.
    Unknown = 2,
    /// Invalid request payload.
    InvalidArgument = 3,
    /// Lookup matched nothing.
    NotFound = 5,
    /// Access refused.
    PermissionDenied = 7,
    /// No such method.
    Unimplemented = 12,
    /// Server-side failure.
    Internal = 13,
    /// Missing or invalid credential.
    Unauthenticated = 16,
}

impl RpcCode {
    /// Maps an error kind onto its RPC code.
    #[must_use]
    pub const fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::MissingCredential
            | ErrorKind::TokenInvalid
            | ErrorKind::Unauthenticated
            | ErrorKind::SigningError => Self::Unauthenticated,
            ErrorKind::PermissionDenied => Self::PermissionDenied,
            ErrorKind::ValidationFailure => Self::InvalidArgument,
            ErrorKind::NotFound => Self::NotFound,
            ErrorKind::ReadFailure | ErrorKind::WriteFailure | ErrorKind::Internal => {
                Self::Internal
            }
        }
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Returns the HTTP status a gateway reports for this code.
    #[must_use]
    pub const fn http_status(self) -> StatusCode {
        match self {
            Self::Ok => StatusCode::OK,
            Self::InvalidArgument => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Unknown | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A failed RPC outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcStatus {
    /// Status code.
    pub code: RpcCode,
    /// Machine-readable reason.
    pub reason: String,
    /// Public message.
    pub message: String,
    /// Correlation metadata such as the request id.
    pub metadata: BTreeMap<String, String>,
}

impl RpcStatus {
    /// Builds the status for a Keystone error. The non-public detail is
    /// dropped.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        Self {
            code: RpcCode::from_kind(error.kind()),
            reason: error.reason().to_string(),
            message: error.message().to_string(),
            metadata: error.metadata().clone(),
        }
    }

    fn unimplemented(error: &Error) -> Self {
        Self {
            code: RpcCode::Unimplemented,
            reason: "Unimplemented".to_string(),
            message: error.message().to_string(),
            metadata: error.metadata().clone(),
        }
    }

    /// Returns the request id carried in the status metadata.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.metadata
            .get(keystone_core::REQUEST_ID_METADATA_KEY)
            .map(String::as_str)
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc error: code = {} reason = {} desc = {}", self.code.as_i32(), self.reason, self.message)
    }
}

impl std::error::Error for RpcStatus {}

/// An inbound unary call.
#[derive(Debug)]
pub struct RpcRequest<M> {
    /// Full method name, `/package.Service/Method`.
    pub full_method: String,
    /// Call metadata.
    pub metadata: HeaderMap,
    /// The request message.
    pub message: M,
}

impl<M> RpcRequest<M> {
    /// Creates a request with empty metadata.
    pub fn new(full_method: impl Into<String>, message: M) -> Self {
        Self {
            full_method: full_method.into(),
            metadata: HeaderMap::new(),
            message,
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.metadata.insert(name, value);
        self
    }
}

/// The outcome of a unary call.
#[derive(Debug)]
pub struct RpcResponse<M> {
    /// Header metadata, including `x-request-id`.
    pub metadata: HeaderMap,
    /// The response message or the failure status.
    pub result: Result<M, RpcStatus>,
}

impl<M> RpcResponse<M> {
    /// Returns the status code.
    pub fn code(&self) -> RpcCode {
        match &self.result {
            Ok(_) => RpcCode::Ok,
            Err(status) => status.code,
        }
    }
}

/// Dispatches unary calls to registered handlers through the chain.
///
/// # Example
///
/// ```
/// use keystone_core::{Context, KeystoneResult};
/// use keystone_middleware::stages::RequestIdMiddleware;
/// use keystone_middleware::{Chain, RpcAdapter, RpcCode, RpcRequest};
/// use std::sync::Arc;
///
/// async fn healthz(_ctx: Context, _req: ()) -> KeystoneResult<String> {
///     Ok("ok".to_string())
/// }
///
/// let chain = Arc::new(Chain::builder().request_id(RequestIdMiddleware::new()).build());
/// let rpc = RpcAdapter::new(chain).route("/v1.Keystone/Healthz", healthz);
///
/// let response = tokio_test::block_on(rpc.unary::<(), String>(RpcRequest::new("/v1.Keystone/Healthz", ())));
/// assert_eq!(response.code(), RpcCode::Ok);
/// assert_eq!(response.result.unwrap(), "ok");
/// ```
pub struct RpcAdapter {
    chain: Arc<Chain>,
    methods: HashMap<String, ErasedHandler>,
}

impl RpcAdapter {
    /// Creates an adapter with no methods.
    pub fn new(chain: Arc<Chain>) -> Self {
        Self {
            chain,
            methods: HashMap::new(),
        }
    }

    /// Registers `handler` under `full_method`.
    #[must_use]
    pub fn route<Req, Resp, H>(mut self, full_method: impl Into<String>, handler: H) -> Self
    where
        H: Handler<Req, Resp>,
        Req: Any + Send + Sync,
        Resp: Any + Send + Sync,
    {
        self.methods.insert(full_method.into(), erase(handler));
        self
    }

    /// Returns `true` if `full_method` has a handler.
    #[must_use]
    pub fn has_method(&self, full_method: &str) -> bool {
        self.methods.contains_key(full_method)
    }

    /// Serves one unary call with a fresh context.
    pub async fn unary<Req, Resp>(&self, request: RpcRequest<Req>) -> RpcResponse<Resp>
    where
        Req: Any + Send + Sync,
        Resp: Any,
    {
        self.unary_with_context(Context::new(), request).await
    }

    /// Serves one unary call with a caller-supplied context, for example
    /// one carrying a deadline.
    pub async fn unary_with_context<Req, Resp>(
        &self,
        ctx: Context,
        request: RpcRequest<Req>,
    ) -> RpcResponse<Resp>
    where
        Req: Any + Send + Sync,
        Resp: Any,
    {
        let RpcRequest {
            full_method,
            metadata,
            message,
        } = request;
        let (metadata, result) = self
            .dispatch(ctx, &full_method, metadata, Payload::new(message))
            .await;

        let result = result.and_then(|reply| {
            reply.into_message::<Resp>().map_err(|_| {
                let error = with_reply_request_id(
                    &metadata,
                    Error::internal("unexpected response message type"),
                );
                RpcStatus::from_error(&error)
            })
        });
        RpcResponse { metadata, result }
    }

    pub(crate) fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Runs an already-decoded payload through the chain.
    pub(crate) async fn dispatch(
        &self,
        ctx: Context,
        full_method: &str,
        metadata: HeaderMap,
        payload: Payload,
    ) -> (HeaderMap, Result<Reply, RpcStatus>) {
        let call = Call::new(Operation::rpc(full_method), payload).with_metadata(metadata);
        let Some(handler) = self.methods.get(full_method) else {
            debug!(full_method, "unknown rpc method");
            let error = self
                .chain
                .reject(ctx, call, Error::not_found(format!("unknown method {full_method}")))
                .await;
            return (error_metadata(&error), Err(RpcStatus::unimplemented(&error)));
        };

        let handler = Arc::clone(handler);
        let result = self
            .chain
            .execute(ctx, call, move |ctx, call| handler(ctx.clone(), call.payload))
            .await;

        match result {
            Ok(mut reply) => (std::mem::take(&mut reply.metadata), Ok(reply)),
            Err(error) => (error_metadata(&error), Err(RpcStatus::from_error(&error))),
        }
    }
}

impl fmt::Debug for RpcAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("RpcAdapter")
            .field("chain", &self.chain)
            .field("methods", &methods)
            .finish()
    }
}
