//! Transport-neutral call and reply types.
//!
//! Every transport adapter lowers its native request into a [`Call`] before
//! entering the chain, so the five stages never see transport-specific
//! types. Metadata is an [`http::HeaderMap`] for both transports: RPC
//! metadata keys are lowercase ASCII just like HTTP header names.

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use keystone_core::Error;
use std::any::{Any, TypeId};
use std::fmt;

/// A type-erased request or response message.
pub type AnyMessage = Box<dyn Any + Send + Sync>;

/// Result of running a call through the chain.
pub type CallResult = Result<Reply, Error>;

/// The action reported to the authorizer for every RPC call.
pub const RPC_ACTION: &str = "CALL";

/// The transport a call arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Unary RPC.
    Rpc,
    /// JSON over HTTP.
    Http,
}

impl Transport {
    /// Returns the label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rpc => "rpc",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operation a call targets.
///
/// For RPC the name is the full method (`/pkg.Service/Method`) and the
/// action is always `CALL`. For HTTP the name is the request path and the
/// action is the HTTP method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    transport: Transport,
    name: String,
    method: Method,
}

impl Operation {
    /// An RPC operation identified by its full method name.
    #[must_use]
    pub fn rpc(full_method: impl Into<String>) -> Self {
        Self {
            transport: Transport::Rpc,
            name: full_method.into(),
            method: Method::POST,
        }
    }

    /// An HTTP operation identified by method and path.
    #[must_use]
    pub fn http(method: Method, path: impl Into<String>) -> Self {
        Self {
            transport: Transport::Http,
            name: path.into(),
            method,
        }
    }

    /// Returns the transport.
    #[must_use]
    pub const fn transport(&self) -> Transport {
        self.transport
    }

    /// Returns the full method name or the path.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the authorization object for this operation.
    #[must_use]
    pub fn object(&self) -> &str {
        &self.name
    }

    /// Returns the authorization action for this operation.
    #[must_use]
    pub fn action(&self) -> &str {
        match self.transport {
            Transport::Rpc => RPC_ACTION,
            Transport::Http => self.method.as_str(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action(), self.name)
    }
}

/// The inbound message of a call.
///
/// HTTP bodies that fail to decode become [`Payload::Malformed`] instead of
/// failing early, so authentication and authorization still run first.
pub enum Payload {
    /// A decoded request message.
    Message(AnyMessage),
    /// A body that could not be decoded, with the decoder's reason.
    Malformed(String),
}

impl Payload {
    /// Wraps a decoded message.
    #[must_use]
    pub fn new<M: Any + Send + Sync>(message: M) -> Self {
        Self::Message(Box::new(message))
    }

    /// Returns the runtime type of the message, if decoded.
    #[must_use]
    pub fn message_type(&self) -> Option<TypeId> {
        match self {
            Self::Message(message) => Some((**message).type_id()),
            Self::Malformed(_) => None,
        }
    }

    /// Borrows the message as `M`.
    #[must_use]
    pub fn downcast_ref<M: Any>(&self) -> Option<&M> {
        match self {
            Self::Message(message) => message.downcast_ref::<M>(),
            Self::Malformed(_) => None,
        }
    }

    /// Mutably borrows the message as `M`.
    pub fn downcast_mut<M: Any>(&mut self) -> Option<&mut M> {
        match self {
            Self::Message(message) => message.downcast_mut::<M>(),
            Self::Malformed(_) => None,
        }
    }

    /// Takes the message out as `M`.
    pub fn into_message<M: Any>(self) -> Result<M, Self> {
        match self {
            Self::Message(message) => message
                .downcast::<M>()
                .map(|boxed| *boxed)
                .map_err(Self::Message),
            malformed @ Self::Malformed(_) => Err(malformed),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(_) => f.write_str("Payload::Message(..)"),
            Self::Malformed(reason) => f.debug_tuple("Payload::Malformed").field(reason).finish(),
        }
    }
}

/// A call travelling through the chain.
#[derive(Debug)]
pub struct Call {
    /// The target operation.
    pub operation: Operation,
    /// Inbound headers or RPC metadata.
    pub metadata: HeaderMap,
    /// The request message.
    pub payload: Payload,
}

impl Call {
    /// Creates a call with empty metadata.
    #[must_use]
    pub fn new(operation: Operation, payload: Payload) -> Self {
        Self {
            operation,
            metadata: HeaderMap::new(),
            payload,
        }
    }

    /// Replaces the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: HeaderMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// Adds one metadata entry.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.metadata.insert(name, value);
        self
    }

    /// Returns a metadata value as text, ignoring empty and non-ASCII values.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// The outcome of a successful call.
pub struct Reply {
    /// Outbound headers or RPC metadata.
    pub metadata: HeaderMap,
    message: AnyMessage,
}

impl Reply {
    /// Wraps a response message.
    #[must_use]
    pub fn new<M: Any + Send + Sync>(message: M) -> Self {
        Self {
            metadata: HeaderMap::new(),
            message: Box::new(message),
        }
    }

    /// Borrows the message as `M`.
    #[must_use]
    pub fn downcast_ref<M: Any>(&self) -> Option<&M> {
        self.message.downcast_ref::<M>()
    }

    /// Takes the message out as `M`, returning the reply unchanged on a
    /// type mismatch.
    pub fn into_message<M: Any>(self) -> Result<M, Self> {
        let Self { metadata, message } = self;
        message
            .downcast::<M>()
            .map(|boxed| *boxed)
            .map_err(|message| Self { metadata, message })
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}
