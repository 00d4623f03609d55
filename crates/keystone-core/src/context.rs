//! Request context types.
//!
//! The [`Context`] carries all per-request state through the middleware
//! chain, into handlers, and down into the persistence layer.

use crate::error::Error;
use crate::principal::Principal;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

/// A request identifier.
///
/// Inbound ids are accepted verbatim, so this is a string rather than a
/// parsed UUID. Generated ids are UUID v7, which keeps them time-ordered
/// in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Creates a new unique request ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wraps an existing identifier.
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

/// A cancellation signal shared by every clone of a [`Context`].
#[derive(Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    /// Creates a signal that has not fired.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fires the signal. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Returns `true` once the signal has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves when the signal fires.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Per-request context that flows through the middleware chain.
///
/// `Context` carries:
/// - the request id, once the request-id stage has run
/// - the authenticated [`Principal`], once authentication has run
/// - an optional deadline and a [`CancelSignal`]
/// - typed extensions (the persistence layer keeps its transaction handle here)
///
/// Cloning is cheap and clones share the cancellation signal.
///
/// # Example
///
/// ```
/// use keystone_core::{Context, Principal};
///
/// let ctx = Context::new().with_principal(Principal::new("user-1", "alice"));
/// assert_eq!(ctx.user_id(), "user-1");
/// ```
#[derive(Clone, Default)]
pub struct Context {
    request_id: Option<RequestId>,
    principal: Option<Principal>,
    deadline: Option<Instant>,
    cancel: CancelSignal,
    extensions: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Context {
    /// Creates an empty context with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the request ID, if assigned.
    #[must_use]
    pub const fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Sets the request ID.
    pub fn set_request_id(&mut self, request_id: RequestId) {
        self.request_id = Some(request_id);
    }

    /// Returns a new context with the specified request ID.
    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Returns the authenticated principal, if any.
    #[must_use]
    pub const fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Sets the authenticated principal.
    pub fn set_principal(&mut self, principal: Principal) {
        self.principal = Some(principal);
    }

    /// Returns a new context with the specified principal.
    #[must_use]
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Returns the caller's user id, or an empty string when unauthenticated.
    #[must_use]
    pub fn user_id(&self) -> &str {
        self.principal.as_ref().map_or("", |p| p.user_id.as_str())
    }

    /// Returns the caller's username, or an empty string when unauthenticated.
    #[must_use]
    pub fn username(&self) -> &str {
        self.principal.as_ref().map_or("", |p| p.username.as_str())
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns a new context that expires at `deadline`.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Returns a new context that expires after `timeout`.
    #[must_use]
    pub fn with_timeout(self, timeout: std::time::Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns the cancellation signal.
    #[must_use]
    pub const fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Cancels this request and every clone of it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` if the request was cancelled or its deadline passed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Runs `fut` until it completes, the request is cancelled, or the
    /// deadline passes, whichever comes first.
    ///
    /// Dropping `fut` on cancellation aborts any in-flight I/O it owns.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::cancelled());
        }
        let deadline = self.deadline;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::cancelled()),
            () = sleep_until(deadline) => Err(Error::deadline_exceeded()),
            output = fut => Ok(output),
        }
    }

    /// Stores a typed extension value, replacing any previous value of the
    /// same type.
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Returns a new context carrying the extension value.
    #[must_use]
    pub fn with_extension<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.set_extension(value);
        self
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Removes a typed extension value. Returns `true` if one was present.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> bool {
        self.extensions.remove(&TypeId::of::<T>()).is_some()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.request_id)
            .field("principal", &self.principal)
            .field("deadline", &self.deadline)
            .field("cancel", &self.cancel)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::time::Duration;

    #[test]
    fn test_request_id_new_generates_unique_ids() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2, "Each RequestId should be unique");
        assert_eq!(id1.as_str().len(), 36);
    }

    #[test]
    fn test_request_id_accepts_arbitrary_text() {
        let id = RequestId::from_string("client-supplied-id");
        assert_eq!(id.to_string(), "client-supplied-id");
    }

    #[test]
    fn test_context_principal_accessors() {
        let ctx = Context::new();
        assert_eq!(ctx.user_id(), "");

        let ctx = ctx.with_principal(Principal::new("user-1", "alice"));
        assert_eq!(ctx.user_id(), "user-1");
        assert_eq!(ctx.username(), "alice");
    }

    #[test]
    fn test_extensions_survive_clone() {
        #[derive(Debug, PartialEq)]
        struct Marker(u32);

        let ctx = Context::new().with_extension(Marker(7));
        let cloned = ctx.clone();
        assert_eq!(cloned.extension::<Marker>(), Some(&Marker(7)));

        let mut ctx = cloned;
        assert!(ctx.remove_extension::<Marker>());
        assert!(ctx.extension::<Marker>().is_none());
    }

    #[tokio::test]
    async fn test_guard_passes_through_output() {
        let ctx = Context::new();
        let value = ctx.guard(async { 42 }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_guard_observes_cancellation_from_clone() {
        let ctx = Context::new();
        let clone = ctx.clone();

        let waiter = tokio::spawn(async move {
            clone
                .guard(std::future::pending::<()>())
                .await
                .unwrap_err()
        });
        tokio::task::yield_now().await;
        ctx.cancel();

        let error = waiter.await.unwrap();
        assert_eq!(error.kind(), ErrorKind::Internal);
        assert_eq!(error.reason(), "InternalError.Cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_observes_deadline() {
        let ctx = Context::new().with_timeout(Duration::from_millis(50));
        let error = ctx
            .guard(tokio::time::sleep(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(error.message(), "request deadline exceeded");
        assert!(ctx.is_done());
    }

    #[tokio::test]
    async fn test_already_cancelled_context_short_circuits() {
        let ctx = Context::new();
        ctx.cancel();
        assert!(ctx.guard(async {}).await.is_err());
    }
}
