//! Authentication middleware.
//!
//! Verifies the bearer token, resolves the subject to a [`Principal`]
//! through a [`PrincipalLookup`], and attaches it to the [`Context`].
//!
//! | Failure | Error kind |
//! |---------|------------|
//! | no `authorization` metadata | `MissingCredential` |
//! | wrong scheme, bad signature, expired, no identity claim | `TokenInvalid` |
//! | lookup failed | `Unauthenticated` |
//!
//! Whitelisted operations skip the stage entirely.

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Call, CallResult};
use crate::whitelist::Whitelist;
use async_trait::async_trait;
use keystone_core::{Context, Error, KeystoneResult, Principal};
use keystone_token::TokenService;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolves a verified subject id to its backing principal record.
#[async_trait]
pub trait PrincipalLookup: Send + Sync {
    /// Returns the principal for `user_id`.
    async fn principal(&self, ctx: &Context, user_id: &str) -> KeystoneResult<Principal>;
}

/// A fixed set of principals, keyed by user id.
#[derive(Debug, Clone, Default)]
pub struct StaticPrincipalLookup {
    principals: HashMap<String, Principal>,
}

impl StaticPrincipalLookup {
    /// Creates an empty lookup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a principal.
    #[must_use]
    pub fn with(mut self, principal: Principal) -> Self {
        self.principals.insert(principal.user_id.clone(), principal);
        self
    }
}

#[async_trait]
impl PrincipalLookup for StaticPrincipalLookup {
    async fn principal(&self, _ctx: &Context, user_id: &str) -> KeystoneResult<Principal> {
        self.principals
            .get(user_id)
            .cloned()
            .ok_or_else(|| Error::not_found("user not found"))
    }
}

/// Middleware that authenticates callers.
pub struct AuthnMiddleware {
    tokens: Arc<TokenService>,
    lookup: Arc<dyn PrincipalLookup>,
    whitelist: Arc<Whitelist>,
}

impl AuthnMiddleware {
    /// Creates the middleware.
    pub fn new(
        tokens: Arc<TokenService>,
        lookup: Arc<dyn PrincipalLookup>,
        whitelist: Arc<Whitelist>,
    ) -> Self {
        Self {
            tokens,
            lookup,
            whitelist,
        }
    }

    async fn authenticate(&self, ctx: &Context, call: &Call) -> KeystoneResult<Principal> {
        let user_id = self.tokens.verify_request(&call.metadata).map_err(|err| {
            let error = Error::from(err);
            warn!(
                operation = %call.operation,
                reason = error.reason(),
                detail = error.detail().unwrap_or_default(),
                "failed to parse request credential"
            );
            error
        })?;
        debug!(user_id = %user_id, "token parsed");

        self.lookup
            .principal(ctx, &user_id)
            .await
            .map_err(|err| {
                warn!(user_id = %user_id, error = %err, "principal lookup failed");
                Error::unauthenticated().with_detail(format!("lookup of {user_id} failed: {err}"))
            })
    }
}

impl std::fmt::Debug for AuthnMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthnMiddleware")
            .field("whitelist", &self.whitelist)
            .finish_non_exhaustive()
    }
}

impl Middleware for AuthnMiddleware {
    fn name(&self) -> &'static str {
        "authentication"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context,
        call: Call,
        next: Next<'a>,
    ) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            if self.whitelist.contains(&call.operation) {
                debug!(operation = %call.operation, "authentication skipped for whitelisted operation");
                return next.run(ctx, call).await;
            }

            let principal = self.authenticate(ctx, &call).await?;
            ctx.set_principal(principal);
            next.run(ctx, call).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Operation, Payload, Reply};
    use http::header::AUTHORIZATION;
    use http::HeaderValue;
    use keystone_core::ErrorKind;
    use keystone_token::TokenConfig;

    const KEY: &str = "Rtg8BPKNEf2mB4mgvKONGPZZQSaJWNLijxR42qRgq0iBb5";

    fn middleware() -> (AuthnMiddleware, Arc<TokenService>) {
        let tokens = Arc::new(TokenService::new(TokenConfig::new(KEY)));
        let lookup = StaticPrincipalLookup::new().with(Principal::new("user-1", "alice"));
        let mw = AuthnMiddleware::new(
            Arc::clone(&tokens),
            Arc::new(lookup),
            Arc::new(Whitelist::empty().with("/v1.Keystone/Login")),
        );
        (mw, tokens)
    }

    fn call(method: &str, bearer: Option<&str>) -> Call {
        let call = Call::new(Operation::rpc(method), Payload::new(()));
        match bearer {
            Some(value) => call.with_header(AUTHORIZATION, HeaderValue::from_str(value).unwrap()),
            None => call,
        }
    }

    fn principal_echo<'a>() -> Next<'a> {
        Next::handler(|ctx, _call| {
            let principal = ctx.principal().cloned();
            Box::pin(async move { Ok(Reply::new(principal)) })
        })
    }

    #[tokio::test]
    async fn test_valid_token_attaches_principal() {
        let (mw, tokens) = middleware();
        let token = tokens.issue("user-1").unwrap().token;

        let reply = mw
            .process(
                &mut Context::new(),
                call("/v1.Keystone/GetUser", Some(&format!("Bearer {token}"))),
                principal_echo(),
            )
            .await
            .unwrap();
        let principal = reply.into_message::<Option<Principal>>().unwrap().unwrap();
        assert_eq!(principal.username, "alice");
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let (mw, _) = middleware();
        let err = mw
            .process(&mut Context::new(), call("/v1.Keystone/GetUser", None), principal_echo())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingCredential);
    }

    #[tokio::test]
    async fn test_garbage_token_is_invalid() {
        let (mw, _) = middleware();
        let err = mw
            .process(
                &mut Context::new(),
                call("/v1.Keystone/GetUser", Some("Bearer not.a.jwt")),
                principal_echo(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenInvalid);
        assert_eq!(err.message(), "token was invalid");
    }

    #[tokio::test]
    async fn test_unknown_subject_is_unauthenticated() {
        let (mw, tokens) = middleware();
        let token = tokens.issue("user-404").unwrap().token;
        let err = mw
            .process(
                &mut Context::new(),
                call("/v1.Keystone/GetUser", Some(&format!("Bearer {token}"))),
                principal_echo(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
        assert!(err.detail().unwrap().contains("user-404"));
    }

    #[tokio::test]
    async fn test_whitelisted_operation_needs_no_credential() {
        let (mw, _) = middleware();
        let reply = mw
            .process(&mut Context::new(), call("/v1.Keystone/Login", None), principal_echo())
            .await
            .unwrap();
        assert!(reply.into_message::<Option<Principal>>().unwrap().is_none());
    }
}
