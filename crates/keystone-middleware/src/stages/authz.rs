//! Authorization middleware.
//!
//! Derives `(subject, object, action)` from the context and the operation
//! and asks an [`Enforcer`]. A refusal and an enforcer error both reject
//! the call with `PermissionDenied`; the audit detail names the triple but
//! never the credential.

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Call, CallResult};
use crate::whitelist::Whitelist;
use keystone_authz::Enforcer;
use keystone_core::{Context, Error};
use std::sync::Arc;
use tracing::{debug, warn};

/// Middleware that enforces the access policy.
pub struct AuthzMiddleware {
    enforcer: Arc<dyn Enforcer>,
    whitelist: Arc<Whitelist>,
}

impl AuthzMiddleware {
    /// Creates the middleware.
    pub fn new(enforcer: Arc<dyn Enforcer>, whitelist: Arc<Whitelist>) -> Self {
        Self {
            enforcer,
            whitelist,
        }
    }
}

impl std::fmt::Debug for AuthzMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthzMiddleware")
            .field("whitelist", &self.whitelist)
            .finish_non_exhaustive()
    }
}

impl Middleware for AuthzMiddleware {
    fn name(&self) -> &'static str {
        "authorization"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context,
        call: Call,
        next: Next<'a>,
    ) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            if self.whitelist.contains(&call.operation) {
                return next.run(ctx, call).await;
            }

            let subject = ctx.user_id();
            let object = call.operation.object();
            let action = call.operation.action();
            debug!(subject, object, action, "build authorize context");

            let reason = match self.enforcer.authorize(subject, object, action) {
                Ok(true) => None,
                Ok(false) => Some("denied by policy".to_string()),
                Err(err) => Some(err.to_string()),
            };
            if let Some(reason) = reason {
                warn!(subject, object, action, reason = %reason, "access denied");
                return Err(Error::permission_denied().with_detail(format!(
                    "access denied : subject={subject},object={object},action={action},reason={reason}"
                )));
            }

            next.run(ctx, call).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Operation, Payload, Reply};
    use http::Method;
    use keystone_authz::{AuthzError, AuthzResult, PolicyRule, RuleSet};
    use keystone_core::{ErrorKind, Principal};

    struct Failing;

    impl Enforcer for Failing {
        fn authorize(&self, _subject: &str, _object: &str, _action: &str) -> AuthzResult<bool> {
            Err(AuthzError::invalid_request("policy unavailable"))
        }
    }

    struct Rules(RuleSet);

    impl Enforcer for Rules {
        fn authorize(&self, subject: &str, object: &str, action: &str) -> AuthzResult<bool> {
            Ok(self.0.evaluate(subject, object, action).is_allowed())
        }
    }

    fn ok<'a>() -> Next<'a> {
        Next::handler(|_ctx, _call| Box::pin(async { Ok(Reply::new(())) }))
    }

    fn alice() -> Context {
        Context::new().with_principal(Principal::new("user-1", "alice"))
    }

    fn middleware(enforcer: impl Enforcer + 'static) -> AuthzMiddleware {
        AuthzMiddleware::new(
            Arc::new(enforcer),
            Arc::new(Whitelist::empty().with("/healthz")),
        )
    }

    #[tokio::test]
    async fn test_allowed_call_passes() {
        let rules = RuleSet::from_iter([PolicyRule::grant("user-1", "/posts", "GET")]);
        let call = Call::new(Operation::http(Method::GET, "/posts"), Payload::new(()));
        assert!(middleware(Rules(rules))
            .process(&mut alice(), call, ok())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_denied_call_names_the_triple() {
        let call = Call::new(Operation::rpc("/v1.Keystone/DeletePost"), Payload::new(()));
        let err = middleware(Rules(RuleSet::empty()))
            .process(&mut alice(), call, ok())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(err.message(), "permission denied");
        assert_eq!(
            err.detail(),
            Some(
                "access denied : subject=user-1,object=/v1.Keystone/DeletePost,action=CALL,reason=denied by policy"
            )
        );
    }

    #[tokio::test]
    async fn test_enforcer_error_is_a_denial() {
        let call = Call::new(Operation::http(Method::GET, "/posts"), Payload::new(()));
        let err = middleware(Failing)
            .process(&mut alice(), call, ok())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(err.detail().unwrap().contains("policy unavailable"));
    }

    #[tokio::test]
    async fn test_whitelisted_operation_skips_enforcer() {
        let call = Call::new(Operation::http(Method::GET, "/healthz"), Payload::new(()));
        assert!(middleware(Failing)
            .process(&mut Context::new(), call, ok())
            .await
            .is_ok());
    }
}
