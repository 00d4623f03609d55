//! End-to-end chain scenarios across the RPC, HTTP and gateway adapters.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use keystone_authz::{Authorizer, PolicyRule};
use keystone_core::{Context, Error, KeystoneResult, Principal};
use keystone_middleware::stages::{
    AuthnMiddleware, AuthzMiddleware, DefaultsMiddleware, RequestIdMiddleware,
    StaticPrincipalLookup, ValidationMiddleware, REQUEST_ID_HEADER,
};
use keystone_middleware::{
    Chain, Defaults, Gateway, HttpAdapter, HttpBody, MessageRegistry, RpcAdapter, RpcCode,
    RpcRequest, Whitelist,
};
use keystone_token::{TokenConfig, TokenService};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const SIGNING_KEY: &str = "Rtg8BPKNEf2mB4mg";

#[derive(Debug, Clone, Deserialize)]
struct CreatePost {
    title: String,
    #[serde(default)]
    limit: i64,
}

impl Defaults for CreatePost {
    fn apply_defaults(&mut self) {
        if self.limit == 0 {
            self.limit = 20;
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct Post {
    title: String,
    limit: i64,
    author: String,
}

async fn create_post(ctx: Context, request: CreatePost) -> KeystoneResult<Post> {
    Ok(Post {
        title: request.title,
        limit: request.limit,
        author: ctx.user_id().to_string(),
    })
}

async fn list_posts(ctx: Context, _request: ()) -> KeystoneResult<String> {
    Ok(format!("posts of {}", ctx.user_id()))
}

async fn delete_post(_ctx: Context, _request: ()) -> KeystoneResult<String> {
    Ok("deleted".to_string())
}

async fn healthz(_ctx: Context, _request: ()) -> KeystoneResult<String> {
    Ok("ok".to_string())
}

struct Stack {
    tokens: Arc<TokenService>,
    validations: Arc<AtomicUsize>,
    rpc: Arc<RpcAdapter>,
    http: HttpAdapter,
    gateway: Gateway,
}

fn stack() -> Stack {
    let tokens = Arc::new(TokenService::new(TokenConfig::new(SIGNING_KEY)));
    let whitelist = Arc::new(Whitelist::default());
    let authorizer = Arc::new(Authorizer::with_rules([
        PolicyRule::grant("role:user", "/posts", "CALL"),
        PolicyRule::grant("role:user", "/posts", "POST"),
        PolicyRule::grant("role:user", "/v1.Keystone/CreatePost", "CALL"),
        PolicyRule::deny("role:user", "/posts/*", "DELETE"),
        PolicyRule::assign("user-1", "role:user"),
    ]));
    let users = StaticPrincipalLookup::new().with(Principal::new("user-1", "alice"));

    let validations = Arc::new(AtomicUsize::new(0));
    let counter = validations.clone();
    let registry = Arc::new(
        MessageRegistry::new()
            .with_defaults::<CreatePost>()
            .with_validator::<CreatePost, _>(move |_ctx, post| {
                counter.fetch_add(1, Ordering::SeqCst);
                if post.title.is_empty() {
                    return Err(Error::validation("title cannot be empty"));
                }
                Ok(())
            }),
    );

    let chain = Arc::new(
        Chain::builder()
            .request_id(RequestIdMiddleware::new())
            .authentication(AuthnMiddleware::new(
                tokens.clone(),
                Arc::new(users),
                whitelist.clone(),
            ))
            .authorization(AuthzMiddleware::new(authorizer, whitelist))
            .defaults(DefaultsMiddleware::new(registry.clone()))
            .validation(ValidationMiddleware::new(registry))
            .build(),
    );

    let rpc = Arc::new(
        RpcAdapter::new(chain.clone())
            .route("/posts", list_posts)
            .route("/v1.Keystone/CreatePost", create_post)
            .route("/v1.Keystone/Healthz", healthz),
    );
    let http = HttpAdapter::new(chain)
        .route(Method::POST, "/posts", create_post)
        .route(Method::DELETE, "/posts/*", delete_post)
        .route(Method::GET, "/healthz", healthz);
    let gateway = Gateway::new(rpc.clone()).route::<CreatePost, Post>(
        Method::POST,
        "/v1/posts",
        "/v1.Keystone/CreatePost",
    );

    Stack {
        tokens,
        validations,
        rpc,
        http,
        gateway,
    }
}

fn bearer(tokens: &TokenService, user_id: &str) -> HeaderValue {
    let token = tokens.issue(user_id).unwrap().token;
    HeaderValue::from_str(&format!("Bearer {token}")).unwrap()
}

fn http_request(
    method: Method,
    uri: &str,
    authorization: Option<HeaderValue>,
    body: &'static str,
) -> Request<HttpBody> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(REQUEST_ID_HEADER, "req-42");
    if let Some(value) = authorization {
        builder = builder.header(AUTHORIZATION, value);
    }
    builder.body(Full::new(Bytes::from_static(body.as_bytes()))).unwrap()
}

async fn json(response: Response<HttpBody>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn whitelisted_operation_needs_no_credential() {
    let stack = stack();

    let rpc = stack
        .rpc
        .unary::<(), String>(RpcRequest::new("/v1.Keystone/Healthz", ()))
        .await;
    assert_eq!(rpc.result.unwrap(), "ok");

    let http = stack
        .http
        .handle(http_request(Method::GET, "/healthz", None, ""))
        .await;
    assert_eq!(http.status(), StatusCode::OK);
    assert_eq!(http.headers()[REQUEST_ID_HEADER], "req-42");
}

#[tokio::test]
async fn invalid_token_is_rejected_before_validation() {
    let stack = stack();
    let forged = TokenService::new(TokenConfig::new("another-secret"));

    let response = stack
        .rpc
        .unary::<CreatePost, Post>(
            RpcRequest::new(
                "/v1.Keystone/CreatePost",
                CreatePost {
                    title: String::new(),
                    limit: 0,
                },
            )
            .with_metadata(AUTHORIZATION, bearer(&forged, "user-1")),
        )
        .await;

    let status = response.result.unwrap_err();
    assert_eq!(status.code, RpcCode::Unauthenticated);
    assert_eq!(status.reason, "Unauthenticated.TokenInvalid");
    assert_eq!(stack.validations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_credential_is_rejected_on_every_transport() {
    let stack = stack();

    let rpc = stack
        .rpc
        .unary::<(), String>(RpcRequest::new("/posts", ()))
        .await;
    assert_eq!(rpc.code(), RpcCode::Unauthenticated);

    let http = stack
        .http
        .handle(http_request(Method::POST, "/posts", None, r#"{"title":"x"}"#))
        .await;
    assert_eq!(http.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json(http).await["reason"], "Unauthenticated.MissingCredential");

    let gateway = stack
        .gateway
        .handle(http_request(Method::POST, "/v1/posts", None, r#"{"title":"x"}"#))
        .await;
    assert_eq!(gateway.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(stack.validations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn role_grant_and_deny_override_across_transports() {
    let stack = stack();
    let credential = bearer(&stack.tokens, "user-1");

    let listed = stack
        .rpc
        .unary::<(), String>(
            RpcRequest::new("/posts", ()).with_metadata(AUTHORIZATION, credential.clone()),
        )
        .await;
    assert_eq!(listed.result.unwrap(), "posts of user-1");

    let deleted = stack
        .http
        .handle(http_request(
            Method::DELETE,
            "/posts/42",
            Some(credential),
            "",
        ))
        .await;
    assert_eq!(deleted.status(), StatusCode::FORBIDDEN);
    assert_eq!(deleted.headers()[REQUEST_ID_HEADER], "req-42");

    let body = json(deleted).await;
    assert_eq!(body["reason"], "PermissionDenied");
    assert_eq!(body["metadata"]["X-Request-ID"], "req-42");
}

#[tokio::test]
async fn unknown_subject_is_denied() {
    let stack = stack();

    let response = stack
        .rpc
        .unary::<(), String>(
            RpcRequest::new("/posts", ())
                .with_metadata(AUTHORIZATION, bearer(&stack.tokens, "user-2")),
        )
        .await;
    assert_eq!(response.code(), RpcCode::Unauthenticated);
}

#[tokio::test]
async fn defaults_then_validation_then_handler() {
    let stack = stack();
    let credential = bearer(&stack.tokens, "user-1");

    let created = stack
        .http
        .handle(http_request(
            Method::POST,
            "/posts",
            Some(credential.clone()),
            r#"{"title":"hello"}"#,
        ))
        .await;
    assert_eq!(created.status(), StatusCode::OK);
    let body = json(created).await;
    assert_eq!(body["limit"], 20);
    assert_eq!(body["author"], "user-1");

    let rejected = stack
        .http
        .handle(http_request(
            Method::POST,
            "/posts",
            Some(credential),
            r#"{"title":""}"#,
        ))
        .await;
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(rejected).await["reason"], "InvalidArgument");
    assert_eq!(stack.validations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rpc_and_gateway_agree() {
    let stack = stack();
    let credential = bearer(&stack.tokens, "user-1");

    let rpc = stack
        .rpc
        .unary::<CreatePost, Post>(
            RpcRequest::new(
                "/v1.Keystone/CreatePost",
                CreatePost {
                    title: String::new(),
                    limit: 0,
                },
            )
            .with_metadata(AUTHORIZATION, credential.clone())
            .with_metadata(
                HeaderName::from_static(REQUEST_ID_HEADER),
                HeaderValue::from_static("req-42"),
            ),
        )
        .await;
    let status = rpc.result.unwrap_err();
    assert_eq!(status.code, RpcCode::InvalidArgument);
    assert_eq!(status.request_id(), Some("req-42"));

    let gateway = stack
        .gateway
        .handle(http_request(
            Method::POST,
            "/v1/posts",
            Some(credential),
            r#"{"title":""}"#,
        ))
        .await;
    assert_eq!(gateway.status(), status.code.http_status());
    let body = json(gateway).await;
    assert_eq!(body["reason"], status.reason.as_str());
    assert_eq!(body["metadata"]["X-Request-ID"], "req-42");
}
