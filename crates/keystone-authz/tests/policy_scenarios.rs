//! End-to-end authorization scenarios.

use keystone_authz::{
    Authorizer, AuthorizerConfig, Enforcer, PolicyRule, RuleSource, StaticRuleSource,
};
use std::sync::Arc;
use std::time::Duration;

fn blog_policy() -> Vec<PolicyRule> {
    vec![
        PolicyRule::grant("role:user", "/posts", "CALL"),
        PolicyRule::deny("role:user", "/posts/*", "DELETE"),
        PolicyRule::assign("user-1", "role:user"),
    ]
}

#[tokio::test]
async fn role_grant_and_deny_override() {
    let authorizer = Authorizer::with_rules(blog_policy());

    assert!(authorizer.authorize("user-1", "/posts", "CALL").unwrap());
    assert!(!authorizer.authorize("user-1", "/posts/42", "DELETE").unwrap());
}

#[tokio::test]
async fn rules_loaded_from_json() {
    let json = r#"[
        {"type": "grant", "subject": "role:admin", "object": "*", "action": "*"},
        {"type": "deny", "subject": "role:admin", "object": "/admin/*", "action": "DELETE"},
        {"type": "role-assignment", "member": "root", "role": "role:admin"}
    ]"#;
    let rules: Vec<PolicyRule> = serde_json::from_str(json).unwrap();
    let authorizer = Authorizer::with_rules(rules);

    assert!(authorizer.authorize("root", "/v1.UserService/ListUser", "CALL").unwrap());
    assert!(!authorizer.authorize("root", "/admin/users", "DELETE").unwrap());
    assert!(!authorizer.authorize("guest", "/v1.UserService/ListUser", "CALL").unwrap());
}

#[tokio::test]
async fn concurrent_readers_during_reloads() {
    let source = Arc::new(StaticRuleSource::new(blog_policy()));
    let authorizer = Arc::new(
        Authorizer::new(
            source.clone() as Arc<dyn RuleSource>,
            AuthorizerConfig::default().without_refresh(),
        )
        .await
        .unwrap(),
    );

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let authorizer = authorizer.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    // Whatever rule set is in force, the deny must always win.
                    assert!(!authorizer.authorize("user-1", "/posts/1", "DELETE").unwrap());
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for round in 0..50 {
        let mut rules = blog_policy();
        rules.push(PolicyRule::grant("role:user", format!("/extra/{round}"), "CALL"));
        source.replace(rules);
        authorizer.reload().await.unwrap();
        tokio::task::yield_now().await;
    }

    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(authorizer.generation(), 51);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_stops_refresh() {
    let source = Arc::new(StaticRuleSource::new(blog_policy()));
    let config = AuthorizerConfig::default().with_refresh_interval(Duration::from_secs(1));
    let authorizer = Arc::new(Authorizer::new(source, config).await.unwrap());

    let handle = authorizer.spawn_refresh().unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(authorizer.generation(), 3);

    drop(handle);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(authorizer.generation(), 3);
}
