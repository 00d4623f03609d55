//! Store behavior over the in-memory backend.

use keystone_core::{Context, Principal};
use keystone_store::{Clause, Condition, Datastore, Entity, QueryOptions, Store, TenantRegistry};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Post {
    #[serde(default)]
    id: i64,
    #[serde(rename = "ownerID")]
    owner_id: String,
    title: String,
}

impl Entity for Post {
    const TABLE: &'static str = "posts";
}

fn as_user(id: &str) -> Context {
    Context::new().with_principal(Principal::new(id, id))
}

async fn seed(posts: &Store<Post>, owners: &[&str]) {
    let ctx = Context::new();
    for (i, owner) in owners.iter().enumerate() {
        let mut post = Post {
            id: 0,
            owner_id: (*owner).to_string(),
            title: format!("post {i}"),
        };
        posts.create(&ctx, &mut post).await.unwrap();
    }
}

#[tokio::test]
async fn delete_twice_is_not_an_error() {
    let posts = Datastore::memory().store::<Post>();
    seed(&posts, &["u1", "u2"]).await;
    let ctx = Context::new();
    let opts = QueryOptions::filter("ownerID", "u1");

    posts.delete(&ctx, &opts).await.unwrap();
    posts.delete(&ctx, &opts).await.unwrap();

    let (count, _) = posts.list(&ctx, &QueryOptions::new()).await.unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn unbounded_limit_returns_every_row() {
    let posts = Datastore::memory().store::<Post>();
    let owners: Vec<&str> = (0..250).map(|i| if i % 2 == 0 { "u1" } else { "u2" }).collect();
    seed(&posts, &owners).await;

    let (count, items) = posts
        .list(&Context::new(), &QueryOptions::new().with_limit(-1))
        .await
        .unwrap();
    assert_eq!(count, 250);
    assert_eq!(items.len(), 250);
}

#[tokio::test]
async fn list_pages_newest_first_and_counts_all() {
    let posts = Datastore::memory().store::<Post>();
    seed(&posts, &["u1"; 7]).await;

    let (count, items) = posts
        .list(&Context::new(), &QueryOptions::new().page(2, 3))
        .await
        .unwrap();
    assert_eq!(count, 7);
    let titles: Vec<_> = items.iter().map(|p| p.title.as_str()).collect();
    assert_eq!(titles, ["post 3", "post 2", "post 1"]);
}

#[tokio::test]
async fn ordering_clause_overrides_default() {
    let posts = Datastore::memory().store::<Post>();
    seed(&posts, &["u1", "u1", "u1"]).await;

    let opts = QueryOptions::new()
        .with_clause(Clause::order_by("id", false))
        .with_condition(Condition::ne("title", "post 1"));
    let (count, items) = posts.list(&Context::new(), &opts).await.unwrap();
    assert_eq!(count, 2);
    assert_eq!(items.iter().map(|p| p.id).collect::<Vec<_>>(), [1, 3]);
}

#[tokio::test]
async fn privileged_callers_skip_scoping() {
    let posts = Datastore::memory().store::<Post>();
    seed(&posts, &["u1", "u2", "u3"]).await;
    let tenants = TenantRegistry::new();
    tenants.register_user_scope("ownerID");

    let ctx = as_user("root");
    let scoped = QueryOptions::new().with_tenant_scope(&tenants, &ctx);
    assert_eq!(posts.list(&ctx, &scoped).await.unwrap().0, 0);
    assert_eq!(posts.list(&ctx, &QueryOptions::new()).await.unwrap().0, 3);
}

fn owners() -> impl Strategy<Value = Vec<&'static str>> {
    prop::collection::vec(prop::sample::select(vec!["u1", "u2", "u3"]), 0..40)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn tenant_scoped_lists_only_return_own_rows(owners in owners()) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let posts = Datastore::memory().store::<Post>();
            seed(&posts, &owners).await;

            let tenants = TenantRegistry::new();
            tenants.register("ownerID", |_: &Context| "u1".to_string());

            let ctx = as_user("anyone");
            let opts = QueryOptions::new().with_tenant_scope(&tenants, &ctx);
            let (count, items) = posts.list(&ctx, &opts).await.unwrap();

            let expected = owners.iter().filter(|o| **o == "u1").count();
            assert_eq!(count as usize, expected);
            assert_eq!(items.len(), expected);
            assert!(items.iter().all(|p| p.owner_id == "u1"));
        });
    }
}
