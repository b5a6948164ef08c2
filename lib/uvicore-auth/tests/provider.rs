#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value as JsonValue, json};
use uvicore_auth::schema::{self, GROUP, PERMISSION, ROLE, USER};
use uvicore_auth::{AuthError, OrmUserProvider, PasswordVerifier, RetrieveOptions, UserProvider};
use uvicore_cache::{Cache, CacheManager};
use uvicore_orm::{Connections, Orm, Row};
use uvicore_orm_sqlite::SqlitePool;

/// Stored hashes are `hash:<password>`; counts every check.
#[derive(Default)]
struct CountingVerifier {
    checks: AtomicUsize,
}

impl CountingVerifier {
    fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl PasswordVerifier for CountingVerifier {
    fn verify(&self, password: &str, hash: &str) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        hash == format!("hash:{}", password)
    }
}

struct Fixture {
    provider: OrmUserProvider<SqlitePool>,
    verifier: Arc<CountingVerifier>,
    cache: Cache,
}

async fn fixture() -> Fixture {
    let pool = SqlitePool::memory().await.unwrap();
    let registry = Arc::new(schema::registry().unwrap());
    let connections = Connections::single(pool);
    connections.create_tables(&registry).await.unwrap();
    let orm = Orm::new(registry, connections);
    seed(&orm).await;

    let verifier = Arc::new(CountingVerifier::default());
    let cache = CacheManager::default().store().unwrap();
    let provider = OrmUserProvider::new(Arc::new(orm), cache.clone(), verifier.clone());
    Fixture {
        provider,
        verifier,
        cache,
    }
}

async fn seed(orm: &Orm<SqlitePool>) {
    orm.insert(
        PERMISSION,
        vec![
            json!({ "name": "posts.read" }),
            json!({ "name": "posts.write" }),
            json!({ "name": "admin" }),
        ],
    )
    .await
    .unwrap();
    orm.insert_with_relations(
        ROLE,
        vec![
            json!({ "name": "writer", "permissions": [1, 2] }),
            json!({ "name": "owner", "permissions": [3] }),
            json!({ "name": "reader", "permissions": [1] }),
        ],
    )
    .await
    .unwrap();
    orm.insert_with_relations(
        GROUP,
        vec![
            json!({ "name": "editors", "roles": [1] }),
            json!({ "name": "staff", "roles": [3] }),
        ],
    )
    .await
    .unwrap();
    orm.insert_with_relations(
        USER,
        vec![
            json!({
                "uuid": "uuid-ann",
                "username": "ann",
                "email": "ann@example.com",
                "first_name": "Ann",
                "password": "hash:ann-pass",
                "groups": [1, 2],
                "roles": [3]
            }),
            json!({
                "username": "root",
                "email": "root@example.com",
                "password": "hash:root-pass",
                "roles": [2]
            }),
            json!({
                "username": "ghost",
                "email": "ghost@example.com",
                "password": "hash:ghost-pass",
                "disabled": true
            }),
            json!({ "username": "nopass", "email": "nopass@example.com" }),
        ],
    )
    .await
    .unwrap();
}

fn row(value: JsonValue) -> Row {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn authenticates_and_flattens_authorization() {
    let f = fixture().await;
    let ann = f
        .provider
        .authenticate("ann", "ann-pass")
        .await
        .unwrap()
        .expect("valid credentials");

    assert_eq!(ann.id, 1);
    assert_eq!(ann.sub, "uuid-ann");
    assert_eq!(ann.first_name, "Ann");
    assert_eq!(ann.last_name, "");
    assert_eq!(ann.groups, ["editors", "staff"]);
    assert_eq!(ann.roles, ["reader", "writer"]);
    assert_eq!(ann.permissions, ["posts.read", "posts.write"]);
    assert!(!ann.superadmin);
    assert!(ann.authenticated);
}

#[tokio::test]
async fn successful_lookups_are_cached_per_password() {
    let f = fixture().await;
    f.provider.authenticate("ann", "ann-pass").await.unwrap().unwrap();
    f.provider.authenticate("ann", "ann-pass").await.unwrap().unwrap();
    assert_eq!(f.verifier.checks(), 1);

    let key = OrmUserProvider::<SqlitePool>::cache_key("username", "ann", false, Some("ann-pass"));
    assert!(f.cache.has(&key).await.unwrap());
    assert!(key.as_str().starts_with("auth/user/username/ann/active/"));
}

#[tokio::test]
async fn wrong_password_is_never_served_from_cache() {
    let f = fixture().await;
    f.provider.authenticate("ann", "ann-pass").await.unwrap().unwrap();

    let wrong = f.provider.authenticate("ann", "guess").await.unwrap();
    assert!(wrong.is_none());
    assert_eq!(f.verifier.checks(), 2);

    let wrong_key = OrmUserProvider::<SqlitePool>::cache_key("username", "ann", false, Some("guess"));
    assert!(!f.cache.has(&wrong_key).await.unwrap());

    // Still rejected, and checked again rather than remembered.
    assert!(f.provider.authenticate("ann", "guess").await.unwrap().is_none());
    assert_eq!(f.verifier.checks(), 3);
}

#[tokio::test]
async fn admin_permission_marks_superadmin() {
    let f = fixture().await;
    let root = f
        .provider
        .authenticate("root", "root-pass")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(root.roles, ["owner"]);
    assert_eq!(root.permissions, ["admin"]);
    assert!(root.superadmin);
    assert!(root.can("anything"));
}

#[tokio::test]
async fn disabled_users_only_resolve_anonymously() {
    let f = fixture().await;
    assert!(f
        .provider
        .authenticate("ghost", "ghost-pass")
        .await
        .unwrap()
        .is_none());

    let options = RetrieveOptions {
        anonymous: true,
        ..RetrieveOptions::default()
    };
    let ghost = f
        .provider
        .retrieve_user("username", "ghost", None, &options)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ghost.username, "ghost");
    assert!(!ghost.authenticated);
}

#[tokio::test]
async fn missing_password_or_user_is_soft_failure() {
    let f = fixture().await;
    assert!(f.provider.authenticate("nopass", "x").await.unwrap().is_none());
    assert!(f.provider.authenticate("nobody", "x").await.unwrap().is_none());

    let nopass = f
        .provider
        .retrieve_user("email", "nopass@example.com", None, &RetrieveOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(nopass.username, "nopass");
    assert!(nopass.groups.is_empty());
    let nobody = OrmUserProvider::<SqlitePool>::cache_key("username", "nobody", false, Some("x"));
    assert!(!f.cache.has(&nobody).await.unwrap());
}

#[tokio::test]
async fn lookups_by_different_fields_do_not_share_cache_entries() {
    let f = fixture().await;
    let options = RetrieveOptions::default();
    let by_id = f
        .provider
        .retrieve_user("id", "2", Some("root-pass"), &options)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_id.username, "root");

    // No user is named "2", so the cached id lookup must not answer this.
    let by_name = f
        .provider
        .retrieve_user("username", "2", Some("root-pass"), &options)
        .await
        .unwrap();
    assert!(by_name.is_none());
}

#[tokio::test]
async fn anonymous_lookup_does_not_leak_into_active_lookup() {
    let f = fixture().await;
    let anonymous = RetrieveOptions {
        anonymous: true,
        ..RetrieveOptions::default()
    };
    let ghost = f
        .provider
        .retrieve_user("username", "ghost", Some("ghost-pass"), &anonymous)
        .await
        .unwrap()
        .unwrap();
    assert!(!ghost.authenticated);

    let active = f
        .provider
        .retrieve_user("username", "ghost", Some("ghost-pass"), &RetrieveOptions::default())
        .await
        .unwrap();
    assert!(active.is_none());

    // And the other way round: an active user is not found anonymously.
    f.provider.authenticate("ann", "ann-pass").await.unwrap().unwrap();
    let ann = f
        .provider
        .retrieve_user("username", "ann", Some("ann-pass"), &anonymous)
        .await
        .unwrap();
    assert!(ann.is_none());
}

#[tokio::test]
async fn key_value_of_the_wrong_type_is_soft_failure() {
    let f = fixture().await;
    let options = RetrieveOptions::default();
    let found = f
        .provider
        .retrieve_user("id", "not-a-number", Some("x"), &options)
        .await
        .unwrap();
    assert!(found.is_none());
    assert_eq!(f.verifier.checks(), 0);

    let err = f
        .provider
        .retrieve_user("shoe_size", "9", None, &options)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Orm(_)));
}

#[tokio::test]
async fn create_user_links_existing_groups() {
    let f = fixture().await;
    let created = f
        .provider
        .create_user(
            row(json!({
                "username": "new",
                "email": "new@example.com",
                "avatar": "new.png",
                "password": "hash:new-pass"
            })),
            &["staff", "missing"],
        )
        .await
        .unwrap();
    assert_eq!(created.get_str("avatar_url"), Some("new.png"));
    assert_eq!(created.get("disabled"), Some(&json!(false)));
    assert!(created.get_str("login_at").is_some());

    let user = f
        .provider
        .authenticate("new", "new-pass")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.groups, ["staff"]);
    assert_eq!(user.roles, ["reader"]);
    assert_eq!(user.avatar, "new.png");
}

#[tokio::test]
async fn sync_user_reenables_and_updates() {
    let f = fixture().await;
    let synced = f
        .provider
        .sync_user(
            "ghost",
            row(json!({ "email": "ghost@new.example.com", "groups": ["staff"] })),
        )
        .await
        .unwrap();
    assert_eq!(synced.get("disabled"), Some(&json!(false)));
    assert_eq!(synced.get_str("password"), Some("hash:ghost-pass"));

    let ghost = f
        .provider
        .authenticate("ghost", "ghost-pass")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ghost.email, "ghost@new.example.com");
    assert!(ghost.groups.is_empty());

    let err = f
        .provider
        .sync_user("nobody", Row::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::UnknownUser(name) if name == "nobody"));
}
