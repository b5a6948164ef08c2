#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uvicore_orm::{Model, Order, OrmError};

use common::blog_orm;

#[tokio::test]
async fn polymorphic_children_never_cross_owners() {
    let (orm, _pool) = blog_orm().await;
    orm.insert_with_relations(
        "post",
        vec![json!({
            "title": "post one",
            "image": { "filename": "post.png" },
            "attributes": [{ "key": "k", "value": "post" }],
            "hashtags": [{ "name": "post-tag" }]
        })],
    )
    .await
    .unwrap();
    orm.insert_with_relations(
        "video",
        vec![json!({
            "name": "video one",
            "image": { "filename": "video.png" },
            "attributes": [{ "key": "k", "value": "video" }],
            "hashtags": [{ "name": "video-tag" }]
        })],
    )
    .await
    .unwrap();

    // Both owners have primary key 1.
    let post = orm
        .query("post")
        .include(["image", "attributes", "hashtags"])
        .find(1)
        .await
        .unwrap()
        .unwrap();
    let video = orm
        .query("video")
        .include(["image", "attributes", "hashtags"])
        .find(1)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(post.one("image").unwrap().get_str("filename"), Some("post.png"));
    assert_eq!(video.one("image").unwrap().get_str("filename"), Some("video.png"));
    assert_eq!(post.many("attributes").len(), 1);
    assert_eq!(post.many("attributes")[0].get_str("value"), Some("post"));
    assert_eq!(video.many("attributes")[0].get_str("value"), Some("video"));
    assert_eq!(post.many("hashtags").len(), 1);
    assert_eq!(post.many("hashtags")[0].get_str("name"), Some("post-tag"));
    assert_eq!(video.many("hashtags")[0].get_str("name"), Some("video-tag"));
}

#[tokio::test]
async fn dotted_includes_load_nested_relations() {
    let (orm, _pool) = blog_orm().await;
    orm.insert_with_relations(
        "post",
        vec![
            json!({
                "title": "first",
                "creator": {
                    "email": "author@example.com",
                    "password": "secret",
                    "contact": { "name": "Author" }
                },
                "comments": [{ "body": "c1" }, { "body": "c2" }],
                "tags": [{ "name": "rust" }]
            }),
            json!({ "title": "second", "creator": 1, "tags": [1] }),
        ],
    )
    .await
    .unwrap();

    let posts = orm
        .query("post")
        .include(["creator.contact", "comments", "tags"])
        .order_by("id", Order::Asc)
        .get()
        .await
        .unwrap();

    assert_eq!(posts.len(), 2);
    let creator = posts[0].one("creator").unwrap();
    assert_eq!(creator.get_str("email"), Some("author@example.com"));
    assert_eq!(creator.get("password"), None);
    assert_eq!(creator.one("contact").unwrap().get_str("name"), Some("Author"));
    assert_eq!(posts[0].many("comments").len(), 2);
    assert!(posts[1].many("comments").is_empty());
    assert_eq!(posts[1].one("creator").unwrap().get_i64("id"), Some(1));
    assert_eq!(posts[1].many("tags")[0].get_str("name"), Some("rust"));

    let user = orm
        .query("user")
        .include(["posts.comments"])
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.many("posts").len(), 2);
    assert_eq!(user.many("posts")[0].many("comments").len(), 2);
}

#[tokio::test]
async fn write_only_fields_are_hidden_unless_requested() {
    let (orm, _pool) = blog_orm().await;
    orm.insert(
        "user",
        vec![json!({ "email": "a@example.com", "password": "hash", "active": true })],
    )
    .await
    .unwrap();

    let hidden = orm.query("user").find(1).await.unwrap().unwrap();
    assert_eq!(hidden.get("password"), None);
    assert_eq!(hidden.get("active"), Some(&json!(true)));

    let shown = orm.query("user").show_writeonly(true).find(1).await.unwrap().unwrap();
    assert_eq!(shown.get_str("password"), Some("hash"));

    let named = orm
        .query("user")
        .show_writeonly_fields(["password"])
        .find(1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(named.get_str("password"), Some("hash"));

    assert!(!hidden.to_json().as_object().unwrap().contains_key("password"));
}

#[tokio::test]
async fn filters_ordering_and_paging() {
    let (orm, _pool) = blog_orm().await;
    orm.insert(
        "tag",
        ["a", "b", "c", "d"]
            .iter()
            .map(|name| json!({ "name": name }))
            .collect(),
    )
    .await
    .unwrap();

    let picked = orm
        .query("tag")
        .r#in("id", vec![1i64, 3, 4])
        .order_by("name", Order::Desc)
        .limit(2)
        .get()
        .await
        .unwrap();
    let names: Vec<_> = picked.iter().filter_map(|t| t.get_str("name")).collect();
    assert_eq!(names, ["d", "c"]);

    let paged = orm
        .query("tag")
        .order_by("id", Order::Asc)
        .offset(3)
        .get()
        .await
        .unwrap();
    assert_eq!(paged.len(), 1);

    let ne = orm.query("tag").ne("name", "a").gte("id", 3).get().await.unwrap();
    assert_eq!(ne.len(), 2);

    // Numeric strings are coerced to the key type.
    let by_string = orm.query("tag").find("2").await.unwrap().unwrap();
    assert_eq!(by_string.get_str("name"), Some("b"));

    let keyed = orm.query("tag").key_by("name").await.unwrap();
    assert_eq!(keyed.len(), 4);
    assert_eq!(keyed["c"].get_i64("id"), Some(3));

    let err = orm.query("tag").eq("missing", 1).get().await.unwrap_err();
    assert!(matches!(err, OrmError::InvalidInput(_)));
}

#[tokio::test]
async fn datetime_and_json_columns_round_trip() {
    let (orm, _pool) = blog_orm().await;
    orm.insert(
        "post",
        vec![json!({
            "title": "dated",
            "published_at": "2024-01-02T03:04:05Z",
            "meta": { "views": 3, "flags": ["a"] }
        })],
    )
    .await
    .unwrap();

    let post = orm.query("post").find(1).await.unwrap().unwrap();
    assert_eq!(post.get_str("published_at"), Some("2024-01-02T03:04:05.000000Z"));
    assert_eq!(post.get("meta"), Some(&json!({ "views": 3, "flags": ["a"] })));
    assert_eq!(post.get("creator_id"), Some(&serde_json::Value::Null));

    let later = orm
        .query("post")
        .gt("published_at", "2024-01-01T00:00:00Z")
        .get()
        .await
        .unwrap();
    assert_eq!(later.len(), 1);
}

#[derive(Model, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[model(entity = "tag")]
struct Tag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    name: String,
}

#[derive(Model, Serialize, Deserialize, Clone, Debug)]
#[model(entity = "post")]
struct Post {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    title: String,
    #[relation]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<Tag>>,
    #[column(skip)]
    #[serde(skip)]
    scratch: Option<String>,
}

#[tokio::test]
async fn typed_models_persist_and_load() {
    let (orm, _pool) = blog_orm().await;
    orm.registry().verify_model::<Post>().unwrap();
    orm.registry().verify_model::<Tag>().unwrap();

    let post = Post {
        id: None,
        title: "typed".to_string(),
        tags: Some(vec![Tag {
            id: None,
            name: "serde".to_string(),
        }]),
        scratch: Some("ignored".to_string()),
    };
    let saved = orm.insert_models_with_relations(&[post]).await.unwrap();
    assert_eq!(saved[0].id, Some(1));
    assert_eq!(saved[0].tags.as_ref().unwrap()[0].id, Some(1));
    assert_eq!(saved[0].scratch, None);

    let loaded: Post = orm
        .query_model::<Post>()
        .include(["tags"])
        .find(1)
        .await
        .unwrap()
        .map(Post::from_entity)
        .unwrap()
        .unwrap();
    assert_eq!(loaded.title, "typed");
    assert_eq!(
        loaded.tags,
        Some(vec![Tag {
            id: Some(1),
            name: "serde".to_string()
        }])
    );

    let plain = orm
        .insert_models(&[Tag {
            id: None,
            name: "bulk".to_string(),
        }])
        .await
        .unwrap();
    assert_eq!(plain[0].id, Some(2));
}
