#![allow(dead_code)]

use std::sync::Arc;

use uvicore_orm::{
    BatchMode, Connections, EntityDef, Field, Orm, Registry, RegistryBuilder, RelationDecl,
};
use uvicore_orm_sqlite::SqlitePool;

/// Blog schema: users with contacts, posts with comments, tags and
/// polymorphic children shared with videos.
pub fn blog_registry() -> Registry {
    RegistryBuilder::new()
        .entity(
            EntityDef::new("user", "users")
                .field(Field::int("id").primary())
                .field(Field::string("email"))
                .field(Field::string("password").nullable().write_only())
                .field(Field::boolean("active").nullable())
                .relation("contact", RelationDecl::has_one("contact"))
                .relation("info", RelationDecl::has_one("user_info"))
                .relation("posts", RelationDecl::has_many("post").foreign_key("creator_id")),
        )
        .entity(
            EntityDef::new("contact", "contacts")
                .field(Field::int("id").primary())
                .field(Field::string("name"))
                .field(Field::string("phone").nullable())
                .field(Field::foreign_key("user_id")),
        )
        .entity(
            EntityDef::new("user_info", "user_infos")
                .field(Field::int("id").primary())
                .field(Field::string("extra"))
                .field(Field::foreign_key("user_id")),
        )
        .entity(
            EntityDef::new("post", "posts")
                .field(Field::int("id").primary())
                .field(Field::string("title"))
                .field(Field::foreign_key("creator_id").nullable())
                .field(Field::datetime("published_at").nullable())
                .field(Field::json("meta").nullable())
                .relation("creator", RelationDecl::belongs_to("user"))
                .relation("comments", RelationDecl::has_many("comment"))
                .relation("tags", RelationDecl::many_to_many("tag"))
                .relation("image", RelationDecl::morph_one("image"))
                .relation("attributes", RelationDecl::morph_many("attribute"))
                .relation("hashtags", RelationDecl::morph_to_many("hashtag")),
        )
        .entity(
            EntityDef::new("video", "videos")
                .field(Field::int("id").primary())
                .field(Field::string("name"))
                .relation("image", RelationDecl::morph_one("image"))
                .relation("attributes", RelationDecl::morph_many("attribute"))
                .relation("hashtags", RelationDecl::morph_to_many("hashtag")),
        )
        .entity(
            EntityDef::new("comment", "comments")
                .field(Field::int("id").primary())
                .field(Field::string("body"))
                .field(Field::foreign_key("post_id"))
                .relation("post", RelationDecl::belongs_to("post")),
        )
        .entity(
            EntityDef::new("tag", "tags")
                .field(Field::int("id").primary())
                .field(Field::string("name")),
        )
        .entity(
            EntityDef::new("image", "images")
                .field(Field::int("id").primary())
                .field(Field::string("imageable_type"))
                .field(Field::int("imageable_id"))
                .field(Field::string("filename")),
        )
        .entity(
            EntityDef::new("attribute", "attributes")
                .field(Field::int("id").primary())
                .field(Field::string("attributable_type"))
                .field(Field::int("attributable_id"))
                .field(Field::string("key"))
                .field(Field::string("value")),
        )
        .entity(
            EntityDef::new("hashtag", "hashtags")
                .field(Field::int("id").primary())
                .field(Field::string("name")),
        )
        .build()
        .expect("blog registry is valid")
}

/// An ORM over a fresh in-memory database with every table created.
pub async fn blog_orm() -> (Orm<SqlitePool>, SqlitePool) {
    blog_orm_with(BatchMode::PerRoot).await
}

pub async fn blog_orm_with(batch_mode: BatchMode) -> (Orm<SqlitePool>, SqlitePool) {
    let pool = SqlitePool::memory().await.expect("in-memory database");
    let registry = Arc::new(blog_registry());
    let connections = Connections::single(pool.clone());
    connections
        .create_tables(&registry)
        .await
        .expect("tables created");
    let orm = Orm::new(registry, connections).with_batch_mode(batch_mode);
    (orm, pool)
}

/// Row count of any table, pivots included.
pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM \"{}\"", table))
        .fetch_one(pool.inner())
        .await
        .expect("count query")
}
