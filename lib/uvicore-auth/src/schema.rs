//! Users, groups, roles and permissions.
//!
//! Users reach roles directly and through their groups; roles carry
//! permissions. Every link is a many-to-many pivot.

use serde_json::Value as JsonValue;
use uvicore_orm::{DEFAULT_CONNECTION, EntityDef, Field, OrmError, Registry, RegistryBuilder, RelationDecl};

pub const USER: &str = "user";
pub const GROUP: &str = "group";
pub const ROLE: &str = "role";
pub const PERMISSION: &str = "permission";

/// Auth entities on `connection`.
pub fn entities(connection: &str) -> Vec<EntityDef> {
    vec![
        EntityDef::new(USER, "users")
            .connection(connection)
            .field(Field::int("id").primary())
            .field(Field::string("uuid").nullable())
            .field(Field::string("username"))
            .field(Field::string("email"))
            .field(Field::string("first_name").nullable())
            .field(Field::string("last_name").nullable())
            .field(Field::string("title").nullable())
            .field(Field::string("avatar_url").nullable())
            .field(Field::string("password").nullable().write_only())
            .field(Field::boolean("disabled").default_value(JsonValue::Bool(false)))
            .field(Field::datetime("login_at").nullable())
            .relation(
                "groups",
                RelationDecl::many_to_many(GROUP).pivot("user_groups"),
            )
            .relation("roles", RelationDecl::many_to_many(ROLE).pivot("user_roles")),
        EntityDef::new(GROUP, "groups")
            .connection(connection)
            .field(Field::int("id").primary())
            .field(Field::string("name"))
            .relation("roles", RelationDecl::many_to_many(ROLE).pivot("group_roles")),
        EntityDef::new(ROLE, "roles")
            .connection(connection)
            .field(Field::int("id").primary())
            .field(Field::string("name"))
            .relation(
                "permissions",
                RelationDecl::many_to_many(PERMISSION).pivot("role_permissions"),
            ),
        EntityDef::new(PERMISSION, "permissions")
            .connection(connection)
            .field(Field::int("id").primary())
            .field(Field::string("name")),
    ]
}

/// Add the auth entities to an application's registry.
pub fn register(builder: RegistryBuilder, connection: &str) -> RegistryBuilder {
    entities(connection)
        .into_iter()
        .fold(builder, RegistryBuilder::entity)
}

/// A registry holding only the auth entities, on the default connection.
pub fn registry() -> Result<Registry, OrmError> {
    register(RegistryBuilder::new(), DEFAULT_CONNECTION).build()
}
