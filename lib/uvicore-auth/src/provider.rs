use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uvicore_cache::{Cache, CacheKey};
use uvicore_orm::{Entity, Orm, OrmError, QueryExecutor, Row, StorageDatetime, Value};

use crate::schema::{GROUP, USER};
use crate::user::{ADMIN_PERMISSION, UserInfo};
use crate::AuthError;

/// Relations loaded to flatten a user's groups, roles and permissions.
pub const DEFAULT_INCLUDES: [&str; 2] = ["groups.roles.permissions", "roles.permissions"];

/// Checks a plaintext password against the stored hash.
pub trait PasswordVerifier: Send + Sync {
    fn verify(&self, password: &str, hash: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    /// Look up disabled users instead, returned as unauthenticated.
    pub anonymous: bool,
    pub includes: Vec<String>,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            anonymous: false,
            includes: DEFAULT_INCLUDES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
pub trait UserProvider: Send + Sync {
    /// The user whose `key_name` field equals `key_value`, checked against
    /// `password` when one is given.
    ///
    /// A missing user, a user without a stored password, or a failed check
    /// is `Ok(None)`.
    async fn retrieve_user(
        &self,
        key_name: &str,
        key_value: &str,
        password: Option<&str>,
        options: &RetrieveOptions,
    ) -> Result<Option<UserInfo>, AuthError>;

    /// Insert an enabled user and link it to the named groups.
    async fn create_user(&self, fields: Row, groups: &[&str]) -> Result<Entity, AuthError>;

    /// Apply `fields` to an existing user after a successful external login.
    async fn sync_user(&self, username: &str, fields: Row) -> Result<Entity, AuthError>;

    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserInfo>, AuthError> {
        self.retrieve_user("username", username, Some(password), &RetrieveOptions::default())
            .await
    }
}

/// User provider reading the auth entities through the ORM.
///
/// Successful lookups are cached under
/// `auth/user/<key_name>/<key_value>/<active|anonymous>`, extended with a
/// fingerprint of the password when one was checked. Failed lookups are
/// never cached.
pub struct OrmUserProvider<E: QueryExecutor> {
    orm: Arc<Orm<E>>,
    cache: Cache,
    verifier: Arc<dyn PasswordVerifier>,
    ttl: Option<Duration>,
}

impl<E: QueryExecutor + 'static> OrmUserProvider<E> {
    pub fn new(orm: Arc<Orm<E>>, cache: Cache, verifier: Arc<dyn PasswordVerifier>) -> Self {
        Self {
            orm,
            cache,
            verifier,
            ttl: None,
        }
    }

    /// Lifetime of cached users. Unset uses the store's default.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn cache_key(
        key_name: &str,
        key_value: &str,
        anonymous: bool,
        password: Option<&str>,
    ) -> CacheKey {
        CacheKey::new("auth")
            .push("user")
            .push(key_name)
            .push(key_value)
            .push(if anonymous { "anonymous" } else { "active" })
            .fingerprint_opt(password)
    }

    /// Whether `key_value` can be bound to the `key_name` column at all.
    /// An unknown field is an error.
    fn accepts(&self, key_name: &str, key_value: &str) -> Result<bool, AuthError> {
        let descriptor = self.orm.registry().describe(USER)?;
        let field = descriptor.column_field(key_name).ok_or_else(|| {
            OrmError::InvalidInput(format!("Entity '{}' has no field '{}'", USER, key_name))
        })?;
        Ok(Value::from(key_value).coerce(field.ty).is_ok())
    }

    async fn lookup(
        &self,
        key_name: &str,
        key_value: &str,
        password: Option<&str>,
        options: &RetrieveOptions,
    ) -> Result<Option<UserInfo>, AuthError> {
        if !self.accepts(key_name, key_value)? {
            tracing::debug!(key_name, key_value, "key value does not fit the field type");
            return Ok(None);
        }
        let found = self
            .orm
            .query(USER)
            .include(&options.includes)
            .eq("disabled", options.anonymous)
            .show_writeonly(true)
            .find_by(key_name, key_value)
            .await?;
        let Some(user) = found else {
            tracing::debug!(key_name, key_value, "user not found or disabled");
            return Ok(None);
        };

        if let Some(password) = password {
            let Some(hash) = user.get_str("password") else {
                tracing::debug!(key_name, key_value, "user has no password");
                return Ok(None);
            };
            if !self.verifier.verify(password, hash) {
                tracing::debug!(key_name, key_value, "password verification failed");
                return Ok(None);
            }
        }
        Ok(Some(user_info(&user, options.anonymous)))
    }

    /// Primary keys of the named groups. Unknown names are skipped.
    async fn group_ids(&self, names: &[&str]) -> Result<Vec<JsonValue>, AuthError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let list = Value::List(names.iter().map(|name| Value::from(*name)).collect());
        let found = self.orm.query(GROUP).r#in("name", list).get().await?;
        if found.len() < names.len() {
            let known: BTreeSet<&str> = found.iter().filter_map(|g| g.get_str("name")).collect();
            let missing: Vec<&str> = names.iter().copied().filter(|n| !known.contains(n)).collect();
            tracing::warn!(?missing, "skipping unknown groups");
        }
        Ok(found.iter().filter_map(|g| g.id().cloned()).collect())
    }
}

#[async_trait]
impl<E: QueryExecutor + 'static> UserProvider for OrmUserProvider<E> {
    #[tracing::instrument(level = "debug", skip(self, password, options))]
    async fn retrieve_user(
        &self,
        key_name: &str,
        key_value: &str,
        password: Option<&str>,
        options: &RetrieveOptions,
    ) -> Result<Option<UserInfo>, AuthError> {
        let key = Self::cache_key(key_name, key_value, options.anonymous, password);
        self.cache
            .remember_some(&key, self.ttl, || {
                self.lookup(key_name, key_value, password, options)
            })
            .await
    }

    #[tracing::instrument(level = "debug", skip(self, fields))]
    async fn create_user(&self, mut fields: Row, groups: &[&str]) -> Result<Entity, AuthError> {
        rename_avatar(&mut fields);
        fields.insert("disabled".to_string(), JsonValue::Bool(false));
        fields.insert("login_at".to_string(), now());
        let group_ids = self.group_ids(groups).await?;
        if !group_ids.is_empty() {
            fields.insert("groups".to_string(), JsonValue::Array(group_ids));
        }

        let mut created = self
            .orm
            .insert_with_relations(USER, vec![JsonValue::Object(fields)])
            .await?;
        let user = created.pop().ok_or_else(|| {
            OrmError::Persistence("user insert returned no row".to_string())
        })?;
        tracing::info!(id = ?user.id(), "user created");
        Ok(user)
    }

    #[tracing::instrument(level = "debug", skip(self, fields))]
    async fn sync_user(&self, username: &str, mut fields: Row) -> Result<Entity, AuthError> {
        let mut user = self
            .orm
            .query(USER)
            .show_writeonly_fields(["password"])
            .find_by("username", username)
            .await?
            .ok_or_else(|| AuthError::UnknownUser(username.to_string()))?;

        rename_avatar(&mut fields);
        for ignored in ["id", "groups", "roles"] {
            fields.remove(ignored);
        }
        for (field, value) in fields {
            user.set(field, value);
        }
        user.set("disabled", false);
        user.set("login_at", now());
        self.orm.update(&user).await?;

        // Lookups cached with a password fingerprint expire with their TTL.
        for anonymous in [false, true] {
            self.cache
                .forget(Self::cache_key("username", username, anonymous, None))
                .await?;
        }
        Ok(user)
    }
}

fn now() -> JsonValue {
    JsonValue::String(StorageDatetime::now().to_rfc3339())
}

fn rename_avatar(fields: &mut Row) {
    if let Some(avatar) = fields.remove("avatar") {
        fields.insert("avatar_url".to_string(), avatar);
    }
}

fn collect_roles(
    roles: &[Entity],
    role_names: &mut BTreeSet<String>,
    permissions: &mut BTreeSet<String>,
) {
    for role in roles {
        role_names.extend(role.get_str("name").map(str::to_string));
        for permission in role.many("permissions") {
            permissions.extend(permission.get_str("name").map(str::to_string));
        }
    }
}

fn user_info(user: &Entity, anonymous: bool) -> UserInfo {
    let mut groups = BTreeSet::new();
    let mut roles = BTreeSet::new();
    let mut permissions = BTreeSet::new();
    for group in user.many("groups") {
        groups.extend(group.get_str("name").map(str::to_string));
        collect_roles(group.many("roles"), &mut roles, &mut permissions);
    }
    collect_roles(user.many("roles"), &mut roles, &mut permissions);

    let superadmin = permissions.contains(ADMIN_PERMISSION);
    if superadmin {
        permissions = BTreeSet::from([ADMIN_PERMISSION.to_string()]);
    }

    let text = |field: &str| user.get_str(field).unwrap_or_default().to_string();
    UserInfo {
        id: user.get_i64("id").unwrap_or_default(),
        uuid: text("uuid"),
        sub: text("uuid"),
        username: text("username"),
        email: text("email"),
        first_name: text("first_name"),
        last_name: text("last_name"),
        title: text("title"),
        avatar: text("avatar_url"),
        groups: groups.into_iter().collect(),
        roles: roles.into_iter().collect(),
        permissions: permissions.into_iter().collect(),
        superadmin,
        authenticated: !anonymous,
    }
}
