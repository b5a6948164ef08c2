//! In-memory executor recording every statement, for engine unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};

use crate::entity::{EntityDef, Field};
use crate::query::{
    Delete, Filter, Insert, Query, QueryExecutor, TransactionExecutor, Update, split_path,
};
use crate::record::Row;
use crate::registry::{Registry, RegistryBuilder};
use crate::relation::RelationDecl;
use crate::OrmError;

#[derive(Debug, Default, Clone)]
struct Tables {
    rows: HashMap<String, Vec<Row>>,
    next_id: HashMap<String, i64>,
}

#[derive(Debug, Default)]
struct State {
    tables: Tables,
    log: Vec<String>,
    fail_on_insert: Option<String>,
    fail_on_commit: bool,
    fail_on_rollback: bool,
}

fn matches(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| {
        let (_, column) = split_path(filter.field());
        let cell = row.get(column).cloned().unwrap_or(JsonValue::Null);
        match filter {
            Filter::Eq(_, v) => cell == v.to_json(),
            Filter::Ne(_, v) => cell != v.to_json(),
            Filter::In(_, v) => match v.to_json() {
                JsonValue::Array(items) => items.contains(&cell),
                other => cell == other,
            },
            Filter::IsNull(_) => cell.is_null(),
            Filter::IsNotNull(_) => !cell.is_null(),
            Filter::Gt(..) | Filter::Gte(..) | Filter::Lt(..) | Filter::Lte(..) => true,
        }
    })
}

impl State {
    fn fetch(&mut self, query: &Query) -> Vec<Row> {
        self.log.push(format!("select {}", query.table));
        let rows = self.tables.rows.get(&query.table).cloned().unwrap_or_default();
        let mut selected: Vec<Row> = rows
            .iter()
            .filter(|row| matches(row, &query.filters))
            .map(|row| {
                query
                    .columns
                    .iter()
                    .map(|c| {
                        let (_, column) = split_path(&c.path);
                        (c.alias.clone(), row.get(column).cloned().unwrap_or(JsonValue::Null))
                    })
                    .collect()
            })
            .collect();
        if let Some(limit) = query.limit {
            selected.truncate(limit as usize);
        }
        selected
    }

    fn exists(&mut self, query: &Query) -> bool {
        self.log.push(format!("exists {}", query.table));
        self.tables
            .rows
            .get(&query.table)
            .is_some_and(|rows| rows.iter().any(|row| matches(row, &query.filters)))
    }

    fn insert(&mut self, insert: &Insert) -> Result<Option<JsonValue>, OrmError> {
        self.log.push(format!("insert {}", insert.table));
        if self.fail_on_insert.as_deref() == Some(insert.table.as_str()) {
            return Err(OrmError::Persistence(format!("insert into {} rejected", insert.table)));
        }
        let mut row: Row = insert
            .values
            .iter()
            .map(|a| (a.column.clone(), a.value.to_json()))
            .collect();
        let mut returned = None;
        if let Some((column, _)) = &insert.returning {
            let id = match row.get(column).and_then(JsonValue::as_i64) {
                Some(id) => id,
                None => {
                    let next = self.tables.next_id.entry(insert.table.clone()).or_insert(0);
                    *next += 1;
                    *next
                }
            };
            row.insert(column.clone(), json!(id));
            returned = Some(json!(id));
        }
        self.tables.rows.entry(insert.table.clone()).or_default().push(row);
        Ok(returned)
    }

    fn update(&mut self, update: &Update) -> u64 {
        self.log.push(format!("update {}", update.table));
        let mut affected = 0;
        if let Some(rows) = self.tables.rows.get_mut(&update.table) {
            for row in rows.iter_mut().filter(|row| matches(row, &update.filters)) {
                for a in &update.values {
                    row.insert(a.column.clone(), a.value.to_json());
                }
                affected += 1;
            }
        }
        affected
    }

    fn delete(&mut self, delete: &Delete) -> u64 {
        self.log.push(format!("delete {}", delete.table));
        let Some(rows) = self.tables.rows.get_mut(&delete.table) else {
            return 0;
        };
        let before = rows.len();
        rows.retain(|row| !matches(row, &delete.filters));
        (before - rows.len()) as u64
    }
}

/// Shared in-memory store. Clones see the same state.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingExecutor {
    state: Arc<Mutex<State>>,
}

impl RecordingExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Statements issued so far, as `"<kind> <table>"`.
    pub(crate) fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    /// Inserts only, as table names in execution order.
    pub(crate) fn inserts(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|l| l.strip_prefix("insert ").map(str::to_string))
            .collect()
    }

    pub(crate) fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .unwrap()
            .tables
            .rows
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn fail_inserts_into(&self, table: &str) {
        self.state.lock().unwrap().fail_on_insert = Some(table.to_string());
    }

    pub(crate) fn fail_commits(&self) {
        self.state.lock().unwrap().fail_on_commit = true;
    }

    /// Rollbacks error out and leave the written rows in place.
    pub(crate) fn fail_rollbacks(&self) {
        self.state.lock().unwrap().fail_on_rollback = true;
    }
}

pub(crate) struct RecordingTransaction {
    state: Arc<Mutex<State>>,
    snapshot: Tables,
}

#[async_trait]
impl QueryExecutor for RecordingExecutor {
    type Transaction = RecordingTransaction;

    async fn fetch(&self, query: &Query) -> Result<Vec<Row>, OrmError> {
        Ok(self.state.lock().unwrap().fetch(query))
    }

    async fn exists(&self, query: &Query) -> Result<bool, OrmError> {
        Ok(self.state.lock().unwrap().exists(query))
    }

    async fn insert(&self, insert: &Insert) -> Result<Option<JsonValue>, OrmError> {
        self.state.lock().unwrap().insert(insert)
    }

    async fn update(&self, update: &Update) -> Result<u64, OrmError> {
        Ok(self.state.lock().unwrap().update(update))
    }

    async fn delete(&self, delete: &Delete) -> Result<u64, OrmError> {
        Ok(self.state.lock().unwrap().delete(delete))
    }

    async fn begin_transaction(&self) -> Result<Self::Transaction, OrmError> {
        let mut state = self.state.lock().unwrap();
        state.log.push("begin".to_string());
        Ok(RecordingTransaction {
            state: Arc::clone(&self.state),
            snapshot: state.tables.clone(),
        })
    }
}

#[async_trait]
impl TransactionExecutor for RecordingTransaction {
    async fn fetch(&mut self, query: &Query) -> Result<Vec<Row>, OrmError> {
        Ok(self.state.lock().unwrap().fetch(query))
    }

    async fn exists(&mut self, query: &Query) -> Result<bool, OrmError> {
        Ok(self.state.lock().unwrap().exists(query))
    }

    async fn insert(&mut self, insert: &Insert) -> Result<Option<JsonValue>, OrmError> {
        self.state.lock().unwrap().insert(insert)
    }

    async fn update(&mut self, update: &Update) -> Result<u64, OrmError> {
        Ok(self.state.lock().unwrap().update(update))
    }

    async fn delete(&mut self, delete: &Delete) -> Result<u64, OrmError> {
        Ok(self.state.lock().unwrap().delete(delete))
    }

    async fn commit(self) -> Result<(), OrmError> {
        let mut state = self.state.lock().unwrap();
        state.log.push("commit".to_string());
        if state.fail_on_commit {
            return Err(OrmError::Persistence("commit refused".to_string()));
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), OrmError> {
        let mut state = self.state.lock().unwrap();
        state.log.push("rollback".to_string());
        if state.fail_on_rollback {
            return Err(OrmError::Persistence("rollback refused".to_string()));
        }
        state.tables = self.snapshot;
        Ok(())
    }
}

/// Blog schema used across engine tests.
pub(crate) fn blog_registry() -> Registry {
    RegistryBuilder::new()
        .entity(
            EntityDef::new("user", "users")
                .field(Field::int("id").primary())
                .field(Field::string("email"))
                .field(Field::string("password").nullable().write_only())
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
                .field(Field::foreign_key("post_id")),
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
        .unwrap()
}
