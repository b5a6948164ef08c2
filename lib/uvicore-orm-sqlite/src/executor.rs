//! SQLite implementation of QueryExecutor.

const DEFAULT_MAX_CONNECTIONS: u32 = 8;

use std::collections::HashMap;
use std::ops::Deref;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row as _, Sqlite, Transaction};
use uvicore_orm::{
    ConnectionConfig, DatabaseConnection, Delete, FieldType, Filter, Insert, Join, Order,
    OrmError, Query, QueryExecutor, Row, Table, TransactionExecutor, Update, Value, split_path,
};

use crate::bind::{bind_filters, bind_value, decode_row, decode_typed};
use crate::ddl::{create_table_sql, drop_table_sql};

fn sqlx_error(e: sqlx::Error) -> OrmError {
    OrmError::Persistence(e.to_string())
}

/// Wrapper around sqlx::SqlitePool that implements QueryExecutor.
#[derive(Clone, Debug)]
pub struct SqlitePool(sqlx::SqlitePool);

impl SqlitePool {
    /// Create a new SqlitePool from an sqlx SqlitePool.
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self(pool)
    }

    /// A private in-memory database.
    ///
    /// The pool holds one connection that is never recycled, so the
    /// database lives as long as the pool.
    pub async fn memory() -> Result<Self, OrmError> {
        Self::connect("sqlite::memory:").await
    }

    /// Get the inner sqlx::SqlitePool.
    pub fn inner(&self) -> &sqlx::SqlitePool {
        &self.0
    }
}

impl Deref for SqlitePool {
    type Target = sqlx::SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Quote a single identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a `table.column` path, or a bare column.
pub(crate) fn quote_path(path: &str) -> String {
    match split_path(path) {
        (Some(table), column) => format!("{}.{}", quote_ident(table), quote_ident(column)),
        (None, column) => quote_ident(column),
    }
}

/// Build a WHERE clause from filters. `IN` lists expand to one placeholder
/// per element; an empty list matches nothing.
fn build_where_clause(filters: &[Filter]) -> String {
    if filters.is_empty() {
        return String::new();
    }

    let clauses: Vec<String> = filters
        .iter()
        .map(|filter| {
            let field = quote_path(filter.field());
            match filter {
                Filter::Eq(..) => format!("{} = ?", field),
                Filter::Ne(..) => format!("{} != ?", field),
                Filter::Gt(..) => format!("{} > ?", field),
                Filter::Gte(..) => format!("{} >= ?", field),
                Filter::Lt(..) => format!("{} < ?", field),
                Filter::Lte(..) => format!("{} <= ?", field),
                Filter::In(_, Value::List(items)) if items.is_empty() => "1 = 0".to_string(),
                Filter::In(_, Value::List(items)) => {
                    format!("{} IN ({})", field, vec!["?"; items.len()].join(", "))
                }
                Filter::In(..) => format!("{} IN (?)", field),
                Filter::IsNull(_) => format!("{} IS NULL", field),
                Filter::IsNotNull(_) => format!("{} IS NOT NULL", field),
            }
        })
        .collect();

    format!(" WHERE {}", clauses.join(" AND "))
}

/// Build ORDER BY clause.
fn build_order_clause(order_by: &[(String, Order)]) -> String {
    if order_by.is_empty() {
        return String::new();
    }

    let clauses: Vec<String> = order_by
        .iter()
        .map(|(field, order)| {
            let dir = match order {
                Order::Asc => "ASC",
                Order::Desc => "DESC",
            };
            format!("{} {}", quote_path(field), dir)
        })
        .collect();

    format!(" ORDER BY {}", clauses.join(", "))
}

/// Build JOIN clauses.
fn build_join_clause(joins: &[Join]) -> String {
    joins
        .iter()
        .map(|join| {
            format!(
                " JOIN {} ON {} = {}",
                quote_ident(&join.table),
                quote_path(&join.left_field),
                quote_path(&join.right_field)
            )
        })
        .collect()
}

fn build_from(query: &Query) -> String {
    format!(
        "{}{}{}",
        quote_ident(&query.table),
        build_join_clause(&query.joins),
        build_where_clause(&query.filters)
    )
}

pub(crate) fn build_select(query: &Query) -> String {
    let columns = if query.columns.is_empty() {
        format!("{}.*", quote_ident(&query.table))
    } else {
        query
            .columns
            .iter()
            .map(|c| format!("{} AS {}", quote_path(&c.path), quote_ident(&c.alias)))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut sql = format!(
        "SELECT {} FROM {}{}",
        columns,
        build_from(query),
        build_order_clause(&query.order_by)
    );
    match (query.limit, query.offset) {
        (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
        (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
        // SQLite requires a LIMIT before OFFSET
        (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
        (None, None) => {}
    }
    sql
}

pub(crate) fn build_exists(query: &Query) -> String {
    format!("SELECT EXISTS(SELECT 1 FROM {})", build_from(query))
}

pub(crate) fn build_insert(insert: &Insert) -> String {
    let mut sql = if insert.values.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&insert.table))
    } else {
        let cols: Vec<String> = insert.values.iter().map(|a| quote_ident(&a.column)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&insert.table),
            cols.join(", "),
            vec!["?"; insert.values.len()].join(", ")
        )
    };
    if let Some((column, _)) = &insert.returning {
        sql.push_str(&format!(" RETURNING {}", quote_ident(column)));
    }
    sql
}

pub(crate) fn build_update(update: &Update) -> String {
    let sets: Vec<String> = update
        .values
        .iter()
        .map(|a| format!("{} = ?", quote_ident(&a.column)))
        .collect();
    format!(
        "UPDATE {} SET {}{}",
        quote_ident(&update.table),
        sets.join(", "),
        build_where_clause(&update.filters)
    )
}

pub(crate) fn build_delete(delete: &Delete) -> String {
    format!(
        "DELETE FROM {}{}",
        quote_ident(&delete.table),
        build_where_clause(&delete.filters)
    )
}

fn filter_args<'q>(filters: &[Filter]) -> Result<SqliteArguments<'q>, OrmError> {
    let mut args = SqliteArguments::default();
    bind_filters(&mut args, filters)?;
    Ok(args)
}

fn insert_args<'q>(insert: &Insert) -> Result<SqliteArguments<'q>, OrmError> {
    let mut args = SqliteArguments::default();
    for assignment in &insert.values {
        bind_value(&mut args, &assignment.value, assignment.ty)?;
    }
    Ok(args)
}

fn update_args<'q>(update: &Update) -> Result<SqliteArguments<'q>, OrmError> {
    let mut args = SqliteArguments::default();
    for assignment in &update.values {
        bind_value(&mut args, &assignment.value, assignment.ty)?;
    }
    bind_filters(&mut args, &update.filters)?;
    Ok(args)
}

fn column_types(query: &Query) -> HashMap<&str, FieldType> {
    query
        .columns
        .iter()
        .map(|c| (c.alias.as_str(), c.ty))
        .collect()
}

// Statement runners shared by the pool and transactions.

async fn run_fetch<'e, X>(executor: X, query: &Query) -> Result<Vec<Row>, OrmError>
where
    X: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = build_select(query);
    tracing::trace!(%sql, "fetch");
    let rows = sqlx::query_with(&sql, filter_args(&query.filters)?)
        .fetch_all(executor)
        .await
        .map_err(sqlx_error)?;
    let types = column_types(query);
    rows.iter().map(|row| decode_row(row, &types)).collect()
}

async fn run_exists<'e, X>(executor: X, query: &Query) -> Result<bool, OrmError>
where
    X: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = build_exists(query);
    let row = sqlx::query_with(&sql, filter_args(&query.filters)?)
        .fetch_one(executor)
        .await
        .map_err(sqlx_error)?;
    Ok(row.try_get::<i64, _>(0).map_err(sqlx_error)? != 0)
}

async fn run_insert<'e, X>(executor: X, insert: &Insert) -> Result<Option<JsonValue>, OrmError>
where
    X: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = build_insert(insert);
    tracing::trace!(%sql, "insert");
    let query = sqlx::query_with(&sql, insert_args(insert)?);
    let Some((_, ty)) = &insert.returning else {
        query.execute(executor).await.map_err(sqlx_error)?;
        return Ok(None);
    };
    let row = query.fetch_one(executor).await.map_err(sqlx_error)?;
    decode_typed(&row, 0, *ty).map(Some)
}

async fn run_update<'e, X>(executor: X, update: &Update) -> Result<u64, OrmError>
where
    X: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = build_update(update);
    tracing::trace!(%sql, "update");
    let result = sqlx::query_with(&sql, update_args(update)?)
        .execute(executor)
        .await
        .map_err(sqlx_error)?;
    Ok(result.rows_affected())
}

async fn run_delete<'e, X>(executor: X, delete: &Delete) -> Result<u64, OrmError>
where
    X: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = build_delete(delete);
    tracing::trace!(%sql, "delete");
    let result = sqlx::query_with(&sql, filter_args(&delete.filters)?)
        .execute(executor)
        .await
        .map_err(sqlx_error)?;
    Ok(result.rows_affected())
}

#[async_trait]
impl QueryExecutor for SqlitePool {
    type Transaction = SqliteTransaction;

    async fn fetch(&self, query: &Query) -> Result<Vec<Row>, OrmError> {
        run_fetch(&self.0, query).await
    }

    async fn exists(&self, query: &Query) -> Result<bool, OrmError> {
        run_exists(&self.0, query).await
    }

    async fn insert(&self, insert: &Insert) -> Result<Option<JsonValue>, OrmError> {
        run_insert(&self.0, insert).await
    }

    async fn update(&self, update: &Update) -> Result<u64, OrmError> {
        run_update(&self.0, update).await
    }

    async fn delete(&self, delete: &Delete) -> Result<u64, OrmError> {
        run_delete(&self.0, delete).await
    }

    async fn begin_transaction(&self) -> Result<Self::Transaction, OrmError> {
        let tx = self.0.begin().await.map_err(sqlx_error)?;
        Ok(SqliteTransaction { tx })
    }
}

#[async_trait]
impl DatabaseConnection for SqlitePool {
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, OrmError> {
        let config = config.into();
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(sqlx_error)?
            .create_if_missing(true);

        let pool_options = if config.url.contains(":memory:") {
            // Every connection to :memory: opens its own database
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
                .max_connections(config.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS))
        };
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(sqlx_error)?;
        Ok(Self(pool))
    }

    async fn create_tables(&self, tables: &[Table]) -> Result<(), OrmError> {
        for table in tables {
            let sql = create_table_sql(table);
            tracing::debug!(table = %table.name, "creating table");
            sqlx::query(&sql).execute(&self.0).await.map_err(sqlx_error)?;
        }
        Ok(())
    }

    async fn drop_tables(&self, tables: &[Table]) -> Result<(), OrmError> {
        for table in tables.iter().rev() {
            let sql = drop_table_sql(table);
            sqlx::query(&sql).execute(&self.0).await.map_err(sqlx_error)?;
        }
        Ok(())
    }
}

/// SQLite transaction wrapper implementing TransactionExecutor.
pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl TransactionExecutor for SqliteTransaction {
    async fn fetch(&mut self, query: &Query) -> Result<Vec<Row>, OrmError> {
        run_fetch(&mut *self.tx, query).await
    }

    async fn exists(&mut self, query: &Query) -> Result<bool, OrmError> {
        run_exists(&mut *self.tx, query).await
    }

    async fn insert(&mut self, insert: &Insert) -> Result<Option<JsonValue>, OrmError> {
        run_insert(&mut *self.tx, insert).await
    }

    async fn update(&mut self, update: &Update) -> Result<u64, OrmError> {
        run_update(&mut *self.tx, update).await
    }

    async fn delete(&mut self, delete: &Delete) -> Result<u64, OrmError> {
        run_delete(&mut *self.tx, delete).await
    }

    async fn commit(self) -> Result<(), OrmError> {
        self.tx.commit().await.map_err(sqlx_error)
    }

    async fn rollback(self) -> Result<(), OrmError> {
        self.tx.rollback().await.map_err(sqlx_error)
    }
}
