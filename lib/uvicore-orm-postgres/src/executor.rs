//! PostgreSQL implementation of QueryExecutor.

const DEFAULT_MAX_CONNECTIONS: u32 = 16;

use std::ops::Deref;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::{Postgres, Row as _, Transaction};
use uvicore_orm::{
    ConnectionConfig, DatabaseConnection, Delete, Filter, Insert, Join, Order, OrmError, Query,
    QueryExecutor, Row, Table, TransactionExecutor, Update, split_path,
};

use crate::bind::{bind_filters, bind_value, decode_row, extract_column_value};
use crate::ddl::{create_table_sql, drop_table_sql};

fn sqlx_error(e: sqlx::Error) -> OrmError {
    OrmError::Persistence(e.to_string())
}

/// Wrapper around sqlx::PgPool that implements QueryExecutor.
#[derive(Clone, Debug)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    /// Create a new PgPool from an sqlx PgPool.
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self(pool)
    }

    /// Get the inner sqlx::PgPool.
    pub fn inner(&self) -> &sqlx::PgPool {
        &self.0
    }
}

impl Deref for PgPool {
    type Target = sqlx::PgPool;

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

/// Build a WHERE clause from filters, numbering parameters from `start_param`.
fn build_where_clause(filters: &[Filter], start_param: usize) -> String {
    if filters.is_empty() {
        return String::new();
    }

    let mut param_idx = start_param;
    let mut next = || {
        let p = format!("${}", param_idx);
        param_idx += 1;
        p
    };

    let clauses: Vec<String> = filters
        .iter()
        .map(|filter| {
            let field = quote_path(filter.field());
            match filter {
                Filter::Eq(..) => format!("{} = {}", field, next()),
                Filter::Ne(..) => format!("{} != {}", field, next()),
                Filter::Gt(..) => format!("{} > {}", field, next()),
                Filter::Gte(..) => format!("{} >= {}", field, next()),
                Filter::Lt(..) => format!("{} < {}", field, next()),
                Filter::Lte(..) => format!("{} <= {}", field, next()),
                Filter::In(..) => format!("{} = ANY({})", field, next()),
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
        build_where_clause(&query.filters, 1)
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
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = query.offset {
        sql.push_str(&format!(" OFFSET {}", offset));
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
        let placeholders: Vec<String> = (1..=insert.values.len()).map(|i| format!("${}", i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&insert.table),
            cols.join(", "),
            placeholders.join(", ")
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
        .enumerate()
        .map(|(i, a)| format!("{} = ${}", quote_ident(&a.column), i + 1))
        .collect();
    format!(
        "UPDATE {} SET {}{}",
        quote_ident(&update.table),
        sets.join(", "),
        build_where_clause(&update.filters, update.values.len() + 1)
    )
}

pub(crate) fn build_delete(delete: &Delete) -> String {
    format!(
        "DELETE FROM {}{}",
        quote_ident(&delete.table),
        build_where_clause(&delete.filters, 1)
    )
}

fn filter_args(filters: &[Filter]) -> Result<PgArguments, OrmError> {
    let mut args = PgArguments::default();
    bind_filters(&mut args, filters)?;
    Ok(args)
}

fn insert_args(insert: &Insert) -> Result<PgArguments, OrmError> {
    let mut args = PgArguments::default();
    for assignment in &insert.values {
        bind_value(&mut args, &assignment.value, assignment.ty)?;
    }
    Ok(args)
}

fn update_args(update: &Update) -> Result<PgArguments, OrmError> {
    let mut args = PgArguments::default();
    for assignment in &update.values {
        bind_value(&mut args, &assignment.value, assignment.ty)?;
    }
    bind_filters(&mut args, &update.filters)?;
    Ok(args)
}

// Statement runners shared by the pool and transactions.

async fn run_fetch<'e, X>(executor: X, query: &Query) -> Result<Vec<Row>, OrmError>
where
    X: sqlx::Executor<'e, Database = Postgres>,
{
    let sql = build_select(query);
    tracing::trace!(%sql, "fetch");
    let rows = sqlx::query_with(&sql, filter_args(&query.filters)?)
        .fetch_all(executor)
        .await
        .map_err(sqlx_error)?;
    rows.iter().map(decode_row).collect()
}

async fn run_exists<'e, X>(executor: X, query: &Query) -> Result<bool, OrmError>
where
    X: sqlx::Executor<'e, Database = Postgres>,
{
    let sql = build_exists(query);
    let row = sqlx::query_with(&sql, filter_args(&query.filters)?)
        .fetch_one(executor)
        .await
        .map_err(sqlx_error)?;
    row.try_get::<bool, _>(0).map_err(sqlx_error)
}

async fn run_insert<'e, X>(executor: X, insert: &Insert) -> Result<Option<JsonValue>, OrmError>
where
    X: sqlx::Executor<'e, Database = Postgres>,
{
    let sql = build_insert(insert);
    tracing::trace!(%sql, "insert");
    let query = sqlx::query_with(&sql, insert_args(insert)?);
    if insert.returning.is_none() {
        query.execute(executor).await.map_err(sqlx_error)?;
        return Ok(None);
    }
    let row = query.fetch_one(executor).await.map_err(sqlx_error)?;
    extract_column_value(&row, 0).map(Some)
}

async fn run_update<'e, X>(executor: X, update: &Update) -> Result<u64, OrmError>
where
    X: sqlx::Executor<'e, Database = Postgres>,
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
    X: sqlx::Executor<'e, Database = Postgres>,
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
impl QueryExecutor for PgPool {
    type Transaction = PgTransaction;

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
        Ok(PgTransaction { tx })
    }
}

#[async_trait]
impl DatabaseConnection for PgPool {
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, OrmError> {
        let config = config.into();
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS))
            .connect(&config.url)
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

/// PostgreSQL transaction wrapper implementing TransactionExecutor.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl TransactionExecutor for PgTransaction {
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

#[cfg(test)]
mod tests {
    use super::*;
    use uvicore_orm::{FieldType, Value};

    #[test]
    fn select_quotes_paths_and_numbers_parameters() {
        let query = Query::for_table("tags")
            .select("tags.id", "id", FieldType::Int)
            .select("post_tags.post_id", "__pivot_owner", FieldType::Int)
            .join("post_tags", "tags.id", "post_tags.tag_id")
            .r#in("post_tags.post_id", vec![1i64, 2])
            .eq("tags.name", "rust")
            .order_by("tags.id", Order::Desc)
            .limit(10);

        assert_eq!(
            build_select(&query),
            "SELECT \"tags\".\"id\" AS \"id\", \"post_tags\".\"post_id\" AS \"__pivot_owner\" \
             FROM \"tags\" JOIN \"post_tags\" ON \"tags\".\"id\" = \"post_tags\".\"tag_id\" \
             WHERE \"post_tags\".\"post_id\" = ANY($1) AND \"tags\".\"name\" = $2 \
             ORDER BY \"tags\".\"id\" DESC LIMIT 10"
        );
    }

    #[test]
    fn insert_returns_primary_key() {
        let insert = Insert::into_table("users")
            .value("email", Value::from("a@b.c"), FieldType::String)
            .value("password", Value::Null, FieldType::String)
            .returning("id", FieldType::Int);
        assert_eq!(
            build_insert(&insert),
            "INSERT INTO \"users\" (\"email\", \"password\") VALUES ($1, $2) RETURNING \"id\""
        );

        let empty = Insert::into_table("users").returning("id", FieldType::Int);
        assert_eq!(
            build_insert(&empty),
            "INSERT INTO \"users\" DEFAULT VALUES RETURNING \"id\""
        );
    }

    #[test]
    fn update_parameters_follow_assignments() {
        let update = Update::table("posts")
            .set("title", Value::from("x"), FieldType::String)
            .eq("posts.id", 3i64);
        assert_eq!(
            build_update(&update),
            "UPDATE \"posts\" SET \"title\" = $1 WHERE \"posts\".\"id\" = $2"
        );
    }

    #[test]
    fn delete_and_exists() {
        let delete = Delete::from_table("post_tags").eq("post_tags.post_id", 1i64);
        assert_eq!(
            build_delete(&delete),
            "DELETE FROM \"post_tags\" WHERE \"post_tags\".\"post_id\" = $1"
        );

        let query = Query::for_table("tags").filter(Filter::IsNull("tags.name".to_string()));
        assert_eq!(
            build_exists(&query),
            "SELECT EXISTS(SELECT 1 FROM \"tags\" WHERE \"tags\".\"name\" IS NULL)"
        );
    }
}
