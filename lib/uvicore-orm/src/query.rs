//! Database-agnostic statements and the executor traits backends implement.
//!
//! Statements carry fully qualified identifiers (`table.column`) and typed
//! values; each backend renders its own SQL dialect from them.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::record::Row;
use crate::schema::FieldType;
use crate::{OrmError, StorageDatetime};

/// A value that can be bound to a query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Datetime(StorageDatetime),
    Json(JsonValue),
    List(Vec<Value>),
    Null,
}

impl Value {
    /// Convert a JSON cell into a bind value of the given column type.
    ///
    /// Integer columns accept integral numbers and numeric strings; bool
    /// columns accept `0`/`1` and `"true"`/`"false"`; datetime columns accept
    /// RFC 3339 strings.
    pub fn from_json(json: &JsonValue, ty: FieldType) -> Result<Value, String> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        match ty {
            FieldType::Int | FieldType::ForeignKey => match json {
                JsonValue::Number(n) => n
                    .as_i64()
                    .map(Value::Int)
                    .ok_or_else(|| format!("expected integer, got {}", n)),
                JsonValue::String(s) => s
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| format!("expected integer, got '{}'", s)),
                other => Err(format!("expected integer, got {}", other)),
            },
            FieldType::Float => json
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| format!("expected number, got {}", json)),
            FieldType::Bool => match json {
                JsonValue::Bool(b) => Ok(Value::Bool(*b)),
                JsonValue::Number(n) if n.as_i64() == Some(0) => Ok(Value::Bool(false)),
                JsonValue::Number(n) if n.as_i64() == Some(1) => Ok(Value::Bool(true)),
                JsonValue::String(s) => match s.as_str() {
                    "0" | "false" => Ok(Value::Bool(false)),
                    "1" | "true" => Ok(Value::Bool(true)),
                    _ => Err(format!("expected boolean, got '{}'", s)),
                },
                other => Err(format!("expected boolean, got {}", other)),
            },
            FieldType::String => match json {
                JsonValue::String(s) => Ok(Value::String(s.clone())),
                JsonValue::Number(n) => Ok(Value::String(n.to_string())),
                JsonValue::Bool(b) => Ok(Value::String(b.to_string())),
                other => Err(format!("expected string, got {}", other)),
            },
            FieldType::Datetime => match json {
                JsonValue::String(s) => StorageDatetime::parse(s)
                    .map(Value::Datetime)
                    .map_err(|e| e.to_string()),
                other => Err(format!("expected datetime string, got {}", other)),
            },
            FieldType::Json => Ok(Value::Json(json.clone())),
        }
    }

    /// Best-effort conversion for filter values, where no column type is known.
    pub fn from_untyped(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => Value::List(items.iter().map(Value::from_untyped).collect()),
            JsonValue::Object(_) => Value::Json(json.clone()),
        }
    }

    /// JSON form of the value, as a backend would return it.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Int(n) => JsonValue::from(*n),
            Value::Float(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Datetime(dt) => JsonValue::String(dt.to_rfc3339()),
            Value::Json(v) => v.clone(),
            Value::List(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Null => JsonValue::Null,
        }
    }

    /// Re-type a value for a column of type `ty`. Lists are re-typed element-wise.
    pub fn coerce(self, ty: FieldType) -> Result<Value, String> {
        match self {
            Value::List(items) => items
                .into_iter()
                .map(|v| v.coerce(ty))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Value::Json(v) if ty != FieldType::Json => Value::from_json(&v, ty),
            Value::Json(v) => Ok(Value::Json(v)),
            other => Value::from_json(&other.to_json(), ty),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<StorageDatetime> for Value {
    fn from(dt: StorageDatetime) -> Self {
        Value::Datetime(dt)
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        Value::from_untyped(&json)
    }
}

impl From<&JsonValue> for Value {
    fn from(json: &JsonValue) -> Self {
        Value::from_untyped(json)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<'a> From<&[&'a str]> for Value {
    fn from(v: &[&'a str]) -> Self {
        Value::List(v.iter().map(|s| Value::from(*s)).collect())
    }
}

/// Filter conditions for queries. Fields are qualified column paths.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// field = value
    Eq(String, Value),
    /// field != value
    Ne(String, Value),
    /// field > value
    Gt(String, Value),
    /// field >= value
    Gte(String, Value),
    /// field < value
    Lt(String, Value),
    /// field <= value
    Lte(String, Value),
    /// field IN (values)
    In(String, Value),
    /// field IS NULL
    IsNull(String),
    /// field IS NOT NULL
    IsNotNull(String),
}

impl Filter {
    pub fn field(&self) -> &str {
        match self {
            Filter::Eq(f, _)
            | Filter::Ne(f, _)
            | Filter::Gt(f, _)
            | Filter::Gte(f, _)
            | Filter::Lt(f, _)
            | Filter::Lte(f, _)
            | Filter::In(f, _)
            | Filter::IsNull(f)
            | Filter::IsNotNull(f) => f,
        }
    }

    /// Same condition against another field path.
    pub fn with_field(self, field: String) -> Filter {
        match self {
            Filter::Eq(_, v) => Filter::Eq(field, v),
            Filter::Ne(_, v) => Filter::Ne(field, v),
            Filter::Gt(_, v) => Filter::Gt(field, v),
            Filter::Gte(_, v) => Filter::Gte(field, v),
            Filter::Lt(_, v) => Filter::Lt(field, v),
            Filter::Lte(_, v) => Filter::Lte(field, v),
            Filter::In(_, v) => Filter::In(field, v),
            Filter::IsNull(_) => Filter::IsNull(field),
            Filter::IsNotNull(_) => Filter::IsNotNull(field),
        }
    }

    /// Same condition with its value re-typed for a column of type `ty`.
    pub fn coerce(self, ty: FieldType) -> Result<Filter, String> {
        Ok(match self {
            Filter::Eq(f, v) => Filter::Eq(f, v.coerce(ty)?),
            Filter::Ne(f, v) => Filter::Ne(f, v.coerce(ty)?),
            Filter::Gt(f, v) => Filter::Gt(f, v.coerce(ty)?),
            Filter::Gte(f, v) => Filter::Gte(f, v.coerce(ty)?),
            Filter::Lt(f, v) => Filter::Lt(f, v.coerce(ty)?),
            Filter::Lte(f, v) => Filter::Lte(f, v.coerce(ty)?),
            Filter::In(f, v) => Filter::In(f, v.coerce(ty)?),
            Filter::IsNull(f) => Filter::IsNull(f),
            Filter::IsNotNull(f) => Filter::IsNotNull(f),
        })
    }
}

/// Sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// The table to join.
    pub table: String,
    /// The field on the left table (main table).
    pub left_field: String,
    /// The field on the right table (joined table).
    pub right_field: String,
}

/// One selected expression, decoded as `ty` under `alias`.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectColumn {
    /// Qualified column path (`table.column`).
    pub path: String,
    pub alias: String,
    pub ty: FieldType,
}

/// A SELECT statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// The table to query.
    pub table: String,
    /// Selected columns; rows come back keyed by alias.
    pub columns: Vec<SelectColumn>,
    /// JOIN clauses.
    pub joins: Vec<Join>,
    /// Filter conditions, AND-ed.
    pub filters: Vec<Filter>,
    /// Order by clauses.
    pub order_by: Vec<(String, Order)>,
    /// Maximum number of results.
    pub limit: Option<u64>,
    /// Offset for pagination.
    pub offset: Option<u64>,
}

impl Query {
    /// Create a new query for a table.
    pub fn for_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            joins: Vec::new(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Select a column of the main table under its own name.
    pub fn column(self, column: &str, ty: FieldType) -> Self {
        let path = format!("{}.{}", self.table, column);
        self.select(path, column, ty)
    }

    /// Select an arbitrary qualified path under an alias.
    pub fn select(mut self, path: impl Into<String>, alias: impl Into<String>, ty: FieldType) -> Self {
        self.columns.push(SelectColumn {
            path: path.into(),
            alias: alias.into(),
            ty,
        });
        self
    }

    /// Add a JOIN clause.
    ///
    /// Joins `join_table` where `left_field` (on main table) equals `right_field` (on join table).
    pub fn join(
        mut self,
        join_table: impl Into<String>,
        left_field: impl Into<String>,
        right_field: impl Into<String>,
    ) -> Self {
        self.joins.push(Join {
            table: join_table.into(),
            left_field: left_field.into(),
            right_field: right_field.into(),
        });
        self
    }

    /// Add a filter condition.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add an equality filter (shorthand for Filter::Eq).
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.into(), value.into()))
    }

    /// Add an IN filter (shorthand for Filter::In).
    pub fn r#in(self, field: impl Into<String>, values: impl Into<Value>) -> Self {
        self.filter(Filter::In(field.into(), values.into()))
    }

    /// Add an order-by clause.
    pub fn order_by(mut self, field: impl Into<String>, order: Order) -> Self {
        self.order_by.push((field.into(), order));
        self
    }

    /// Set the maximum number of results.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the offset for pagination.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// A column value written by an INSERT or UPDATE.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Value,
    /// Column type, used to bind typed NULLs.
    pub ty: FieldType,
}

/// An INSERT statement for a single row.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub values: Vec<Assignment>,
    /// Column whose generated value is returned in the same round trip.
    pub returning: Option<(String, FieldType)>,
}

impl Insert {
    pub fn into_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Vec::new(),
            returning: None,
        }
    }

    pub fn value(mut self, column: impl Into<String>, value: Value, ty: FieldType) -> Self {
        self.values.push(Assignment {
            column: column.into(),
            value,
            ty,
        });
        self
    }

    pub fn returning(mut self, column: impl Into<String>, ty: FieldType) -> Self {
        self.returning = Some((column.into(), ty));
        self
    }
}

/// An UPDATE statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub values: Vec<Assignment>,
    pub filters: Vec<Filter>,
}

impl Update {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: Value, ty: FieldType) -> Self {
        self.values.push(Assignment {
            column: column.into(),
            value,
            ty,
        });
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.into(), value.into()))
    }
}

/// A DELETE query builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    /// The table to delete from.
    pub table: String,
    /// Filter conditions.
    pub filters: Vec<Filter>,
}

impl Delete {
    pub fn from_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
        }
    }

    /// Add a filter condition.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add an equality filter (shorthand).
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.into(), value.into()))
    }

    /// Add an IN filter.
    pub fn r#in(self, field: impl Into<String>, values: impl Into<Value>) -> Self {
        self.filter(Filter::In(field.into(), values.into()))
    }
}

/// Trait for executing statements against a database backend.
///
/// Implemented by database-specific pool types (e.g., PgPool, SqlitePool).
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// The transaction type for this executor.
    type Transaction: TransactionExecutor;

    /// Execute a SELECT query and return rows keyed by column alias.
    async fn fetch(&self, query: &Query) -> Result<Vec<Row>, OrmError>;

    /// Check if any rows match the query (SELECT EXISTS).
    async fn exists(&self, query: &Query) -> Result<bool, OrmError>;

    /// Insert a row, returning the `returning` column's value when requested.
    async fn insert(&self, insert: &Insert) -> Result<Option<JsonValue>, OrmError>;

    /// Execute an UPDATE and return the number of rows affected.
    async fn update(&self, update: &Update) -> Result<u64, OrmError>;

    /// Execute a DELETE query and return the number of rows affected.
    async fn delete(&self, delete: &Delete) -> Result<u64, OrmError>;

    /// Begin a transaction. The returned executor can be used for statements within the transaction.
    async fn begin_transaction(&self) -> Result<Self::Transaction, OrmError>;
}

/// Trait for executing statements within a transaction.
#[async_trait]
pub trait TransactionExecutor: Send + Sync {
    /// Execute a SELECT query within the transaction.
    async fn fetch(&mut self, query: &Query) -> Result<Vec<Row>, OrmError>;

    /// SELECT EXISTS within the transaction.
    async fn exists(&mut self, query: &Query) -> Result<bool, OrmError>;

    /// Insert a row within the transaction.
    async fn insert(&mut self, insert: &Insert) -> Result<Option<JsonValue>, OrmError>;

    /// Execute an UPDATE within the transaction.
    async fn update(&mut self, update: &Update) -> Result<u64, OrmError>;

    /// Execute a DELETE query within the transaction.
    async fn delete(&mut self, delete: &Delete) -> Result<u64, OrmError>;

    /// Commit the transaction.
    async fn commit(self) -> Result<(), OrmError>;

    /// Rollback the transaction.
    async fn rollback(self) -> Result<(), OrmError>;
}

/// Split a qualified path into `(table, column)`.
pub fn split_path(path: &str) -> (Option<&str>, &str) {
    match path.split_once('.') {
        Some((table, column)) => (Some(table), column),
        None => (None, path),
    }
}
