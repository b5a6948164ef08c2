//! Value binding and row decoding for SQLite.
//!
//! SQLite has no native timestamp or JSON types: datetimes are stored as
//! RFC 3339 text and JSON as its serialized text. Rows decode by the column
//! type the query selected them as, falling back to SQLite's storage class.

use std::collections::HashMap;

use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Arguments, Column, Row as _, TypeInfo, ValueRef};
use uvicore_orm::{FieldType, Filter, OrmError, Row, StorageDatetime, Value};

fn bind_error(e: impl std::fmt::Display) -> OrmError {
    OrmError::Persistence(e.to_string())
}

/// Bind a scalar value. Lists are expanded by [`bind_filters`].
pub(crate) fn bind_value(
    args: &mut SqliteArguments<'_>,
    value: &Value,
    ty: FieldType,
) -> Result<(), OrmError> {
    match value {
        Value::Null => match ty {
            FieldType::Int | FieldType::ForeignKey => args.add(None::<i64>),
            FieldType::Float => args.add(None::<f64>),
            FieldType::Bool => args.add(None::<bool>),
            _ => args.add(None::<String>),
        },
        Value::String(s) => args.add(s.clone()),
        Value::Int(n) => args.add(*n),
        Value::Float(n) => args.add(*n),
        Value::Bool(b) => args.add(*b),
        Value::Datetime(dt) => args.add(dt.to_rfc3339()),
        Value::Json(json) => args.add(serde_json::to_string(json)?),
        Value::List(_) => {
            return Err(OrmError::InvalidInput(
                "list values can only be bound in IN filters".to_string(),
            ));
        }
    }
    .map_err(bind_error)
}

/// Bind filter values in clause order; `IN` lists bind one parameter per element.
pub(crate) fn bind_filters(
    args: &mut SqliteArguments<'_>,
    filters: &[Filter],
) -> Result<(), OrmError> {
    for filter in filters {
        match filter {
            Filter::In(_, Value::List(items)) => {
                for item in items {
                    bind_value(args, item, FieldType::String)?;
                }
            }
            Filter::Eq(_, value)
            | Filter::Ne(_, value)
            | Filter::Gt(_, value)
            | Filter::Gte(_, value)
            | Filter::Lt(_, value)
            | Filter::Lte(_, value)
            | Filter::In(_, value) => bind_value(args, value, FieldType::String)?,
            Filter::IsNull(_) | Filter::IsNotNull(_) => {}
        }
    }
    Ok(())
}

/// Decode every column of a row under its (aliased) name. `types` maps
/// aliases to the type they were selected as.
pub(crate) fn decode_row(
    row: &SqliteRow,
    types: &HashMap<&str, FieldType>,
) -> Result<Row, OrmError> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name();
        let value = match types.get(name) {
            Some(ty) => decode_typed(row, idx, *ty)?,
            None => decode_untyped(row, idx)?,
        };
        out.insert(name.to_string(), value);
    }
    Ok(out)
}

fn is_null(row: &SqliteRow, idx: usize) -> Result<bool, OrmError> {
    Ok(row.try_get_raw(idx).map_err(bind_error)?.is_null())
}

pub(crate) fn decode_typed(
    row: &SqliteRow,
    idx: usize,
    ty: FieldType,
) -> Result<JsonValue, OrmError> {
    if is_null(row, idx)? {
        return Ok(JsonValue::Null);
    }
    let value = match ty {
        FieldType::Int | FieldType::ForeignKey => {
            JsonValue::from(row.try_get_unchecked::<i64, _>(idx).map_err(bind_error)?)
        }
        FieldType::Float => {
            let n = row.try_get_unchecked::<f64, _>(idx).map_err(bind_error)?;
            serde_json::Number::from_f64(n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null)
        }
        FieldType::Bool => {
            JsonValue::Bool(row.try_get_unchecked::<i64, _>(idx).map_err(bind_error)? != 0)
        }
        FieldType::Datetime => {
            let text = row.try_get_unchecked::<String, _>(idx).map_err(bind_error)?;
            match StorageDatetime::parse(&text) {
                Ok(dt) => JsonValue::String(dt.to_rfc3339()),
                Err(_) => JsonValue::String(text),
            }
        }
        FieldType::Json => {
            let text = row.try_get_unchecked::<String, _>(idx).map_err(bind_error)?;
            serde_json::from_str(&text).unwrap_or(JsonValue::String(text))
        }
        FieldType::String => {
            JsonValue::String(row.try_get_unchecked::<String, _>(idx).map_err(bind_error)?)
        }
    };
    Ok(value)
}

/// Decode by the column's declared type name.
pub(crate) fn decode_untyped(row: &SqliteRow, idx: usize) -> Result<JsonValue, OrmError> {
    let type_name = row
        .columns()
        .get(idx)
        .map(|c| c.type_info().name().to_uppercase())
        .ok_or_else(|| OrmError::Persistence(format!("column {} out of range", idx)))?;
    let ty = match type_name.as_str() {
        "INTEGER" | "INT" | "BIGINT" => FieldType::Int,
        "REAL" | "FLOAT" | "DOUBLE" => FieldType::Float,
        "BOOLEAN" => FieldType::Bool,
        _ => FieldType::String,
    };
    decode_typed(row, idx, ty)
}
