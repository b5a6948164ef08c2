//! Value binding and row decoding for PostgreSQL.
//!
//! Parameters are bound from typed [`Value`]s, with NULLs typed by the
//! column they target. Rows decode by PostgreSQL type name into JSON cells
//! keyed by the selected alias.

use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{Arguments, Column, Row as _, TypeInfo};
use uvicore_orm::{FieldType, Filter, OrmError, Row, Value};

fn bind_error(e: impl std::fmt::Display) -> OrmError {
    OrmError::Persistence(e.to_string())
}

/// Bind a value to PgArguments. `ty` decides how a NULL is typed.
pub(crate) fn bind_value(
    args: &mut PgArguments,
    value: &Value,
    ty: FieldType,
) -> Result<(), OrmError> {
    match value {
        Value::Null => match ty {
            FieldType::Int | FieldType::ForeignKey => args.add(None::<i64>),
            FieldType::Float => args.add(None::<f64>),
            FieldType::Bool => args.add(None::<bool>),
            FieldType::Datetime => args.add(None::<chrono::DateTime<chrono::Utc>>),
            FieldType::Json => args.add(None::<JsonValue>),
            FieldType::String => args.add(None::<String>),
        },
        Value::String(s) => args.add(s.as_str()),
        Value::Int(n) => args.add(*n),
        Value::Float(n) => args.add(*n),
        Value::Bool(b) => args.add(*b),
        Value::Datetime(dt) => args.add(*dt.inner()),
        Value::Json(json) => args.add(json.clone()),
        Value::List(items) => return bind_list(args, items),
    }
    .map_err(bind_error)
}

/// Lists bind as a single typed array for `= ANY($n)`.
fn bind_list(args: &mut PgArguments, items: &[Value]) -> Result<(), OrmError> {
    if items.iter().all(|v| matches!(v, Value::Int(_))) {
        let ints: Vec<i64> = items
            .iter()
            .filter_map(|v| match v {
                Value::Int(n) => Some(*n),
                _ => None,
            })
            .collect();
        return args.add(ints).map_err(bind_error);
    }
    let strings = items
        .iter()
        .map(|v| match v {
            Value::String(s) => Ok(s.clone()),
            Value::Int(n) => Ok(n.to_string()),
            other => Err(OrmError::InvalidInput(format!(
                "unsupported list element: {:?}",
                other
            ))),
        })
        .collect::<Result<Vec<String>, OrmError>>()?;
    args.add(strings).map_err(bind_error)
}

/// Bind filter values in clause order.
pub(crate) fn bind_filters(args: &mut PgArguments, filters: &[Filter]) -> Result<(), OrmError> {
    for filter in filters {
        match filter {
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

/// Decode every column of a row under its (aliased) name.
pub(crate) fn decode_row(row: &PgRow) -> Result<Row, OrmError> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), extract_column_value(row, idx)?);
    }
    Ok(out)
}

/// Extract a column value from a row as JSON
pub(crate) fn extract_column_value(row: &PgRow, idx: usize) -> Result<JsonValue, OrmError> {
    let type_name = row
        .columns()
        .get(idx)
        .map(|c| c.type_info().name().to_string())
        .ok_or_else(|| OrmError::Persistence(format!("column {} out of range", idx)))?;

    let value = match type_name.as_str() {
        "BOOL" => {
            let v: Option<bool> = row.try_get(idx).map_err(bind_error)?;
            v.map(JsonValue::Bool).unwrap_or(JsonValue::Null)
        }
        "INT2" => {
            let v: Option<i16> = row.try_get(idx).map_err(bind_error)?;
            v.map(JsonValue::from).unwrap_or(JsonValue::Null)
        }
        "INT4" => {
            let v: Option<i32> = row.try_get(idx).map_err(bind_error)?;
            v.map(JsonValue::from).unwrap_or(JsonValue::Null)
        }
        "INT8" => {
            let v: Option<i64> = row.try_get(idx).map_err(bind_error)?;
            v.map(JsonValue::from).unwrap_or(JsonValue::Null)
        }
        "FLOAT4" => {
            let v: Option<f32> = row.try_get(idx).map_err(bind_error)?;
            v.and_then(|n| serde_json::Number::from_f64(f64::from(n)).map(JsonValue::Number))
                .unwrap_or(JsonValue::Null)
        }
        "FLOAT8" => {
            let v: Option<f64> = row.try_get(idx).map_err(bind_error)?;
            v.and_then(|n| serde_json::Number::from_f64(n).map(JsonValue::Number))
                .unwrap_or(JsonValue::Null)
        }
        "TIMESTAMPTZ" => {
            let v: Option<chrono::DateTime<chrono::Utc>> = row.try_get(idx).map_err(bind_error)?;
            // Microsecond precision with Z, matching StorageDatetime's text form
            v.map(|dt| JsonValue::String(dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)))
                .unwrap_or(JsonValue::Null)
        }
        "TIMESTAMP" => {
            let v: Option<chrono::NaiveDateTime> = row.try_get(idx).map_err(bind_error)?;
            v.map(|dt| {
                JsonValue::String(
                    dt.and_utc()
                        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                )
            })
            .unwrap_or(JsonValue::Null)
        }
        "JSONB" | "JSON" => {
            let v: Option<JsonValue> = row.try_get(idx).map_err(bind_error)?;
            v.unwrap_or(JsonValue::Null)
        }
        _ => {
            // VARCHAR, TEXT, CHAR and anything else readable as text
            let v: Option<String> = row.try_get(idx).map_err(bind_error)?;
            v.map(JsonValue::String).unwrap_or(JsonValue::Null)
        }
    };

    Ok(value)
}
