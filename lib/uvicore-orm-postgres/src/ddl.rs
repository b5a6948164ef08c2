//! CREATE/DROP TABLE rendering for registered tables.

use uvicore_orm::{Column, FieldType, Table};

use crate::executor::quote_ident;

fn column_type(column: &Column) -> &'static str {
    match column.ty {
        FieldType::Int | FieldType::ForeignKey if column.primary => "BIGSERIAL",
        FieldType::Int | FieldType::ForeignKey => "BIGINT",
        FieldType::String => "TEXT",
        FieldType::Float => "DOUBLE PRECISION",
        FieldType::Bool => "BOOLEAN",
        FieldType::Datetime => "TIMESTAMPTZ",
        FieldType::Json => "JSONB",
    }
}

fn column_sql(column: &Column) -> String {
    let mut sql = format!("{} {}", quote_ident(&column.name), column_type(column));
    if column.primary {
        sql.push_str(" PRIMARY KEY");
    } else if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    sql
}

pub(crate) fn create_table_sql(table: &Table) -> String {
    let columns: Vec<String> = table.columns.iter().map(column_sql).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(&table.name),
        columns.join(", ")
    )
}

pub(crate) fn drop_table_sql(table: &Table) -> String {
    format!("DROP TABLE IF EXISTS {} CASCADE", quote_ident(&table.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_keys_are_serial() {
        let table = Table::new("posts")
            .column(Column::new("id", FieldType::Int).primary())
            .column(Column::new("title", FieldType::String))
            .column(Column::new("creator_id", FieldType::ForeignKey).nullable())
            .column(Column::new("meta", FieldType::Json).nullable());

        assert_eq!(
            create_table_sql(&table),
            "CREATE TABLE IF NOT EXISTS \"posts\" (\"id\" BIGSERIAL PRIMARY KEY, \
             \"title\" TEXT NOT NULL, \"creator_id\" BIGINT, \"meta\" JSONB)"
        );
        assert_eq!(drop_table_sql(&table), "DROP TABLE IF EXISTS \"posts\" CASCADE");
    }
}
