//! CREATE/DROP TABLE rendering for registered tables.

use uvicore_orm::{Column, FieldType, Table};

use crate::executor::quote_ident;

fn column_type(ty: FieldType) -> &'static str {
    match ty {
        FieldType::Int | FieldType::ForeignKey => "INTEGER",
        FieldType::Float => "REAL",
        FieldType::Bool => "BOOLEAN",
        FieldType::String | FieldType::Datetime | FieldType::Json => "TEXT",
    }
}

fn column_sql(column: &Column) -> String {
    let mut sql = format!("{} {}", quote_ident(&column.name), column_type(column.ty));
    if column.primary {
        sql.push_str(" PRIMARY KEY");
        if column.ty.is_integer() {
            sql.push_str(" AUTOINCREMENT");
        }
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
    format!("DROP TABLE IF EXISTS {}", quote_ident(&table.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_primary_keys_autoincrement() {
        let table = Table::new("images")
            .column(Column::new("id", FieldType::Int).primary())
            .column(Column::new("imageable_type", FieldType::String))
            .column(Column::new("taken_at", FieldType::Datetime).nullable());

        assert_eq!(
            create_table_sql(&table),
            "CREATE TABLE IF NOT EXISTS \"images\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
             \"imageable_type\" TEXT NOT NULL, \"taken_at\" TEXT)"
        );
    }

    #[test]
    fn pivots_have_no_primary_key() {
        let pivot = Table::new("post_tags")
            .column(Column::new("post_id", FieldType::ForeignKey))
            .column(Column::new("tag_id", FieldType::ForeignKey));
        assert_eq!(
            create_table_sql(&pivot),
            "CREATE TABLE IF NOT EXISTS \"post_tags\" (\"post_id\" INTEGER NOT NULL, \
             \"tag_id\" INTEGER NOT NULL)"
        );
        assert_eq!(drop_table_sql(&pivot), "DROP TABLE IF EXISTS \"post_tags\"");
    }
}
