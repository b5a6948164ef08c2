//! Table descriptors: the physical shape every statement is built against.

use serde::{Deserialize, Serialize};

use crate::OrmError;

/// Connection name used when a table or entity does not name one.
pub const DEFAULT_CONNECTION: &str = "default";

/// Semantic column type, used to validate input and bind values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Datetime,
    Json,
    /// Integer reference to another table's primary key.
    ForeignKey,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Datetime => "datetime",
            FieldType::Json => "json",
            FieldType::ForeignKey => "foreign_key",
        }
    }

    /// Whether values of this type are integers on the wire.
    pub fn is_integer(&self) -> bool {
        matches!(self, FieldType::Int | FieldType::ForeignKey)
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: FieldType,
    pub nullable: bool,
    pub primary: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            primary: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }
}

/// Declarative table metadata: name, connection and ordered columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub connection: String,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection: DEFAULT_CONNECTION.to_string(),
            columns: Vec::new(),
        }
    }

    pub fn connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = connection.into();
        self
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The primary key column. Only valid on a table that passed [`Table::validate`].
    pub fn primary_key(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.primary)
    }

    /// Type of a column, `Json` when unknown (binds any value).
    pub fn column_type(&self, name: &str) -> FieldType {
        self.get(name).map(|c| c.ty).unwrap_or(FieldType::Json)
    }

    /// Checks unique column names and, when `require_primary`, exactly one primary column.
    pub fn validate(&self, require_primary: bool) -> Result<(), OrmError> {
        if self.columns.is_empty() {
            return Err(OrmError::Configuration(format!(
                "Table '{}' declares no columns",
                self.name
            )));
        }
        for (idx, column) in self.columns.iter().enumerate() {
            if self.columns[..idx].iter().any(|c| c.name == column.name) {
                return Err(OrmError::Configuration(format!(
                    "Table '{}' declares column '{}' twice",
                    self.name, column.name
                )));
            }
        }
        let primaries = self.columns.iter().filter(|c| c.primary).count();
        if primaries > 1 || (require_primary && primaries == 0) {
            return Err(OrmError::Configuration(format!(
                "Table '{}' must have exactly one primary column, found {}",
                self.name, primaries
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_duplicate_columns() {
        let table = Table::new("tags")
            .column(Column::new("id", FieldType::Int).primary())
            .column(Column::new("name", FieldType::String))
            .column(Column::new("name", FieldType::String));
        assert!(matches!(
            table.validate(true),
            Err(OrmError::Configuration(msg)) if msg.contains("twice")
        ));
    }

    #[test]
    fn pivot_tables_may_omit_primary() {
        let pivot = Table::new("post_tags")
            .column(Column::new("post_id", FieldType::ForeignKey))
            .column(Column::new("tag_id", FieldType::ForeignKey));
        assert!(pivot.validate(false).is_ok());
        assert!(pivot.validate(true).is_err());
        assert_eq!(pivot.column_type("tag_id"), FieldType::ForeignKey);
        assert_eq!(pivot.column_type("missing"), FieldType::Json);
    }
}
