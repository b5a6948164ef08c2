//! Entity descriptors: typed fields and relation declarations mapped onto a table.

use serde_json::Value as JsonValue;

use crate::query::Value;
use crate::record::Row;
use crate::relation::{RelationDecl, RelationSpec};
use crate::schema::{Column, FieldType, Table, DEFAULT_CONNECTION};
use crate::OrmError;

/// A field of an entity. Either backed by exactly one column, or a virtual
/// association carrying a [`RelationDecl`].
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub column: String,
    pub ty: FieldType,
    pub nullable: bool,
    pub primary: bool,
    /// Excluded from query hydration unless explicitly requested.
    pub write_only: bool,
    pub default: Option<JsonValue>,
    pub description: Option<String>,
    pub relation: Option<RelationDecl>,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            ty,
            nullable: false,
            primary: false,
            write_only: false,
            default: None,
            description: None,
            relation: None,
        }
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Int)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Bool)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Datetime)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Json)
    }

    pub fn foreign_key(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::ForeignKey)
    }

    /// A virtual field holding related entities instead of a column value.
    pub fn relation(name: impl Into<String>, decl: RelationDecl) -> Self {
        let mut field = Self::new(name, FieldType::Json);
        field.column = String::new();
        field.nullable = true;
        field.relation = Some(decl);
        field
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    pub fn default_value(mut self, value: JsonValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_relation(&self) -> bool {
        self.relation.is_some()
    }

    /// Primary keys are generated by the store, so they may be omitted on insert.
    fn required(&self) -> bool {
        !self.nullable && !self.primary && self.default.is_none()
    }
}

/// Which write-only fields a read should hydrate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WriteOnly {
    #[default]
    Hidden,
    All,
    Fields(Vec<String>),
}

impl WriteOnly {
    pub fn reveals(&self, field: &str) -> bool {
        match self {
            WriteOnly::Hidden => false,
            WriteOnly::All => true,
            WriteOnly::Fields(fields) => fields.iter().any(|f| f == field),
        }
    }
}

/// Declarative definition handed to the registry builder.
#[derive(Debug, Clone)]
pub struct EntityDef {
    pub name: String,
    pub table: String,
    pub connection: Option<String>,
    pub morph_label: Option<String>,
    pub fields: Vec<Field>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            connection: None,
            morph_label: None,
            fields: Vec::new(),
        }
    }

    pub fn connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    /// Owner type label stored in polymorphic children (defaults to the table name).
    pub fn morph_label(mut self, label: impl Into<String>) -> Self {
        self.morph_label = Some(label.into());
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relation(self, name: impl Into<String>, decl: RelationDecl) -> Self {
        self.field(Field::relation(name, decl))
    }

    /// Table implied by the column-backed fields.
    pub(crate) fn implied_table(&self) -> Table {
        let mut table = Table::new(self.table.clone())
            .connection(self.connection.as_deref().unwrap_or(DEFAULT_CONNECTION));
        for field in self.fields.iter().filter(|f| !f.is_relation()) {
            let mut column = Column::new(field.column.clone(), field.ty);
            column.nullable = field.nullable;
            column.primary = field.primary;
            table = table.column(column);
        }
        table
    }
}

/// Resolved, immutable metadata for one entity type.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    name: String,
    table: String,
    connection: String,
    morph_label: String,
    fields: Vec<Field>,
    primary: usize,
    relations: Vec<RelationSpec>,
}

impl EntityDescriptor {
    /// Phase-one construction: validates the field list, leaves relations unresolved.
    pub(crate) fn from_def(def: &EntityDef, table: &Table) -> Result<Self, OrmError> {
        let configuration = |msg: String| OrmError::Configuration(msg);

        for (idx, field) in def.fields.iter().enumerate() {
            if def.fields[..idx].iter().any(|f| f.name == field.name) {
                return Err(configuration(format!(
                    "Entity '{}' declares field '{}' twice",
                    def.name, field.name
                )));
            }
            if field.is_relation() {
                if field.primary {
                    return Err(configuration(format!(
                        "Relation field '{}.{}' cannot be primary",
                        def.name, field.name
                    )));
                }
                continue;
            }
            if table.get(&field.column).is_none() {
                return Err(configuration(format!(
                    "Field '{}.{}' maps to unknown column '{}' of table '{}'",
                    def.name, field.name, field.column, table.name
                )));
            }
        }

        let primaries: Vec<usize> = def
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.primary)
            .map(|(idx, _)| idx)
            .collect();
        let primary = match primaries.as_slice() {
            [idx] => *idx,
            _ => {
                return Err(configuration(format!(
                    "Entity '{}' must mark exactly one field primary, found {}",
                    def.name,
                    primaries.len()
                )));
            }
        };

        Ok(Self {
            name: def.name.clone(),
            table: def.table.clone(),
            connection: table.connection.clone(),
            morph_label: def.morph_label.clone().unwrap_or_else(|| def.table.clone()),
            fields: def.fields.clone(),
            primary,
            relations: Vec::new(),
        })
    }

    pub(crate) fn set_relations(&mut self, relations: Vec<RelationSpec>) {
        self.relations = relations;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn morph_label(&self) -> &str {
        &self.morph_label
    }

    pub fn primary_key(&self) -> &Field {
        &self.fields[self.primary]
    }

    /// All declared fields, including relation fields, in declaration order.
    pub fn all_fields(&self) -> &[Field] {
        &self.fields
    }

    /// Column-backed fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| !f.is_relation())
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Column-backed field by name.
    pub fn column_field(&self, name: &str) -> Option<&Field> {
        self.field(name).filter(|f| !f.is_relation())
    }

    pub fn column_of(&self, field: &str) -> Option<&str> {
        self.column_field(field).map(|f| f.column.as_str())
    }

    pub fn relations(&self) -> &[RelationSpec] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&RelationSpec> {
        self.relations.iter().find(|r| r.name() == name)
    }

    /// Fields a read hydrates under the given write-only policy.
    pub fn readable_fields(&self, write_only: &WriteOnly) -> impl Iterator<Item = &Field> {
        self.fields()
            .filter(move |f| !f.write_only || write_only.reveals(&f.name))
    }

    /// Validate scalar values and order them by declaration.
    ///
    /// Unknown keys and values that do not fit the field type are rejected.
    /// With `insert`, missing values take the field default and missing
    /// required values are rejected.
    pub fn normalize(&self, mut row: Row, insert: bool) -> Result<Row, OrmError> {
        if let Some(unknown) = row.keys().find(|k| self.column_field(k).is_none()) {
            return Err(OrmError::InvalidInput(format!(
                "Entity '{}' has no field '{}'",
                self.name, unknown
            )));
        }

        let mut normalized = Row::new();
        for field in self.fields() {
            let value = match row.remove(&field.name) {
                Some(value) => value,
                None if insert => match &field.default {
                    Some(default) => default.clone(),
                    None => JsonValue::Null,
                },
                None => continue,
            };
            if value.is_null() {
                if insert && field.required() {
                    return Err(OrmError::InvalidInput(format!(
                        "Field '{}.{}' is required",
                        self.name, field.name
                    )));
                }
                if field.primary {
                    continue;
                }
            } else {
                self.bind(field, &value)?;
            }
            normalized.insert(field.name.clone(), value);
        }
        Ok(normalized)
    }

    /// Convert a field value into a bind value of the field's type.
    pub fn bind(&self, field: &Field, value: &JsonValue) -> Result<Value, OrmError> {
        Value::from_json(value, field.ty).map_err(|e| {
            OrmError::InvalidInput(format!("Field '{}.{}': {}", self.name, field.name, e))
        })
    }

    /// Primary key value of a row, when present and non-null.
    pub fn pk_of<'r>(&self, row: &'r Row) -> Option<&'r JsonValue> {
        row.get(&self.primary_key().name).filter(|v| !v.is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn post_def() -> EntityDef {
        EntityDef::new("post", "posts")
            .field(Field::int("id").primary())
            .field(Field::string("slug"))
            .field(Field::string("other").nullable())
            .field(Field::boolean("published").default_value(json!(false)))
    }

    fn descriptor(def: &EntityDef) -> Result<EntityDescriptor, OrmError> {
        EntityDescriptor::from_def(def, &def.implied_table())
    }

    #[test]
    fn duplicate_field_is_a_configuration_error() {
        let def = post_def().field(Field::string("slug"));
        assert!(matches!(descriptor(&def), Err(OrmError::Configuration(_))));
    }

    #[test]
    fn missing_primary_is_a_configuration_error() {
        let def = EntityDef::new("tag", "tags").field(Field::string("name"));
        assert!(matches!(descriptor(&def), Err(OrmError::Configuration(_))));
    }

    #[test]
    fn normalize_applies_defaults_and_rejects_missing_required() {
        let desc = descriptor(&post_def()).unwrap();

        let row = json!({ "slug": "hello" }).as_object().cloned().unwrap();
        let normalized = desc.normalize(row, true).unwrap();
        assert_eq!(normalized.get("published"), Some(&json!(false)));
        assert_eq!(normalized.get("other"), Some(&JsonValue::Null));
        assert!(!normalized.contains_key("id"));

        let row = json!({ "other": "x" }).as_object().cloned().unwrap();
        assert!(matches!(
            desc.normalize(row, true),
            Err(OrmError::InvalidInput(msg)) if msg.contains("post.slug")
        ));
    }

    #[test]
    fn normalize_rejects_unknown_and_mistyped_fields() {
        let desc = descriptor(&post_def()).unwrap();

        let row = json!({ "slug": "a", "nope": 1 }).as_object().cloned().unwrap();
        assert!(matches!(desc.normalize(row, true), Err(OrmError::InvalidInput(_))));

        let row = json!({ "slug": "a", "published": "maybe" })
            .as_object()
            .cloned()
            .unwrap();
        assert!(matches!(desc.normalize(row, true), Err(OrmError::InvalidInput(_))));
    }

    #[test]
    fn write_only_fields_are_hidden_by_default() {
        let def = EntityDef::new("user", "users")
            .field(Field::int("id").primary())
            .field(Field::string("email"))
            .field(Field::string("password").nullable().write_only());
        let desc = descriptor(&def).unwrap();

        let hidden: Vec<_> = desc
            .readable_fields(&WriteOnly::Hidden)
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(hidden, ["id", "email"]);

        let shown = desc
            .readable_fields(&WriteOnly::Fields(vec!["password".into()]))
            .count();
        assert_eq!(shown, 3);
    }
}
