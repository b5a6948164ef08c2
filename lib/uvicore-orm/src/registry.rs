//! The entity registry: built once from declarations, immutable afterwards.
//!
//! Building happens in two phases so entities may reference each other in
//! any order. Phase one registers table and entity shapes; phase two resolves
//! every relation declaration against the complete set of shapes.

use std::collections::HashMap;

use crate::entity::{EntityDef, EntityDescriptor};
use crate::model::Model;
use crate::relation::{self, RelationSpec};
use crate::schema::Table;
use crate::OrmError;

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    tables: Vec<Table>,
    entities: Vec<EntityDef>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table explicitly. Entities without a declared table get one
    /// implied by their fields.
    pub fn table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    pub fn entity(mut self, entity: EntityDef) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn build(self) -> Result<Registry, OrmError> {
        let mut tables: Vec<Table> = Vec::new();
        for table in self.tables {
            table.validate(false)?;
            if tables.iter().any(|t| t.name == table.name) {
                return Err(OrmError::Configuration(format!(
                    "Table '{}' declared twice",
                    table.name
                )));
            }
            tables.push(table);
        }

        // Phase one: shapes.
        let mut order = Vec::with_capacity(self.entities.len());
        let mut entities: HashMap<String, EntityDescriptor> = HashMap::new();
        for def in &self.entities {
            if entities.contains_key(&def.name) {
                return Err(OrmError::Configuration(format!(
                    "Entity '{}' declared twice",
                    def.name
                )));
            }
            let table = match tables.iter().find(|t| t.name == def.table) {
                Some(declared) => {
                    if let Some(connection) = &def.connection
                        && connection != &declared.connection
                    {
                        return Err(OrmError::Configuration(format!(
                            "Entity '{}' uses connection '{}' but table '{}' lives on '{}'",
                            def.name, connection, declared.name, declared.connection
                        )));
                    }
                    declared.clone()
                }
                None => {
                    let implied = def.implied_table();
                    implied.validate(true)?;
                    tables.push(implied.clone());
                    implied
                }
            };
            let descriptor = EntityDescriptor::from_def(def, &table)?;
            order.push(def.name.clone());
            entities.insert(def.name.clone(), descriptor);
        }

        // Phase two: relations.
        let mut resolved: Vec<(String, Vec<RelationSpec>)> = Vec::with_capacity(order.len());
        for def in &self.entities {
            let source = entities
                .get(&def.name)
                .ok_or_else(|| OrmError::UnknownEntity(def.name.clone()))?;
            let mut specs = Vec::new();
            for field in def.fields.iter() {
                let Some(decl) = &field.relation else {
                    continue;
                };
                let target = entities.get(&decl.target).ok_or_else(|| {
                    OrmError::Configuration(format!(
                        "Relation '{}.{}' targets unknown entity '{}'",
                        def.name, field.name, decl.target
                    ))
                })?;
                let (spec, pivot) = relation::resolve(&field.name, decl, source, target)?;
                if let Some(pivot) = pivot {
                    match tables.iter().find(|t| t.name == pivot.name) {
                        Some(declared) => {
                            if let Some(missing) =
                                pivot.columns.iter().find(|c| declared.get(&c.name).is_none())
                            {
                                return Err(OrmError::Configuration(format!(
                                    "Pivot table '{}' of relation '{}.{}' has no column '{}'",
                                    declared.name, def.name, field.name, missing.name
                                )));
                            }
                        }
                        None => tables.push(pivot),
                    }
                }
                specs.push(spec);
            }
            resolved.push((def.name.clone(), specs));
        }
        for (name, specs) in resolved {
            if let Some(descriptor) = entities.get_mut(&name) {
                descriptor.set_relations(specs);
            }
        }

        tracing::debug!(
            entities = order.len(),
            tables = tables.len(),
            "entity registry built"
        );

        Ok(Registry {
            entities,
            order,
            tables,
        })
    }
}

/// Resolved entity and table metadata, shared read-only by every consumer.
#[derive(Debug)]
pub struct Registry {
    entities: HashMap<String, EntityDescriptor>,
    order: Vec<String>,
    tables: Vec<Table>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn describe(&self, entity: &str) -> Result<&EntityDescriptor, OrmError> {
        self.entities
            .get(entity)
            .ok_or_else(|| OrmError::UnknownEntity(entity.to_string()))
    }

    pub fn resolve(&self, entity: &str, relation: &str) -> Result<&RelationSpec, OrmError> {
        self.describe(entity)?
            .relation(relation)
            .ok_or_else(|| OrmError::UnknownRelation {
                entity: entity.to_string(),
                relation: relation.to_string(),
            })
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Every table, entity tables before the pivots first referenced after them.
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Tables living on one connection.
    pub fn tables_on<'a>(&'a self, connection: &'a str) -> impl Iterator<Item = &'a Table> {
        self.tables.iter().filter(move |t| t.connection == connection)
    }

    /// Descriptors in declaration order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.order.iter().filter_map(|name| self.entities.get(name))
    }

    /// Check that a typed model's fields and relations exist on its entity.
    pub fn verify_model<T: Model>(&self) -> Result<(), OrmError> {
        let descriptor = self.describe(T::entity_name())?;
        for field in T::field_names() {
            if descriptor.column_field(field).is_none() {
                return Err(OrmError::Configuration(format!(
                    "Model field '{}' has no column field on entity '{}'",
                    field,
                    descriptor.name()
                )));
            }
        }
        for relation in T::relation_names() {
            if descriptor.relation(relation).is_none() {
                return Err(OrmError::UnknownRelation {
                    entity: descriptor.name().to_string(),
                    relation: relation.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Field;
    use crate::relation::{RelationDecl, RelationKind};
    use crate::schema::{Column, FieldType};

    fn blog() -> RegistryBuilder {
        // Declared post-first so the comment/user forward references resolve in phase two.
        RegistryBuilder::new()
            .entity(
                EntityDef::new("post", "posts")
                    .field(Field::int("id").primary())
                    .field(Field::string("title"))
                    .field(Field::foreign_key("creator_id"))
                    .relation("creator", RelationDecl::belongs_to("user"))
                    .relation("comments", RelationDecl::has_many("comment"))
                    .relation("tags", RelationDecl::many_to_many("tag"))
                    .relation("image", RelationDecl::morph_one("image"))
                    .relation("attributes", RelationDecl::morph_many("attribute")),
            )
            .entity(
                EntityDef::new("comment", "comments")
                    .field(Field::int("id").primary())
                    .field(Field::string("body"))
                    .field(Field::foreign_key("post_id")),
            )
            .entity(
                EntityDef::new("user", "users")
                    .field(Field::int("id").primary())
                    .field(Field::string("email")),
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
                    .field(Field::string("key")),
            )
    }

    #[test]
    fn resolves_conventions() {
        let registry = blog().build().unwrap();

        match registry.resolve("post", "creator").unwrap() {
            RelationSpec::BelongsTo(r) => {
                assert_eq!(r.local_key, "creator_id");
                assert_eq!(r.foreign_key, "id");
            }
            other => panic!("unexpected {:?}", other),
        }
        match registry.resolve("post", "comments").unwrap() {
            RelationSpec::HasMany(r) => assert_eq!(r.foreign_key, "post_id"),
            other => panic!("unexpected {:?}", other),
        }
        match registry.resolve("post", "tags").unwrap() {
            RelationSpec::ManyToMany(r) => {
                assert_eq!(r.pivot.table, "post_tags");
                assert_eq!(r.pivot.left_key, "post_id");
                assert_eq!(r.pivot.right_key, "tag_id");
            }
            other => panic!("unexpected {:?}", other),
        }
        match registry.resolve("post", "attributes").unwrap() {
            RelationSpec::MorphMany(r) => {
                assert_eq!(r.type_key, "attributable_type");
                assert_eq!(r.label, "posts");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(registry.table("post_tags").is_some());
    }

    #[test]
    fn resolution_is_deterministic() {
        let registry = blog().build().unwrap();
        let a = registry.resolve("post", "tags").unwrap().clone();
        let b = registry.resolve("post", "tags").unwrap().clone();
        assert_eq!(a, b);
        assert_eq!(a.kind(), RelationKind::ManyToMany);
    }

    #[test]
    fn unknown_relation_and_entity() {
        let registry = blog().build().unwrap();
        assert!(matches!(
            registry.resolve("post", "nope"),
            Err(OrmError::UnknownRelation { .. })
        ));
        assert!(matches!(
            registry.describe("nope"),
            Err(OrmError::UnknownEntity(_))
        ));
    }

    #[test]
    fn unknown_target_is_a_configuration_error() {
        let result = RegistryBuilder::new()
            .entity(
                EntityDef::new("post", "posts")
                    .field(Field::int("id").primary())
                    .relation("owner", RelationDecl::belongs_to("ghost")),
            )
            .build();
        assert!(matches!(result, Err(OrmError::Configuration(msg)) if msg.contains("ghost")));
    }

    #[test]
    fn missing_key_field_is_a_configuration_error() {
        let result = RegistryBuilder::new()
            .entity(
                EntityDef::new("post", "posts")
                    .field(Field::int("id").primary())
                    .relation("creator", RelationDecl::belongs_to("user")),
            )
            .entity(EntityDef::new("user", "users").field(Field::int("id").primary()))
            .build();
        assert!(matches!(result, Err(OrmError::Configuration(msg)) if msg.contains("creator_id")));
    }

    #[test]
    fn declared_pivot_wins_over_convention() {
        let pivot = Table::new("post_tags")
            .column(Column::new("post_id", FieldType::ForeignKey))
            .column(Column::new("tag_id", FieldType::ForeignKey))
            .column(Column::new("created_at", FieldType::Datetime).nullable());
        let registry = blog().table(pivot.clone()).build().unwrap();
        assert_eq!(registry.table("post_tags"), Some(&pivot));
    }

    #[test]
    fn declared_pivot_missing_columns_is_rejected() {
        let pivot = Table::new("post_tags").column(Column::new("post_id", FieldType::ForeignKey));
        assert!(matches!(
            blog().table(pivot).build(),
            Err(OrmError::Configuration(msg)) if msg.contains("tag_id")
        ));
    }
}
