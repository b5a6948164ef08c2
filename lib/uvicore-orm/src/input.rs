//! Classification of nested persistence requests.
//!
//! A request is a JSON object holding column values and relation keys.
//! Every value is classified exactly once, before any statement runs, so the
//! persistence engine only ever matches on [`Input`].

use serde_json::Value as JsonValue;

use crate::entity::EntityDescriptor;
use crate::record::Row;
use crate::registry::Registry;
use crate::OrmError;

/// One classified request value.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// A column value.
    Scalar(JsonValue),
    /// A row that already exists, identified by its primary key.
    ExistingReference { id: JsonValue, fields: Row },
    /// A new row with column values only.
    NewRecord(Row),
    /// A new row carrying relations of its own.
    NestedGraph(Graph),
}

impl Input {
    /// Classify one element of a relation value against the target entity.
    pub fn classify(
        registry: &Registry,
        target: &EntityDescriptor,
        value: JsonValue,
    ) -> Result<Input, OrmError> {
        match value {
            JsonValue::Object(object) => {
                let graph = Graph::from_object(registry, target, object)?;
                match target.pk_of(&graph.fields).cloned() {
                    Some(id) => {
                        if !graph.relations.is_empty() {
                            tracing::debug!(
                                entity = target.name(),
                                "ignoring nested relations on an existing reference"
                            );
                        }
                        Ok(Input::ExistingReference {
                            id,
                            fields: graph.fields,
                        })
                    }
                    None if graph.relations.is_empty() => Ok(Input::NewRecord(graph.fields)),
                    None => Ok(Input::NestedGraph(graph)),
                }
            }
            JsonValue::Array(_) => Err(OrmError::InvalidInput(format!(
                "Nested list is not a valid '{}' reference",
                target.name()
            ))),
            JsonValue::Null => Err(OrmError::InvalidInput(format!(
                "null is not a valid '{}' reference",
                target.name()
            ))),
            id => {
                let mut fields = Row::new();
                fields.insert(target.primary_key().name.clone(), id.clone());
                Ok(Input::ExistingReference { id, fields })
            }
        }
    }

    /// The primary key, for existing references.
    pub fn id(&self) -> Option<&JsonValue> {
        match self {
            Input::ExistingReference { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Supplied value of one relation key.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationInput {
    pub name: String,
    /// Zero or one element for to-one relations.
    pub items: Vec<Input>,
}

/// A classified request for one entity row and its relations.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    pub entity: String,
    pub fields: Row,
    pub relations: Vec<RelationInput>,
}

impl Graph {
    /// Classify a root request for `entity`.
    pub fn parse(registry: &Registry, entity: &str, request: JsonValue) -> Result<Graph, OrmError> {
        let descriptor = registry.describe(entity)?;
        match request {
            JsonValue::Object(object) => Self::from_object(registry, descriptor, object),
            other => Err(OrmError::InvalidInput(format!(
                "Expected an object for entity '{}', got {}",
                entity, other
            ))),
        }
    }

    /// A graph with column values only.
    pub fn record(entity: impl Into<String>, fields: Row) -> Graph {
        Graph {
            entity: entity.into(),
            fields,
            relations: Vec::new(),
        }
    }

    fn from_object(
        registry: &Registry,
        descriptor: &EntityDescriptor,
        object: Row,
    ) -> Result<Graph, OrmError> {
        let mut graph = Graph::record(descriptor.name(), Row::new());
        for (key, value) in object {
            if descriptor.column_field(&key).is_some() {
                graph.fields.insert(key, value);
                continue;
            }
            let Some(spec) = descriptor.relation(&key) else {
                return Err(OrmError::InvalidInput(format!(
                    "Entity '{}' has no field or relation '{}'",
                    descriptor.name(),
                    key
                )));
            };
            let target = registry.describe(spec.target())?;
            let items = match (spec.is_many(), value) {
                (_, JsonValue::Null) => continue,
                (true, JsonValue::Array(elements)) => elements
                    .into_iter()
                    .map(|element| Input::classify(registry, target, element))
                    .collect::<Result<Vec<_>, _>>()?,
                (true, other) => {
                    return Err(OrmError::InvalidInput(format!(
                        "Relation '{}.{}' expects a list, got {}",
                        descriptor.name(),
                        key,
                        other
                    )));
                }
                (false, JsonValue::Array(_)) => {
                    return Err(OrmError::InvalidInput(format!(
                        "Relation '{}.{}' expects a single value, got a list",
                        descriptor.name(),
                        key
                    )));
                }
                (false, element) => vec![Input::classify(registry, target, element)?],
            };
            graph.relations.push(RelationInput { name: key, items });
        }
        Ok(graph)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationInput> {
        self.relations.iter().find(|r| r.name == name)
    }
}
