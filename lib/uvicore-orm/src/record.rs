//! Hydrated entities: column values plus whatever relations were loaded or supplied.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::OrmError;

/// An ordered map of field name to value.
pub type Row = serde_json::Map<String, JsonValue>;

/// Related entities attached to an [`Entity`] under a relation name.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    One(Option<Box<Entity>>),
    Many(Vec<Entity>),
}

impl Related {
    pub fn as_one(&self) -> Option<&Entity> {
        match self {
            Related::One(one) => one.as_deref(),
            Related::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> &[Entity] {
        match self {
            Related::One(_) => &[],
            Related::Many(many) => many,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Related::One(one) => usize::from(one.is_some()),
            Related::Many(many) => many.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Related::One(Some(one)) => one.to_json(),
            Related::One(None) => JsonValue::Null,
            Related::Many(many) => JsonValue::Array(many.iter().map(Entity::to_json).collect()),
        }
    }
}

/// A persisted or queried row of a registered entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    entity: String,
    primary_key: String,
    pub fields: Row,
    pub relations: BTreeMap<String, Related>,
}

impl Entity {
    pub fn new(entity: impl Into<String>, primary_key: impl Into<String>, fields: Row) -> Self {
        Self {
            entity: entity.into(),
            primary_key: primary_key.into(),
            fields,
            relations: BTreeMap::new(),
        }
    }

    /// Registered entity name.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn primary_key_name(&self) -> &str {
        &self.primary_key
    }

    /// Primary key value, `None` until persisted.
    pub fn id(&self) -> Option<&JsonValue> {
        self.fields.get(&self.primary_key).filter(|v| !v.is_null())
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(JsonValue::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.fields.get(field).and_then(JsonValue::as_i64)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<JsonValue>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn relation(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    /// Entities of a to-many relation, empty when not loaded.
    pub fn many(&self, name: &str) -> &[Entity] {
        self.relations.get(name).map(Related::as_many).unwrap_or(&[])
    }

    /// Entity of a to-one relation, `None` when not loaded or absent.
    pub fn one(&self, name: &str) -> Option<&Entity> {
        self.relations.get(name).and_then(Related::as_one)
    }

    pub fn set_relation(&mut self, name: impl Into<String>, related: Related) {
        self.relations.insert(name.into(), related);
    }

    /// Fields and relations as one nested JSON object.
    pub fn to_json(&self) -> JsonValue {
        let mut object = self.fields.clone();
        for (name, related) in &self.relations {
            object.insert(name.clone(), related.to_json());
        }
        JsonValue::Object(object)
    }

    /// Convert into a typed model through its serde representation.
    pub fn into_model<T: DeserializeOwned>(self) -> Result<T, OrmError> {
        Ok(serde_json::from_value(self.to_json())?)
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + self.relations.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        for (name, related) in &self.relations {
            map.serialize_entry(name, &related.to_json())?;
        }
        map.end()
    }
}
