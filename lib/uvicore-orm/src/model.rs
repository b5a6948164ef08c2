//! Typed models bound to registered entities.
//!
//! Add `#[derive(Model)]` with `#[model(entity = "...")]` to a serde struct to
//! generate the implementation.

use serde_json::Value as JsonValue;

use crate::record::Entity;
use crate::OrmError;

/// A Rust struct whose serde representation matches a registered entity.
///
/// # Example
///
/// ```text
/// #[derive(Model, Serialize, Deserialize, Clone)]
/// #[model(entity = "post")]
/// pub struct Post {
///     pub id: Option<i64>,
///     pub title: String,
///     pub creator_id: Option<i64>,
///     #[relation]
///     #[serde(default, skip_serializing_if = "Option::is_none")]
///     pub tags: Option<Vec<Tag>>,
/// }
/// ```
///
/// Fields map to entity fields by their serde name. Use `#[relation]` on
/// fields holding related models and `#[column(skip)]` on fields the entity
/// does not know about.
pub trait Model: serde::Serialize + serde::de::DeserializeOwned + Clone + Send + Sync {
    /// Registered entity name.
    fn entity_name() -> &'static str;

    /// Column-backed field names in declaration order.
    fn field_names() -> &'static [&'static str];

    /// Relation field names in declaration order.
    fn relation_names() -> &'static [&'static str];

    /// The nested persistence request for this model.
    ///
    /// Unset optional values (including an unset primary key) are dropped so
    /// they read as absent rather than explicit nulls.
    fn to_request(&self) -> Result<JsonValue, OrmError> {
        let mut value = serde_json::to_value(self)?;
        if let JsonValue::Object(map) = &mut value {
            let skipped: Vec<String> = map
                .iter()
                .filter(|(key, v)| {
                    v.is_null()
                        || !(Self::field_names().contains(&key.as_str())
                            || Self::relation_names().contains(&key.as_str()))
                })
                .map(|(key, _)| key.clone())
                .collect();
            for key in skipped {
                map.remove(&key);
            }
        }
        Ok(value)
    }

    fn from_entity(entity: Entity) -> Result<Self, OrmError> {
        if entity.entity() != Self::entity_name() {
            return Err(OrmError::InvalidInput(format!(
                "Cannot read entity '{}' as model of '{}'",
                entity.entity(),
                Self::entity_name()
            )));
        }
        entity.into_model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Row;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tag {
        id: Option<i64>,
        name: String,
        #[serde(default)]
        scratch: Option<String>,
    }

    impl Model for Tag {
        fn entity_name() -> &'static str {
            "tag"
        }
        fn field_names() -> &'static [&'static str] {
            &["id", "name"]
        }
        fn relation_names() -> &'static [&'static str] {
            &[]
        }
    }

    #[test]
    fn request_drops_unset_and_unknown_fields() {
        let tag = Tag {
            id: None,
            name: "rust".into(),
            scratch: Some("x".into()),
        };
        assert_eq!(tag.to_request().unwrap(), json!({ "name": "rust" }));
    }

    #[test]
    fn from_entity_checks_entity_name() {
        let fields: Row = json!({ "id": 2, "name": "rust" }).as_object().cloned().unwrap();
        let tag = Tag::from_entity(Entity::new("tag", "id", fields.clone())).unwrap();
        assert_eq!(tag.id, Some(2));
        assert!(Tag::from_entity(Entity::new("post", "id", fields)).is_err());
    }
}
