//! Read queries with eager loading.
//!
//! Each included relation costs one secondary query per nesting level for
//! the whole batch of parents, never one per parent.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::entity::{EntityDescriptor, WriteOnly};
use crate::orm::Orm;
use crate::persist::{hydrate, select_readable};
use crate::query::{Filter, Order, Query, QueryExecutor, Value};
use crate::record::{Entity, Related};
use crate::relation::RelationSpec;
use crate::schema::FieldType;
use crate::{BoxFuture, OrmError};

/// Alias carrying the owner key of rows loaded through a pivot table.
const PIVOT_OWNER: &str = "__pivot_owner";

/// An include tree node: relation name plus the includes nested under it.
#[derive(Debug, Clone, PartialEq, Default)]
struct Include {
    name: String,
    children: Vec<Include>,
}

fn add_include(tree: &mut Vec<Include>, path: &str) {
    let mut level = tree;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let idx = match level.iter().position(|i| i.name == segment) {
            Some(idx) => idx,
            None => {
                level.push(Include {
                    name: segment.to_string(),
                    children: Vec::new(),
                });
                level.len() - 1
            }
        };
        level = &mut level[idx].children;
    }
}

/// Builder for reads of one entity.
pub struct QueryBuilder<'o, E: QueryExecutor> {
    orm: &'o Orm<E>,
    entity: String,
    filters: Vec<Filter>,
    order_by: Vec<(String, Order)>,
    limit: Option<u64>,
    offset: Option<u64>,
    includes: Vec<Include>,
    write_only: WriteOnly,
}

impl<'o, E: QueryExecutor + 'static> QueryBuilder<'o, E> {
    pub(crate) fn new(orm: &'o Orm<E>, entity: &str) -> Self {
        Self {
            orm,
            entity: entity.to_string(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            includes: Vec::new(),
            write_only: WriteOnly::Hidden,
        }
    }

    /// Add a filter on a field name.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.to_string(), value.into()))
    }

    pub fn ne(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::Ne(field.to_string(), value.into()))
    }

    pub fn gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::Gt(field.to_string(), value.into()))
    }

    pub fn gte(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::Gte(field.to_string(), value.into()))
    }

    pub fn lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::Lt(field.to_string(), value.into()))
    }

    pub fn lte(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::Lte(field.to_string(), value.into()))
    }

    pub fn r#in(self, field: &str, values: impl Into<Value>) -> Self {
        self.filter(Filter::In(field.to_string(), values.into()))
    }

    pub fn is_null(self, field: &str) -> Self {
        self.filter(Filter::IsNull(field.to_string()))
    }

    pub fn is_not_null(self, field: &str) -> Self {
        self.filter(Filter::IsNotNull(field.to_string()))
    }

    pub fn order_by(mut self, field: &str, order: Order) -> Self {
        self.order_by.push((field.to_string(), order));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Eager-load relations; dotted paths load nested relations.
    pub fn include<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for path in relations {
            add_include(&mut self.includes, path.as_ref());
        }
        self
    }

    /// Hydrate every write-only field of the root entity.
    pub fn show_writeonly(mut self, show: bool) -> Self {
        self.write_only = if show {
            WriteOnly::All
        } else {
            WriteOnly::Hidden
        };
        self
    }

    /// Hydrate only the named write-only fields of the root entity.
    pub fn show_writeonly_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.write_only = WriteOnly::Fields(fields.into_iter().map(Into::into).collect());
        self
    }

    fn build(&self, descriptor: &EntityDescriptor) -> Result<Query, OrmError> {
        let path = |field: &str| -> Result<String, OrmError> {
            descriptor
                .column_of(field)
                .map(|column| format!("{}.{}", descriptor.table(), column))
                .ok_or_else(|| {
                    OrmError::InvalidInput(format!(
                        "Entity '{}' has no field '{}'",
                        descriptor.name(),
                        field
                    ))
                })
        };

        let mut query = select_readable(descriptor, &self.write_only);
        for filter in &self.filters {
            let field = path(filter.field())?;
            let ty = key_type(descriptor, filter.field());
            let filter = filter
                .clone()
                .coerce(ty)
                .map_err(|e| OrmError::InvalidInput(format!("Filter on '{}': {}", filter.field(), e)))?;
            query = query.filter(filter.with_field(field));
        }
        for (field, order) in &self.order_by {
            query = query.order_by(path(field)?, *order);
        }
        query.limit = self.limit;
        query.offset = self.offset;
        Ok(query)
    }

    /// All matching rows with includes loaded.
    #[tracing::instrument(level = "debug", skip(self), fields(entity = %self.entity))]
    pub async fn get(self) -> Result<Vec<Entity>, OrmError> {
        let registry = self.orm.registry();
        let descriptor = registry.describe(&self.entity)?;
        let query = self.build(descriptor)?;
        let executor = self.orm.connections().get(descriptor.connection())?;
        let rows = executor.fetch(&query).await?;
        let mut entities: Vec<Entity> = rows.into_iter().map(|row| hydrate(descriptor, row)).collect();
        if !entities.is_empty() && !self.includes.is_empty() {
            load_includes(self.orm, descriptor, &mut entities, &self.includes).await?;
        }
        Ok(entities)
    }

    /// First matching row, if any.
    pub async fn first(self) -> Result<Option<Entity>, OrmError> {
        let mut found = self.limit(1).get().await?;
        Ok(found.pop())
    }

    /// Row by primary key. A missing row is `Ok(None)`.
    pub async fn find(self, id: impl Into<Value>) -> Result<Option<Entity>, OrmError> {
        let descriptor = self.orm.registry().describe(&self.entity)?;
        let pk = descriptor.primary_key().name.clone();
        self.eq(&pk, id).first().await
    }

    /// First row where `field` equals `value`.
    pub async fn find_by(self, field: &str, value: impl Into<Value>) -> Result<Option<Entity>, OrmError> {
        self.eq(field, value).first().await
    }

    /// All matching rows keyed by the string form of a field. Later rows win on duplicate keys.
    pub async fn key_by(self, field: &str) -> Result<BTreeMap<String, Entity>, OrmError> {
        let field = field.to_string();
        let rows = self.get().await?;
        let mut keyed = BTreeMap::new();
        for entity in rows {
            let key = match entity.get(&field) {
                Some(JsonValue::String(s)) => s.clone(),
                Some(JsonValue::Null) | None => {
                    return Err(OrmError::InvalidInput(format!(
                        "Cannot key '{}' rows by missing field '{}'",
                        entity.entity(),
                        field
                    )));
                }
                Some(other) => other.to_string(),
            };
            keyed.insert(key, entity);
        }
        Ok(keyed)
    }
}

/// Distinct non-null values of `field` across `entities`, bound as `ty`.
fn distinct_keys(entities: &[Entity], field: &str, ty: FieldType) -> Result<Vec<Value>, OrmError> {
    let mut seen: Vec<&JsonValue> = Vec::new();
    for entity in entities {
        if let Some(value) = entity.get(field).filter(|v| !v.is_null())
            && !seen.contains(&value)
        {
            seen.push(value);
        }
    }
    seen.into_iter()
        .map(|v| Value::from_json(v, ty).map_err(OrmError::InvalidInput))
        .collect()
}

fn key_type(descriptor: &EntityDescriptor, field: &str) -> FieldType {
    descriptor.field(field).map(|f| f.ty).unwrap_or(FieldType::Json)
}

fn qualified(descriptor: &EntityDescriptor, field: &str) -> Result<String, OrmError> {
    descriptor
        .column_of(field)
        .map(|column| format!("{}.{}", descriptor.table(), column))
        .ok_or_else(|| {
            OrmError::Configuration(format!(
                "Entity '{}' has no field '{}'",
                descriptor.name(),
                field
            ))
        })
}

/// Load `includes` onto `parents`, recursing into nested includes.
fn load_includes<'a, E: QueryExecutor + 'static>(
    orm: &'a Orm<E>,
    descriptor: &'a EntityDescriptor,
    parents: &'a mut [Entity],
    includes: &'a [Include],
) -> BoxFuture<'a, Result<(), OrmError>> {
    Box::pin(async move {
        let registry = orm.registry();
        for include in includes {
            let spec = registry.resolve(descriptor.name(), &include.name)?;
            let target = registry.describe(spec.target())?;
            let executor = orm.connections().get(target.connection())?;
            let base = select_readable(target, &WriteOnly::Hidden);

            // (owner key value, child) pairs, plus the parent field the owner key matches.
            let (mut children, owners, parent_field): (Vec<Entity>, Vec<JsonValue>, &str) = match spec {
                RelationSpec::BelongsTo(keyed) => {
                    let keys = distinct_keys(parents, &keyed.local_key, key_type(target, &keyed.foreign_key))?;
                    if keys.is_empty() {
                        (Vec::new(), Vec::new(), keyed.local_key.as_str())
                    } else {
                        let query = base.filter(Filter::In(qualified(target, &keyed.foreign_key)?, Value::List(keys)));
                        let children: Vec<Entity> = executor
                            .fetch(&query)
                            .await?
                            .into_iter()
                            .map(|row| hydrate(target, row))
                            .collect();
                        let owners = children
                            .iter()
                            .map(|c| c.get(&keyed.foreign_key).cloned().unwrap_or(JsonValue::Null))
                            .collect();
                        (children, owners, keyed.local_key.as_str())
                    }
                }
                RelationSpec::HasOne(keyed) | RelationSpec::HasMany(keyed) => {
                    let keys = distinct_keys(parents, &keyed.local_key, key_type(target, &keyed.foreign_key))?;
                    if keys.is_empty() {
                        (Vec::new(), Vec::new(), keyed.local_key.as_str())
                    } else {
                        let query = base
                            .filter(Filter::In(qualified(target, &keyed.foreign_key)?, Value::List(keys)))
                            .order_by(qualified(target, &target.primary_key().name)?, Order::Asc);
                        let children: Vec<Entity> = executor
                            .fetch(&query)
                            .await?
                            .into_iter()
                            .map(|row| hydrate(target, row))
                            .collect();
                        let owners = children
                            .iter()
                            .map(|c| c.get(&keyed.foreign_key).cloned().unwrap_or(JsonValue::Null))
                            .collect();
                        (children, owners, keyed.local_key.as_str())
                    }
                }
                RelationSpec::MorphOne(morph) | RelationSpec::MorphMany(morph) => {
                    let keys = distinct_keys(parents, &morph.local_key, key_type(target, &morph.id_key))?;
                    if keys.is_empty() {
                        (Vec::new(), Vec::new(), morph.local_key.as_str())
                    } else {
                        let query = base
                            .filter(Filter::Eq(qualified(target, &morph.type_key)?, Value::from(morph.label.as_str())))
                            .filter(Filter::In(qualified(target, &morph.id_key)?, Value::List(keys)))
                            .order_by(qualified(target, &target.primary_key().name)?, Order::Asc);
                        let children: Vec<Entity> = executor
                            .fetch(&query)
                            .await?
                            .into_iter()
                            .map(|row| hydrate(target, row))
                            .collect();
                        let owners = children
                            .iter()
                            .map(|c| c.get(&morph.id_key).cloned().unwrap_or(JsonValue::Null))
                            .collect();
                        (children, owners, morph.local_key.as_str())
                    }
                }
                RelationSpec::ManyToMany(relation) => {
                    let pivot = &relation.pivot;
                    let keys = distinct_keys(parents, &relation.local_key, FieldType::ForeignKey)?;
                    if keys.is_empty() {
                        (Vec::new(), Vec::new(), relation.local_key.as_str())
                    } else {
                        let query = base
                            .select(format!("{}.{}", pivot.table, pivot.left_key), PIVOT_OWNER, FieldType::ForeignKey)
                            .join(
                                pivot.table.clone(),
                                qualified(target, &relation.foreign_key)?,
                                format!("{}.{}", pivot.table, pivot.right_key),
                            )
                            .filter(Filter::In(format!("{}.{}", pivot.table, pivot.left_key), Value::List(keys)))
                            .order_by(qualified(target, &target.primary_key().name)?, Order::Asc);
                        let (children, owners) = fetch_through_pivot(executor, target, &query).await?;
                        (children, owners, relation.local_key.as_str())
                    }
                }
                RelationSpec::MorphToMany(relation) => {
                    let pivot = &relation.pivot;
                    let keys = distinct_keys(parents, &relation.local_key, FieldType::ForeignKey)?;
                    if keys.is_empty() {
                        (Vec::new(), Vec::new(), relation.local_key.as_str())
                    } else {
                        let query = base
                            .select(format!("{}.{}", pivot.table, pivot.id_column), PIVOT_OWNER, FieldType::ForeignKey)
                            .join(
                                pivot.table.clone(),
                                qualified(target, &relation.foreign_key)?,
                                format!("{}.{}", pivot.table, pivot.related_column),
                            )
                            .filter(Filter::Eq(
                                format!("{}.{}", pivot.table, pivot.type_column),
                                Value::from(relation.label.as_str()),
                            ))
                            .filter(Filter::In(format!("{}.{}", pivot.table, pivot.id_column), Value::List(keys)))
                            .order_by(qualified(target, &target.primary_key().name)?, Order::Asc);
                        let (children, owners) = fetch_through_pivot(executor, target, &query).await?;
                        (children, owners, relation.local_key.as_str())
                    }
                }
            };

            tracing::debug!(
                entity = descriptor.name(),
                relation = %include.name,
                loaded = children.len(),
                "include loaded"
            );

            if !children.is_empty() && !include.children.is_empty() {
                load_includes(orm, target, &mut children, &include.children).await?;
            }

            for parent in parents.iter_mut() {
                let key = parent.get(parent_field).cloned().unwrap_or(JsonValue::Null);
                let matching = children
                    .iter()
                    .zip(owners.iter())
                    .filter(|(_, owner)| !key.is_null() && **owner == key)
                    .map(|(child, _)| child.clone());
                let related = if spec.is_many() {
                    Related::Many(matching.collect())
                } else {
                    Related::One(matching.take(1).next().map(Box::new))
                };
                parent.set_relation(include.name.clone(), related);
            }
        }
        Ok(())
    })
}

/// Rows joined through a pivot, split into entities and their owner keys.
async fn fetch_through_pivot<E: QueryExecutor>(
    executor: &E,
    target: &EntityDescriptor,
    query: &Query,
) -> Result<(Vec<Entity>, Vec<JsonValue>), OrmError> {
    let rows = executor.fetch(query).await?;
    let mut children = Vec::with_capacity(rows.len());
    let mut owners = Vec::with_capacity(rows.len());
    for mut row in rows {
        owners.push(row.remove(PIVOT_OWNER).unwrap_or(JsonValue::Null));
        children.push(hydrate(target, row));
    }
    Ok((children, owners))
}
