//! The relation-aware persistence engine.
//!
//! A root graph is written in dependency order: `BelongsTo` parents first so
//! their keys can be assigned to the root, then the root row, then children
//! and pivot rows that need the root's key. Everything one root writes goes
//! through one [`Session`].

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::config::BatchMode;
use crate::entity::{EntityDescriptor, WriteOnly};
use crate::input::{Graph, Input};
use crate::model::Model;
use crate::orm::Orm;
use crate::query::{Delete, Filter, Insert, Query, QueryExecutor, Update, Value};
use crate::record::{Entity, Related, Row};
use crate::relation::RelationSpec;
use crate::schema::FieldType;
use crate::session::Session;
use crate::{BoxFuture, OrmError};

/// An error together with the relation path it happened under.
#[derive(Debug)]
struct Failure {
    path: String,
    entity: Option<String>,
    error: OrmError,
}

impl From<OrmError> for Failure {
    fn from(error: OrmError) -> Self {
        Failure {
            path: String::new(),
            entity: None,
            error,
        }
    }
}

impl Failure {
    fn under(mut self, segment: &str) -> Self {
        self.path = if segment.is_empty() {
            self.path
        } else if self.path.is_empty() {
            segment.to_string()
        } else if self.path.starts_with('[') {
            format!("{}{}", segment, self.path)
        } else {
            format!("{}.{}", segment, self.path)
        };
        self
    }

    /// Record the entity being written, unless a deeper one already failed.
    fn within(mut self, entity: &str) -> Self {
        if self.entity.is_none() {
            self.entity = Some(entity.to_string());
        }
        self
    }

    fn into_nested(self, index: usize, entity: &str) -> OrmError {
        OrmError::NestedInsert {
            index,
            entity: entity.to_string(),
            path: self.path,
            failed_entity: self.entity.unwrap_or_else(|| entity.to_string()),
            source: Box::new(self.error),
        }
    }
}

/// Non-null value of a field, required to wire a relation.
fn key_of(entity: &Entity, field: &str) -> Result<JsonValue, OrmError> {
    entity
        .get(field)
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or_else(|| {
            OrmError::InvalidInput(format!(
                "Entity '{}' has no value for key field '{}'",
                entity.entity(),
                field
            ))
        })
}

fn column_path(table: &str, column: &str) -> String {
    format!("{}.{}", table, column)
}

fn build_insert(descriptor: &EntityDescriptor, row: &Row) -> Result<Insert, OrmError> {
    let pk = descriptor.primary_key();
    let mut insert = Insert::into_table(descriptor.table()).returning(pk.column.clone(), pk.ty);
    for field in descriptor.fields() {
        if let Some(value) = row.get(&field.name) {
            insert = insert.value(field.column.clone(), descriptor.bind(field, value)?, field.ty);
        }
    }
    Ok(insert)
}

/// Entity built from a row read back with field-name aliases.
pub(crate) fn hydrate(descriptor: &EntityDescriptor, row: Row) -> Entity {
    Entity::new(descriptor.name(), descriptor.primary_key().name.clone(), row)
}

/// SELECT of the readable columns of an entity, aliased by field name.
pub(crate) fn select_readable(descriptor: &EntityDescriptor, write_only: &WriteOnly) -> Query {
    let mut query = Query::for_table(descriptor.table());
    for field in descriptor.readable_fields(write_only) {
        query = query.select(
            column_path(descriptor.table(), &field.column),
            field.name.clone(),
            field.ty,
        );
    }
    query
}

impl<E: QueryExecutor + 'static> Orm<E> {
    /// Bind a value for a column of any registered table.
    fn bind_column(&self, table: &str, column: &str, value: &JsonValue) -> Result<Value, OrmError> {
        let ty = self
            .registry()
            .table(table)
            .map(|t| t.column_type(column))
            .unwrap_or(FieldType::Json);
        Value::from_json(value, ty).map_err(|e| {
            OrmError::InvalidInput(format!("Column '{}.{}': {}", table, column, e))
        })
    }

    fn connection_of(&self, table: &str) -> Result<String, OrmError> {
        self.registry()
            .table(table)
            .map(|t| t.connection.clone())
            .ok_or_else(|| OrmError::Configuration(format!("Unknown table '{}'", table)))
    }

    async fn insert_row(
        &self,
        session: &mut Session<'_, E>,
        descriptor: &EntityDescriptor,
        fields: Row,
    ) -> Result<Entity, OrmError> {
        let row = descriptor.normalize(fields, true)?;
        let insert = build_insert(descriptor, &row)?;
        let generated = session.insert(descriptor.connection(), &insert).await?;

        let pk = descriptor.primary_key().name.clone();
        let row = match generated {
            Some(id) if !row.contains_key(&pk) => {
                let mut ordered = Row::new();
                ordered.insert(pk.clone(), id);
                ordered.extend(row);
                ordered
            }
            _ => row,
        };
        Ok(Entity::new(descriptor.name(), pk, row))
    }

    /// Insert a pivot row unless an identical one exists. Returns whether a row was written.
    async fn attach(
        &self,
        session: &mut Session<'_, E>,
        table: &str,
        pairs: &[(&str, &JsonValue)],
    ) -> Result<bool, OrmError> {
        let connection = self.connection_of(table)?;
        let mut lookup = Query::for_table(table);
        let mut insert = Insert::into_table(table);
        for (column, value) in pairs {
            let bound = self.bind_column(table, column, value)?;
            let ty = self
                .registry()
                .table(table)
                .map(|t| t.column_type(column))
                .unwrap_or(FieldType::Json);
            lookup = lookup.eq(column_path(table, column), bound.clone());
            insert = insert.value(*column, bound, ty);
        }
        if session.exists(&connection, &lookup).await? {
            tracing::debug!(table, "pivot row already present");
            return Ok(false);
        }
        session.insert(&connection, &insert).await?;
        Ok(true)
    }

    /// Find a row of `target` equal to the provided scalar fields of a new record.
    async fn find_matching(
        &self,
        session: &mut Session<'_, E>,
        target: &EntityDescriptor,
        fields: &Row,
    ) -> Result<Option<Entity>, OrmError> {
        let mut query = select_readable(target, &WriteOnly::Hidden).limit(1);
        let mut matched = 0;
        for field in target.fields() {
            let comparable = matches!(
                field.ty,
                FieldType::String | FieldType::Int | FieldType::Bool | FieldType::ForeignKey
            );
            match fields.get(&field.name) {
                Some(value) if comparable && !value.is_null() => {
                    query = query.eq(
                        column_path(target.table(), &field.column),
                        target.bind(field, value)?,
                    );
                    matched += 1;
                }
                _ => {}
            }
        }
        if matched == 0 {
            return Ok(None);
        }
        let mut rows = session.fetch(target.connection(), &query).await?;
        Ok(rows.pop().map(|row| hydrate(target, row)))
    }

    /// Persist one classified graph and everything it nests.
    fn persist_graph<'a>(
        &'a self,
        session: &'a mut Session<'_, E>,
        graph: Graph,
    ) -> BoxFuture<'a, Result<Entity, Failure>> {
        Box::pin(async move {
            let entity = graph.entity.clone();
            let written = async {
                let registry = self.registry();
                let descriptor = registry.describe(&graph.entity)?;
                let Graph {
                    mut fields,
                    relations,
                    ..
                } = graph;

                let (parents, children): (Vec<_>, Vec<_>) = relations.into_iter().partition(|r| {
                    matches!(descriptor.relation(&r.name), Some(RelationSpec::BelongsTo(_)))
                });

                let mut loaded = BTreeMap::new();
                for relation in parents {
                    let Some(RelationSpec::BelongsTo(keyed)) = descriptor.relation(&relation.name) else {
                        continue;
                    };
                    let Some(item) = relation.items.into_iter().next() else {
                        continue;
                    };
                    let target = registry.describe(&keyed.target)?;
                    let parent = match item {
                        Input::ExistingReference { fields, .. } => hydrate(target, fields),
                        other => self
                            .persist_item(session, target, other, Row::new())
                            .await
                            .map_err(|f| f.under(&relation.name))?,
                    };
                    let key = key_of(&parent, &keyed.foreign_key)
                        .map_err(|e| Failure::from(e).under(&relation.name))?;
                    if fields.contains_key(&keyed.local_key) {
                        tracing::debug!(
                            entity = descriptor.name(),
                            field = %keyed.local_key,
                            "nested parent overrides supplied key"
                        );
                    }
                    fields.insert(keyed.local_key.clone(), key);
                    loaded.insert(relation.name, Related::One(Some(Box::new(parent))));
                }

                let mut root = self.insert_row(session, descriptor, fields).await?;

                for relation in children {
                    let spec = registry.resolve(descriptor.name(), &relation.name)?;
                    let related = self
                        .persist_related(session, spec, &root, relation.items, false)
                        .await
                        .map_err(|f| f.under(&relation.name))?;
                    let related = if spec.is_many() {
                        Related::Many(related)
                    } else {
                        Related::One(related.into_iter().next().map(Box::new))
                    };
                    loaded.insert(relation.name, related);
                }

                root.relations = loaded;
                Ok::<Entity, Failure>(root)
            };
            written.await.map_err(|f| f.within(&entity))
        })
    }

    /// Insert a relation element as a new row, with `extra` fields assigned.
    fn persist_item<'a>(
        &'a self,
        session: &'a mut Session<'_, E>,
        target: &'a EntityDescriptor,
        item: Input,
        extra: Row,
    ) -> BoxFuture<'a, Result<Entity, Failure>> {
        Box::pin(async move {
            let mut graph = match item {
                Input::ExistingReference { fields, .. } | Input::NewRecord(fields) => {
                    Graph::record(target.name(), fields)
                }
                Input::NestedGraph(graph) => graph,
                Input::Scalar(value) => {
                    return Err(Failure::from(OrmError::InvalidInput(format!(
                        "Scalar {} is not a '{}' record",
                        value,
                        target.name()
                    )))
                    .within(target.name()));
                }
            };
            graph.fields.extend(extra);
            self.persist_graph(session, graph).await
        })
    }

    /// Persist the elements of a non-`BelongsTo` relation of an already stored owner.
    ///
    /// With `match_existing`, new many-to-many elements equal to a stored row
    /// link that row instead of inserting a duplicate.
    async fn persist_related(
        &self,
        session: &mut Session<'_, E>,
        spec: &RelationSpec,
        owner: &Entity,
        items: Vec<Input>,
        match_existing: bool,
    ) -> Result<Vec<Entity>, Failure> {
        let registry = self.registry();
        let target = registry.describe(spec.target())?;
        let mut persisted = Vec::with_capacity(items.len());
        let at = |index: usize| {
            if spec.is_many() {
                format!("[{}]", index)
            } else {
                String::new()
            }
        };

        match spec {
            RelationSpec::BelongsTo(_) => {
                return Err(OrmError::InvalidRelationType {
                    entity: spec.source().to_string(),
                    relation: spec.name().to_string(),
                    kind: spec.kind().as_str(),
                    operation: "create",
                }
                .into());
            }
            RelationSpec::HasOne(keyed) | RelationSpec::HasMany(keyed) => {
                let mut extra = Row::new();
                extra.insert(keyed.foreign_key.clone(), key_of(owner, &keyed.local_key)?);
                for (index, item) in items.into_iter().enumerate() {
                    let child = self
                        .persist_item(session, target, item, extra.clone())
                        .await
                        .map_err(|f| f.under(&at(index)))?;
                    persisted.push(child);
                }
            }
            RelationSpec::MorphOne(morph) | RelationSpec::MorphMany(morph) => {
                let mut extra = Row::new();
                extra.insert(morph.type_key.clone(), JsonValue::from(morph.label.clone()));
                extra.insert(morph.id_key.clone(), key_of(owner, &morph.local_key)?);
                for (index, item) in items.into_iter().enumerate() {
                    let child = self
                        .persist_item(session, target, item, extra.clone())
                        .await
                        .map_err(|f| f.under(&at(index)))?;
                    persisted.push(child);
                }
            }
            RelationSpec::ManyToMany(relation) => {
                let owner_key = key_of(owner, &relation.local_key)?;
                for (index, item) in items.into_iter().enumerate() {
                    let related = self
                        .resolve_linked(session, target, item, match_existing)
                        .await
                        .map_err(|f| f.under(&at(index)))?;
                    let related_key = key_of(&related, &relation.foreign_key)?;
                    self.attach(
                        session,
                        &relation.pivot.table,
                        &[
                            (relation.pivot.left_key.as_str(), &owner_key),
                            (relation.pivot.right_key.as_str(), &related_key),
                        ],
                    )
                    .await
                    .map_err(|e| Failure::from(e).under(&at(index)))?;
                    persisted.push(related);
                }
            }
            RelationSpec::MorphToMany(relation) => {
                let owner_key = key_of(owner, &relation.local_key)?;
                let label = JsonValue::from(relation.label.clone());
                for (index, item) in items.into_iter().enumerate() {
                    let related = self
                        .resolve_linked(session, target, item, match_existing)
                        .await
                        .map_err(|f| f.under(&at(index)))?;
                    let related_key = key_of(&related, &relation.foreign_key)?;
                    self.attach(
                        session,
                        &relation.pivot.table,
                        &[
                            (relation.pivot.type_column.as_str(), &label),
                            (relation.pivot.id_column.as_str(), &owner_key),
                            (relation.pivot.related_column.as_str(), &related_key),
                        ],
                    )
                    .await
                    .map_err(|e| Failure::from(e).under(&at(index)))?;
                    persisted.push(related);
                }
            }
        }
        Ok(persisted)
    }

    /// The row a pivot element points at: existing references as given, new
    /// elements matched or inserted.
    async fn resolve_linked(
        &self,
        session: &mut Session<'_, E>,
        target: &EntityDescriptor,
        item: Input,
        match_existing: bool,
    ) -> Result<Entity, Failure> {
        match item {
            Input::ExistingReference { fields, .. } => Ok(hydrate(target, fields)),
            other => {
                if match_existing {
                    let fields = match &other {
                        Input::NewRecord(fields) => Some(fields),
                        Input::NestedGraph(graph) => Some(&graph.fields),
                        _ => None,
                    };
                    if let Some(fields) = fields
                        && let Some(found) = self.find_matching(session, target, fields).await?
                    {
                        return Ok(found);
                    }
                }
                self.persist_item(session, target, other, Row::new()).await
            }
        }
    }

    /// Bulk insert of scalar rows.
    ///
    /// Relation keys are accepted and ignored: no related rows, keys or pivot
    /// rows are written. All rows go through one session.
    #[tracing::instrument(level = "debug", skip(self, rows), fields(count = rows.len()))]
    pub async fn insert(&self, entity: &str, rows: Vec<JsonValue>) -> Result<Vec<Entity>, OrmError> {
        let descriptor = self.registry().describe(entity)?;
        let mut scalars = Vec::with_capacity(rows.len());
        for row in rows {
            let JsonValue::Object(object) = row else {
                return Err(OrmError::InvalidInput(format!(
                    "Expected an object for entity '{}'",
                    entity
                )));
            };
            let mut fields = Row::new();
            for (key, value) in object {
                if descriptor.column_field(&key).is_some() {
                    fields.insert(key, value);
                } else if descriptor.relation(&key).is_some() {
                    tracing::debug!(entity, relation = %key, "bulk insert ignores relation value");
                } else {
                    return Err(OrmError::InvalidInput(format!(
                        "Entity '{}' has no field or relation '{}'",
                        entity, key
                    )));
                }
            }
            scalars.push(fields);
        }

        let mut session = self.session();
        let mut inserted = Vec::with_capacity(scalars.len());
        for fields in scalars {
            match self.insert_row(&mut session, descriptor, fields).await {
                Ok(row) => inserted.push(row),
                Err(e) => {
                    if let Err(rollback) = session.rollback().await {
                        tracing::warn!(error = %rollback, "rollback failed");
                    }
                    return Err(e);
                }
            }
        }
        session.commit().await?;
        Ok(inserted)
    }

    pub async fn insert_models<T: Model>(&self, models: &[T]) -> Result<Vec<T>, OrmError> {
        let rows = models
            .iter()
            .map(Model::to_request)
            .collect::<Result<Vec<_>, _>>()?;
        self.insert(T::entity_name(), rows)
            .await?
            .into_iter()
            .map(T::from_entity)
            .collect()
    }

    /// Persist nested graphs, each root independently, honoring the batch mode.
    ///
    /// Returns the roots with the supplied relations populated as persisted,
    /// not re-queried. A failure reports the root index, the relation path and
    /// the underlying error.
    #[tracing::instrument(level = "debug", skip(self, requests), fields(count = requests.len()))]
    pub async fn insert_with_relations(
        &self,
        entity: &str,
        requests: Vec<JsonValue>,
    ) -> Result<Vec<Entity>, OrmError> {
        let mut graphs = Vec::with_capacity(requests.len());
        for (index, request) in requests.into_iter().enumerate() {
            let graph = Graph::parse(self.registry(), entity, request)
                .map_err(|e| Failure::from(e).into_nested(index, entity))?;
            graphs.push(graph);
        }

        let per_root = self.batch_mode() == BatchMode::PerRoot;
        let mut session = self.session();
        let mut persisted = Vec::with_capacity(graphs.len());
        for (index, graph) in graphs.into_iter().enumerate() {
            match self.persist_graph(&mut session, graph).await {
                Ok(root) => {
                    persisted.push(root);
                    if per_root {
                        let finished = std::mem::replace(&mut session, self.session());
                        finished
                            .commit()
                            .await
                            .map_err(|e| Failure::from(e).into_nested(index, entity))?;
                    }
                }
                Err(failure) => {
                    tracing::warn!(
                        index,
                        entity,
                        path = %failure.path,
                        failed_entity = failure.entity.as_deref().unwrap_or(entity),
                        error = %failure.error,
                        committed = if per_root { index } else { 0 },
                        "nested insert failed"
                    );
                    if let Err(rollback) = session.rollback().await {
                        tracing::warn!(error = %rollback, "rollback failed");
                    }
                    return Err(failure.into_nested(index, entity));
                }
            }
        }
        session.commit().await?;
        Ok(persisted)
    }

    pub async fn insert_models_with_relations<T: Model>(
        &self,
        models: &[T],
    ) -> Result<Vec<T>, OrmError> {
        let requests = models
            .iter()
            .map(Model::to_request)
            .collect::<Result<Vec<_>, _>>()?;
        self.insert_with_relations(T::entity_name(), requests)
            .await?
            .into_iter()
            .map(T::from_entity)
            .collect()
    }

    /// Resolve a pivot-backed relation, or fail for `operation` on any other kind.
    fn pivot_relation(
        &self,
        owner: &Entity,
        relation: &str,
        operation: &'static str,
    ) -> Result<&RelationSpec, OrmError> {
        let spec = self.registry().resolve(owner.entity(), relation)?;
        if spec.kind().uses_pivot() {
            Ok(spec)
        } else {
            Err(OrmError::InvalidRelationType {
                entity: owner.entity().to_string(),
                relation: relation.to_string(),
                kind: spec.kind().as_str(),
                operation,
            })
        }
    }

    /// Run one relation write in its own session.
    async fn write_related(
        &self,
        spec: &RelationSpec,
        owner: &Entity,
        items: Vec<Input>,
        match_existing: bool,
    ) -> Result<Vec<Entity>, OrmError> {
        let mut session = self.session();
        match self
            .persist_related(&mut session, spec, owner, items, match_existing)
            .await
        {
            Ok(related) => {
                session.commit().await?;
                Ok(related)
            }
            Err(failure) => {
                if let Err(rollback) = session.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(failure.error)
            }
        }
    }

    fn classify_all(&self, spec: &RelationSpec, items: Vec<JsonValue>) -> Result<Vec<Input>, OrmError> {
        let target = self.registry().describe(spec.target())?;
        items
            .into_iter()
            .map(|item| Input::classify(self.registry(), target, item))
            .collect()
    }

    /// Insert pivot rows linking `owner` to existing rows. Never creates target rows.
    #[tracing::instrument(level = "debug", skip(self, owner, items), fields(entity = owner.entity()))]
    pub async fn link(
        &self,
        owner: &Entity,
        relation: &str,
        items: Vec<JsonValue>,
    ) -> Result<(), OrmError> {
        let spec = self.pivot_relation(owner, relation, "link")?;
        let inputs = self.classify_all(spec, items)?;
        if let Some(new) = inputs.iter().find(|i| i.id().is_none()) {
            return Err(OrmError::InvalidInput(format!(
                "link '{}' expects existing rows with a primary key, got {:?}",
                relation, new
            )));
        }
        self.write_related(spec, owner, inputs, false).await?;
        Ok(())
    }

    /// Delete pivot rows of `owner`; all of them when `items` is `None`.
    /// Returns the number of rows deleted.
    #[tracing::instrument(level = "debug", skip(self, owner, items), fields(entity = owner.entity()))]
    pub async fn unlink(
        &self,
        owner: &Entity,
        relation: &str,
        items: Option<Vec<JsonValue>>,
    ) -> Result<u64, OrmError> {
        let spec = self.pivot_relation(owner, relation, "unlink")?;

        let (table, mut delete, related_column, foreign_key) = match spec {
            RelationSpec::ManyToMany(r) => {
                let owner_key = key_of(owner, &r.local_key)?;
                let table = r.pivot.table.as_str();
                let delete = Delete::from_table(table).eq(
                    column_path(table, &r.pivot.left_key),
                    self.bind_column(table, &r.pivot.left_key, &owner_key)?,
                );
                (table, delete, r.pivot.right_key.as_str(), r.foreign_key.as_str())
            }
            RelationSpec::MorphToMany(r) => {
                let owner_key = key_of(owner, &r.local_key)?;
                let table = r.pivot.table.as_str();
                let delete = Delete::from_table(table)
                    .eq(column_path(table, &r.pivot.type_column), r.label.as_str())
                    .eq(
                        column_path(table, &r.pivot.id_column),
                        self.bind_column(table, &r.pivot.id_column, &owner_key)?,
                    );
                (
                    table,
                    delete,
                    r.pivot.related_column.as_str(),
                    r.foreign_key.as_str(),
                )
            }
            _ => {
                return Err(OrmError::InvalidRelationType {
                    entity: owner.entity().to_string(),
                    relation: relation.to_string(),
                    kind: spec.kind().as_str(),
                    operation: "unlink",
                });
            }
        };

        if let Some(items) = items {
            let mut keys = Vec::with_capacity(items.len());
            for input in self.classify_all(spec, items)? {
                match input {
                    Input::ExistingReference { fields, .. } => {
                        let key = fields.get(foreign_key).cloned().ok_or_else(|| {
                            OrmError::InvalidInput(format!(
                                "unlink '{}' element has no '{}'",
                                relation, foreign_key
                            ))
                        })?;
                        keys.push(self.bind_column(table, related_column, &key)?);
                    }
                    other => {
                        return Err(OrmError::InvalidInput(format!(
                            "unlink '{}' expects existing rows, got {:?}",
                            relation, other
                        )));
                    }
                }
            }
            if keys.is_empty() {
                return Ok(0);
            }
            delete = delete.filter(Filter::In(column_path(table, related_column), Value::List(keys)));
        }

        let connection = self.connection_of(table)?;
        let mut session = self.session();
        let deleted = session.delete(&connection, &delete).await?;
        session.commit().await?;
        Ok(deleted)
    }

    /// Create related rows for `owner`.
    ///
    /// Many-to-many elements equal to an existing row on their provided
    /// string, integer, boolean and key fields are linked instead of
    /// inserted; has-one, has-many and morph elements are always inserted.
    #[tracing::instrument(level = "debug", skip(self, owner, items), fields(entity = owner.entity()))]
    pub async fn create(
        &self,
        owner: &Entity,
        relation: &str,
        items: Vec<JsonValue>,
    ) -> Result<Vec<Entity>, OrmError> {
        let spec = self.registry().resolve(owner.entity(), relation)?;
        if let RelationSpec::BelongsTo(_) = spec {
            return Err(OrmError::InvalidRelationType {
                entity: owner.entity().to_string(),
                relation: relation.to_string(),
                kind: spec.kind().as_str(),
                operation: "create",
            });
        }
        let inputs = self.classify_all(spec, items)?;
        self.write_related(spec, owner, inputs, true).await
    }

    /// Alias of [`Orm::create`].
    pub async fn add(
        &self,
        owner: &Entity,
        relation: &str,
        items: Vec<JsonValue>,
    ) -> Result<Vec<Entity>, OrmError> {
        self.create(owner, relation, items).await
    }

    /// Delete the child rows of a has-one, has-many or morph relation.
    #[tracing::instrument(level = "debug", skip(self, owner), fields(entity = owner.entity()))]
    pub async fn delete_related(&self, owner: &Entity, relation: &str) -> Result<u64, OrmError> {
        let spec = self.registry().resolve(owner.entity(), relation)?;
        let target = self.registry().describe(spec.target())?;
        let table = target.table();
        let column = |field: &str| -> Result<String, OrmError> {
            target
                .column_of(field)
                .map(|c| column_path(table, c))
                .ok_or_else(|| OrmError::Configuration(format!("Unknown field '{}'", field)))
        };
        let bind = |field: &str, value: &JsonValue| -> Result<Value, OrmError> {
            match target.column_field(field) {
                Some(f) => target.bind(f, value),
                None => Err(OrmError::Configuration(format!("Unknown field '{}'", field))),
            }
        };

        let delete = match spec {
            RelationSpec::HasOne(keyed) | RelationSpec::HasMany(keyed) => {
                let key = key_of(owner, &keyed.local_key)?;
                Delete::from_table(table)
                    .eq(column(&keyed.foreign_key)?, bind(&keyed.foreign_key, &key)?)
            }
            RelationSpec::MorphOne(morph) | RelationSpec::MorphMany(morph) => {
                let key = key_of(owner, &morph.local_key)?;
                Delete::from_table(table)
                    .eq(column(&morph.type_key)?, morph.label.as_str())
                    .eq(column(&morph.id_key)?, bind(&morph.id_key, &key)?)
            }
            _ => {
                return Err(OrmError::InvalidRelationType {
                    entity: owner.entity().to_string(),
                    relation: relation.to_string(),
                    kind: spec.kind().as_str(),
                    operation: "delete_related",
                });
            }
        };

        let mut session = self.session();
        let deleted = session.delete(target.connection(), &delete).await?;
        session.commit().await?;
        Ok(deleted)
    }

    /// Update all column fields of a stored entity by primary key.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = entity.entity()))]
    pub async fn update(&self, entity: &Entity) -> Result<(), OrmError> {
        let descriptor = self.registry().describe(entity.entity())?;
        let pk = descriptor.primary_key();
        let id = entity.id().cloned().ok_or_else(|| {
            OrmError::InvalidInput(format!(
                "Cannot update '{}' without a primary key",
                descriptor.name()
            ))
        })?;

        let mut fields = entity.fields.clone();
        fields.remove(&pk.name);
        let row = descriptor.normalize(fields, false)?;
        let mut update = Update::table(descriptor.table());
        for field in descriptor.fields() {
            if let Some(value) = row.get(&field.name) {
                update = update.set(field.column.clone(), descriptor.bind(field, value)?, field.ty);
            }
        }
        let update = update.eq(
            column_path(descriptor.table(), &pk.column),
            descriptor.bind(pk, &id)?,
        );

        let mut session = self.session();
        let affected = if update.values.is_empty() {
            let lookup = Query::for_table(descriptor.table()).eq(
                column_path(descriptor.table(), &pk.column),
                descriptor.bind(pk, &id)?,
            );
            u64::from(session.exists(descriptor.connection(), &lookup).await?)
        } else {
            session.update(descriptor.connection(), &update).await?
        };
        session.commit().await?;

        if affected == 0 {
            return Err(OrmError::NotFound(format!(
                "{} with {} = {}",
                descriptor.name(),
                pk.name,
                id
            )));
        }
        Ok(())
    }

    /// Insert when the primary key is unset or matches no row, update otherwise.
    /// Relations on the entity are kept as given and not written.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = entity.entity()))]
    pub async fn save(&self, entity: Entity) -> Result<Entity, OrmError> {
        if entity.id().is_some() {
            match self.update(&entity).await {
                Ok(()) => return Ok(entity),
                Err(OrmError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        let descriptor = self.registry().describe(entity.entity())?;
        let mut session = self.session();
        let mut saved = self
            .insert_row(&mut session, descriptor, entity.fields)
            .await?;
        session.commit().await?;
        saved.relations = entity.relations;
        Ok(saved)
    }

    /// Delete a stored entity by primary key. Returns the number of rows deleted.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = entity.entity()))]
    pub async fn delete(&self, entity: &Entity) -> Result<u64, OrmError> {
        let descriptor = self.registry().describe(entity.entity())?;
        let pk = descriptor.primary_key();
        let id = entity.id().ok_or_else(|| {
            OrmError::InvalidInput(format!(
                "Cannot delete '{}' without a primary key",
                descriptor.name()
            ))
        })?;
        let delete = Delete::from_table(descriptor.table()).eq(
            column_path(descriptor.table(), &pk.column),
            descriptor.bind(pk, id)?,
        );
        let mut session = self.session();
        let deleted = session.delete(descriptor.connection(), &delete).await?;
        session.commit().await?;
        Ok(deleted)
    }
}
