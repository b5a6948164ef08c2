//! Relation declarations and their resolved form.
//!
//! An entity declares relations with [`RelationDecl`], naming only the target
//! entity and whatever keys differ from the conventions below. The registry
//! resolves every declaration into a [`RelationSpec`] once, at build time:
//!
//! | kind | keys (defaults) |
//! |---|---|
//! | `BelongsTo` | `<relation>_id` on the source, target primary key |
//! | `HasOne` / `HasMany` | source primary key, `<source>_id` on the target |
//! | `ManyToMany` | pivot `<source>_<target table>` with `<source>_id`, `<target>_id` |
//! | `MorphOne` / `MorphMany` | `<morph>_type`, `<morph>_id` on the target, morph `<target>able` |
//! | `MorphToMany` | pivot `<morph>s` with `<morph>_type`, `<morph>_id`, `<target>_id` |

use crate::entity::EntityDescriptor;
use crate::schema::{Column, FieldType, Table};
use crate::OrmError;

/// The relation topology, without key data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
    ManyToMany,
    MorphOne,
    MorphMany,
    MorphToMany,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::BelongsTo => "BelongsTo",
            RelationKind::HasOne => "HasOne",
            RelationKind::HasMany => "HasMany",
            RelationKind::ManyToMany => "ManyToMany",
            RelationKind::MorphOne => "MorphOne",
            RelationKind::MorphMany => "MorphMany",
            RelationKind::MorphToMany => "MorphToMany",
        }
    }

    /// Whether the relation holds a list rather than a single entity.
    pub fn is_many(&self) -> bool {
        matches!(
            self,
            RelationKind::HasMany
                | RelationKind::ManyToMany
                | RelationKind::MorphMany
                | RelationKind::MorphToMany
        )
    }

    /// Whether the relation is stored in a pivot table.
    pub fn uses_pivot(&self) -> bool {
        matches!(self, RelationKind::ManyToMany | RelationKind::MorphToMany)
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relation as declared on an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDecl {
    pub kind: RelationKind,
    /// Target entity name.
    pub target: String,
    pub foreign_key: Option<String>,
    pub local_key: Option<String>,
    pub pivot: Option<String>,
    pub left_key: Option<String>,
    pub right_key: Option<String>,
    pub morph_name: Option<String>,
}

impl RelationDecl {
    fn new(kind: RelationKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            foreign_key: None,
            local_key: None,
            pivot: None,
            left_key: None,
            right_key: None,
            morph_name: None,
        }
    }

    pub fn belongs_to(target: impl Into<String>) -> Self {
        Self::new(RelationKind::BelongsTo, target)
    }

    pub fn has_one(target: impl Into<String>) -> Self {
        Self::new(RelationKind::HasOne, target)
    }

    pub fn has_many(target: impl Into<String>) -> Self {
        Self::new(RelationKind::HasMany, target)
    }

    pub fn many_to_many(target: impl Into<String>) -> Self {
        Self::new(RelationKind::ManyToMany, target)
    }

    pub fn morph_one(target: impl Into<String>) -> Self {
        Self::new(RelationKind::MorphOne, target)
    }

    pub fn morph_many(target: impl Into<String>) -> Self {
        Self::new(RelationKind::MorphMany, target)
    }

    pub fn morph_to_many(target: impl Into<String>) -> Self {
        Self::new(RelationKind::MorphToMany, target)
    }

    /// For `BelongsTo` the key field on the source; for `HasOne`/`HasMany`
    /// the key field on the target.
    pub fn foreign_key(mut self, field: impl Into<String>) -> Self {
        self.foreign_key = Some(field.into());
        self
    }

    /// For `BelongsTo` the referenced field on the target; otherwise the
    /// referenced field on the source.
    pub fn local_key(mut self, field: impl Into<String>) -> Self {
        self.local_key = Some(field.into());
        self
    }

    pub fn pivot(mut self, table: impl Into<String>) -> Self {
        self.pivot = Some(table.into());
        self
    }

    /// Pivot column pointing at the source (or, for morph pivots, the owner id column).
    pub fn left_key(mut self, column: impl Into<String>) -> Self {
        self.left_key = Some(column.into());
        self
    }

    /// Pivot column pointing at the target.
    pub fn right_key(mut self, column: impl Into<String>) -> Self {
        self.right_key = Some(column.into());
        self
    }

    pub fn morph_name(mut self, name: impl Into<String>) -> Self {
        self.morph_name = Some(name.into());
        self
    }
}

/// Foreign-key relation: rows join where `source.local_key = target.foreign_key`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedRelation {
    pub name: String,
    pub source: String,
    pub target: String,
    /// Field on the source entity.
    pub local_key: String,
    /// Field on the target entity.
    pub foreign_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pivot {
    pub table: String,
    /// Column holding the source key.
    pub left_key: String,
    /// Column holding the target key.
    pub right_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PivotRelation {
    pub name: String,
    pub source: String,
    pub target: String,
    /// Source primary key field.
    pub local_key: String,
    /// Target primary key field.
    pub foreign_key: String,
    pub pivot: Pivot,
}

/// Polymorphic child relation: the target carries `(type, id)` owner fields.
#[derive(Debug, Clone, PartialEq)]
pub struct MorphRelation {
    pub name: String,
    pub source: String,
    pub target: String,
    /// Source primary key field.
    pub local_key: String,
    /// Owner type field on the target.
    pub type_key: String,
    /// Owner id field on the target.
    pub id_key: String,
    /// Owner type label written for the source entity.
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MorphPivot {
    pub table: String,
    pub type_column: String,
    pub id_column: String,
    pub related_column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MorphPivotRelation {
    pub name: String,
    pub source: String,
    pub target: String,
    pub local_key: String,
    pub foreign_key: String,
    pub pivot: MorphPivot,
    pub label: String,
}

/// A fully resolved relation.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationSpec {
    BelongsTo(KeyedRelation),
    HasOne(KeyedRelation),
    HasMany(KeyedRelation),
    ManyToMany(PivotRelation),
    MorphOne(MorphRelation),
    MorphMany(MorphRelation),
    MorphToMany(MorphPivotRelation),
}

impl RelationSpec {
    pub fn kind(&self) -> RelationKind {
        match self {
            RelationSpec::BelongsTo(_) => RelationKind::BelongsTo,
            RelationSpec::HasOne(_) => RelationKind::HasOne,
            RelationSpec::HasMany(_) => RelationKind::HasMany,
            RelationSpec::ManyToMany(_) => RelationKind::ManyToMany,
            RelationSpec::MorphOne(_) => RelationKind::MorphOne,
            RelationSpec::MorphMany(_) => RelationKind::MorphMany,
            RelationSpec::MorphToMany(_) => RelationKind::MorphToMany,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RelationSpec::BelongsTo(r) | RelationSpec::HasOne(r) | RelationSpec::HasMany(r) => {
                &r.name
            }
            RelationSpec::ManyToMany(r) => &r.name,
            RelationSpec::MorphOne(r) | RelationSpec::MorphMany(r) => &r.name,
            RelationSpec::MorphToMany(r) => &r.name,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            RelationSpec::BelongsTo(r) | RelationSpec::HasOne(r) | RelationSpec::HasMany(r) => {
                &r.source
            }
            RelationSpec::ManyToMany(r) => &r.source,
            RelationSpec::MorphOne(r) | RelationSpec::MorphMany(r) => &r.source,
            RelationSpec::MorphToMany(r) => &r.source,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            RelationSpec::BelongsTo(r) | RelationSpec::HasOne(r) | RelationSpec::HasMany(r) => {
                &r.target
            }
            RelationSpec::ManyToMany(r) => &r.target,
            RelationSpec::MorphOne(r) | RelationSpec::MorphMany(r) => &r.target,
            RelationSpec::MorphToMany(r) => &r.target,
        }
    }

    pub fn is_many(&self) -> bool {
        self.kind().is_many()
    }

    /// Pivot table name, for pivot-backed relations.
    pub fn pivot_table(&self) -> Option<&str> {
        match self {
            RelationSpec::ManyToMany(r) => Some(&r.pivot.table),
            RelationSpec::MorphToMany(r) => Some(&r.pivot.table),
            _ => None,
        }
    }
}

/// Resolve a declaration into a spec, together with the pivot table the
/// conventions imply. The registry keeps a declared pivot table over the
/// synthesized one when both exist.
pub(crate) fn resolve(
    name: &str,
    decl: &RelationDecl,
    source: &EntityDescriptor,
    target: &EntityDescriptor,
) -> Result<(RelationSpec, Option<Table>), OrmError> {
    let require = |entity: &EntityDescriptor, field: &str| -> Result<(), OrmError> {
        if entity.field(field).is_some_and(|f| !f.is_relation()) {
            Ok(())
        } else {
            Err(OrmError::Configuration(format!(
                "Relation '{}.{}' references unknown field '{}' on entity '{}'",
                source.name(),
                name,
                field,
                entity.name()
            )))
        }
    };

    let source_pk = source.primary_key().name.clone();
    let target_pk = target.primary_key().name.clone();

    let spec = match decl.kind {
        RelationKind::BelongsTo => {
            let local_key = decl
                .foreign_key
                .clone()
                .unwrap_or_else(|| format!("{}_id", name));
            let foreign_key = decl.local_key.clone().unwrap_or(target_pk);
            require(source, &local_key)?;
            require(target, &foreign_key)?;
            let keyed = KeyedRelation {
                name: name.to_string(),
                source: source.name().to_string(),
                target: target.name().to_string(),
                local_key,
                foreign_key,
            };
            (RelationSpec::BelongsTo(keyed), None)
        }
        RelationKind::HasOne | RelationKind::HasMany => {
            let local_key = decl.local_key.clone().unwrap_or(source_pk);
            let foreign_key = decl
                .foreign_key
                .clone()
                .unwrap_or_else(|| format!("{}_id", source.name()));
            require(source, &local_key)?;
            require(target, &foreign_key)?;
            let keyed = KeyedRelation {
                name: name.to_string(),
                source: source.name().to_string(),
                target: target.name().to_string(),
                local_key,
                foreign_key,
            };
            if decl.kind == RelationKind::HasOne {
                (RelationSpec::HasOne(keyed), None)
            } else {
                (RelationSpec::HasMany(keyed), None)
            }
        }
        RelationKind::ManyToMany => {
            let pivot = Pivot {
                table: decl
                    .pivot
                    .clone()
                    .unwrap_or_else(|| format!("{}_{}", source.name(), target.table())),
                left_key: decl
                    .left_key
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", source.name())),
                right_key: decl
                    .right_key
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", target.name())),
            };
            let table = Table::new(pivot.table.clone())
                .connection(source.connection())
                .column(Column::new(pivot.left_key.clone(), FieldType::ForeignKey))
                .column(Column::new(pivot.right_key.clone(), FieldType::ForeignKey));
            let relation = PivotRelation {
                name: name.to_string(),
                source: source.name().to_string(),
                target: target.name().to_string(),
                local_key: source_pk,
                foreign_key: target_pk,
                pivot,
            };
            (RelationSpec::ManyToMany(relation), Some(table))
        }
        RelationKind::MorphOne | RelationKind::MorphMany => {
            let morph = decl
                .morph_name
                .clone()
                .unwrap_or_else(|| format!("{}able", target.name()));
            let relation = MorphRelation {
                name: name.to_string(),
                source: source.name().to_string(),
                target: target.name().to_string(),
                local_key: source_pk,
                type_key: format!("{}_type", morph),
                id_key: format!("{}_id", morph),
                label: source.morph_label().to_string(),
            };
            require(target, &relation.type_key)?;
            require(target, &relation.id_key)?;
            if decl.kind == RelationKind::MorphOne {
                (RelationSpec::MorphOne(relation), None)
            } else {
                (RelationSpec::MorphMany(relation), None)
            }
        }
        RelationKind::MorphToMany => {
            let morph = decl
                .morph_name
                .clone()
                .unwrap_or_else(|| format!("{}able", target.name()));
            let pivot = MorphPivot {
                table: decl.pivot.clone().unwrap_or_else(|| format!("{}s", morph)),
                type_column: format!("{}_type", morph),
                id_column: decl
                    .left_key
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", morph)),
                related_column: decl
                    .right_key
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", target.name())),
            };
            let table = Table::new(pivot.table.clone())
                .connection(source.connection())
                .column(Column::new(pivot.type_column.clone(), FieldType::String))
                .column(Column::new(pivot.id_column.clone(), FieldType::ForeignKey))
                .column(Column::new(pivot.related_column.clone(), FieldType::ForeignKey));
            let relation = MorphPivotRelation {
                name: name.to_string(),
                source: source.name().to_string(),
                target: target.name().to_string(),
                local_key: source_pk,
                foreign_key: target_pk,
                pivot,
                label: source.morph_label().to_string(),
            };
            (RelationSpec::MorphToMany(relation), Some(table))
        }
    };

    Ok(spec)
}
