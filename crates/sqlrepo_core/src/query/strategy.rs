//! Locking/fetch strategy resolution.
//!
//! # Responsibility
//! - Decide per query which relations to join, whether to lock, and which
//!   tracking mode loaded entities carry.
//!
//! # Invariants
//! - The three modifiers (join, lock, read-only) are independent.
//! - Joined relation names must be many-to-one fields of the root entity.

use crate::error::{RepoError, RepoResult};
use crate::model::entity::Tracking;
use crate::model::projection::{JoinKind, ProjectionShape};
use crate::model::schema::{EntitySchema, FieldDef};
use crate::query::description::{LockMode, QueryDescription};

/// What a query materializes.
#[derive(Debug, Clone, Copy)]
pub enum Selection {
    /// Every declared column of the root entity.
    Entity,
    Projection(&'static ProjectionShape),
}

impl Selection {
    pub fn shape_name(&self, entity: &'static EntitySchema) -> &'static str {
        match self {
            Self::Entity => entity.name,
            Self::Projection(shape) => shape.name,
        }
    }
}

/// One relation joined into the statement.
#[derive(Debug, Clone, Copy)]
pub struct PlannedJoin {
    pub relation: &'static FieldDef,
    pub target: &'static EntitySchema,
    pub kind: JoinKind,
}

/// Resolved per-query strategy.
#[derive(Debug, Clone)]
pub struct FetchPlan {
    pub selection: Selection,
    pub joins: Vec<PlannedJoin>,
    pub lock: LockMode,
    pub tracking: Tracking,
}

impl FetchPlan {
    pub fn joined_relations(&self) -> Vec<&'static str> {
        self.joins.iter().map(|join| join.relation.name).collect()
    }
}

/// Resolves joins, lock and tracking for `query` read as `selection`.
///
/// Eager joins requested on the description only apply to entity reads;
/// projections join exactly the relation their shape names.
pub fn resolve(query: &QueryDescription, selection: Selection) -> RepoResult<FetchPlan> {
    let entity = query.entity;
    let mut joins = Vec::new();

    for relation in &query.fetch_joins {
        let (field, target) = require_static_relation(entity, relation)?;
        if matches!(selection, Selection::Entity) {
            joins.push(PlannedJoin {
                relation: field,
                target,
                kind: JoinKind::Left,
            });
        }
    }

    if let Selection::Projection(shape) = selection {
        if shape.entity.name != entity.name {
            return Err(RepoError::EntityMismatch {
                expected: entity.name,
                actual: shape.entity.name,
            });
        }
        for field in shape.fields {
            entity.require_field(field)?;
        }
        if let Some(nested) = shape.nested {
            let (field, target) = require_static_relation(entity, nested.relation)?;
            for nested_field in nested.fields {
                target.require_field(nested_field)?;
            }
            joins.push(PlannedJoin {
                relation: field,
                target,
                kind: nested.join,
            });
        }
    }

    Ok(FetchPlan {
        selection,
        joins,
        lock: query.lock,
        tracking: if query.read_only {
            Tracking::ReadOnly
        } else {
            Tracking::Managed
        },
    })
}

fn require_static_relation(
    entity: &'static EntitySchema,
    name: &str,
) -> RepoResult<(&'static FieldDef, &'static EntitySchema)> {
    entity.require_relation(name)
}
