//! Projections: partial views over member rows.
//!
//! # Responsibility
//! - Declare which columns a projection needs (`ProjectionShape`).
//! - Map those columns, and only those, into small read models.
//!
//! # Invariants
//! - A nested projection reaches exactly one relation hop.
//! - Projection rows never carry lazy references or tracking state.

use crate::error::RepoResult;
use crate::model::member::MEMBER_SCHEMA;
use crate::model::schema::EntitySchema;
use crate::query::mapper::{FromRow, MapContext, RowView};
use serde::{Deserialize, Serialize};

/// How a nested projection joins its relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Rows without a related entity are kept; nested columns are NULL.
    Left,
    /// Rows without a related entity are dropped.
    Inner,
}

/// Fields of one related entity reachable by one hop.
#[derive(Debug, Clone, Copy)]
pub struct NestedProjection {
    pub relation: &'static str,
    pub fields: &'static [&'static str],
    pub join: JoinKind,
}

/// Columns a projection reads from the root entity and optional relation.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionShape {
    pub name: &'static str,
    pub entity: &'static EntitySchema,
    pub fields: &'static [&'static str],
    pub nested: Option<NestedProjection>,
}

/// A read model produced from a declared subset of columns.
pub trait Projection: FromRow {
    fn shape() -> &'static ProjectionShape;
}

/// Flat projection: the username only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameOnly {
    pub username: String,
}

static USERNAME_ONLY_SHAPE: ProjectionShape = ProjectionShape {
    name: "username_only",
    entity: &MEMBER_SCHEMA,
    fields: &["username"],
    nested: None,
};

impl FromRow for UsernameOnly {
    fn from_row(row: &RowView<'_>, _ctx: &MapContext) -> RepoResult<Self> {
        Ok(Self {
            username: row.get("username")?,
        })
    }
}

impl Projection for UsernameOnly {
    fn shape() -> &'static ProjectionShape {
        &USERNAME_ONLY_SHAPE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamInfo {
    pub name: String,
}

/// Nested projection: username plus the team's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedClosedProjection {
    pub username: String,
    pub team: Option<TeamInfo>,
}

static NESTED_CLOSED_SHAPE: ProjectionShape = ProjectionShape {
    name: "nested_closed",
    entity: &MEMBER_SCHEMA,
    fields: &["username"],
    nested: Some(NestedProjection {
        relation: "team",
        fields: &["name"],
        join: JoinKind::Left,
    }),
};

impl FromRow for NestedClosedProjection {
    fn from_row(row: &RowView<'_>, _ctx: &MapContext) -> RepoResult<Self> {
        let team = row
            .nested("team")
            .get::<Option<String>>("name")?
            .map(|name| TeamInfo { name });
        Ok(Self {
            username: row.get("username")?,
            team,
        })
    }
}

impl Projection for NestedClosedProjection {
    fn shape() -> &'static ProjectionShape {
        &NESTED_CLOSED_SHAPE
    }
}

/// Class-style projection of members that belong to a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDto {
    pub id: i64,
    pub username: String,
    pub team_name: String,
}

static MEMBER_DTO_SHAPE: ProjectionShape = ProjectionShape {
    name: "member_dto",
    entity: &MEMBER_SCHEMA,
    fields: &["id", "username"],
    nested: Some(NestedProjection {
        relation: "team",
        fields: &["name"],
        join: JoinKind::Inner,
    }),
};

impl FromRow for MemberDto {
    fn from_row(row: &RowView<'_>, _ctx: &MapContext) -> RepoResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            username: row.get("username")?,
            team_name: row.nested("team").get("name")?,
        })
    }
}

impl Projection for MemberDto {
    fn shape() -> &'static ProjectionShape {
        &MEMBER_DTO_SHAPE
    }
}

/// Row shape of the native member/team projection query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberProjection {
    pub id: i64,
    pub username: String,
    pub team_name: Option<String>,
}

impl FromRow for MemberProjection {
    fn from_row(row: &RowView<'_>, _ctx: &MapContext) -> RepoResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            username: row.get("username")?,
            team_name: row.get("team_name")?,
        })
    }
}
