//! Team entity.
//!
//! # Invariants
//! - `id` is `None` until the first `save` and never changes afterwards.

use crate::error::RepoResult;
use crate::model::entity::{Entity, Tracking};
use crate::model::schema::{EntitySchema, FieldDef};
use crate::query::mapper::{FromRow, MapContext, RowView};
use rusqlite::types::Value;

pub type TeamId = i64;

pub static TEAM_SCHEMA: EntitySchema = EntitySchema {
    name: "team",
    table: "team",
    key: FieldDef::key("id", "team_id"),
    fields: &[FieldDef::scalar("name", "name")],
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    id: Option<TeamId>,
    pub name: String,
    tracking: Tracking,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            tracking: Tracking::Managed,
        }
    }

    pub fn id(&self) -> Option<TeamId> {
        self.id
    }

    pub fn is_read_only(&self) -> bool {
        self.tracking == Tracking::ReadOnly
    }
}

impl FromRow for Team {
    fn from_row(row: &RowView<'_>, ctx: &MapContext) -> RepoResult<Self> {
        Ok(Self {
            id: Some(row.get("id")?),
            name: row.get("name")?,
            tracking: ctx.tracking(),
        })
    }
}

impl Entity for Team {
    type Key = TeamId;

    fn schema() -> &'static EntitySchema {
        &TEAM_SCHEMA
    }

    fn key(&self) -> Option<TeamId> {
        self.id
    }

    fn assign_key(&mut self, key: TeamId) {
        self.id = Some(key);
    }

    fn column_values(&self) -> RepoResult<Vec<Value>> {
        Ok(vec![Value::Text(self.name.clone())])
    }

    fn tracking(&self) -> Tracking {
        self.tracking
    }
}
