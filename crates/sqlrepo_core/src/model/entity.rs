//! Entity contract shared by every persisted record type.
//!
//! # Invariants
//! - A key, once assigned by `save`, is never reassigned.
//! - `column_values` follows `EntitySchema::fields` order exactly.

use crate::error::RepoResult;
use crate::model::schema::EntitySchema;
use crate::query::description::ToValue;
use crate::query::mapper::FromRow;
use rusqlite::types::{FromSql, Value};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Primary key type of an entity.
pub trait EntityKey: Copy + Eq + Hash + Debug + Display + FromSql + ToValue + 'static {
    /// Builds a key from the row id SQLite assigned on insert.
    fn from_row_id(row_id: i64) -> Self;
}

impl EntityKey for i64 {
    fn from_row_id(row_id: i64) -> Self {
        row_id
    }
}

/// Change-tracking mode carried on every loaded entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tracking {
    /// `save` writes changes back.
    #[default]
    Managed,
    /// Loaded under the read-only hint; `save` never writes it.
    ReadOnly,
}

/// A record type stored in one table.
pub trait Entity: FromRow + Clone {
    type Key: EntityKey;

    fn schema() -> &'static EntitySchema;

    fn key(&self) -> Option<Self::Key>;

    /// Called by `save` exactly once, right after insert.
    fn assign_key(&mut self, key: Self::Key);

    /// Bound values for every non-key column, in schema order.
    fn column_values(&self) -> RepoResult<Vec<Value>>;

    fn tracking(&self) -> Tracking;
}
