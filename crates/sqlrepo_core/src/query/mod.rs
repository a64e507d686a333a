//! Query construction, strategy resolution and row mapping.
//!
//! # Responsibility
//! - Describe reads and bulk writes as plain values (`description`).
//! - Decide joins, locking and tracking per query (`strategy`).
//! - Render SQL with ordered parameters (`builder`).
//! - Turn raw rows into typed results (`mapper`).
//!
//! # Invariants
//! - Nothing in this module touches the store.

pub mod builder;
pub mod description;
pub mod mapper;
pub mod strategy;

pub use builder::{build, build_bulk, build_count, build_projection, BuiltQuery};
pub use description::{
    Assignment, BulkMutation, Direction, LockMode, MutationKind, Operator, Order, Predicate,
    QueryDescription, Sort, ToValue,
};
pub use mapper::{map_rows, FromRow, MapContext, RowView};
pub use strategy::{resolve, FetchPlan, PlannedJoin, Selection};
