//! Repository layer: generic entity access, pagination and bulk mutations.
//!
//! # Responsibility
//! - Expose the caller-facing `Repository` contract over transaction handles.
//! - Keep SQL execution and row mapping inside the core persistence boundary.
//!
//! # Invariants
//! - Validation errors surface before any statement reaches the store.
//! - Store errors surface only after the transaction was rolled back.

pub mod bulk;
pub mod entity_repo;
pub mod page;

pub use bulk::{execute_bulk, execute_bulk_sql};
pub use entity_repo::{Repository, SqliteRepository};
pub use page::{paginate, paginate_native, paginate_projected, Page, PageRequest};
