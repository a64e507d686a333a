//! Entity model: schemas, entity contract, relationships and projections.
//!
//! # Responsibility
//! - Declare the stored entity types (`Member`, `Team`) and their tables.
//! - Define the contracts repositories are generic over.
//!
//! # Invariants
//! - Every entity is identified by a key assigned by the store on insert.
//! - Relationships are explicit `Reference` values, never hidden proxies.

pub mod entity;
pub mod member;
pub mod projection;
pub mod reference;
pub mod schema;
pub mod team;
