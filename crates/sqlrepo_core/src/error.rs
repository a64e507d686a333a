//! Repository-level error taxonomy.
//!
//! # Invariants
//! - Validation errors (`UnknownField`, `InvalidSort`, `InvalidPageRequest`,
//!   `EntityMismatch`) are raised before any statement reaches the store.
//! - Store-surfaced errors (`MutationFailed`, `LockTimeout`, `Db`) are only
//!   returned after the enclosing transaction was rolled back.

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    /// Field name does not resolve to a declared field of the entity.
    UnknownField {
        entity: &'static str,
        field: String,
    },
    /// Sort requested on a relationship field.
    InvalidSort {
        entity: &'static str,
        field: String,
    },
    /// A column required by the target shape is absent from the result row.
    ShapeMismatch { shape: &'static str, column: String },
    /// Page request with a non-positive size.
    InvalidPageRequest { size: u32 },
    /// Bulk UPDATE/DELETE failed; the transaction has been rolled back.
    MutationFailed(DbError),
    /// Lazy lookup found no row for a stored foreign key.
    RelatedEntityNotFound { entity: &'static str, key: String },
    /// Lazy reference accessed outside the live scope it was loaded in.
    DetachedAccess { entity: &'static str },
    /// Store lock wait exceeded the busy timeout.
    LockTimeout,
    /// Query description targets another entity than the repository.
    EntityMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    /// Single-result query matched more than one row.
    NonUniqueResult { entity: &'static str, count: usize },
    /// Relationship points at an entity that has no key yet.
    UnsavedReference {
        entity: &'static str,
        field: &'static str,
    },
    /// Update/delete by key matched no row.
    NotFound { entity: &'static str, key: String },
    /// Bulk update assigns the key field.
    ImmutableField {
        entity: &'static str,
        field: &'static str,
    },
    /// Bulk update without any assignment.
    EmptyUpdate { entity: &'static str },
    /// Persisted or bound value cannot be converted to the target type.
    InvalidData(String),
    Db(DbError),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownField { entity, field } => {
                write!(f, "unknown field `{field}` on entity `{entity}`")
            }
            Self::InvalidSort { entity, field } => write!(
                f,
                "cannot sort `{entity}` by relationship field `{field}`"
            ),
            Self::ShapeMismatch { shape, column } => {
                write!(f, "result row for `{shape}` is missing column `{column}`")
            }
            Self::InvalidPageRequest { size } => {
                write!(f, "page size must be positive, got {size}")
            }
            Self::MutationFailed(err) => write!(f, "bulk mutation failed: {err}"),
            Self::RelatedEntityNotFound { entity, key } => {
                write!(f, "related `{entity}` not found for key {key}")
            }
            Self::DetachedAccess { entity } => write!(
                f,
                "lazy `{entity}` reference accessed outside its transaction scope"
            ),
            Self::LockTimeout => write!(f, "timed out waiting for row lock"),
            Self::EntityMismatch { expected, actual } => write!(
                f,
                "query targets entity `{actual}`, repository serves `{expected}`"
            ),
            Self::NonUniqueResult { entity, count } => write!(
                f,
                "expected at most one `{entity}`, query returned {count}"
            ),
            Self::UnsavedReference { entity, field } => write!(
                f,
                "`{entity}.{field}` references an entity that has not been saved"
            ),
            Self::NotFound { entity, key } => write!(f, "{entity} not found: {key}"),
            Self::ImmutableField { entity, field } => {
                write!(f, "`{entity}.{field}` is the key and cannot be updated")
            }
            Self::EmptyUpdate { entity } => {
                write!(f, "bulk update of `{entity}` assigns no fields")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MutationFailed(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::LockTimeout => Self::LockTimeout,
            other => Self::Db(other),
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        DbError::from_store(value).into()
    }
}
