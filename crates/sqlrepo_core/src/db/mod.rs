//! SQLite storage bootstrap, connection provisioning and transaction scopes.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the repository engine.
//! - Apply schema migrations in deterministic order.
//! - Hand out transaction handles through the connection provider.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Core code must not read/write entity data before migrations succeed.
//! - Every store error rolls back the enclosing transaction before surfacing.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod config;
pub mod migrations;
mod open;
pub mod provider;
pub mod transaction;

pub use config::DbConfig;
pub use open::{open_db, open_db_in_memory, open_db_with_config};
pub use provider::{in_transaction, ConnectionProvider, SqliteConnectionProvider};
pub use transaction::{RawRows, ScopeToken, TxHandle};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// Store lock could not be acquired within the configured busy timeout.
    LockTimeout,
    /// Statement issued on a handle that was already committed or rolled back.
    TransactionClosed,
    /// No pooled connection became available within the acquire timeout.
    Pool(r2d2::Error),
}

impl DbError {
    /// Classifies raw SQLite errors, folding busy/locked codes into `LockTimeout`.
    pub(crate) fn from_store(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                Self::LockTimeout
            }
            _ => Self::Sqlite(err),
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::LockTimeout => write!(f, "timed out waiting for store lock"),
            Self::TransactionClosed => write!(f, "transaction is already closed"),
            Self::Pool(err) => write!(f, "connection pool: {err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
            Self::LockTimeout => None,
            Self::TransactionClosed => None,
            Self::Pool(err) => Some(err),
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::from_store(value)
    }
}

impl From<r2d2::Error> for DbError {
    fn from(value: r2d2::Error) -> Self {
        Self::Pool(value)
    }
}
