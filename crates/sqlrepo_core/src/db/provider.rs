//! Connection provider and scoped transaction helper.
//!
//! # Responsibility
//! - Migrate a file or private in-memory store once, then pool connections to it.
//! - Hand out one `TxHandle` per acquisition.
//! - Provide `in_transaction` with commit-on-success / rollback-otherwise.
//!
//! # Invariants
//! - The provider is `Send + Sync`; handles are used by one thread at a time.
//! - Pooled connections carry the configured pragmas and busy timeout.
//! - In-memory stores use the `memdb` VFS, so lock waits honour the busy
//!   timeout, and stay alive for the provider's lifetime via an anchor
//!   connection.

use super::config::DbConfig;
use super::open::{configure_connection, open_db_with_config};
use super::transaction::TxHandle;
use super::{DbError, DbResult};
use log::{error, info, warn};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

/// Source of transactional handles consumed by repositories.
pub trait ConnectionProvider {
    /// Acquires a connection and wraps it in a fresh transaction scope.
    fn acquire(&self) -> DbResult<TxHandle<'_>>;
}

/// SQLite-backed connection provider.
pub struct SqliteConnectionProvider {
    pool: Pool<SqliteConnectionManager>,
    config: DbConfig,
    _anchor: Option<Mutex<Connection>>,
}

impl SqliteConnectionProvider {
    /// Opens (and migrates) a file-backed store.
    pub fn open(path: impl AsRef<Path>, config: DbConfig) -> DbResult<Self> {
        let path = path.as_ref();
        drop(open_db_with_config(path, &config)?);
        let pool = build_pool(SqliteConnectionManager::file(path), &config)?;
        info!(
            "event=provider_open module=db status=ok mode=file max_connections={}",
            config.max_connections
        );
        Ok(Self {
            pool,
            config,
            _anchor: None,
        })
    }

    /// Opens a private in-memory store.
    ///
    /// Every connection from this provider sees the same data; other providers
    /// get their own store.
    pub fn open_in_memory(config: DbConfig) -> DbResult<Self> {
        let uri = format!("file:/sqlrepo-{}?vfs=memdb", Uuid::new_v4());
        let anchor = open_db_with_config(&uri, &config)?;
        let pool = build_pool(SqliteConnectionManager::file(&uri), &config)?;
        info!(
            "event=provider_open module=db status=ok mode=memory max_connections={}",
            config.max_connections
        );
        Ok(Self {
            pool,
            config,
            _anchor: Some(Mutex::new(anchor)),
        })
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Connections currently open in the pool, busy or idle.
    pub fn open_connections(&self) -> u32 {
        self.pool.state().connections
    }
}

impl ConnectionProvider for SqliteConnectionProvider {
    fn acquire(&self) -> DbResult<TxHandle<'_>> {
        match self.pool.get() {
            Ok(conn) => Ok(TxHandle::new(conn)),
            Err(err) => {
                warn!(
                    "event=pool_acquire module=db status=error error_code=pool_timeout error={}",
                    err
                );
                Err(DbError::from(err))
            }
        }
    }
}

fn build_pool(
    manager: SqliteConnectionManager,
    config: &DbConfig,
) -> DbResult<Pool<SqliteConnectionManager>> {
    let foreign_keys = config.foreign_keys;
    let busy_timeout = config.busy_timeout();
    let max_size = config.max_connections.max(1);
    let manager =
        manager.with_init(move |conn| configure_connection(conn, foreign_keys, busy_timeout));
    Pool::builder()
        .max_size(max_size)
        .min_idle(Some(config.min_idle_connections.min(max_size)))
        .connection_timeout(config.acquire_timeout())
        .build(manager)
        .map_err(|err| {
            error!(
                "event=provider_open module=db status=error error_code=pool_build_failed error={}",
                err
            );
            DbError::from(err)
        })
}

/// Runs `work` in one transaction scope: commit on `Ok`, roll back otherwise.
///
/// The handle also rolls back when dropped, so panics inside `work` release
/// the connection too.
pub fn in_transaction<P, T, E, F>(provider: &P, work: F) -> Result<T, E>
where
    P: ConnectionProvider + ?Sized,
    E: From<DbError>,
    F: FnOnce(&TxHandle<'_>) -> Result<T, E>,
{
    let tx = provider.acquire()?;
    match work(&tx) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                warn!(
                    "event=tx_rollback module=db status=error error={}",
                    rollback_err
                );
            }
            Err(err)
        }
    }
}
