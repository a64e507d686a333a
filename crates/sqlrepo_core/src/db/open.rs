//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file, URI or in-memory SQLite connections.
//! - Configure connection pragmas required by core behavior.
//! - Trigger schema migrations before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have the configured `foreign_keys` and busy timeout.
//! - Returned connections have migrations fully applied.

use super::config::DbConfig;
use super::migrations::apply_migrations;
use super::DbResult;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// Opens a SQLite database file with default configuration.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_db_with_config(path, &DbConfig::default())
}

/// Opens a SQLite database file (or `file:` URI) and applies pending migrations.
///
/// # Side effects
/// - Performs connection bootstrap and migration checks.
/// - Emits `db_open` logging events with duration and status.
pub fn open_db_with_config(path: impl AsRef<Path>, config: &DbConfig) -> DbResult<Connection> {
    open_with("file", config, || Connection::open(path))
}

/// Opens a private in-memory SQLite database and applies pending migrations.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_with("memory", &DbConfig::default(), Connection::open_in_memory)
}

fn open_with(
    mode: &'static str,
    config: &DbConfig,
    opener: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={mode}");

    let mut conn = match opener() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_open_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&mut conn, config) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={} duration_ms={}",
                mode,
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(conn: &mut Connection, config: &DbConfig) -> DbResult<()> {
    configure_connection(conn, config.foreign_keys, config.busy_timeout())?;
    apply_migrations(conn)?;
    Ok(())
}

/// Applies the per-connection pragmas. Runs for every connection a pool opens.
pub(crate) fn configure_connection(
    conn: &Connection,
    foreign_keys: bool,
    busy_timeout: Duration,
) -> rusqlite::Result<()> {
    let foreign_keys = if foreign_keys { "ON" } else { "OFF" };
    conn.execute_batch(&format!("PRAGMA foreign_keys = {foreign_keys};"))?;
    conn.busy_timeout(busy_timeout)
}
