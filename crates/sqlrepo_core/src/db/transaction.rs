//! Transaction handle over one pooled SQLite connection.
//!
//! # Responsibility
//! - Run parameterized statements and return raw rows or affected counts.
//! - Own the begin/commit/rollback lifecycle of one logical transaction.
//! - Keep the per-transaction first-level entity cache and scope generation.
//!
//! # Invariants
//! - The store transaction begins lazily on the first statement.
//! - Any store error rolls the transaction back and closes the handle.
//! - Dropping an open handle rolls back and returns the connection to the pool.
//! - `clear()` bumps the scope generation; tokens from older generations are
//!   no longer live.
//! - Raw writes through `execute` empty the first-level cache.

use super::{DbError, DbResult};
use log::{debug, warn};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// Column names plus row values returned by a query, detached from SQLite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRows {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl RawRows {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the first column of the first row, if any.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }
}

#[derive(Debug)]
struct ScopeState {
    open: AtomicBool,
    generation: AtomicU64,
}

/// Identifies the transaction scope (and clear generation) an entity was loaded in.
///
/// Lazy references keep a token and may only resolve while it is live.
#[derive(Clone)]
pub struct ScopeToken {
    tx_id: u64,
    generation: u64,
    state: Arc<ScopeState>,
}

impl ScopeToken {
    pub fn tx_id(&self) -> u64 {
        self.tx_id
    }

    /// Whether the owning transaction is still open and has not been cleared.
    pub fn is_live(&self) -> bool {
        self.state.open.load(Ordering::Acquire)
            && self.state.generation.load(Ordering::Acquire) == self.generation
    }

    /// Whether this token is live and belongs to `tx`.
    pub fn is_live_in(&self, tx: &TxHandle<'_>) -> bool {
        self.tx_id == tx.id() && self.is_live()
    }
}

impl Debug for ScopeToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeToken")
            .field("tx_id", &self.tx_id)
            .field("generation", &self.generation)
            .field("live", &self.is_live())
            .finish()
    }
}

impl PartialEq for ScopeToken {
    fn eq(&self, other: &Self) -> bool {
        self.tx_id == other.tx_id && self.generation == other.generation
    }
}

impl Eq for ScopeToken {}

/// Table and key column used to take the store write lock mid-transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTarget {
    pub table: &'static str,
    pub key_column: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxPhase {
    Idle,
    Reading,
    WriteLocked,
    Closed,
}

type CacheKey = (&'static str, String);

/// One logical transaction scope acquired from a connection provider.
///
/// Dropping the handle returns its connection to the provider's pool.
pub struct TxHandle<'p> {
    id: u64,
    conn: PooledConnection<SqliteConnectionManager>,
    _provider: PhantomData<&'p ()>,
    phase: Cell<TxPhase>,
    state: Arc<ScopeState>,
    statements: Cell<u64>,
    cache: RefCell<HashMap<CacheKey, RawRows>>,
}

impl<'p> TxHandle<'p> {
    pub(crate) fn new(conn: PooledConnection<SqliteConnectionManager>) -> Self {
        let id = NEXT_TX_ID.fetch_add(1, Ordering::Relaxed);
        debug!("event=tx_acquire module=db status=ok tx_id={id}");
        Self {
            id,
            conn,
            _provider: PhantomData,
            phase: Cell::new(TxPhase::Idle),
            state: Arc::new(ScopeState {
                open: AtomicBool::new(true),
                generation: AtomicU64::new(0),
            }),
            statements: Cell::new(0),
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.phase.get() != TxPhase::Closed
    }

    /// Whether this transaction currently holds the store write lock.
    pub fn holds_write_lock(&self) -> bool {
        self.phase.get() == TxPhase::WriteLocked
    }

    /// Number of statements sent to the store through this handle.
    pub fn statement_count(&self) -> u64 {
        self.statements.get()
    }

    /// Token for entities loaded at the current scope generation.
    pub fn scope(&self) -> ScopeToken {
        ScopeToken {
            tx_id: self.id,
            generation: self.state.generation.load(Ordering::Acquire),
            state: Arc::clone(&self.state),
        }
    }

    /// Runs a read statement and returns all rows.
    pub fn query(&self, sql: &str, params: &[Value]) -> DbResult<RawRows> {
        self.ensure_begun(None)?;
        self.run("query", |conn| read_rows(conn, sql, params))
    }

    /// Runs a read statement while holding the store write lock until commit.
    pub fn query_locked(&self, sql: &str, params: &[Value], target: LockTarget) -> DbResult<RawRows> {
        self.ensure_begun(Some(target))?;
        self.run("query_locked", |conn| read_rows(conn, sql, params))
    }

    /// Runs a write statement and returns the affected row count.
    ///
    /// The statement may touch any cached row, so the first-level cache is
    /// emptied afterwards. Already resolved references keep their values.
    pub fn execute(&self, sql: &str, params: &[Value]) -> DbResult<usize> {
        let changed = self.write(sql, params)?;
        let evicted = {
            let mut cache = self.cache.borrow_mut();
            let evicted = cache.len();
            cache.clear();
            evicted
        };
        debug!(
            "event=tx_evict module=db status=ok tx_id={} evicted={}",
            self.id, evicted
        );
        Ok(changed)
    }

    /// Write path for callers that evict the rows they touch themselves.
    pub(crate) fn write(&self, sql: &str, params: &[Value]) -> DbResult<usize> {
        self.ensure_begun(None)?;
        let changed = self.run("execute", |conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            stmt.execute(params_from_iter(params.iter()))
        })?;
        self.phase.set(TxPhase::WriteLocked);
        Ok(changed)
    }

    /// Runs an insert statement and returns the new row id.
    pub fn insert(&self, sql: &str, params: &[Value]) -> DbResult<i64> {
        self.ensure_begun(None)?;
        let row_id = self.run("insert", |conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            stmt.insert(params_from_iter(params.iter()))
        })?;
        self.phase.set(TxPhase::WriteLocked);
        Ok(row_id)
    }

    /// Detaches everything loaded so far and empties the first-level cache.
    pub fn clear(&self) {
        let generation = self.state.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let evicted = {
            let mut cache = self.cache.borrow_mut();
            let evicted = cache.len();
            cache.clear();
            evicted
        };
        debug!(
            "event=tx_clear module=db status=ok tx_id={} generation={} evicted={}",
            self.id, generation, evicted
        );
    }

    /// Commits the transaction. Fails on a handle closed by an earlier error.
    pub fn commit(self) -> DbResult<()> {
        self.finish(true)
    }

    /// Rolls the transaction back. Rolling back a closed handle is a no-op.
    pub fn rollback(self) -> DbResult<()> {
        self.finish(false)
    }

    pub(crate) fn cached(&self, table: &'static str, key: &str) -> Option<RawRows> {
        self.cache.borrow().get(&(table, key.to_string())).cloned()
    }

    pub(crate) fn cache_put(&self, table: &'static str, key: String, row: RawRows) {
        self.cache.borrow_mut().insert((table, key), row);
    }

    pub(crate) fn evict(&self, table: &'static str, key: &str) {
        self.cache.borrow_mut().remove(&(table, key.to_string()));
    }

    /// Rolls back and closes the handle after a store failure.
    pub(crate) fn abort(&self) {
        if self.phase.get() == TxPhase::Closed {
            return;
        }
        if self.phase.get() != TxPhase::Idle {
            if let Err(err) = self.conn.execute_batch("ROLLBACK;") {
                warn!(
                    "event=tx_rollback module=db status=error tx_id={} error={}",
                    self.id, err
                );
            }
        }
        self.close();
        debug!("event=tx_rollback module=db status=ok tx_id={}", self.id);
    }

    fn finish(&self, commit: bool) -> DbResult<()> {
        match (self.phase.get(), commit) {
            (TxPhase::Closed, true) => return Err(DbError::TransactionClosed),
            (TxPhase::Closed, false) => return Ok(()),
            (TxPhase::Idle, _) => {
                self.close();
                return Ok(());
            }
            _ => {}
        }

        if !commit {
            self.abort();
            return Ok(());
        }

        let started_at = Instant::now();
        if let Err(err) = self.conn.execute_batch("COMMIT;") {
            let err = DbError::from_store(err);
            warn!(
                "event=tx_commit module=db status=error tx_id={} error={}",
                self.id, err
            );
            self.abort();
            return Err(err);
        }
        self.close();
        debug!(
            "event=tx_commit module=db status=ok tx_id={} statements={} duration_ms={}",
            self.id,
            self.statements.get(),
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    fn close(&self) {
        self.phase.set(TxPhase::Closed);
        self.state.open.store(false, Ordering::Release);
        self.cache.borrow_mut().clear();
    }

    fn connection(&self) -> DbResult<&Connection> {
        if self.phase.get() == TxPhase::Closed {
            return Err(DbError::TransactionClosed);
        }
        Ok(&*self.conn)
    }

    fn ensure_begun(&self, lock: Option<LockTarget>) -> DbResult<()> {
        let conn = self.connection()?;
        let result = match (self.phase.get(), lock) {
            (TxPhase::Idle, None) => conn
                .execute_batch("BEGIN DEFERRED;")
                .map(|()| TxPhase::Reading),
            (TxPhase::Idle, Some(_)) => conn
                .execute_batch("BEGIN IMMEDIATE;")
                .map(|()| TxPhase::WriteLocked),
            // A write statement takes the reserved lock even when it matches nothing.
            (TxPhase::Reading, Some(target)) => conn
                .execute_batch(&format!(
                    "UPDATE {table} SET {key} = {key} WHERE 0;",
                    table = target.table,
                    key = target.key_column
                ))
                .map(|()| TxPhase::WriteLocked),
            (phase, _) => Ok(phase),
        };

        match result {
            Ok(phase) => {
                self.phase.set(phase);
                Ok(())
            }
            Err(err) => {
                let err = DbError::from_store(err);
                warn!(
                    "event=tx_begin module=db status=error tx_id={} locked={} error={}",
                    self.id,
                    lock.is_some(),
                    err
                );
                self.abort();
                Err(err)
            }
        }
    }

    fn run<T>(
        &self,
        op: &'static str,
        work: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> DbResult<T> {
        let conn = self.connection()?;
        self.statements.set(self.statements.get() + 1);
        match work(conn) {
            Ok(value) => Ok(value),
            Err(err) => {
                let err = DbError::from_store(err);
                warn!(
                    "event=statement module=db status=error tx_id={} op={} error={}",
                    self.id, op, err
                );
                self.abort();
                Err(err)
            }
        }
    }
}

impl Drop for TxHandle<'_> {
    fn drop(&mut self) {
        if self.phase.get() != TxPhase::Closed {
            self.abort();
        }
    }
}

fn read_rows(conn: &Connection, sql: &str, params: &[Value]) -> rusqlite::Result<RawRows> {
    let mut stmt = conn.prepare_cached(sql)?;
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let width = columns.len();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut values = Vec::new();
    while let Some(row) = rows.next()? {
        let mut current = Vec::with_capacity(width);
        for index in 0..width {
            current.push(row.get::<_, Value>(index)?);
        }
        values.push(current);
    }
    Ok(RawRows::new(columns, values))
}
