//! Bulk mutation executor.
//!
//! # Responsibility
//! - Run set-based UPDATE/DELETE statements and report affected rows.
//! - Invalidate everything the transaction loaded before the mutation.
//!
//! # Invariants
//! - On success the transaction is cleared: its first-level cache is empty
//!   and earlier lazy references are detached.
//! - On failure the transaction has already been rolled back and closed.

use crate::db::{DbError, TxHandle};
use crate::error::{RepoError, RepoResult};
use crate::query::builder::build_bulk;
use crate::query::description::BulkMutation;
use log::{info, warn};
use rusqlite::types::Value;
use std::time::Instant;

/// Renders and runs `mutation`, returning the affected row count.
pub fn execute_bulk(tx: &TxHandle<'_>, mutation: &BulkMutation) -> RepoResult<usize> {
    let built = build_bulk(mutation)?;
    run(tx, mutation.entity().name, &built.sql, &built.params)
}

/// Runs a hand-written UPDATE/DELETE statement.
pub fn execute_bulk_sql(tx: &TxHandle<'_>, sql: &str, params: &[Value]) -> RepoResult<usize> {
    run(tx, "native", sql, params)
}

fn run(tx: &TxHandle<'_>, target: &str, sql: &str, params: &[Value]) -> RepoResult<usize> {
    let started_at = Instant::now();
    match tx.write(sql, params) {
        Ok(affected) => {
            tx.clear();
            info!(
                "event=bulk_mutation module=repo status=ok target={} affected={} duration_ms={}",
                target,
                affected,
                started_at.elapsed().as_millis()
            );
            Ok(affected)
        }
        Err(DbError::LockTimeout) => {
            warn!(
                "event=bulk_mutation module=repo status=error target={} error_code=lock_timeout",
                target
            );
            Err(RepoError::LockTimeout)
        }
        Err(err) => {
            warn!(
                "event=bulk_mutation module=repo status=error target={} error_code=mutation_failed error={}",
                target, err
            );
            Err(RepoError::MutationFailed(err))
        }
    }
}
