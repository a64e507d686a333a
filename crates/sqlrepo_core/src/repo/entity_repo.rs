//! Generic entity repository over a transaction handle.
//!
//! # Responsibility
//! - Provide save/find/count/delete/bulk APIs for any `Entity`.
//! - Run rendered statements through the caller's transaction and map rows.
//!
//! # Invariants
//! - Every statement runs inside the caller's `TxHandle`; the repository never
//!   commits or rolls back on its own.
//! - Descriptions and projections are validated before the first statement.
//! - Read-only entities are never written back by `save`.

use crate::db::{RawRows, TxHandle};
use crate::error::{RepoError, RepoResult};
use crate::model::entity::{Entity, EntityKey, Tracking};
use crate::model::projection::Projection;
use crate::model::schema::EntitySchema;
use crate::query::builder::{
    build_count, build_delete, build_find_by_key, build_insert, build_select, build_update,
    BuiltQuery,
};
use crate::query::description::{BulkMutation, QueryDescription, ToValue};
use crate::query::mapper::{map_rows, FromRow, MapContext};
use crate::query::strategy::{resolve, Selection};
use crate::repo::bulk;
use crate::repo::page::{paginate, paginate_native, paginate_projected, Page, PageRequest};
use log::{debug, warn};
use rusqlite::types::Value;
use std::marker::PhantomData;
use std::time::Instant;

/// Caller-facing repository contract, generic over the entity type.
pub trait Repository<E: Entity> {
    /// Inserts `entity` (assigning its key) or writes its changes back.
    fn save(&self, tx: &TxHandle<'_>, entity: E) -> RepoResult<E>;
    fn find_by_id(&self, tx: &TxHandle<'_>, key: E::Key) -> RepoResult<Option<E>>;
    fn find_all(&self, tx: &TxHandle<'_>) -> RepoResult<Vec<E>>;
    fn find_by(&self, tx: &TxHandle<'_>, query: &QueryDescription) -> RepoResult<Vec<E>>;
    /// Fails with `NonUniqueResult` when more than one row matches.
    fn find_one(&self, tx: &TxHandle<'_>, query: &QueryDescription) -> RepoResult<Option<E>>;
    fn find_page(
        &self,
        tx: &TxHandle<'_>,
        query: &QueryDescription,
        request: &PageRequest,
    ) -> RepoResult<Page<E>>;
    fn find_projected<P: Projection>(
        &self,
        tx: &TxHandle<'_>,
        query: &QueryDescription,
    ) -> RepoResult<Vec<P>>;
    fn find_page_projected<P: Projection>(
        &self,
        tx: &TxHandle<'_>,
        query: &QueryDescription,
        request: &PageRequest,
    ) -> RepoResult<Page<P>>;
    /// Runs hand-written SQL and maps every row into `T`.
    fn find_native<T: FromRow>(
        &self,
        tx: &TxHandle<'_>,
        sql: &str,
        params: &[Value],
    ) -> RepoResult<Vec<T>>;
    fn find_page_native<T: FromRow>(
        &self,
        tx: &TxHandle<'_>,
        sql: &str,
        count_sql: &str,
        params: &[Value],
        request: &PageRequest,
    ) -> RepoResult<Page<T>>;
    fn count(&self, tx: &TxHandle<'_>) -> RepoResult<u64>;
    fn count_by(&self, tx: &TxHandle<'_>, query: &QueryDescription) -> RepoResult<u64>;
    /// Deletes the row behind `entity`; unsaved entities are ignored.
    fn delete(&self, tx: &TxHandle<'_>, entity: &E) -> RepoResult<()>;
    /// Deletes one row by key; fails with `NotFound` when nothing matched.
    fn delete_by_id(&self, tx: &TxHandle<'_>, key: E::Key) -> RepoResult<()>;
    fn execute_bulk(&self, tx: &TxHandle<'_>, mutation: &BulkMutation) -> RepoResult<usize>;
}

/// SQLite-backed repository for entity `E`.
pub struct SqliteRepository<E> {
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> SqliteRepository<E> {
    pub fn new() -> Self {
        Self {
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Default for SqliteRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Repository<E> for SqliteRepository<E> {
    fn save(&self, tx: &TxHandle<'_>, mut entity: E) -> RepoResult<E> {
        let schema = E::schema();
        match entity.key() {
            Some(key) if entity.tracking() == Tracking::ReadOnly => {
                warn!(
                    "event=save module=repo status=skipped entity={} key={} reason=read_only",
                    schema.name, key
                );
            }
            Some(key) => {
                let built = build_update(schema, key.to_value(), entity.column_values()?)?;
                let changed = tx.write(&built.sql, &built.params)?;
                tx.evict(schema.table, &key.to_string());
                if changed == 0 {
                    return Err(RepoError::NotFound {
                        entity: schema.name,
                        key: key.to_string(),
                    });
                }
                debug!(
                    "event=save module=repo status=ok entity={} op=update",
                    schema.name
                );
            }
            None => {
                let built = build_insert(schema, entity.column_values()?)?;
                let row_id = tx.insert(&built.sql, &built.params)?;
                entity.assign_key(E::Key::from_row_id(row_id));
                debug!(
                    "event=save module=repo status=ok entity={} op=insert",
                    schema.name
                );
            }
        }
        Ok(entity)
    }

    fn find_by_id(&self, tx: &TxHandle<'_>, key: E::Key) -> RepoResult<Option<E>> {
        load_by_key::<E>(tx, key, Tracking::Managed)
    }

    fn find_all(&self, tx: &TxHandle<'_>) -> RepoResult<Vec<E>> {
        self.find_by(tx, &QueryDescription::new(E::schema()))
    }

    fn find_by(&self, tx: &TxHandle<'_>, query: &QueryDescription) -> RepoResult<Vec<E>> {
        PreparedSelect::entity::<E>(query)?.fetch(tx)
    }

    fn find_one(&self, tx: &TxHandle<'_>, query: &QueryDescription) -> RepoResult<Option<E>> {
        let mut found = self.find_by(tx, query)?;
        if found.len() > 1 {
            return Err(RepoError::NonUniqueResult {
                entity: E::schema().name,
                count: found.len(),
            });
        }
        Ok(found.pop())
    }

    fn find_page(
        &self,
        tx: &TxHandle<'_>,
        query: &QueryDescription,
        request: &PageRequest,
    ) -> RepoResult<Page<E>> {
        paginate::<E>(tx, query, request)
    }

    fn find_projected<P: Projection>(
        &self,
        tx: &TxHandle<'_>,
        query: &QueryDescription,
    ) -> RepoResult<Vec<P>> {
        ensure_entity(E::schema(), query.entity())?;
        PreparedSelect::projection::<P>(query)?.fetch(tx)
    }

    fn find_page_projected<P: Projection>(
        &self,
        tx: &TxHandle<'_>,
        query: &QueryDescription,
        request: &PageRequest,
    ) -> RepoResult<Page<P>> {
        ensure_entity(E::schema(), query.entity())?;
        paginate_projected::<P>(tx, query, request)
    }

    fn find_native<T: FromRow>(
        &self,
        tx: &TxHandle<'_>,
        sql: &str,
        params: &[Value],
    ) -> RepoResult<Vec<T>> {
        fetch_native(tx, sql, params)
    }

    fn find_page_native<T: FromRow>(
        &self,
        tx: &TxHandle<'_>,
        sql: &str,
        count_sql: &str,
        params: &[Value],
        request: &PageRequest,
    ) -> RepoResult<Page<T>> {
        paginate_native(tx, sql, count_sql, params, request)
    }

    fn count(&self, tx: &TxHandle<'_>) -> RepoResult<u64> {
        self.count_by(tx, &QueryDescription::new(E::schema()))
    }

    fn count_by(&self, tx: &TxHandle<'_>, query: &QueryDescription) -> RepoResult<u64> {
        ensure_entity(E::schema(), query.entity())?;
        run_count(tx, &build_count(query)?)
    }

    fn delete(&self, tx: &TxHandle<'_>, entity: &E) -> RepoResult<()> {
        let schema = E::schema();
        let Some(key) = entity.key() else {
            debug!(
                "event=delete module=repo status=skipped entity={} reason=unsaved",
                schema.name
            );
            return Ok(());
        };
        delete_row(tx, schema, key)?;
        Ok(())
    }

    fn delete_by_id(&self, tx: &TxHandle<'_>, key: E::Key) -> RepoResult<()> {
        let schema = E::schema();
        if delete_row(tx, schema, key)? == 0 {
            return Err(RepoError::NotFound {
                entity: schema.name,
                key: key.to_string(),
            });
        }
        Ok(())
    }

    fn execute_bulk(&self, tx: &TxHandle<'_>, mutation: &BulkMutation) -> RepoResult<usize> {
        ensure_entity(E::schema(), mutation.entity())?;
        bulk::execute_bulk(tx, mutation)
    }
}

/// Loads one entity by key, serving repeated lookups from the transaction's
/// first-level cache.
pub(crate) fn load_by_key<E: Entity>(
    tx: &TxHandle<'_>,
    key: E::Key,
    tracking: Tracking,
) -> RepoResult<Option<E>> {
    let schema = E::schema();
    let cache_key = key.to_string();
    let rows = match tx.cached(schema.table, &cache_key) {
        Some(rows) => {
            debug!(
                "event=find_by_key module=repo status=ok entity={} source=cache",
                schema.name
            );
            rows
        }
        None => {
            let built = build_find_by_key(schema, key.to_value())?;
            let rows = tx.query(&built.sql, &built.params)?;
            if !rows.is_empty() {
                tx.cache_put(schema.table, cache_key, rows.clone());
            }
            debug!(
                "event=find_by_key module=repo status=ok entity={} source=store found={}",
                schema.name,
                !rows.is_empty()
            );
            rows
        }
    };

    let ctx = MapContext::new(tx.scope(), tracking).with_shape(schema.name);
    Ok(map_rows::<E>(&rows, &ctx)?.into_iter().next())
}

/// A validated SELECT plus the mapping facts its rows need.
#[derive(Debug, Clone)]
pub(crate) struct PreparedSelect {
    built: BuiltQuery,
    tracking: Tracking,
    shape: &'static str,
}

impl PreparedSelect {
    pub(crate) fn entity<E: Entity>(query: &QueryDescription) -> RepoResult<Self> {
        ensure_entity(E::schema(), query.entity())?;
        let plan = resolve(query, Selection::Entity)?;
        Ok(Self {
            built: build_select(query, &plan)?,
            tracking: plan.tracking,
            shape: E::schema().name,
        })
    }

    pub(crate) fn projection<P: Projection>(query: &QueryDescription) -> RepoResult<Self> {
        let plan = resolve(query, Selection::Projection(P::shape()))?;
        Ok(Self {
            built: build_select(query, &plan)?,
            tracking: plan.tracking,
            shape: P::shape().name,
        })
    }

    pub(crate) fn fetch<T: FromRow>(&self, tx: &TxHandle<'_>) -> RepoResult<Vec<T>> {
        let started_at = Instant::now();
        let rows = run_select(tx, &self.built)?;
        let ctx = MapContext::new(tx.scope(), self.tracking)
            .with_joins(self.built.joined.clone())
            .with_shape(self.shape);
        let mapped = map_rows(&rows, &ctx)?;
        debug!(
            "event=select module=repo status=ok shape={} rows={} joins={} locked={} duration_ms={}",
            self.shape,
            mapped.len(),
            self.built.joined.len(),
            self.built.lock.is_some(),
            started_at.elapsed().as_millis()
        );
        Ok(mapped)
    }
}

pub(crate) fn fetch_native<T: FromRow>(
    tx: &TxHandle<'_>,
    sql: &str,
    params: &[Value],
) -> RepoResult<Vec<T>> {
    let rows = tx.query(sql, params)?;
    let ctx = MapContext::new(tx.scope(), Tracking::Managed).with_shape("native");
    map_rows(&rows, &ctx)
}

pub(crate) fn run_count(tx: &TxHandle<'_>, built: &BuiltQuery) -> RepoResult<u64> {
    let rows = tx.query(&built.sql, &built.params)?;
    count_value(&rows)
}

pub(crate) fn count_value(rows: &RawRows) -> RepoResult<u64> {
    match rows.scalar() {
        Some(Value::Integer(total)) => u64::try_from(*total)
            .map_err(|_| RepoError::InvalidData(format!("negative count {total}"))),
        Some(other) => Err(RepoError::InvalidData(format!(
            "count query returned non-integer {other:?}"
        ))),
        None => Err(RepoError::InvalidData(
            "count query returned no rows".to_string(),
        )),
    }
}

pub(crate) fn ensure_entity(
    expected: &'static EntitySchema,
    actual: &'static EntitySchema,
) -> RepoResult<()> {
    if expected.name == actual.name {
        return Ok(());
    }
    Err(RepoError::EntityMismatch {
        expected: expected.name,
        actual: actual.name,
    })
}

fn run_select(tx: &TxHandle<'_>, built: &BuiltQuery) -> RepoResult<RawRows> {
    let rows = match built.lock {
        Some(target) => tx.query_locked(&built.sql, &built.params, target)?,
        None => tx.query(&built.sql, &built.params)?,
    };
    Ok(rows)
}

fn delete_row<K: EntityKey>(
    tx: &TxHandle<'_>,
    schema: &'static EntitySchema,
    key: K,
) -> RepoResult<usize> {
    let built = build_delete(schema, key.to_value());
    let changed = tx.write(&built.sql, &built.params)?;
    tx.evict(schema.table, &key.to_string());
    debug!(
        "event=delete module=repo status=ok entity={} changed={}",
        schema.name, changed
    );
    Ok(changed)
}
