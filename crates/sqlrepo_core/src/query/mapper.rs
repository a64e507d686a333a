//! Result mapper: raw rows into entities and projections.
//!
//! # Responsibility
//! - Give `FromRow` implementations typed, name-based column access.
//! - Carry the fetch plan facts (joins, tracking, scope) a row needs.
//!
//! # Invariants
//! - A column absent from the row fails with `ShapeMismatch`; it is never
//!   defaulted.
//! - Joined relation columns are addressed as `"<relation>.<field>"`.

use crate::db::{RawRows, ScopeToken};
use crate::error::{RepoError, RepoResult};
use crate::model::entity::Tracking;
use log::debug;
use rusqlite::types::{FromSql, Value, ValueRef};

/// Builds a value from one result row.
pub trait FromRow: Sized {
    fn from_row(row: &RowView<'_>, ctx: &MapContext) -> RepoResult<Self>;
}

/// Per-query facts shared by every row of one result.
#[derive(Debug, Clone)]
pub struct MapContext {
    scope: ScopeToken,
    tracking: Tracking,
    joined: Vec<&'static str>,
    shape: &'static str,
}

impl MapContext {
    pub fn new(scope: ScopeToken, tracking: Tracking) -> Self {
        Self {
            scope,
            tracking,
            joined: Vec::new(),
            shape: "row",
        }
    }

    pub fn with_joins(mut self, joined: Vec<&'static str>) -> Self {
        self.joined = joined;
        self
    }

    /// Names the target shape in `ShapeMismatch` errors.
    pub fn with_shape(mut self, shape: &'static str) -> Self {
        self.shape = shape;
        self
    }

    /// Scope lazy references loaded from this result belong to.
    pub fn scope(&self) -> &ScopeToken {
        &self.scope
    }

    pub fn tracking(&self) -> Tracking {
        self.tracking
    }

    /// Whether `relation` was joined into the same statement.
    pub fn is_joined(&self, relation: &str) -> bool {
        self.joined.iter().any(|joined| *joined == relation)
    }

    pub fn shape(&self) -> &'static str {
        self.shape
    }
}

/// Borrowed view of one row, optionally narrowed to a joined relation.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'r> {
    columns: &'r [String],
    values: &'r [Value],
    prefix: Option<&'static str>,
    shape: &'static str,
}

impl<'r> RowView<'r> {
    pub fn new(columns: &'r [String], values: &'r [Value], shape: &'static str) -> Self {
        Self {
            columns,
            values,
            prefix: None,
            shape,
        }
    }

    /// View over the `"<relation>.<field>"` columns of a joined relation.
    pub fn nested(&self, relation: &'static str) -> RowView<'r> {
        RowView {
            prefix: Some(relation),
            ..*self
        }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Raw value of column `name`.
    pub fn value(&self, name: &str) -> RepoResult<&'r Value> {
        let index = self.position(name).ok_or_else(|| RepoError::ShapeMismatch {
            shape: self.shape,
            column: self.qualified(name),
        })?;
        self.values.get(index).ok_or_else(|| RepoError::ShapeMismatch {
            shape: self.shape,
            column: self.qualified(name),
        })
    }

    /// Typed value of column `name`.
    pub fn get<T: FromSql>(&self, name: &str) -> RepoResult<T> {
        let value = self.value(name)?;
        T::column_result(ValueRef::from(value)).map_err(|err| {
            RepoError::InvalidData(format!(
                "column `{}` of `{}`: {err}",
                self.qualified(name),
                self.shape
            ))
        })
    }

    fn position(&self, name: &str) -> Option<usize> {
        match self.prefix {
            None => self.columns.iter().position(|column| column == name),
            Some(prefix) => self.columns.iter().position(|column| {
                column
                    .strip_prefix(prefix)
                    .and_then(|rest| rest.strip_prefix('.'))
                    == Some(name)
            }),
        }
    }

    fn qualified(&self, name: &str) -> String {
        match self.prefix {
            None => name.to_string(),
            Some(prefix) => format!("{prefix}.{name}"),
        }
    }
}

/// Maps every row of `rows` into `T`; the first failing row aborts mapping.
pub fn map_rows<T: FromRow>(rows: &RawRows, ctx: &MapContext) -> RepoResult<Vec<T>> {
    let mut mapped = Vec::with_capacity(rows.len());
    for values in rows.rows() {
        let row = RowView::new(rows.columns(), values, ctx.shape());
        mapped.push(T::from_row(&row, ctx)?);
    }
    debug!(
        "event=map_rows module=query status=ok shape={} rows={}",
        ctx.shape(),
        mapped.len()
    );
    Ok(mapped)
}

#[cfg(test)]
mod tests {
    use super::{map_rows, MapContext, RowView};
    use crate::db::{ConnectionProvider, DbConfig, RawRows, SqliteConnectionProvider};
    use crate::error::RepoError;
    use crate::model::entity::Tracking;
    use crate::model::projection::{NestedClosedProjection, TeamInfo, UsernameOnly};
    use rusqlite::types::Value;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn nested_view_reads_prefixed_columns_only() {
        let cols = columns(&["name", "team.name"]);
        let values = vec![
            Value::Text("root".to_string()),
            Value::Text("teamA".to_string()),
        ];
        let row = RowView::new(&cols, &values, "test");

        assert_eq!(row.get::<String>("name").unwrap(), "root");
        assert_eq!(row.nested("team").get::<String>("name").unwrap(), "teamA");
        assert!(!row.nested("team").has_column("id"));
    }

    #[test]
    fn missing_column_reports_qualified_name() {
        let cols = columns(&["username"]);
        let values = vec![Value::Text("member1".to_string())];
        let row = RowView::new(&cols, &values, "nested_closed");

        let err = row.nested("team").get::<String>("name").unwrap_err();
        assert!(matches!(
            err,
            RepoError::ShapeMismatch { shape: "nested_closed", ref column } if column == "team.name"
        ));
    }

    #[test]
    fn type_mismatch_is_invalid_data() {
        let cols = columns(&["age"]);
        let values = vec![Value::Text("ten".to_string())];
        let row = RowView::new(&cols, &values, "member");
        assert!(matches!(row.get::<i64>("age"), Err(RepoError::InvalidData(_))));
    }

    #[test]
    fn map_rows_builds_flat_and_nested_projections() {
        let provider = SqliteConnectionProvider::open_in_memory(DbConfig::default())
            .expect("provider");
        let tx = provider.acquire().expect("tx");
        let ctx = MapContext::new(tx.scope(), Tracking::Managed).with_shape("nested_closed");

        let rows = RawRows::new(
            columns(&["username", "team.name"]),
            vec![
                vec![Value::Text("member1".into()), Value::Text("teamA".into())],
                vec![Value::Text("member2".into()), Value::Null],
            ],
        );
        let nested: Vec<NestedClosedProjection> = map_rows(&rows, &ctx).unwrap();
        assert_eq!(
            nested[0].team,
            Some(TeamInfo {
                name: "teamA".to_string()
            })
        );
        assert_eq!(nested[1].team, None);

        let flat: Vec<UsernameOnly> = map_rows(&rows, &ctx).unwrap();
        assert_eq!(flat[1].username, "member2");
    }
}
