//! Query builder: descriptions into parameterized SQL.
//!
//! # Responsibility
//! - Render SELECT/COUNT/INSERT/UPDATE/DELETE text plus ordered parameters.
//! - Validate field names against the entity schema before rendering.
//!
//! # Invariants
//! - Rendering is pure and deterministic for identical input.
//! - A read query binds exactly one parameter per predicate; limit and offset
//!   are rendered as integer literals.
//! - Result columns are aliased by field name, joined columns by
//!   `"<relation>.<field>"`.

use crate::db::transaction::LockTarget;
use crate::error::{RepoError, RepoResult};
use crate::model::projection::{JoinKind, ProjectionShape};
use crate::model::schema::{EntitySchema, FieldDef, FieldKind};
use crate::query::description::{
    Assignment, BulkMutation, Direction, LockMode, MutationKind, Operand, Operator, Predicate,
    QueryDescription, Sort,
};
use crate::query::strategy::{resolve, FetchPlan, Selection};
use rusqlite::types::Value;
use std::fmt::Write as _;

const ROOT_ALIAS: &str = "t0";

/// Rendered statement ready for the transaction handle.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<Value>,
    /// Set when the statement must run under the store write lock.
    pub lock: Option<LockTarget>,
    /// Relations whose columns are present in the result.
    pub joined: Vec<&'static str>,
}

impl BuiltQuery {
    fn plain(sql: String, params: Vec<Value>) -> Self {
        Self {
            sql,
            params,
            lock: None,
            joined: Vec::new(),
        }
    }
}

/// Renders a full-entity SELECT for `query`.
pub fn build(query: &QueryDescription) -> RepoResult<BuiltQuery> {
    let plan = resolve(query, Selection::Entity)?;
    build_select(query, &plan)
}

/// Renders a SELECT reading only the columns `shape` declares.
pub fn build_projection(
    query: &QueryDescription,
    shape: &'static ProjectionShape,
) -> RepoResult<BuiltQuery> {
    let plan = resolve(query, Selection::Projection(shape))?;
    build_select(query, &plan)
}

/// Renders a SELECT for an already resolved fetch plan.
pub fn build_select(query: &QueryDescription, plan: &FetchPlan) -> RepoResult<BuiltQuery> {
    let entity = query.entity;
    let mut columns = Vec::new();
    match plan.selection {
        Selection::Entity => {
            for field in entity.all_fields() {
                columns.push(select_column(ROOT_ALIAS, field, None));
            }
        }
        Selection::Projection(shape) => {
            for name in shape.fields {
                let field = entity.require_field(name)?;
                columns.push(select_column(ROOT_ALIAS, field, None));
            }
        }
    }

    let mut joins = String::new();
    for (index, join) in plan.joins.iter().enumerate() {
        let alias = format!("t{}", index + 1);
        let fields: Vec<&FieldDef> = match plan.selection {
            Selection::Entity => join.target.all_fields().collect(),
            Selection::Projection(shape) => match shape.nested {
                Some(nested) if nested.relation == join.relation.name => nested
                    .fields
                    .iter()
                    .map(|name| join.target.require_field(name))
                    .collect::<RepoResult<_>>()?,
                _ => Vec::new(),
            },
        };
        for field in fields {
            columns.push(select_column(&alias, field, Some(join.relation.name)));
        }
        let keyword = match join.kind {
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Inner => "INNER JOIN",
        };
        let _ = write!(
            joins,
            " {keyword} {table} {alias} ON {alias}.{key} = {root}.{fk}",
            table = join.target.table,
            key = join.target.key.column,
            root = ROOT_ALIAS,
            fk = join.relation.column,
        );
    }

    let mut sql = format!(
        "SELECT {} FROM {} {ROOT_ALIAS}{joins}",
        columns.join(", "),
        entity.table
    );
    let mut params = Vec::new();
    render_where(&mut sql, entity, Some(ROOT_ALIAS), &query.predicates, &mut params)?;
    if let Some(sort) = &query.sort {
        render_order(&mut sql, entity, sort)?;
    }
    render_window(&mut sql, query.limit, query.offset);

    Ok(BuiltQuery {
        sql,
        params,
        lock: (plan.lock == LockMode::PessimisticWrite).then(|| entity.lock_target()),
        joined: plan.joined_relations(),
    })
}

/// Renders `SELECT COUNT(*)` sharing the predicates of `query`.
///
/// Joins, sort, window and lock do not affect the count and are not rendered.
pub fn build_count(query: &QueryDescription) -> RepoResult<BuiltQuery> {
    let entity = query.entity;
    let mut sql = format!("SELECT COUNT(*) FROM {} {ROOT_ALIAS}", entity.table);
    let mut params = Vec::new();
    render_where(&mut sql, entity, Some(ROOT_ALIAS), &query.predicates, &mut params)?;
    Ok(BuiltQuery::plain(sql, params))
}

/// Renders a full-entity SELECT of one row by key.
pub fn build_find_by_key(entity: &'static EntitySchema, key: Value) -> RepoResult<BuiltQuery> {
    build(&QueryDescription::new(entity).where_eq(entity.key.name, key))
}

/// Renders an INSERT of every non-key column; `values` follows schema order.
pub fn build_insert(entity: &'static EntitySchema, values: Vec<Value>) -> RepoResult<BuiltQuery> {
    check_arity(entity, &values)?;
    let columns: Vec<&str> = entity.fields.iter().map(|field| field.column).collect();
    let placeholders: Vec<String> = (1..=values.len()).map(|index| format!("?{index}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        entity.table,
        columns.join(", "),
        placeholders.join(", ")
    );
    Ok(BuiltQuery::plain(sql, values))
}

/// Renders an UPDATE of every non-key column of one row.
pub fn build_update(
    entity: &'static EntitySchema,
    key: Value,
    mut values: Vec<Value>,
) -> RepoResult<BuiltQuery> {
    check_arity(entity, &values)?;
    let assignments: Vec<String> = entity
        .fields
        .iter()
        .enumerate()
        .map(|(index, field)| format!("{} = ?{}", field.column, index + 1))
        .collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        entity.table,
        assignments.join(", "),
        entity.key.column,
        values.len() + 1
    );
    values.push(key);
    Ok(BuiltQuery::plain(sql, values))
}

pub fn build_delete(entity: &'static EntitySchema, key: Value) -> BuiltQuery {
    let sql = format!("DELETE FROM {} WHERE {} = ?1", entity.table, entity.key.column);
    BuiltQuery::plain(sql, vec![key])
}

/// Renders a set-based UPDATE or DELETE.
///
/// Parameters bind assignments first, then predicates.
pub fn build_bulk(mutation: &BulkMutation) -> RepoResult<BuiltQuery> {
    let entity = mutation.entity;
    let mut params = Vec::new();
    let mut sql = match &mutation.kind {
        MutationKind::Update(assignments) => {
            if assignments.is_empty() {
                return Err(RepoError::EmptyUpdate {
                    entity: entity.name,
                });
            }
            let mut rendered = Vec::with_capacity(assignments.len());
            for assignment in assignments {
                let (name, value) = match assignment {
                    Assignment::Set { field, value } | Assignment::Increment { field, by: value } => {
                        (field, value)
                    }
                };
                let field = entity.require_field(name)?;
                if matches!(field.kind, FieldKind::Key) {
                    return Err(RepoError::ImmutableField {
                        entity: entity.name,
                        field: field.name,
                    });
                }
                params.push(value.clone());
                let slot = params.len();
                rendered.push(match assignment {
                    Assignment::Set { .. } => format!("{} = ?{slot}", field.column),
                    Assignment::Increment { .. } => {
                        format!("{col} = {col} + ?{slot}", col = field.column)
                    }
                });
            }
            format!("UPDATE {} SET {}", entity.table, rendered.join(", "))
        }
        MutationKind::Delete => format!("DELETE FROM {}", entity.table),
    };
    render_where(&mut sql, entity, None, &mutation.predicates, &mut params)?;
    Ok(BuiltQuery::plain(sql, params))
}

fn select_column(alias: &str, field: &FieldDef, relation: Option<&str>) -> String {
    match relation {
        None => format!("{alias}.{} AS \"{}\"", field.column, field.name),
        Some(relation) => format!("{alias}.{} AS \"{relation}.{}\"", field.column, field.name),
    }
}

fn check_arity(entity: &'static EntitySchema, values: &[Value]) -> RepoResult<()> {
    if values.len() == entity.fields.len() {
        return Ok(());
    }
    Err(RepoError::InvalidData(format!(
        "`{}` expects {} column values, got {}",
        entity.name,
        entity.fields.len(),
        values.len()
    )))
}

fn render_where(
    sql: &mut String,
    entity: &'static EntitySchema,
    alias: Option<&str>,
    predicates: &[Predicate],
    params: &mut Vec<Value>,
) -> RepoResult<()> {
    for (index, predicate) in predicates.iter().enumerate() {
        let field = entity.require_field(predicate.field())?;
        let column = match alias {
            Some(alias) => format!("{alias}.{}", field.column),
            None => field.column.to_string(),
        };
        sql.push_str(if index == 0 { " WHERE " } else { " AND " });

        match predicate.operand() {
            Operand::List(values) => {
                params.push(Value::Text(json_list(values)?));
                let _ = write!(
                    sql,
                    "{column} IN (SELECT value FROM json_each(?{}))",
                    params.len()
                );
            }
            Operand::Single(value) => {
                // `= NULL` never matches; `IS` compares NULL as a value.
                let op = match (predicate.op(), value) {
                    (Operator::Eq, Value::Null) => "IS",
                    (Operator::NotEq, Value::Null) => "IS NOT",
                    (op, _) => op.sql(),
                };
                params.push(value.clone());
                let _ = write!(sql, "{column} {op} ?{}", params.len());
            }
        }
    }
    Ok(())
}

fn render_order(sql: &mut String, entity: &'static EntitySchema, sort: &Sort) -> RepoResult<()> {
    for (index, order) in sort.orders().iter().enumerate() {
        let field = entity.require_field(&order.field)?;
        if field.is_relation() {
            return Err(RepoError::InvalidSort {
                entity: entity.name,
                field: order.field.clone(),
            });
        }
        let direction = match order.direction {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        };
        sql.push_str(if index == 0 { " ORDER BY " } else { ", " });
        let _ = write!(sql, "{ROOT_ALIAS}.{} {direction}", field.column);
    }
    Ok(())
}

fn render_window(sql: &mut String, limit: Option<u64>, offset: Option<u64>) {
    match (limit, offset) {
        (Some(limit), Some(offset)) => {
            let _ = write!(sql, " LIMIT {limit} OFFSET {offset}");
        }
        (Some(limit), None) => {
            let _ = write!(sql, " LIMIT {limit}");
        }
        (None, Some(offset)) => {
            let _ = write!(sql, " LIMIT -1 OFFSET {offset}");
        }
        (None, None) => {}
    }
}

/// Encodes an `IN` list as one JSON array parameter.
fn json_list(values: &[Value]) -> RepoResult<String> {
    let items = values
        .iter()
        .map(|value| match value {
            Value::Null => Ok(serde_json::Value::Null),
            Value::Integer(number) => Ok(serde_json::Value::from(*number)),
            Value::Real(number) => serde_json::Number::from_f64(*number)
                .map(serde_json::Value::Number)
                .ok_or_else(|| RepoError::InvalidData(format!("non-finite IN value {number}"))),
            Value::Text(text) => Ok(serde_json::Value::String(text.clone())),
            Value::Blob(_) => Err(RepoError::InvalidData(
                "blob values are not supported in IN lists".to_string(),
            )),
        })
        .collect::<RepoResult<Vec<_>>>()?;
    serde_json::to_string(&items).map_err(|err| RepoError::InvalidData(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{build, build_bulk, build_count, build_insert, build_projection, build_update};
    use crate::error::RepoError;
    use crate::model::member::{Member, MEMBER_SCHEMA};
    use crate::model::projection::{MemberDto, NestedClosedProjection, Projection};
    use crate::query::description::{
        BulkMutation, Direction, LockMode, Operator, QueryDescription, Sort,
    };
    use rusqlite::types::Value;

    fn sample_queries() -> Vec<QueryDescription> {
        vec![
            QueryDescription::of::<Member>(),
            QueryDescription::of::<Member>().where_eq("username", "member1"),
            QueryDescription::of::<Member>()
                .where_eq("username", "member1")
                .filter("age", Operator::Gt, 15)
                .order_by("age", Direction::Desc)
                .limit(3)
                .offset(6),
            QueryDescription::of::<Member>()
                .filter_in("username", ["a", "b", "c"])
                .filter("age", Operator::Le, 40)
                .filter("team", Operator::Eq, Value::Null),
        ]
    }

    #[test]
    fn params_match_predicate_count_and_rendering_is_deterministic() {
        for query in sample_queries() {
            let first = build(&query).unwrap();
            let second = build(&query).unwrap();
            assert_eq!(first.params.len(), query.predicates().len());
            assert_eq!(first, second);
        }
    }

    #[test]
    fn renders_predicates_sort_and_literal_window() {
        let query = QueryDescription::of::<Member>()
            .filter("age", Operator::Ge, 20)
            .sorted(Sort::desc("username"))
            .limit(3)
            .offset(3);
        let built = build(&query).unwrap();
        assert_eq!(
            built.sql,
            "SELECT t0.member_id AS \"id\", t0.username AS \"username\", t0.age AS \"age\", \
             t0.team_id AS \"team\" FROM member t0 WHERE t0.age >= ?1 \
             ORDER BY t0.username DESC LIMIT 3 OFFSET 3"
        );
        assert_eq!(built.params, vec![Value::Integer(20)]);
        assert!(built.lock.is_none());
    }

    #[test]
    fn in_list_binds_one_json_param() {
        let query = QueryDescription::of::<Member>().filter_in("username", ["AAA", "BBB"]);
        let built = build(&query).unwrap();
        assert!(built
            .sql
            .ends_with("WHERE t0.username IN (SELECT value FROM json_each(?1))"));
        assert_eq!(built.params, vec![Value::Text("[\"AAA\",\"BBB\"]".to_string())]);
    }

    #[test]
    fn null_equality_renders_is() {
        let query = QueryDescription::of::<Member>().filter("team", Operator::Eq, Value::Null);
        assert!(build(&query).unwrap().sql.ends_with("WHERE t0.team_id IS ?1"));
    }

    #[test]
    fn unknown_fields_fail_before_rendering() {
        let filter = QueryDescription::of::<Member>().where_eq("nickname", "x");
        assert!(matches!(
            build(&filter).unwrap_err(),
            RepoError::UnknownField { field, .. } if field == "nickname"
        ));

        let count = QueryDescription::of::<Member>().where_eq("nickname", "x");
        assert!(matches!(build_count(&count), Err(RepoError::UnknownField { .. })));
    }

    #[test]
    fn sort_on_relation_is_invalid() {
        let query = QueryDescription::of::<Member>().order_by("team", Direction::Asc);
        assert!(matches!(
            build(&query).unwrap_err(),
            RepoError::InvalidSort { field, .. } if field == "team"
        ));
    }

    #[test]
    fn fetch_join_and_lock_are_carried() {
        let query = QueryDescription::of::<Member>()
            .fetch_join("team")
            .lock(LockMode::PessimisticWrite);
        let built = build(&query).unwrap();
        assert!(built.sql.contains("t1.name AS \"team.name\""));
        assert!(built
            .sql
            .contains("LEFT JOIN team t1 ON t1.team_id = t0.team_id"));
        assert_eq!(built.joined, vec!["team"]);
        assert_eq!(built.lock, Some(MEMBER_SCHEMA.lock_target()));
    }

    #[test]
    fn projections_select_only_declared_columns() {
        let nested =
            build_projection(&QueryDescription::of::<Member>(), NestedClosedProjection::shape())
                .unwrap();
        assert_eq!(
            nested.sql,
            "SELECT t0.username AS \"username\", t1.name AS \"team.name\" FROM member t0 \
             LEFT JOIN team t1 ON t1.team_id = t0.team_id"
        );

        let dto = build_projection(&QueryDescription::of::<Member>(), MemberDto::shape()).unwrap();
        assert!(dto.sql.contains("INNER JOIN team t1"));
    }

    #[test]
    fn count_ignores_window_and_sort() {
        let query = QueryDescription::of::<Member>()
            .where_eq("age", 10)
            .order_by("username", Direction::Desc)
            .limit(3);
        let built = build_count(&query).unwrap();
        assert_eq!(built.sql, "SELECT COUNT(*) FROM member t0 WHERE t0.age = ?1");
        assert_eq!(built.params.len(), 1);
    }

    #[test]
    fn insert_and_update_follow_schema_order() {
        let values = vec![
            Value::Text("member1".into()),
            Value::Integer(10),
            Value::Null,
        ];
        let insert = build_insert(&MEMBER_SCHEMA, values.clone()).unwrap();
        assert_eq!(
            insert.sql,
            "INSERT INTO member (username, age, team_id) VALUES (?1, ?2, ?3)"
        );

        let update = build_update(&MEMBER_SCHEMA, Value::Integer(7), values).unwrap();
        assert_eq!(
            update.sql,
            "UPDATE member SET username = ?1, age = ?2, team_id = ?3 WHERE member_id = ?4"
        );
        assert_eq!(update.params.last(), Some(&Value::Integer(7)));

        assert!(matches!(
            build_insert(&MEMBER_SCHEMA, vec![Value::Null]),
            Err(RepoError::InvalidData(_))
        ));
    }

    #[test]
    fn bulk_update_binds_assignments_then_predicates() {
        let mutation = BulkMutation::update(&MEMBER_SCHEMA)
            .increment("age", 1)
            .filter("age", Operator::Ge, 20);
        let built = build_bulk(&mutation).unwrap();
        assert_eq!(built.sql, "UPDATE member SET age = age + ?1 WHERE age >= ?2");
        assert_eq!(built.params, vec![Value::Integer(1), Value::Integer(20)]);
    }

    #[test]
    fn bulk_rejects_key_assignment_and_empty_update() {
        let key = BulkMutation::update(&MEMBER_SCHEMA).set("id", 5);
        assert!(matches!(
            build_bulk(&key),
            Err(RepoError::ImmutableField { field: "id", .. })
        ));
        assert!(matches!(
            build_bulk(&BulkMutation::update(&MEMBER_SCHEMA)),
            Err(RepoError::EmptyUpdate { .. })
        ));

        let delete = build_bulk(&BulkMutation::delete(&MEMBER_SCHEMA).where_eq("username", "x"));
        assert_eq!(delete.unwrap().sql, "DELETE FROM member WHERE username = ?1");
    }
}
