//! Member entity.
//!
//! # Responsibility
//! - Define the member record and its many-to-one `team` relationship.
//! - Map member rows, eagerly or lazily, depending on the fetch plan.
//!
//! # Invariants
//! - `id` is `None` until the first `save` and never changes afterwards.
//! - A member saved with a `team` requires that team to have a key.

use crate::error::{RepoError, RepoResult};
use crate::model::entity::{Entity, Tracking};
use crate::model::reference::Reference;
use crate::model::schema::{EntitySchema, FieldDef};
use crate::model::team::{Team, TeamId, TEAM_SCHEMA};
use crate::query::mapper::{FromRow, MapContext, RowView};
use rusqlite::types::Value;

pub type MemberId = i64;

pub static MEMBER_SCHEMA: EntitySchema = EntitySchema {
    name: "member",
    table: "member",
    key: FieldDef::key("id", "member_id"),
    fields: &[
        FieldDef::scalar("username", "username"),
        FieldDef::scalar("age", "age"),
        FieldDef::many_to_one("team", "team_id", &TEAM_SCHEMA),
    ],
};

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    id: Option<MemberId>,
    pub username: String,
    pub age: i64,
    /// Lazy unless the loading query fetch-joined `team`.
    pub team: Reference<Team>,
    tracking: Tracking,
}

impl Member {
    pub fn new(username: impl Into<String>) -> Self {
        Self::with_age(username, 0)
    }

    pub fn with_age(username: impl Into<String>, age: i64) -> Self {
        Self {
            id: None,
            username: username.into(),
            age,
            team: Reference::Empty,
            tracking: Tracking::Managed,
        }
    }

    pub fn with_team(username: impl Into<String>, age: i64, team: &Team) -> Self {
        let mut member = Self::with_age(username, age);
        member.change_team(team);
        member
    }

    pub fn id(&self) -> Option<MemberId> {
        self.id
    }

    pub fn change_team(&mut self, team: &Team) {
        self.team = Reference::to(team);
    }

    pub fn is_read_only(&self) -> bool {
        self.tracking == Tracking::ReadOnly
    }
}

impl FromRow for Member {
    fn from_row(row: &RowView<'_>, ctx: &MapContext) -> RepoResult<Self> {
        let team = if ctx.is_joined("team") {
            let nested = row.nested("team");
            match nested.get::<Option<TeamId>>("id")? {
                Some(_) => Reference::Resolved(Box::new(Team::from_row(&nested, ctx)?)),
                None => Reference::Empty,
            }
        } else {
            match row.get::<Option<TeamId>>("team")? {
                Some(key) => Reference::Unresolved {
                    key,
                    scope: ctx.scope().clone(),
                },
                None => Reference::Empty,
            }
        };

        Ok(Self {
            id: Some(row.get("id")?),
            username: row.get("username")?,
            age: row.get("age")?,
            team,
            tracking: ctx.tracking(),
        })
    }
}

impl Entity for Member {
    type Key = MemberId;

    fn schema() -> &'static EntitySchema {
        &MEMBER_SCHEMA
    }

    fn key(&self) -> Option<MemberId> {
        self.id
    }

    fn assign_key(&mut self, key: MemberId) {
        self.id = Some(key);
    }

    fn column_values(&self) -> RepoResult<Vec<Value>> {
        let team_id = match (&self.team, self.team.key()) {
            (_, Some(key)) => Value::Integer(key),
            (Reference::Resolved(_), None) => {
                return Err(RepoError::UnsavedReference {
                    entity: MEMBER_SCHEMA.name,
                    field: "team",
                });
            }
            (_, None) => Value::Null,
        };
        Ok(vec![
            Value::Text(self.username.clone()),
            Value::Integer(self.age),
            team_id,
        ])
    }

    fn tracking(&self) -> Tracking {
        self.tracking
    }
}
