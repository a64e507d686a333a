//! Member use-case service.
//!
//! # Responsibility
//! - Provide named member lookups as explicit query descriptions.
//! - Delegate execution to a `Repository<Member>` implementation.
//!
//! # Invariants
//! - Service APIs never bypass repository validation or persistence paths.
//! - Every method runs inside the caller's transaction handle.

use crate::db::TxHandle;
use crate::error::{RepoError, RepoResult};
use crate::model::member::{Member, MEMBER_SCHEMA};
use crate::model::projection::{MemberDto, MemberProjection, Projection, UsernameOnly};
use crate::query::description::{
    BulkMutation, Direction, LockMode, Operator, QueryDescription, ToValue,
};
use crate::repo::entity_repo::Repository;
use crate::repo::page::{Page, PageRequest};

const MEMBER_BY_USERNAME_SQL: &str =
    "SELECT member_id AS id, username, age, team_id AS team FROM member WHERE username = ?1";

const MEMBER_PROJECTION_SQL: &str = "SELECT m.member_id AS id, m.username AS username, \
     t.name AS team_name FROM member m LEFT JOIN team t ON t.team_id = m.team_id \
     ORDER BY m.member_id";

const MEMBER_PROJECTION_COUNT_SQL: &str = "SELECT COUNT(*) FROM member";

/// Use-case service for member lookups and bulk updates.
pub struct MemberService<R: Repository<Member>> {
    repo: R,
}

impl<R: Repository<Member>> MemberService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Members named `username`, with their team fetched in the same statement.
    pub fn find_by_username(&self, tx: &TxHandle<'_>, username: &str) -> RepoResult<Vec<Member>> {
        self.repo.find_by(tx, &by_username(username).fetch_join("team"))
    }

    pub fn find_by_username_and_age_greater_than(
        &self,
        tx: &TxHandle<'_>,
        username: &str,
        age: i64,
    ) -> RepoResult<Vec<Member>> {
        let query = by_username(username).filter("age", Operator::Gt, age);
        self.repo.find_by(tx, &query)
    }

    /// Members matching both `username` and `age` exactly.
    pub fn find_user(
        &self,
        tx: &TxHandle<'_>,
        username: &str,
        age: i64,
    ) -> RepoResult<Vec<Member>> {
        self.repo.find_by(tx, &by_username(username).where_eq("age", age))
    }

    pub fn find_username_list(&self, tx: &TxHandle<'_>) -> RepoResult<Vec<String>> {
        let names: Vec<UsernameOnly> = self
            .repo
            .find_projected(tx, &QueryDescription::new(&MEMBER_SCHEMA))?;
        Ok(names.into_iter().map(|name| name.username).collect())
    }

    /// Members that belong to a team, as id/username/team-name rows.
    pub fn find_member_dto(&self, tx: &TxHandle<'_>) -> RepoResult<Vec<MemberDto>> {
        self.repo.find_projected(tx, &QueryDescription::new(&MEMBER_SCHEMA))
    }

    pub fn find_by_names<S: ToValue>(
        &self,
        tx: &TxHandle<'_>,
        names: impl IntoIterator<Item = S>,
    ) -> RepoResult<Vec<Member>> {
        let query = QueryDescription::new(&MEMBER_SCHEMA).filter_in("username", names);
        self.repo.find_by(tx, &query)
    }

    pub fn find_list_by_username(
        &self,
        tx: &TxHandle<'_>,
        username: &str,
    ) -> RepoResult<Vec<Member>> {
        self.repo.find_by(tx, &by_username(username))
    }

    /// Exactly one member named `username`.
    ///
    /// # Errors
    /// - `NotFound` when no member matches.
    /// - `NonUniqueResult` when several members match.
    pub fn find_member_by_username(&self, tx: &TxHandle<'_>, username: &str) -> RepoResult<Member> {
        self.find_optional_by_username(tx, username)?
            .ok_or_else(|| RepoError::NotFound {
                entity: MEMBER_SCHEMA.name,
                key: username.to_string(),
            })
    }

    pub fn find_optional_by_username(
        &self,
        tx: &TxHandle<'_>,
        username: &str,
    ) -> RepoResult<Option<Member>> {
        self.repo.find_one(tx, &by_username(username))
    }

    pub fn find_by_age(
        &self,
        tx: &TxHandle<'_>,
        age: i64,
        request: &PageRequest,
    ) -> RepoResult<Page<Member>> {
        let query = QueryDescription::new(&MEMBER_SCHEMA).where_eq("age", age);
        self.repo.find_page(tx, &query, request)
    }

    /// Adds one year to every member at least `age` old.
    pub fn bulk_age_plus(&self, tx: &TxHandle<'_>, age: i64) -> RepoResult<usize> {
        let mutation = BulkMutation::update(&MEMBER_SCHEMA)
            .increment("age", 1)
            .filter("age", Operator::Ge, age);
        self.repo.execute_bulk(tx, &mutation)
    }

    pub fn find_member_fetch_join(&self, tx: &TxHandle<'_>) -> RepoResult<Vec<Member>> {
        self.repo
            .find_by(tx, &QueryDescription::new(&MEMBER_SCHEMA).fetch_join("team"))
    }

    /// Every member with the `team` relation loaded eagerly.
    pub fn find_member_entity_graph(&self, tx: &TxHandle<'_>) -> RepoResult<Vec<Member>> {
        let query = QueryDescription::new(&MEMBER_SCHEMA)
            .fetch_join("team")
            .order_by("id", Direction::Asc);
        self.repo.find_by(tx, &query)
    }

    /// Single member loaded read-only; saving it later writes nothing.
    pub fn find_read_only_by_username(
        &self,
        tx: &TxHandle<'_>,
        username: &str,
    ) -> RepoResult<Option<Member>> {
        self.repo.find_one(tx, &by_username(username).read_only())
    }

    /// Members named `username`, locked for writing until the transaction ends.
    pub fn find_lock_by_username(
        &self,
        tx: &TxHandle<'_>,
        username: &str,
    ) -> RepoResult<Vec<Member>> {
        let query = by_username(username).lock(LockMode::PessimisticWrite);
        self.repo.find_by(tx, &query)
    }

    pub fn find_projections_by_username<P: Projection>(
        &self,
        tx: &TxHandle<'_>,
        username: &str,
    ) -> RepoResult<Vec<P>> {
        self.repo.find_projected(tx, &by_username(username))
    }

    pub fn find_by_native_query(
        &self,
        tx: &TxHandle<'_>,
        username: &str,
    ) -> RepoResult<Option<Member>> {
        let mut found: Vec<Member> =
            self.repo.find_native(tx, MEMBER_BY_USERNAME_SQL, &[username.to_value()])?;
        if found.len() > 1 {
            return Err(RepoError::NonUniqueResult {
                entity: MEMBER_SCHEMA.name,
                count: found.len(),
            });
        }
        Ok(found.pop())
    }

    /// Member id, username and team name, paged over raw SQL.
    pub fn find_by_native_projection(
        &self,
        tx: &TxHandle<'_>,
        request: &PageRequest,
    ) -> RepoResult<Page<MemberProjection>> {
        self.repo.find_page_native(
            tx,
            MEMBER_PROJECTION_SQL,
            MEMBER_PROJECTION_COUNT_SQL,
            &[],
            request,
        )
    }

    /// Every member, ordered by key.
    pub fn find_member_custom(&self, tx: &TxHandle<'_>) -> RepoResult<Vec<Member>> {
        let query = QueryDescription::new(&MEMBER_SCHEMA).order_by("id", Direction::Asc);
        self.repo.find_by(tx, &query)
    }
}

fn by_username(username: &str) -> QueryDescription {
    QueryDescription::new(&MEMBER_SCHEMA).where_eq("username", username)
}
