//! Core engine of sqlrepo: typed repositories over SQLite.
//! Query descriptions, fetch strategies, pagination and bulk mutations live
//! here; callers only see entities, projections and pages.

pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod service;

pub use db::{
    in_transaction, ConnectionProvider, DbConfig, DbError, DbResult, SqliteConnectionProvider,
    TxHandle,
};
pub use error::{RepoError, RepoResult};
pub use logging::{
    default_log_level, init_logging, init_logging_with, logging_status, LogSettings, LoggingError,
};
pub use model::entity::{Entity, EntityKey, Tracking};
pub use model::member::{Member, MemberId};
pub use model::projection::{
    MemberDto, MemberProjection, NestedClosedProjection, Projection, TeamInfo, UsernameOnly,
};
pub use model::reference::Reference;
pub use model::team::{Team, TeamId};
pub use query::{BulkMutation, Direction, LockMode, Operator, QueryDescription, Sort};
pub use repo::{Page, PageRequest, Repository, SqliteRepository};
pub use service::member_service::MemberService;

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
