use sqlrepo_core::db::ConnectionProvider;
use sqlrepo_core::{
    in_transaction, DbConfig, Member, MemberDto, MemberService, NestedClosedProjection,
    QueryDescription, RepoError, RepoResult, Repository, SqliteConnectionProvider,
    SqliteRepository, Team, TeamInfo, TxHandle, UsernameOnly,
};

type Service = MemberService<SqliteRepository<Member>>;

fn setup() -> (SqliteConnectionProvider, Service) {
    (
        SqliteConnectionProvider::open_in_memory(DbConfig::default()).unwrap(),
        MemberService::new(SqliteRepository::new()),
    )
}

/// `m1` and `m2` in `teamA`, `solo` without a team.
fn seed(tx: &TxHandle<'_>, service: &Service) -> Team {
    let team = SqliteRepository::<Team>::new()
        .save(tx, Team::new("teamA"))
        .unwrap();
    for username in ["m1", "m2"] {
        service
            .repository()
            .save(tx, Member::with_team(username, 0, &team))
            .unwrap();
    }
    service
        .repository()
        .save(tx, Member::with_age("solo", 0))
        .unwrap();
    team
}

#[test]
fn flat_projection_reads_only_username() {
    let (provider, service) = setup();
    let tx = provider.acquire().unwrap();
    seed(&tx, &service);

    let result: Vec<UsernameOnly> = service.find_projections_by_username(&tx, "m1").unwrap();
    assert_eq!(
        result,
        vec![UsernameOnly {
            username: "m1".to_string()
        }]
    );
}

#[test]
fn nested_projection_carries_team_name() {
    let (provider, service) = setup();
    let tx = provider.acquire().unwrap();
    seed(&tx, &service);

    let with_team: Vec<NestedClosedProjection> =
        service.find_projections_by_username(&tx, "m1").unwrap();
    assert_eq!(with_team.len(), 1);
    assert_eq!(
        with_team[0].team,
        Some(TeamInfo {
            name: "teamA".to_string()
        })
    );

    let without_team: Vec<NestedClosedProjection> =
        service.find_projections_by_username(&tx, "solo").unwrap();
    assert_eq!(without_team.len(), 1);
    assert_eq!(without_team[0].team, None);
}

#[test]
fn member_dto_skips_members_without_team() {
    let (provider, service) = setup();
    let tx = provider.acquire().unwrap();
    seed(&tx, &service);

    let mut dtos = service.find_member_dto(&tx).unwrap();
    dtos.sort_by(|left, right| left.username.cmp(&right.username));
    let names: Vec<(&str, &str)> = dtos
        .iter()
        .map(|dto| (dto.username.as_str(), dto.team_name.as_str()))
        .collect();
    assert_eq!(names, vec![("m1", "teamA"), ("m2", "teamA")]);
}

#[test]
fn projection_query_for_other_entity_is_rejected() {
    let (provider, service) = setup();
    let tx = provider.acquire().unwrap();

    let err = service
        .repository()
        .find_projected::<UsernameOnly>(&tx, &QueryDescription::of::<Team>())
        .unwrap_err();
    assert!(matches!(err, RepoError::EntityMismatch { .. }));
    assert_eq!(tx.statement_count(), 0);
}

#[test]
fn shape_mismatch_rolls_back_the_transaction() {
    let (provider, service) = setup();

    let err = in_transaction(&provider, |tx| -> RepoResult<Vec<MemberDto>> {
        seed(tx, &service);
        service
            .repository()
            .find_native(tx, "SELECT member_id AS id, username FROM member", &[])
    })
    .unwrap_err();
    match err {
        RepoError::ShapeMismatch { shape, column } => {
            assert_eq!(shape, "native");
            assert_eq!(column, "team.name");
        }
        other => panic!("unexpected error: {other}"),
    }

    let tx = provider.acquire().unwrap();
    assert_eq!(service.repository().count(&tx).unwrap(), 0);
}
