use sqlrepo_core::db::ConnectionProvider;
use sqlrepo_core::{
    in_transaction, DbConfig, Member, MemberService, RepoError, RepoResult, Repository,
    SqliteConnectionProvider, SqliteRepository, Team,
};
use std::thread;
use std::time::{Duration, Instant};

type Service = MemberService<SqliteRepository<Member>>;

fn service() -> Service {
    MemberService::new(SqliteRepository::new())
}

/// Two teams with one member each, committed.
fn seed_two_teams(provider: &SqliteConnectionProvider, service: &Service) {
    let teams = SqliteRepository::<Team>::new();
    in_transaction(provider, |tx| -> RepoResult<()> {
        let team_a = teams.save(tx, Team::new("teamA"))?;
        let team_b = teams.save(tx, Team::new("teamB"))?;
        service
            .repository()
            .save(tx, Member::with_team("member1", 10, &team_a))?;
        service
            .repository()
            .save(tx, Member::with_team("member2", 20, &team_b))?;
        Ok(())
    })
    .unwrap();
}

fn memory_provider() -> SqliteConnectionProvider {
    SqliteConnectionProvider::open_in_memory(DbConfig::default()).unwrap()
}

#[test]
fn lazy_reference_costs_one_lookup_then_none() {
    let provider = memory_provider();
    let service = service();
    seed_two_teams(&provider, &service);

    let tx = provider.acquire().unwrap();
    let mut members = service.repository().find_all(&tx).unwrap();
    assert!(members.iter().all(|member| !member.team.is_resolved()));

    let before = tx.statement_count();
    let name = members[0].team.get(&tx).unwrap().unwrap().name.clone();
    assert_eq!(tx.statement_count(), before + 1);
    assert_eq!(name, "teamA");

    members[0].team.get(&tx).unwrap();
    assert_eq!(tx.statement_count(), before + 1);
    assert!(members[0].team.is_resolved());
}

#[test]
fn lookups_of_the_same_team_are_served_from_the_transaction_cache() {
    let provider = memory_provider();
    let service = service();
    let teams = SqliteRepository::<Team>::new();

    let tx = provider.acquire().unwrap();
    let team = teams.save(&tx, Team::new("shared")).unwrap();
    service
        .repository()
        .save(&tx, Member::with_team("member1", 10, &team))
        .unwrap();
    service
        .repository()
        .save(&tx, Member::with_team("member2", 20, &team))
        .unwrap();

    let mut members = service.repository().find_all(&tx).unwrap();
    let before = tx.statement_count();
    for member in &mut members {
        assert_eq!(member.team.get(&tx).unwrap().unwrap().name, "shared");
    }
    assert_eq!(tx.statement_count(), before + 1);
}

#[test]
fn fetch_join_resolves_team_in_the_same_statement() {
    let provider = memory_provider();
    let service = service();
    seed_two_teams(&provider, &service);

    let tx = provider.acquire().unwrap();
    let before = tx.statement_count();
    let mut members = service.find_member_fetch_join(&tx).unwrap();
    assert_eq!(tx.statement_count(), before + 1);

    let mut names: Vec<String> = members
        .iter_mut()
        .map(|member| member.team.get(&tx).unwrap().unwrap().name.clone())
        .collect();
    names.sort();
    assert_eq!(names, vec!["teamA", "teamB"]);
    assert_eq!(tx.statement_count(), before + 1);

    let graph = service.find_member_entity_graph(&tx).unwrap();
    assert_eq!(graph[0].team.loaded().map(|team| team.name.as_str()), Some("teamA"));

    let by_username = service.find_by_username(&tx, "member2").unwrap();
    assert!(by_username[0].team.is_resolved());
}

#[test]
fn fetch_join_keeps_members_without_team() {
    let provider = memory_provider();
    let service = service();

    let tx = provider.acquire().unwrap();
    service
        .repository()
        .save(&tx, Member::with_age("loner", 30))
        .unwrap();
    let members = service.find_member_fetch_join(&tx).unwrap();
    assert_eq!(members.len(), 1);
    assert!(members[0].team.is_empty());
}

#[test]
fn lazy_access_after_clear_or_commit_is_detached() {
    let provider = memory_provider();
    let service = service();
    seed_two_teams(&provider, &service);

    let tx = provider.acquire().unwrap();
    let mut members = service.repository().find_all(&tx).unwrap();
    tx.clear();
    assert!(matches!(
        members[0].team.get(&tx),
        Err(RepoError::DetachedAccess { entity: "team" })
    ));

    let mut reloaded = service.repository().find_all(&tx).unwrap();
    tx.commit().unwrap();

    let next = provider.acquire().unwrap();
    assert!(matches!(
        reloaded[1].team.get(&next),
        Err(RepoError::DetachedAccess { .. })
    ));
    assert_eq!(next.statement_count(), 0);
}

#[test]
fn dangling_foreign_key_is_related_entity_not_found() {
    let provider = SqliteConnectionProvider::open_in_memory(DbConfig {
        foreign_keys: false,
        ..DbConfig::default()
    })
    .unwrap();
    let service = service();

    let tx = provider.acquire().unwrap();
    tx.execute(
        "INSERT INTO member (username, age, team_id) VALUES ('ghost', 1, 999)",
        &[],
    )
    .unwrap();

    let mut members = service.repository().find_all(&tx).unwrap();
    let err = members[0].team.get(&tx).unwrap_err();
    match err {
        RepoError::RelatedEntityNotFound { entity, key } => {
            assert_eq!(entity, "team");
            assert_eq!(key, "999");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn read_only_member_is_never_written_back() {
    let provider = memory_provider();
    let service = service();
    in_transaction(&provider, |tx| -> RepoResult<()> {
        service
            .repository()
            .save(tx, Member::with_age("member1", 10))?;
        Ok(())
    })
    .unwrap();

    in_transaction(&provider, |tx| -> RepoResult<()> {
        let mut member = service
            .find_read_only_by_username(tx, "member1")?
            .expect("member should exist");
        assert!(member.is_read_only());
        member.username = "member2".to_string();
        let returned = service.repository().save(tx, member)?;
        assert_eq!(returned.username, "member2");
        Ok(())
    })
    .unwrap();

    let tx = provider.acquire().unwrap();
    assert_eq!(service.find_list_by_username(&tx, "member1").unwrap().len(), 1);
    assert!(service
        .find_list_by_username(&tx, "member2")
        .unwrap()
        .is_empty());
}

#[test]
fn locked_read_holds_write_lock_and_changes_are_flushed() {
    let provider = memory_provider();
    let service = service();
    let tx = provider.acquire().unwrap();
    service
        .repository()
        .save(&tx, Member::with_age("member1", 10))
        .unwrap();
    tx.commit().unwrap();

    let tx = provider.acquire().unwrap();
    let mut locked = service.find_lock_by_username(&tx, "member1").unwrap();
    assert!(tx.holds_write_lock());

    let mut member = locked.remove(0);
    member.username = "member2".to_string();
    service.repository().save(&tx, member).unwrap();
    assert_eq!(service.find_list_by_username(&tx, "member2").unwrap().len(), 1);
    tx.commit().unwrap();
}

#[test]
fn second_lock_request_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let provider = SqliteConnectionProvider::open(
        dir.path().join("lock.db"),
        DbConfig {
            busy_timeout_ms: 100,
            ..DbConfig::default()
        },
    )
    .unwrap();
    let service = service();
    in_transaction(&provider, |tx| -> RepoResult<()> {
        service
            .repository()
            .save(tx, Member::with_age("member1", 10))?;
        Ok(())
    })
    .unwrap();

    let holder = provider.acquire().unwrap();
    service.find_lock_by_username(&holder, "member1").unwrap();

    let waiter = provider.acquire().unwrap();
    let err = service
        .find_lock_by_username(&waiter, "member1")
        .unwrap_err();
    assert!(matches!(err, RepoError::LockTimeout));
    assert!(!waiter.is_open());

    holder.commit().unwrap();
}

#[test]
fn lock_waiter_proceeds_after_holder_commits() {
    let dir = tempfile::tempdir().unwrap();
    let provider = SqliteConnectionProvider::open(
        dir.path().join("wait.db"),
        DbConfig {
            busy_timeout_ms: 5_000,
            ..DbConfig::default()
        },
    )
    .unwrap();
    assert_waiter_sees_committed_change(&provider);
}

#[test]
fn in_memory_lock_waiter_proceeds_after_holder_commits() {
    assert_waiter_sees_committed_change(&memory_provider());
}

#[test]
fn in_memory_reader_waits_for_uncommitted_writer() {
    let provider = memory_provider();
    let service = service();

    let writer = provider.acquire().unwrap();
    service
        .repository()
        .save(&writer, Member::with_age("member1", 10))
        .unwrap();

    thread::scope(|scope| {
        let reader = scope.spawn(|| {
            let tx = provider.acquire().unwrap();
            let started_at = Instant::now();
            let count = service.repository().count(&tx).unwrap();
            (count, started_at.elapsed())
        });

        thread::sleep(Duration::from_millis(100));
        writer.commit().unwrap();

        let (count, waited) = reader.join().unwrap();
        assert_eq!(count, 1);
        assert!(waited < Duration::from_millis(5_000));
    });
}

#[test]
fn lock_after_read_upgrades_and_blocks_other_lockers() {
    let provider = SqliteConnectionProvider::open_in_memory(DbConfig {
        busy_timeout_ms: 100,
        ..DbConfig::default()
    })
    .unwrap();
    let service = service();
    in_transaction(&provider, |tx| -> RepoResult<()> {
        service
            .repository()
            .save(tx, Member::with_age("member1", 10))?;
        Ok(())
    })
    .unwrap();

    let holder = provider.acquire().unwrap();
    assert_eq!(service.repository().count(&holder).unwrap(), 1);
    assert!(!holder.holds_write_lock());
    service.find_lock_by_username(&holder, "member1").unwrap();
    assert!(holder.holds_write_lock());

    let waiter = provider.acquire().unwrap();
    let started_at = Instant::now();
    let err = service
        .find_lock_by_username(&waiter, "member1")
        .unwrap_err();
    assert!(matches!(err, RepoError::LockTimeout));
    assert!(started_at.elapsed() >= Duration::from_millis(90));
    assert!(!waiter.is_open());

    holder.commit().unwrap();
}

#[test]
fn raw_write_drops_cached_rows() {
    let provider = memory_provider();
    let service = service();
    let teams = SqliteRepository::<Team>::new();

    let tx = provider.acquire().unwrap();
    let team = teams.save(&tx, Team::new("teamA")).unwrap();
    service
        .repository()
        .save(&tx, Member::with_team("member1", 10, &team))
        .unwrap();

    let mut first = service.repository().find_all(&tx).unwrap();
    assert_eq!(first[0].team.get(&tx).unwrap().unwrap().name, "teamA");

    assert_eq!(tx.execute("UPDATE team SET name = 'teamB'", &[]).unwrap(), 1);

    let mut second = service.repository().find_all(&tx).unwrap();
    let before = tx.statement_count();
    assert_eq!(second[0].team.get(&tx).unwrap().unwrap().name, "teamB");
    assert_eq!(tx.statement_count(), before + 1);
}

/// Holder locks `member1` and bumps its age; a waiter on another thread
/// blocks on the same lock and reads the committed value.
fn assert_waiter_sees_committed_change(provider: &SqliteConnectionProvider) {
    let service = service();
    in_transaction(provider, |tx| -> RepoResult<()> {
        service
            .repository()
            .save(tx, Member::with_age("member1", 10))?;
        Ok(())
    })
    .unwrap();

    let holder = provider.acquire().unwrap();
    let mut member = service
        .find_lock_by_username(&holder, "member1")
        .unwrap()
        .remove(0);

    thread::scope(|scope| {
        let waiter = scope.spawn(|| {
            let tx = provider.acquire().unwrap();
            let seen = service.find_lock_by_username(&tx, "member1").unwrap();
            tx.commit().unwrap();
            seen[0].age
        });

        thread::sleep(Duration::from_millis(100));
        member.age = 11;
        service.repository().save(&holder, member).unwrap();
        holder.commit().unwrap();

        assert_eq!(waiter.join().unwrap(), 11);
    });
}
