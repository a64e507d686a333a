//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `sqlrepo_core` linkage with a ping/version probe.
//! - Run the member paging scenario against a private in-memory store.
//!
//! Set `SQLREPO_LOG_DIR` to an absolute path to write core logs there.

use log::info;
use sqlrepo_core::{
    default_log_level, in_transaction, init_logging, DbConfig, Member, MemberService, PageRequest,
    RepoError, Repository, Sort, SqliteConnectionProvider, SqliteRepository,
};
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("sqlrepo_core ping={}", sqlrepo_core::ping());
    println!("sqlrepo_core version={}", sqlrepo_core::core_version());

    if let Ok(log_dir) = std::env::var("SQLREPO_LOG_DIR") {
        if let Err(err) = init_logging(default_log_level(), &log_dir) {
            eprintln!("logging disabled: {err}");
        }
    }

    match run_paging_demo() {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("paging demo failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run_paging_demo() -> Result<String, RepoError> {
    let provider = SqliteConnectionProvider::open_in_memory(DbConfig::default())?;
    let service = MemberService::new(SqliteRepository::<Member>::new());

    let page = in_transaction(&provider, |tx| {
        for index in 1..=5 {
            service
                .repository()
                .save(tx, Member::with_age(format!("member{index}"), 10))?;
        }
        let request = PageRequest::of(0, 3)?.with_sort(Sort::desc("username"));
        service.find_by_age(tx, 10, &request)
    })?;

    info!(
        "event=paging_demo module=cli status=ok total={} pages={}",
        page.total_elements(),
        page.total_pages()
    );
    let usernames = page.map(|member| member.username);
    serde_json::to_string_pretty(&usernames).map_err(|err| RepoError::InvalidData(err.to_string()))
}
