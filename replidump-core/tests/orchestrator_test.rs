//! End-to-end orchestrator runs against a mock replica.

mod common;

use std::sync::Arc;

use common::*;
use replidump_core::run_cache::{RunCacheState, RunningEntry};
use replidump_core::{clock, Orchestrator, Settings};

fn incremental_files(settings: &Settings) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(&settings.backup.incremental_path)
        .unwrap()
        .flatten()
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn a_full_run_dumps_compresses_and_coordinates() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings_for(dir.path());
    settings.backup.compression_enabled = true;
    settings.backup.incremental_max_copies = Some(3);

    let source = dir.path().join("content.sql");
    let events = dir.path().join("events.log");
    std::fs::write(&source, b"-- the app schema\n").unwrap();
    settings.mysql.mysqldump_command = install_dump_script(dir.path(), &source, &events);

    let (server, state) = MockReplica::new(&["app"], &events);
    let settings = Arc::new(settings);
    let mut orchestrator = Orchestrator::new(Arc::clone(&settings), server).unwrap();
    orchestrator.run().unwrap();

    // One compressed dump plus its checksum.
    let files = incremental_files(&settings);
    assert_eq!(files.len(), 2);
    assert!(files[0].starts_with("app__") && files[0].ends_with(".md5"));
    assert!(files[1].starts_with("app__") && files[1].ends_with(".sql.gz"));

    // Replication was stopped before the dump and started after it.
    let events = read_events(&events);
    let stop_at = events.iter().position(|e| e == "stop_replica").unwrap();
    let dump_at = events.iter().position(|e| e.starts_with("dump ")).unwrap();
    let start_at = events.iter().position(|e| e == "start_replica").unwrap();
    assert!(stop_at < dump_at);
    assert!(dump_at < start_at);

    let state = state.lock().unwrap();
    assert_eq!(state.stop_calls, 1);
    assert_eq!(state.start_calls, 1);
    assert!(state.running);
}

#[test]
fn second_run_with_unchanged_content_adds_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings_for(dir.path());
    let source = dir.path().join("content.sql");
    let events = dir.path().join("events.log");
    std::fs::write(&source, b"-- stable content\n").unwrap();
    settings.mysql.mysqldump_command = install_dump_script(dir.path(), &source, &events);
    let settings = Arc::new(settings);

    let (server, _) = MockReplica::new(&["app"], &events);
    Orchestrator::new(Arc::clone(&settings), server)
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(incremental_files(&settings).len(), 2);

    // Distinct filename timestamps need a second to pass.
    std::thread::sleep(std::time::Duration::from_millis(1100));

    let (server, _) = MockReplica::new(&["app"], &events);
    Orchestrator::new(Arc::clone(&settings), server)
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(incremental_files(&settings).len(), 2);
}

#[test]
fn include_only_limits_what_gets_backed_up() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings_for(dir.path());
    settings.limits.include_only_databases =
        Some(vec!["app".to_string(), "orders".to_string()]);

    let source = dir.path().join("content.sql");
    let events = dir.path().join("events.log");
    std::fs::write(&source, b"-- rows\n").unwrap();
    settings.mysql.mysqldump_command = install_dump_script(dir.path(), &source, &events);
    let settings = Arc::new(settings);

    let (server, _) = MockReplica::new(&["app", "orders", "logs"], &events);
    Orchestrator::new(Arc::clone(&settings), server)
        .unwrap()
        .run()
        .unwrap();

    let files = incremental_files(&settings);
    assert_eq!(files.len(), 4);
    assert!(files.iter().all(|f| f.starts_with("app__") || f.starts_with("orders__")));
}

#[test]
fn exclude_filters_databases_out() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings_for(dir.path());
    settings.limits.exclude_databases = Some(vec!["logs".to_string()]);

    let source = dir.path().join("content.sql");
    let events = dir.path().join("events.log");
    std::fs::write(&source, b"-- rows\n").unwrap();
    settings.mysql.mysqldump_command = install_dump_script(dir.path(), &source, &events);
    let settings = Arc::new(settings);

    let (server, _) = MockReplica::new(&["app", "logs"], &events);
    Orchestrator::new(Arc::clone(&settings), server)
        .unwrap()
        .run()
        .unwrap();

    let files = incremental_files(&settings);
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|f| f.starts_with("app__")));
}

#[test]
fn a_dump_without_a_checksum_is_cleaned_up_by_discovery() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_for(dir.path());

    let stray_instance = settings
        .backup
        .incremental_path
        .join("app__20250101-020000.sql");
    std::fs::write(&stray_instance, b"-- orphaned dump\n").unwrap();

    let events = dir.path().join("events.log");
    let (server, _) = MockReplica::new(&[], &events);
    Orchestrator::new(Arc::new(settings), server)
        .unwrap()
        .run()
        .unwrap();

    assert!(!stray_instance.exists());
}

#[test]
fn stray_files_are_swept_only_past_the_grace_period() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings_for(dir.path());
    settings.backup.cleanup_delay_days = Some(1);

    let old_stray = settings.backup.incremental_path.join("notes.txt");
    let new_stray = settings.backup.long_term_backup_path.join("todo.txt");
    std::fs::write(&old_stray, b"scratch").unwrap();
    std::fs::write(&new_stray, b"scratch").unwrap();

    // Age one of them three days.
    let three_days_ago = filetime::FileTime::from_unix_time(clock::now_ts() - 3 * 86_400, 0);
    filetime::set_file_mtime(&old_stray, three_days_ago).unwrap();

    let events = dir.path().join("events.log");
    let (server, _) = MockReplica::new(&[], &events);
    Orchestrator::new(Arc::new(settings), server)
        .unwrap()
        .run()
        .unwrap();

    assert!(!old_stray.exists());
    assert!(new_stray.exists());
}

#[test]
fn short_circuits_after_success_while_a_sibling_still_runs() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_for(dir.path());

    // A prior success for this settings file, and a live sibling (this very
    // process) that started before it.
    let state = RunCacheState {
        running_backups: [(
            "/etc/replidump/sibling.ini".to_string(),
            RunningEntry {
                pid: std::process::id(),
                started_at: clock::now_ts() - 60,
            },
        )]
        .into(),
        successful_run_times: [(
            settings.settings_path.display().to_string(),
            clock::now_ts() + 5,
        )]
        .into(),
    };
    std::fs::write(
        &settings.backup.running_cache_file,
        serde_json::to_vec(&state).unwrap(),
    )
    .unwrap();

    let events = dir.path().join("events.log");
    let (server, mock_state) = MockReplica::new(&["app"], &events);
    Orchestrator::new(Arc::new(settings), server)
        .unwrap()
        .run()
        .unwrap();

    // Nothing happened: no quiescence, no dumps.
    let mock_state = mock_state.lock().unwrap();
    assert_eq!(mock_state.stop_calls, 0);
    assert_eq!(mock_state.start_calls, 0);
    assert!(read_events(&events).is_empty());
}

#[test]
fn replication_stays_stopped_while_siblings_run() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_for(dir.path());

    // Register a live sibling under a different settings file.
    let state = RunCacheState {
        running_backups: [(
            "/etc/replidump/sibling.ini".to_string(),
            RunningEntry {
                pid: std::process::id(),
                started_at: clock::now_ts(),
            },
        )]
        .into(),
        successful_run_times: Default::default(),
    };
    std::fs::write(
        &settings.backup.running_cache_file,
        serde_json::to_vec(&state).unwrap(),
    )
    .unwrap();

    let source = dir.path().join("content.sql");
    let events = dir.path().join("events.log");
    std::fs::write(&source, b"-- rows\n").unwrap();
    let mut settings = settings;
    settings.mysql.mysqldump_command = install_dump_script(dir.path(), &source, &events);

    let (server, mock_state) = MockReplica::new(&["app"], &events);
    Orchestrator::new(Arc::new(settings), server)
        .unwrap()
        .run()
        .unwrap();

    let mock_state = mock_state.lock().unwrap();
    assert_eq!(mock_state.stop_calls, 1);
    // Not the sole registrant: the replica must stay quiesced.
    assert_eq!(mock_state.start_calls, 0);
    assert!(!mock_state.running);
}

#[test]
fn run_cache_is_clean_after_a_successful_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings_for(dir.path());
    let source = dir.path().join("content.sql");
    let events = dir.path().join("events.log");
    std::fs::write(&source, b"-- rows\n").unwrap();
    settings.mysql.mysqldump_command = install_dump_script(dir.path(), &source, &events);
    let cache_path = settings.backup.running_cache_file.clone();
    let settings_key = settings.settings_path.display().to_string();

    let (server, _) = MockReplica::new(&["app"], &events);
    Orchestrator::new(Arc::new(settings), server)
        .unwrap()
        .run()
        .unwrap();

    let state: RunCacheState =
        serde_json::from_str(&std::fs::read_to_string(&cache_path).unwrap()).unwrap();
    assert!(state.running_backups.is_empty());
    assert!(state.successful_run_times.contains_key(&settings_key));
}

#[test]
fn vanished_database_files_are_removed_past_the_grace_period() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings_for(dir.path());
    settings.backup.cleanup_delay_days = Some(5);

    // A database with valid backups that no longer exists on the server.
    let date = clock::format_timestamp(clock::now_ts() - 10 * 86_400);
    let (sql, md5) = seed_backup(&settings, "legacy", &date, b"-- legacy rows\n");

    let events = dir.path().join("events.log");
    let (server, _) = MockReplica::new(&[], &events);
    Orchestrator::new(Arc::new(settings), server)
        .unwrap()
        .run()
        .unwrap();

    assert!(!sql.exists());
    assert!(!md5.exists());
}
