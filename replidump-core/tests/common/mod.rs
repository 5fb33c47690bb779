//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use replidump_core::backup::file::compute_checksum;
use replidump_core::backup::{BackupFile, BackupInstance};
use replidump_core::clock;
use replidump_core::config::{
    BackupSettings, LimitsSettings, LoggingSettings, MysqlSettings, Settings,
};
use replidump_core::errors::ReplicaError;
use replidump_core::ReplicaServer;

/// A workable `Settings` rooted in a scratch directory: real gzip, no
/// retention limits, dumps pointed at `/bin/false` until a test installs a
/// stub script.
pub fn settings_for(root: &Path) -> Settings {
    let incremental_path = root.join("incremental");
    let long_term_backup_path = root.join("long_term");
    std::fs::create_dir_all(&incremental_path).unwrap();
    std::fs::create_dir_all(&long_term_backup_path).unwrap();

    Settings {
        settings_path: root.join("backup.ini"),
        mysql: MysqlSettings {
            username: "backup".to_string(),
            password: "secret".to_string(),
            dump_options: Vec::new(),
            host: "localhost".to_string(),
            mysqldump_command: vec!["false".to_string()],
        },
        backup: BackupSettings {
            compression_enabled: false,
            compress_command: vec!["gzip".to_string()],
            decompress_command: vec!["gzip".to_string(), "-d".to_string()],
            compressed_file_extension: "gz".to_string(),
            max_parallel: Some(2),
            cleanup_delay_days: None,
            incremental_path,
            incremental_min_backup_frequency_seconds: None,
            incremental_max_lifespan_seconds: None,
            incremental_max_copies: None,
            long_term_backup_path,
            long_term_backup_min_frequency_seconds: None,
            long_term_max_lifespan_seconds: None,
            long_term_backup_max_copies: None,
            running_cache_file: root.join("running.cache"),
            cache_lock_wait: Some(5),
            cache_successful_run_purge_days: None,
        },
        snapshot: None,
        limits: LimitsSettings::default(),
        logging: LoggingSettings {
            logfile: root.join("backup.log"),
            loglevel: "debug".to_string(),
        },
    }
}

/// Seed a consistent `(dump, checksum)` pair for `(db, date)`.
pub fn seed_backup(
    settings: &Settings,
    db_name: &str,
    date_string: &str,
    body: &[u8],
) -> (PathBuf, PathBuf) {
    let sql = settings
        .backup
        .incremental_path
        .join(format!("{db_name}__{date_string}.sql"));
    std::fs::write(&sql, body).unwrap();
    let checksum = compute_checksum(&sql).unwrap();
    let md5 = settings
        .backup
        .incremental_path
        .join(format!("{db_name}__{date_string}.md5"));
    std::fs::write(&md5, format!("{checksum}\n")).unwrap();
    (sql, md5)
}

/// Seed a backup whose filename timestamp lies `age_secs` in the past, and
/// return its date string.
pub fn seed_aged_backup(
    settings: &Settings,
    db_name: &str,
    age_secs: i64,
    body: &[u8],
) -> String {
    let date_string = clock::format_timestamp(clock::now_ts() - age_secs);
    seed_backup(settings, db_name, &date_string, body);
    date_string
}

/// Load a previously seeded `(db, date)` pair back as a `BackupInstance`.
pub fn load_instance(settings: &Settings, db_name: &str, date_string: &str) -> BackupInstance {
    let files = [
        format!("{db_name}__{date_string}.sql"),
        format!("{db_name}__{date_string}.sql.{}", settings.backup.compressed_file_extension),
        format!("{db_name}__{date_string}.md5"),
    ]
    .iter()
    .filter_map(|name| {
        let path = settings.backup.incremental_path.join(name);
        path.is_file()
            .then(|| BackupFile::parse(&path, settings).unwrap())
    })
    .collect();
    BackupInstance::from_files(db_name, date_string, files, settings).unwrap()
}

/// Copy a seeded dump into the long-term directory, marking it long term.
pub fn seed_long_term(settings: &Settings, db_name: &str, date_string: &str) {
    let name = format!("{db_name}__{date_string}.sql");
    std::fs::copy(
        settings.backup.incremental_path.join(&name),
        settings.backup.long_term_backup_path.join(&name),
    )
    .unwrap();
}

/// Install a stub dump script that copies `source` to the `--result-file`
/// path and appends a line to `events`. Returns the argv to configure as
/// `mysqldump_command`.
pub fn install_dump_script(root: &Path, source: &Path, events: &Path) -> Vec<String> {
    use std::os::unix::fs::PermissionsExt;

    let script_path = root.join("fake_mysqldump.sh");
    let script = format!(
        "#!/bin/sh\n\
         for arg; do result=\"$arg\"; done\n\
         echo \"dump $result\" >> \"{events}\"\n\
         cat \"{source}\" > \"$result\"\n",
        events = events.display(),
        source = source.display(),
    );
    std::fs::write(&script_path, script).unwrap();
    let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script_path, perms).unwrap();
    vec![script_path.display().to_string()]
}

/// Lines appended to an events file, in order.
pub fn read_events(events: &Path) -> Vec<String> {
    match std::fs::read_to_string(events) {
        Ok(contents) => contents.lines().map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}

#[derive(Debug)]
pub struct MockReplicaState {
    pub databases: Vec<String>,
    pub running: bool,
    pub start_calls: usize,
    pub stop_calls: usize,
}

/// An in-memory stand-in for the MySQL control surface. Start/stop flip the
/// state immediately and are appended to the shared events file so tests can
/// assert ordering against dumps.
pub struct MockReplica {
    state: Arc<Mutex<MockReplicaState>>,
    events: PathBuf,
}

impl MockReplica {
    pub fn new(databases: &[&str], events: &Path) -> (MockReplica, Arc<Mutex<MockReplicaState>>) {
        let state = Arc::new(Mutex::new(MockReplicaState {
            databases: databases.iter().map(|s| s.to_string()).collect(),
            running: true,
            start_calls: 0,
            stop_calls: 0,
        }));
        (
            MockReplica {
                state: Arc::clone(&state),
                events: events.to_path_buf(),
            },
            state,
        )
    }

    fn log_event(&self, event: &str) {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events)
            .unwrap();
        writeln!(file, "{event}").unwrap();
    }
}

impl ReplicaServer for MockReplica {
    fn database_names(&mut self) -> Result<Vec<String>, ReplicaError> {
        Ok(self.state.lock().unwrap().databases.clone())
    }

    fn is_replica_running(&mut self) -> Result<bool, ReplicaError> {
        Ok(self.state.lock().unwrap().running)
    }

    fn start_replica(&mut self) -> Result<(), ReplicaError> {
        let mut state = self.state.lock().unwrap();
        state.running = true;
        state.start_calls += 1;
        self.log_event("start_replica");
        Ok(())
    }

    fn stop_replica(&mut self) -> Result<(), ReplicaError> {
        let mut state = self.state.lock().unwrap();
        state.running = false;
        state.stop_calls += 1;
        self.log_event("stop_replica");
        Ok(())
    }
}
