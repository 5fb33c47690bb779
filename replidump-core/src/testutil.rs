//! Shared helpers for unit tests.

use std::path::{Path, PathBuf};

use crate::backup::file::compute_checksum;
use crate::config::{
    BackupSettings, LimitsSettings, LoggingSettings, MysqlSettings, Settings,
};

/// A workable `Settings` rooted in a scratch directory: real gzip for
/// compression, compression disabled, no retention limits.
pub(crate) fn settings_for(root: &Path) -> Settings {
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
            mysqldump_command: vec!["mysqldump".to_string()],
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

/// Seed a consistent `(dump, checksum)` pair on disk for `(db, date)`.
pub(crate) fn seed_backup(
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
