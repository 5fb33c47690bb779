//! Settings loaded from the INI settings file.
//!
//! The whole configuration is read once into an immutable [`Settings`] value
//! and handed around by reference. Optional limits are `None` when the option
//! is absent or empty, which always means "no limit".

use std::path::{Path, PathBuf};

use configparser::ini::Ini;

use crate::errors::ConfigError;

/// `[MySQL]` section.
#[derive(Debug, Clone)]
pub struct MysqlSettings {
    pub username: String,
    /// Taken verbatim from the file; `%` and other ConfigParser-special
    /// characters survive.
    pub password: String,
    /// Extra arguments appended to every `mysqldump` invocation.
    pub dump_options: Vec<String>,
    pub host: String,
    /// Argv prefix used to produce a dump. Defaults to `["mysqldump"]`.
    pub mysqldump_command: Vec<String>,
}

/// `[Backup]` section.
#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub compression_enabled: bool,
    /// Argv prefix; the file path is appended.
    pub compress_command: Vec<String>,
    pub decompress_command: Vec<String>,
    /// Extension the compress command produces, without the dot.
    pub compressed_file_extension: String,
    /// Parallel workers. `None` or `Some(0)` means one per logical CPU.
    pub max_parallel: Option<usize>,
    /// Grace period before deleting stray files and orphaned databases.
    /// `None` means never delete.
    pub cleanup_delay_days: Option<i64>,
    pub incremental_path: PathBuf,
    pub incremental_min_backup_frequency_seconds: Option<i64>,
    pub incremental_max_lifespan_seconds: Option<i64>,
    pub incremental_max_copies: Option<usize>,
    pub long_term_backup_path: PathBuf,
    pub long_term_backup_min_frequency_seconds: Option<i64>,
    pub long_term_max_lifespan_seconds: Option<i64>,
    pub long_term_backup_max_copies: Option<usize>,
    pub running_cache_file: PathBuf,
    /// Seconds to wait for the run-cache lock. `None` blocks indefinitely.
    pub cache_lock_wait: Option<u64>,
    pub cache_successful_run_purge_days: Option<i64>,
}

/// `[Snapshot]` section.
#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    pub name: String,
    pub vg: String,
    pub lv: String,
    pub size_gb: u64,
}

/// `[Limits]` section.
#[derive(Debug, Clone, Default)]
pub struct LimitsSettings {
    pub exclude_databases: Option<Vec<String>>,
    /// When set, wins over `exclude_databases`.
    pub include_only_databases: Option<Vec<String>>,
}

/// `[Logging]` section.
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub logfile: PathBuf,
    /// An `EnvFilter` directive, e.g. `info` or `replidump_core=debug`.
    pub loglevel: String,
}

/// The full, immutable run configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Absolute path of the settings file itself; the run-cache key.
    pub settings_path: PathBuf,
    pub mysql: MysqlSettings,
    pub backup: BackupSettings,
    /// `None` when the `[Snapshot]` section is absent; the refresh phase is
    /// then skipped.
    pub snapshot: Option<SnapshotSettings>,
    pub limits: LimitsSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load and validate a settings file.
    pub fn load(path: &Path) -> Result<Settings, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let settings_path = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());

        let mut ini = Ini::new();
        ini.load(path).map_err(|message| ConfigError::ParseError {
            path: path.display().to_string(),
            message,
        })?;

        let mysql = MysqlSettings {
            username: req_string(&ini, "MySQL", "username")?,
            password: req_string(&ini, "MySQL", "password")?,
            dump_options: req_string(&ini, "MySQL", "dump_options")?
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            host: req_string(&ini, "MySQL", "host")?,
            mysqldump_command: opt_string(&ini, "MySQL", "mysqldump_command")
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_else(|| vec!["mysqldump".to_string()]),
        };

        let compressed_file_extension =
            req_string(&ini, "Backup", "compressed_file_extension")?;
        if compressed_file_extension.is_empty()
            || compressed_file_extension == "sql"
            || compressed_file_extension == "md5"
        {
            return Err(ConfigError::InvalidValue {
                section: "Backup".into(),
                option: "compressed_file_extension".into(),
                message: format!(
                    "{compressed_file_extension:?} collides with a reserved extension"
                ),
            });
        }

        let backup = BackupSettings {
            compression_enabled: req_bool(&ini, "Backup", "compression_enabled")?,
            compress_command: req_argv(&ini, "Backup", "compress_command")?,
            decompress_command: req_argv(&ini, "Backup", "decompress_command")?,
            compressed_file_extension,
            max_parallel: opt_usize(&ini, "Backup", "max_parallel")?,
            cleanup_delay_days: opt_i64(&ini, "Backup", "cleanup_delay_days")?,
            incremental_path: PathBuf::from(req_string(&ini, "Backup", "incremental_path")?),
            incremental_min_backup_frequency_seconds: opt_i64(
                &ini,
                "Backup",
                "incremental_min_backup_frequency_seconds",
            )?,
            incremental_max_lifespan_seconds: opt_i64(
                &ini,
                "Backup",
                "incremental_max_lifespan_seconds",
            )?,
            incremental_max_copies: opt_usize(&ini, "Backup", "incremental_max_copies")?,
            long_term_backup_path: PathBuf::from(req_string(
                &ini,
                "Backup",
                "long_term_backup_path",
            )?),
            long_term_backup_min_frequency_seconds: opt_i64(
                &ini,
                "Backup",
                "long_term_backup_min_frequency_seconds",
            )?,
            long_term_max_lifespan_seconds: opt_i64(
                &ini,
                "Backup",
                "long_term_max_lifespan_seconds",
            )?,
            long_term_backup_max_copies: opt_usize(
                &ini,
                "Backup",
                "long_term_backup_max_copies",
            )?,
            running_cache_file: PathBuf::from(req_string(&ini, "Backup", "running_cache_file")?),
            cache_lock_wait: opt_u64(&ini, "Backup", "cache_lock_wait")?,
            cache_successful_run_purge_days: opt_i64(
                &ini,
                "Backup",
                "cache_successful_run_purge_days",
            )?,
        };

        let snapshot_configured = ["name", "vg", "lv", "size_gb"]
            .iter()
            .any(|option| opt_string(&ini, "Snapshot", option).is_some());
        let snapshot = if snapshot_configured {
            Some(SnapshotSettings {
                name: req_string(&ini, "Snapshot", "name")?,
                vg: req_string(&ini, "Snapshot", "vg")?,
                lv: req_string(&ini, "Snapshot", "lv")?,
                size_gb: req_u64(&ini, "Snapshot", "size_gb")?,
            })
        } else {
            None
        };

        let limits = LimitsSettings {
            exclude_databases: opt_list(&ini, "Limits", "exclude_databases"),
            include_only_databases: opt_list(&ini, "Limits", "include_only_databases"),
        };

        let logging = LoggingSettings {
            logfile: PathBuf::from(req_string(&ini, "Logging", "logfile")?),
            loglevel: req_string(&ini, "Logging", "loglevel")?,
        };

        Ok(Settings {
            settings_path,
            mysql,
            backup,
            snapshot,
            limits,
            logging,
        })
    }
}

fn req_string(ini: &Ini, section: &str, option: &str) -> Result<String, ConfigError> {
    match opt_string(ini, section, option) {
        Some(value) => Ok(value),
        None => Err(ConfigError::MissingOption {
            section: section.to_string(),
            option: option.to_string(),
        }),
    }
}

fn opt_string(ini: &Ini, section: &str, option: &str) -> Option<String> {
    ini.get(section, option)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn req_argv(ini: &Ini, section: &str, option: &str) -> Result<Vec<String>, ConfigError> {
    Ok(req_string(ini, section, option)?
        .split_whitespace()
        .map(str::to_string)
        .collect())
}

fn req_bool(ini: &Ini, section: &str, option: &str) -> Result<bool, ConfigError> {
    let raw = req_string(ini, section, option)?;
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            section: section.to_string(),
            option: option.to_string(),
            message: format!("{raw:?} is not a boolean"),
        }),
    }
}

fn opt_i64(ini: &Ini, section: &str, option: &str) -> Result<Option<i64>, ConfigError> {
    opt_string(ini, section, option)
        .map(|raw| {
            raw.parse::<i64>().map_err(|_| ConfigError::InvalidValue {
                section: section.to_string(),
                option: option.to_string(),
                message: format!("{raw:?} is not an integer"),
            })
        })
        .transpose()
}

fn opt_u64(ini: &Ini, section: &str, option: &str) -> Result<Option<u64>, ConfigError> {
    opt_string(ini, section, option)
        .map(|raw| {
            raw.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                section: section.to_string(),
                option: option.to_string(),
                message: format!("{raw:?} is not a non-negative integer"),
            })
        })
        .transpose()
}

fn opt_usize(ini: &Ini, section: &str, option: &str) -> Result<Option<usize>, ConfigError> {
    Ok(opt_u64(ini, section, option)?.map(|v| v as usize))
}

fn req_u64(ini: &Ini, section: &str, option: &str) -> Result<u64, ConfigError> {
    match opt_u64(ini, section, option)? {
        Some(value) => Ok(value),
        None => Err(ConfigError::MissingOption {
            section: section.to_string(),
            option: option.to_string(),
        }),
    }
}

fn opt_list(ini: &Ini, section: &str, option: &str) -> Option<Vec<String>> {
    let entries: Vec<String> = opt_string(ini, section, option)?
        .split(',')
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect();
    if entries.is_empty() {
        None
    } else {
        Some(entries)
    }
}
