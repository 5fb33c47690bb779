//! One full backup run, end to end.
//!
//! Admission through the run cache, replica quiescence, discovery of what is
//! already on disk, the stray-file sweep, parallel per-database dispatch,
//! and the sole-survivor duties of restarting replication and refreshing the
//! snapshot.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::backup::{BackupFile, BackupInstance, DatabaseInstance};
use crate::config::Settings;
use crate::errors::{DatabaseError, ReplicaError, RunError};
use crate::mysql::ReplicaServer;
use crate::procinfo;
use crate::run_cache::RunCacheManager;
use crate::snapshot::LvSnapshot;

/// How patiently replication start/stop is polled.
const REPLICA_POLL_RETRIES: usize = 20;
const REPLICA_POLL_DELAY: Duration = Duration::from_secs(5);

pub struct Orchestrator<R: ReplicaServer> {
    settings: Arc<Settings>,
    server: R,
    run_cache: RunCacheManager,
    databases: Vec<DatabaseInstance>,
}

impl<R: ReplicaServer> Orchestrator<R> {
    pub fn new(settings: Arc<Settings>, server: R) -> Result<Orchestrator<R>, RunError> {
        let run_cache = RunCacheManager::new(&settings)?;
        Ok(Orchestrator {
            settings,
            server,
            run_cache,
            databases: Vec::new(),
        })
    }

    /// Run one complete backup pass. This is the only method a caller needs
    /// after construction.
    pub fn run(&mut self) -> Result<(), RunError> {
        let run_started = Instant::now();
        info!("backup run starting");

        if self
            .run_cache
            .have_already_run_while_others_are_still_running()?
        {
            info!(
                "a run with this settings file already succeeded while another backup is still \
                 running; no new replica state can have appeared, so there is nothing to do"
            );
            info!(elapsed = ?run_started.elapsed(), "backup run finished");
            return Ok(());
        }

        self.run_cache.register_self()?;

        self.set_replica_state(false)?;
        self.databases = self.discover_databases()?;
        self.sweep_non_backup_files()?;
        let (failed, total) = self.process_databases()?;

        if self.run_cache.current_running_count()? == 1 {
            info!("this is the only running backup; restarting replication and refreshing the snapshot");
            self.set_replica_state(true)?;
            if let Some(snapshot_settings) = &self.settings.snapshot {
                LvSnapshot::new(snapshot_settings).safe_refresh()?;
            } else {
                debug!("no snapshot configured, skipping the refresh");
            }
        } else {
            info!(
                "other backups are still running; leaving replication stopped and the snapshot \
                 untouched for them"
            );
        }

        if failed == 0 {
            self.run_cache.update_success()?;
        }
        self.run_cache.deregister_self()?;
        info!(elapsed = ?run_started.elapsed(), "backup run finished");

        if failed > 0 {
            return Err(RunError::DatabasesFailed { failed, total });
        }
        Ok(())
    }

    /// Bring the replication threads to the requested state, polling until
    /// they comply.
    fn set_replica_state(&mut self, running: bool) -> Result<(), RunError> {
        if running == self.server.is_replica_running().map_err(RunError::Replica)? {
            return Ok(());
        }

        if running {
            info!("starting the replication threads");
            self.server.start_replica().map_err(RunError::Replica)?;
        } else {
            info!("stopping the replication threads");
            self.server.stop_replica().map_err(RunError::Replica)?;
        }

        let mut tries = 0;
        while tries < REPLICA_POLL_RETRIES
            && self.server.is_replica_running().map_err(RunError::Replica)? != running
        {
            tries += 1;
            std::thread::sleep(REPLICA_POLL_DELAY);
        }
        if self.server.is_replica_running().map_err(RunError::Replica)? != running {
            let err = if running {
                ReplicaError::StartFailed
            } else {
                ReplicaError::StopFailed
            };
            error!(%err, "replica did not reach the requested state");
            return Err(RunError::Replica(err));
        }
        Ok(())
    }

    /// Rebuild the in-memory model from the incremental directory.
    ///
    /// Files that do not parse stay on disk for the sweeper. Groups that
    /// parse but cannot be reconciled are destroyed by the instance itself,
    /// except in-flight groups, which are left for a later run.
    fn discover_databases(&self) -> Result<Vec<DatabaseInstance>, RunError> {
        let settings = &self.settings;
        let mut groups: BTreeMap<String, BTreeMap<String, Vec<BackupFile>>> = BTreeMap::new();

        for path in list_files(&settings.backup.incremental_path)? {
            match BackupFile::parse(&path, settings) {
                Ok(file) => {
                    groups
                        .entry(file.db_name().to_string())
                        .or_default()
                        .entry(file.date_string().to_string())
                        .or_default()
                        .push(file);
                }
                Err(err) => {
                    debug!(path = %path.display(), %err, "not a backup file");
                }
            }
        }

        let mut databases = Vec::new();
        for (db_name, dates) in groups {
            let mut instances = Vec::new();
            for (date_string, files) in dates {
                match BackupInstance::from_files(&db_name, &date_string, files, settings) {
                    Ok(instance) => {
                        debug!(db = %db_name, date = %date_string, "reconstructed backup instance");
                        instances.push(instance);
                    }
                    Err(err) => {
                        warn!(db = %db_name, date = %date_string, %err,
                              "dropping unreconcilable backup instance");
                    }
                }
            }
            if instances.is_empty() {
                debug!(db = %db_name, "every instance of this database failed reconciliation");
            } else {
                // Validity against the live server is decided at dispatch.
                databases.push(DatabaseInstance::new(&db_name, instances, false));
            }
        }
        Ok(databases)
    }

    /// Delete stray files from the managed directories, but only once they
    /// are past the grace period and nobody has them open.
    fn sweep_non_backup_files(&self) -> Result<(), RunError> {
        let settings = &self.settings;
        let Some(delay_days) = settings.backup.cleanup_delay_days else {
            debug!("no cleanup delay configured, leaving stray files alone");
            return Ok(());
        };

        let claimed: HashSet<PathBuf> = self
            .databases
            .iter()
            .flat_map(|db| db.all_files(settings))
            .collect();

        for dir in [
            &settings.backup.incremental_path,
            &settings.backup.long_term_backup_path,
        ] {
            for path in list_files(dir)? {
                if claimed.contains(&path) {
                    continue;
                }
                if procinfo::is_file_open(&path) {
                    debug!(path = %path.display(), "stray file is open, leaving it");
                    continue;
                }
                let Some(age_days) = file_age_days(&path) else {
                    continue;
                };
                if age_days > delay_days {
                    info!(path = %path.display(), age_days,
                          "stray file is past the grace period, removing");
                    std::fs::remove_file(&path).map_err(|source| RunError::Io {
                        path: path.clone(),
                        source,
                    })?;
                } else {
                    info!(path = %path.display(), age_days,
                          "stray file is within the grace period, keeping for now");
                }
            }
        }
        Ok(())
    }

    /// Decide which databases to work on and dispatch them in parallel.
    /// Returns `(failed, total)` counts.
    fn process_databases(&mut self) -> Result<(usize, usize), RunError> {
        let live = self.server.database_names().map_err(RunError::Replica)?;

        for db in &mut self.databases {
            let valid = live.iter().any(|name| name == db.db_name());
            db.set_valid(valid);
        }

        let targets = self.filter_targets(&live);
        info!(candidates = %targets.join(","), "backup candidates per configuration");

        // Invalid databases ride along so their delayed cleanup runs.
        let mut queue: Vec<DatabaseInstance> = Vec::new();
        for db in std::mem::take(&mut self.databases) {
            if !db.is_valid() || targets.iter().any(|t| t == db.db_name()) {
                queue.push(db);
            } else {
                debug!(db = %db.db_name(), "not processing per configuration");
                self.databases.push(db);
            }
        }
        for target in &targets {
            if !queue.iter().any(|db| db.db_name() == target) {
                debug!(db = %target, "no existing backups, initializing before execution");
                queue.push(DatabaseInstance::new(target, Vec::new(), true));
            }
        }

        let workers = self.settings.backup.max_parallel.unwrap_or(0);
        if workers > 0 {
            info!(workers, "dispatching databases with a bounded worker pool");
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|err| RunError::WorkerPool(err.to_string()))?;

        let settings = Arc::clone(&self.settings);
        let results: Vec<(String, Result<(), DatabaseError>)> = pool.install(|| {
            queue
                .par_iter_mut()
                .map(|db| (db.db_name().to_string(), db.execute(&settings)))
                .collect()
        });

        let total = results.len();
        let mut failed = 0;
        for (db_name, result) in results {
            if let Err(err) = result {
                error!(db = %db_name, %err, "database backup failed");
                failed += 1;
            }
        }
        self.databases.extend(queue);
        Ok((failed, total))
    }

    /// Apply `include_only_databases` (exact membership) when set, else
    /// `exclude_databases`. Names that cannot round-trip through the backup
    /// filename grammar are refused outright.
    fn filter_targets(&self, live: &[String]) -> Vec<String> {
        let limits = &self.settings.limits;
        live.iter()
            .filter(|db| {
                if db.contains("__") {
                    warn!(db = %db, "database name contains the filename separator, skipping");
                    return false;
                }
                if let Some(include) = &limits.include_only_databases {
                    include.iter().any(|name| name == *db)
                } else if let Some(exclude) = &limits.exclude_databases {
                    !exclude.iter().any(|name| name == *db)
                } else {
                    true
                }
            })
            .cloned()
            .collect()
    }
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>, RunError> {
    let entries = std::fs::read_dir(dir).map_err(|source| RunError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Whole days since the file was last modified, or `None` if it vanished.
fn file_age_days(path: &Path) -> Option<i64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let age = std::time::SystemTime::now()
        .duration_since(modified)
        .unwrap_or_default();
    Some((age.as_secs() / 86_400) as i64)
}
