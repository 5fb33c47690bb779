//! Per-database backup management: admission, dedup, and retention.

use tracing::{debug, error, info};

use crate::backup::instance::BackupInstance;
use crate::clock;
use crate::config::Settings;
use crate::errors::{DatabaseError, FileError};

/// All backup instances of one database, plus whether that database still
/// exists on the server.
#[derive(Debug)]
pub struct DatabaseInstance {
    db_name: String,
    instances: Vec<BackupInstance>,
    valid: bool,
}

impl DatabaseInstance {
    pub fn new(db_name: &str, instances: Vec<BackupInstance>, valid: bool) -> DatabaseInstance {
        DatabaseInstance {
            db_name: db_name.to_string(),
            instances,
            valid,
        }
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn instances(&self) -> &[BackupInstance] {
        &self.instances
    }

    /// The youngest (most recent) instance.
    pub fn youngest(&self) -> Option<&BackupInstance> {
        self.instances.iter().max_by_key(|i| i.ts())
    }

    /// The oldest instance: the one with the greatest age.
    pub fn oldest(&self) -> Option<&BackupInstance> {
        self.instances.iter().min_by_key(|i| i.ts())
    }

    /// Age of the database's backups, defined by its youngest instance.
    pub fn age_secs(&self, now: i64) -> Option<i64> {
        self.youngest().map(|i| i.age_secs(now))
    }

    /// Every path claimed by this database's instances.
    pub fn all_files(&self, settings: &Settings) -> Vec<std::path::PathBuf> {
        self.instances
            .iter()
            .flat_map(|i| i.all_files(settings))
            .collect()
    }

    /// Run this database's full policy: new backup if due, then short-term
    /// and long-term retention; or, for a vanished database, the delayed
    /// cleanup.
    pub fn execute(&mut self, settings: &Settings) -> Result<(), DatabaseError> {
        if self.valid {
            self.add_new_instance_if_due(settings)?;
            self.enforce_short_term(settings)?;
            self.enforce_long_term(settings)
        } else {
            self.cleanup_if_expired(settings)
        }
    }

    /// The database no longer exists; keep its files for the grace period,
    /// then remove everything.
    fn cleanup_if_expired(&mut self, settings: &Settings) -> Result<(), DatabaseError> {
        let Some(delay_days) = settings.backup.cleanup_delay_days else {
            debug!(db = %self.db_name, "no cleanup delay configured, preserving orphaned backups");
            return Ok(());
        };
        let Some(age_secs) = self.age_secs(clock::now_ts()) else {
            return Ok(());
        };
        if age_secs / 86_400 > delay_days {
            info!(db = %self.db_name, "database is gone and past the grace period, removing its backups");
            self.self_destruct(settings)
        } else {
            info!(db = %self.db_name, "database is gone but within the grace period, preserving");
            Ok(())
        }
    }

    /// Take a fresh backup when the youngest instance is old enough (or
    /// there is none), discarding it again if the content has not changed.
    fn add_new_instance_if_due(&mut self, settings: &Settings) -> Result<(), DatabaseError> {
        let now = clock::now_ts();
        let due = match self.youngest() {
            None => true,
            Some(youngest) => match settings.backup.incremental_min_backup_frequency_seconds {
                Some(min_freq) => youngest.age_secs(now) > min_freq,
                None => true,
            },
        };
        if !due {
            info!(db = %self.db_name, "minimum backup frequency not reached, skipping new backup");
            return Ok(());
        }

        // Dump and checksum failures stay contained to this attempt; the
        // retention passes still run.
        let mut fresh = match BackupInstance::fresh(&self.db_name, settings) {
            Ok(fresh) => fresh,
            Err(err) => {
                error!(db = %self.db_name, %err, "fresh backup attempt failed");
                return Ok(());
            }
        };

        if let Some(youngest) = self.youngest() {
            if *youngest == fresh {
                info!(db = %self.db_name, "content unchanged since last backup, discarding new dump");
                return fresh
                    .self_destruct(settings)
                    .map_err(|source| self.file_err(source));
            }
        }

        if let Err(err) = fresh.align_compression(settings) {
            error!(db = %self.db_name, %err, "could not finalize fresh backup, discarding it");
            return fresh
                .self_destruct(settings)
                .map_err(|source| self.file_err(source));
        }
        info!(db = %self.db_name, date = fresh.date_string(), "keeping new backup instance");
        self.instances.push(fresh);
        Ok(())
    }

    /// Walk instances youngest to oldest and destroy every one that breaks
    /// the short-term policy: too many copies, too old, or too close to the
    /// previously kept instance.
    fn enforce_short_term(&mut self, settings: &Settings) -> Result<(), DatabaseError> {
        let now = clock::now_ts();
        self.sort_youngest_first();

        let max_copies = settings.backup.incremental_max_copies;
        let max_lifespan = settings.backup.incremental_max_lifespan_seconds;
        let min_freq = settings.backup.incremental_min_backup_frequency_seconds;

        let mut kept = 0usize;
        let mut previous_kept_age: Option<i64> = None;
        let mut idx = 0usize;
        while idx < self.instances.len() {
            let age = self.instances[idx].age_secs(now);
            let mut destroy = false;

            if let Some(max) = max_copies {
                if kept >= max {
                    info!(db = %self.db_name, date = self.instances[idx].date_string(),
                          "over the incremental copy limit, removing");
                    destroy = true;
                }
            }
            if let Some(max_life) = max_lifespan {
                if age > max_life {
                    info!(db = %self.db_name, date = self.instances[idx].date_string(),
                          "older than the incremental lifespan, removing");
                    destroy = true;
                }
            }
            if let (Some(previous_age), Some(min)) = (previous_kept_age, min_freq) {
                if age - previous_age < min {
                    info!(db = %self.db_name, date = self.instances[idx].date_string(),
                          "too close to the previously kept backup, removing");
                    destroy = true;
                }
            }

            if destroy {
                let instance = self.instances.remove(idx);
                instance
                    .self_destruct(settings)
                    .map_err(|source| self.file_err(source))?;
            } else {
                kept += 1;
                previous_kept_age = Some(age);
                idx += 1;
            }
        }
        Ok(())
    }

    /// Promote the youngest instance to long term when due, then demote
    /// every long-term member that breaks the long-term policy.
    fn enforce_long_term(&mut self, settings: &Settings) -> Result<(), DatabaseError> {
        let max_copies = settings.backup.long_term_backup_max_copies;
        let min_freq = settings.backup.long_term_backup_min_frequency_seconds;
        let max_lifespan = settings.backup.long_term_max_lifespan_seconds;

        if max_copies == Some(0) {
            debug!(db = %self.db_name, "long term copies disabled, removing any that exist");
            for instance in &self.instances {
                instance
                    .set_long_term(false, settings)
                    .map_err(|source| self.file_err(source))?;
            }
            return Ok(());
        }

        let now = clock::now_ts();
        self.sort_youngest_first();
        let Some(youngest) = self.instances.first() else {
            return Ok(());
        };

        let promote = if youngest.is_long_term(settings) {
            true
        } else {
            match self.most_recent_long_term_age(now, settings) {
                None => true,
                Some(lt_age) => match min_freq {
                    None => true,
                    Some(freq) => lt_age - youngest.age_secs(now) > freq,
                },
            }
        };
        if promote {
            info!(db = %self.db_name, date = youngest.date_string(),
                  "youngest backup is (or becomes) the newest long term copy");
            youngest
                .set_long_term(true, settings)
                .map_err(|source| self.file_err(source))?;
        } else {
            info!(db = %self.db_name,
                  "not enough time since the newest long term copy, not promoting");
        }

        let mut lt_count = 0usize;
        let mut previous_kept_age: Option<i64> = None;
        for instance in &self.instances {
            if !instance.is_long_term(settings) {
                continue;
            }
            let age = instance.age_secs(now);
            let mut keep = true;

            if let Some(max) = max_copies {
                if lt_count >= max {
                    info!(db = %self.db_name, date = instance.date_string(),
                          "over the long term copy limit, demoting");
                    keep = false;
                }
            }
            if let (Some(previous_age), Some(freq)) = (previous_kept_age, min_freq) {
                if age - previous_age < freq {
                    info!(db = %self.db_name, date = instance.date_string(),
                          "too close to the previously kept long term copy, demoting");
                    keep = false;
                }
            }
            if let Some(max_life) = max_lifespan {
                if age > max_life {
                    info!(db = %self.db_name, date = instance.date_string(),
                          "older than the long term lifespan, demoting");
                    keep = false;
                }
            }

            if keep {
                instance
                    .set_long_term(true, settings)
                    .map_err(|source| self.file_err(source))?;
                lt_count += 1;
                previous_kept_age = Some(age);
            } else {
                instance
                    .set_long_term(false, settings)
                    .map_err(|source| self.file_err(source))?;
            }
        }
        Ok(())
    }

    /// Age of the youngest instance that holds a long-term copy.
    fn most_recent_long_term_age(&self, now: i64, settings: &Settings) -> Option<i64> {
        self.instances
            .iter()
            .filter(|i| i.is_long_term(settings))
            .max_by_key(|i| i.ts())
            .map(|i| i.age_secs(now))
    }

    /// Remove every instance and every file of this database.
    pub fn self_destruct(&mut self, settings: &Settings) -> Result<(), DatabaseError> {
        while let Some(instance) = self.instances.pop() {
            instance
                .self_destruct(settings)
                .map_err(|source| self.file_err(source))?;
        }
        Ok(())
    }

    fn sort_youngest_first(&mut self) {
        self.instances.sort_by(|a, b| b.ts().cmp(&a.ts()));
    }

    fn file_err(&self, source: FileError) -> DatabaseError {
        DatabaseError::File {
            db_name: self.db_name.clone(),
            source,
        }
    }
}
