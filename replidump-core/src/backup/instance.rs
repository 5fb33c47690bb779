//! One point-in-time backup of one database.
//!
//! After reconciliation an instance owns exactly one dump file (plain or
//! compressed, matching the compression policy) and one non-empty checksum
//! file. Any state that cannot be repaired into that shape is destroyed in
//! full; a half backup is worse than none.

use tracing::{debug, error, info, warn};

use crate::backup::file::{BackupFile, FileKind};
use crate::clock;
use crate::config::Settings;
use crate::errors::{FileError, InstanceError};
use crate::procinfo;

#[derive(Debug, Clone)]
pub struct BackupInstance {
    db_name: String,
    date_string: String,
    ts: i64,
    checksum: String,
    dump: BackupFile,
    checksum_file: BackupFile,
}

/// Instances are the same backup iff their dumps hash the same.
impl PartialEq for BackupInstance {
    fn eq(&self, other: &Self) -> bool {
        self.checksum == other.checksum
    }
}

impl Eq for BackupInstance {}

impl BackupInstance {
    /// Reconstruct an instance from files discovered on disk.
    ///
    /// Refuses (leaving the files alone) when any member is still open by
    /// another process. Every other violation destroys the whole group
    /// before the error is returned.
    pub fn from_files(
        db_name: &str,
        date_string: &str,
        files: Vec<BackupFile>,
        settings: &Settings,
    ) -> Result<BackupInstance, InstanceError> {
        for file in &files {
            if procinfo::is_file_open(file.path()) {
                return Err(InstanceError::FilesInFlight {
                    db_name: db_name.to_string(),
                    date_string: date_string.to_string(),
                });
            }
        }

        let fail = |files: &[BackupFile], err: InstanceError| -> InstanceError {
            error!(db = db_name, date = date_string, %err, "reconciliation failed, removing group");
            if let Err(destroy_err) = destroy_files(files, settings) {
                warn!(db = db_name, date = date_string, %destroy_err, "cleanup after failed reconciliation was incomplete");
            }
            err
        };

        // A trustworthy checksum is non-negotiable.
        let checksum_file = match files.iter().find(|f| f.kind() == FileKind::Checksum) {
            Some(f) => f.clone(),
            None => {
                return Err(fail(
                    &files,
                    InstanceError::MissingChecksum {
                        db_name: db_name.to_string(),
                        date_string: date_string.to_string(),
                    },
                ))
            }
        };
        let checksum = match checksum_file.read_checksum() {
            Ok(checksum) => checksum,
            Err(FileError::EmptyChecksum { .. }) => {
                return Err(fail(
                    &files,
                    InstanceError::EmptyChecksum {
                        db_name: db_name.to_string(),
                        date_string: date_string.to_string(),
                    },
                ))
            }
            Err(err) => return Err(fail(&files, err.into())),
        };

        // Both dump forms present means compression died mid-flight; the
        // compressed one is the suspect copy.
        let mut files = files;
        let has_plain = files.iter().any(|f| f.kind() == FileKind::Plain);
        if has_plain {
            let compressed: Vec<BackupFile> = files
                .iter()
                .filter(|f| f.kind() == FileKind::Compressed)
                .cloned()
                .collect();
            for file in compressed {
                debug!(db = db_name, date = date_string, path = %file.path().display(),
                       "plain and compressed both present, dropping compressed");
                if let Err(err) = file.self_destruct(settings) {
                    return Err(fail(&files, err.into()));
                }
                if file.exists() {
                    return Err(fail(
                        &files,
                        InstanceError::StaleFile {
                            db_name: db_name.to_string(),
                            date_string: date_string.to_string(),
                            path: file.path().to_path_buf(),
                        },
                    ));
                }
            }
            files.retain(|f| f.kind() != FileKind::Compressed);
        }

        let dumps: Vec<&BackupFile> = files.iter().filter(|f| f.is_dump()).collect();
        if dumps.is_empty() {
            return Err(fail(
                &files,
                InstanceError::MissingDump {
                    db_name: db_name.to_string(),
                    date_string: date_string.to_string(),
                },
            ));
        }
        let checksum_count = files
            .iter()
            .filter(|f| f.kind() == FileKind::Checksum)
            .count();
        if dumps.len() != 1 || checksum_count != 1 {
            return Err(fail(
                &files,
                InstanceError::AmbiguousFiles {
                    db_name: db_name.to_string(),
                    date_string: date_string.to_string(),
                },
            ));
        }

        let mut instance = BackupInstance {
            db_name: db_name.to_string(),
            date_string: date_string.to_string(),
            ts: clock::parse_date_string(date_string).unwrap_or_else(clock::now_ts),
            checksum,
            dump: dumps[0].clone(),
            checksum_file,
        };
        if let Err(err) = instance.align_compression(settings) {
            return Err(fail(&files, err));
        }
        Ok(instance)
    }

    /// Produce a brand-new backup: dump, then checksum.
    ///
    /// Compression is deliberately deferred so the caller can compare
    /// checksums against the previous instance and discard a no-change dump
    /// before paying for compression.
    pub fn fresh(db_name: &str, settings: &Settings) -> Result<BackupInstance, InstanceError> {
        let date_string = clock::now_date_string();
        let plain = BackupFile::plain_for(db_name, &date_string, settings);

        if let Err(err) = plain.birth_dump(settings) {
            if let Err(cleanup_err) = plain.self_destruct(settings) {
                warn!(db = db_name, %cleanup_err, "could not remove partial dump");
            }
            return Err(err.into());
        }

        let checksum_file = match BackupFile::birth_checksum(&plain, settings) {
            Ok(file) => file,
            Err(err) => {
                if let Err(cleanup_err) = destroy_files(
                    &[
                        plain.clone(),
                        BackupFile::checksum_for(db_name, &date_string, settings),
                    ],
                    settings,
                ) {
                    warn!(db = db_name, %cleanup_err, "could not remove partial backup");
                }
                return Err(err.into());
            }
        };
        let checksum = checksum_file.read_checksum()?;

        info!(db = db_name, date = %date_string, "created fresh backup");
        Ok(BackupInstance {
            db_name: db_name.to_string(),
            date_string: date_string.clone(),
            ts: clock::parse_date_string(&date_string).unwrap_or_else(clock::now_ts),
            checksum,
            dump: plain,
            checksum_file,
        })
    }

    /// Bring the dump's compressed-ness in line with the configured policy,
    /// verifying that the replaced file is really gone.
    pub fn align_compression(&mut self, settings: &Settings) -> Result<(), InstanceError> {
        let enabled = settings.backup.compression_enabled;
        let needs_change = match self.dump.kind() {
            FileKind::Plain => enabled,
            FileKind::Compressed => !enabled,
            FileKind::Checksum => false,
        };
        if !needs_change {
            return Ok(());
        }

        let old_path = self.dump.path().to_path_buf();
        let replacement = if enabled {
            self.dump.clone().compress(settings)?
        } else {
            self.dump.clone().decompress(settings)?
        };
        if old_path.is_file() {
            return Err(InstanceError::StaleFile {
                db_name: self.db_name.clone(),
                date_string: self.date_string.clone(),
                path: old_path,
            });
        }
        self.dump = replacement;
        Ok(())
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn date_string(&self) -> &str {
        &self.date_string
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn dump_file(&self) -> &BackupFile {
        &self.dump
    }

    /// Unix timestamp this backup was taken at, per its file names.
    pub fn ts(&self) -> i64 {
        self.ts
    }

    pub fn age_secs(&self, now: i64) -> i64 {
        now - self.ts
    }

    /// Whether a long-term copy of the dump exists right now. Re-derived
    /// from the filesystem on every call so it survives crashed runs.
    pub fn is_long_term(&self, settings: &Settings) -> bool {
        self.dump.is_long_term(settings)
    }

    /// Add or remove the long-term copy to match `state`.
    pub fn set_long_term(&self, state: bool, settings: &Settings) -> Result<(), FileError> {
        if self.is_long_term(settings) == state {
            return Ok(());
        }
        if state {
            self.dump.copy_to_long_term(settings)
        } else {
            self.dump.remove_long_term(settings)
        }
    }

    /// Every path this instance accounts for, including the long-term copy
    /// when present.
    pub fn all_files(&self, settings: &Settings) -> Vec<std::path::PathBuf> {
        let mut paths = vec![
            self.dump.path().to_path_buf(),
            self.checksum_file.path().to_path_buf(),
        ];
        if self.is_long_term(settings) {
            paths.push(self.dump.long_term_path(settings));
        }
        paths
    }

    /// Remove every file belonging to this instance.
    pub fn self_destruct(&self, settings: &Settings) -> Result<(), FileError> {
        info!(db = %self.db_name, date = %self.date_string, "destroying backup instance");
        self.dump.self_destruct(settings)?;
        self.checksum_file.self_destruct(settings)
    }
}

fn destroy_files(files: &[BackupFile], settings: &Settings) -> Result<(), FileError> {
    let mut first_err = None;
    for file in files {
        if let Err(err) = file.self_destruct(settings) {
            first_err.get_or_insert(err);
        }
    }
    match first_err {
        None => Ok(()),
        Some(err) => Err(err),
    }
}
