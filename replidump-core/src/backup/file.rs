//! One physical file belonging to a backup.
//!
//! File names follow `<db>__<YYYYMMDD-HHMMSS>.<ext>` where `ext` is `sql`,
//! `md5`, or the configured compressed extension (compressed dumps keep the
//! inner `.sql`, e.g. `app__20260801-020000.sql.gz`). Anything else is not a
//! backup file and never enters the model.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::clock;
use crate::config::Settings;
use crate::errors::{FileError, ParseError};

/// The three roles a backup file can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Plain,
    Compressed,
    Checksum,
}

/// A typed view of one backup file on disk.
#[derive(Debug, Clone)]
pub struct BackupFile {
    path: PathBuf,
    file_name: String,
    db_name: String,
    date_string: String,
    ts: i64,
    kind: FileKind,
}

impl BackupFile {
    /// Admit a path as a backup file, or refuse it.
    ///
    /// Only files directly inside the incremental directory qualify.
    pub fn parse(path: &Path, settings: &Settings) -> Result<BackupFile, ParseError> {
        if path.parent() != Some(settings.backup.incremental_path.as_path()) {
            return Err(ParseError::OutsideIncrementalDir {
                path: path.to_path_buf(),
            });
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ParseError::MalformedName {
                path: path.to_path_buf(),
            })?;

        if !file_name.contains('.') || file_name.matches("__").count() != 1 {
            return Err(ParseError::MalformedName {
                path: path.to_path_buf(),
            });
        }

        let compressed_suffix = format!(".sql.{}", settings.backup.compressed_file_extension);
        let (stem, kind) = if let Some(stem) = file_name.strip_suffix(&compressed_suffix) {
            (stem, FileKind::Compressed)
        } else if let Some(stem) = file_name.strip_suffix(".sql") {
            (stem, FileKind::Plain)
        } else if let Some(stem) = file_name.strip_suffix(".md5") {
            (stem, FileKind::Checksum)
        } else {
            let extension = file_name
                .rsplit('.')
                .next()
                .unwrap_or_default()
                .to_string();
            return Err(ParseError::UnknownExtension {
                path: path.to_path_buf(),
                extension,
            });
        };

        let (db_name, date_string) =
            stem.split_once("__")
                .ok_or_else(|| ParseError::MalformedName {
                    path: path.to_path_buf(),
                })?;
        if db_name.is_empty() {
            return Err(ParseError::MalformedName {
                path: path.to_path_buf(),
            });
        }

        let ts = clock::parse_date_string(date_string).ok_or_else(|| {
            ParseError::MalformedDate {
                path: path.to_path_buf(),
                date_string: date_string.to_string(),
            }
        })?;

        let db_name = db_name.to_string();
        let date_string = date_string.to_string();
        Ok(BackupFile {
            path: path.to_path_buf(),
            file_name,
            db_name,
            date_string,
            ts,
            kind,
        })
    }

    fn assemble(
        db_name: &str,
        date_string: &str,
        suffix: &str,
        kind: FileKind,
        settings: &Settings,
    ) -> BackupFile {
        let file_name = format!("{db_name}__{date_string}{suffix}");
        BackupFile {
            path: settings.backup.incremental_path.join(&file_name),
            file_name,
            db_name: db_name.to_string(),
            date_string: date_string.to_string(),
            ts: clock::parse_date_string(date_string).unwrap_or_else(clock::now_ts),
            kind,
        }
    }

    /// The plain-dump file name for a `(db, date)` pair.
    pub fn plain_for(db_name: &str, date_string: &str, settings: &Settings) -> BackupFile {
        Self::assemble(db_name, date_string, ".sql", FileKind::Plain, settings)
    }

    /// The checksum file name for a `(db, date)` pair.
    pub fn checksum_for(db_name: &str, date_string: &str, settings: &Settings) -> BackupFile {
        Self::assemble(db_name, date_string, ".md5", FileKind::Checksum, settings)
    }

    /// The compressed-dump file name for a `(db, date)` pair.
    pub fn compressed_for(db_name: &str, date_string: &str, settings: &Settings) -> BackupFile {
        let suffix = format!(".sql.{}", settings.backup.compressed_file_extension);
        Self::assemble(db_name, date_string, &suffix, FileKind::Compressed, settings)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn date_string(&self) -> &str {
        &self.date_string
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    /// Whether this is a dump (plain or compressed) as opposed to a checksum.
    pub fn is_dump(&self) -> bool {
        matches!(self.kind, FileKind::Plain | FileKind::Compressed)
    }

    /// Unix timestamp encoded in the file name.
    pub fn ts(&self) -> i64 {
        self.ts
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Run `mysqldump` and leave its output at this file's path.
    pub fn birth_dump(&self, settings: &Settings) -> Result<(), FileError> {
        let argv = &settings.mysql.mysqldump_command;
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .arg("-u")
            .arg(&settings.mysql.username)
            .arg(&self.db_name)
            .args(&settings.mysql.dump_options)
            .arg("--result-file")
            .arg(&self.path)
            .env("MYSQL_PWD", &settings.mysql.password);

        info!(db = %self.db_name, path = %self.path.display(), "running mysqldump");
        run_command(command, &argv[0], &self.path)?;

        if !self.exists() {
            return Err(FileError::MissingOutput {
                command: argv[0].clone(),
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    /// Hash a plain dump and write the companion checksum file.
    pub fn birth_checksum(
        plain: &BackupFile,
        settings: &Settings,
    ) -> Result<BackupFile, FileError> {
        let checksum = compute_checksum(plain.path())?;
        let file = BackupFile::checksum_for(&plain.db_name, &plain.date_string, settings);
        debug!(path = %file.path.display(), "writing checksum file");
        std::fs::write(&file.path, format!("{checksum}\n")).map_err(|source| FileError::Io {
            path: file.path.clone(),
            source,
        })?;
        Ok(file)
    }

    /// Read the stored checksum. Fails on a missing or empty file.
    pub fn read_checksum(&self) -> Result<String, FileError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                return Err(FileError::EmptyChecksum {
                    path: self.path.clone(),
                })
            }
            Err(source) => {
                return Err(FileError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let checksum = contents.lines().next().unwrap_or("").trim().to_string();
        if checksum.is_empty() {
            return Err(FileError::EmptyChecksum {
                path: self.path.clone(),
            });
        }
        Ok(checksum)
    }

    /// Compress this plain dump with the configured command.
    ///
    /// On success the plain file is gone and the compressed sibling is
    /// returned. On failure the plain file is left untouched.
    pub fn compress(self, settings: &Settings) -> Result<BackupFile, FileError> {
        let argv = &settings.backup.compress_command;
        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]).arg(&self.path);

        info!(path = %self.path.display(), "compressing");
        run_command(command, &argv[0], &self.path)?;

        let compressed =
            BackupFile::compressed_for(&self.db_name, &self.date_string, settings);
        if !compressed.exists() {
            return Err(FileError::MissingOutput {
                command: argv[0].clone(),
                path: compressed.path.clone(),
            });
        }
        // Most compressors consume the source themselves; clean up after the
        // ones that do not.
        remove_if_present(&self.path)?;
        Ok(compressed)
    }

    /// Decompress this compressed dump with the configured command.
    pub fn decompress(self, settings: &Settings) -> Result<BackupFile, FileError> {
        let argv = &settings.backup.decompress_command;
        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]).arg(&self.path);

        info!(path = %self.path.display(), "decompressing");
        run_command(command, &argv[0], &self.path)?;

        let plain = BackupFile::plain_for(&self.db_name, &self.date_string, settings);
        if !plain.exists() {
            return Err(FileError::MissingOutput {
                command: argv[0].clone(),
                path: plain.path.clone(),
            });
        }
        remove_if_present(&self.path)?;
        Ok(plain)
    }

    /// Where this file's long-term copy would live.
    pub fn long_term_path(&self, settings: &Settings) -> PathBuf {
        settings.backup.long_term_backup_path.join(&self.file_name)
    }

    /// Whether a long-term copy currently exists. Always asked of the
    /// filesystem, never cached.
    pub fn is_long_term(&self, settings: &Settings) -> bool {
        self.long_term_path(settings).is_file()
    }

    /// Byte-copy this file into the long-term directory.
    pub fn copy_to_long_term(&self, settings: &Settings) -> Result<(), FileError> {
        let dst = self.long_term_path(settings);
        info!(src = %self.path.display(), dst = %dst.display(), "copying to long term");
        std::fs::copy(&self.path, &dst).map_err(|source| FileError::Io {
            path: dst.clone(),
            source,
        })?;
        Ok(())
    }

    /// Remove the long-term copy if there is one.
    pub fn remove_long_term(&self, settings: &Settings) -> Result<(), FileError> {
        let dst = self.long_term_path(settings);
        if dst.is_file() {
            debug!(path = %dst.display(), "removing long term copy");
        }
        remove_if_present(&dst)
    }

    /// Remove this file and its long-term copy. Missing files are fine.
    pub fn self_destruct(&self, settings: &Settings) -> Result<(), FileError> {
        if self.exists() {
            debug!(path = %self.path.display(), "removing");
        }
        remove_if_present(&self.path)?;
        self.remove_long_term(settings)
    }
}

/// md5 of a file, as the first whitespace-delimited token of `md5sum`.
pub fn compute_checksum(path: &Path) -> Result<String, FileError> {
    let mut command = Command::new("md5sum");
    command.arg(path);
    let output = command.output().map_err(|source| FileError::Spawn {
        command: "md5sum".to_string(),
        source,
    })?;
    if !output.status.success() {
        return Err(FileError::CommandFailed {
            command: "md5sum".to_string(),
            status: output.status.to_string(),
            path: path.to_path_buf(),
        });
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let checksum = stdout.split_whitespace().next().unwrap_or("").to_string();
    if checksum.is_empty() {
        return Err(FileError::EmptyChecksum {
            path: path.to_path_buf(),
        });
    }
    Ok(checksum)
}

fn run_command(mut command: Command, name: &str, path: &Path) -> Result<(), FileError> {
    let output = command.output().map_err(|source| FileError::Spawn {
        command: name.to_string(),
        source,
    })?;
    if !output.status.success() {
        return Err(FileError::CommandFailed {
            command: name.to_string(),
            status: output.status.to_string(),
            path: path.to_path_buf(),
        });
    }
    debug!(command = name, "command completed");
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<(), FileError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(FileError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
