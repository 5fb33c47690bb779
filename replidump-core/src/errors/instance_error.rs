//! Backup instance reconciliation errors.

use super::file_error::FileError;

/// Invariant violations found while reconciling one backup instance.
///
/// Except for `FilesInFlight`, raising one of these means the instance
/// already destroyed every file it owned.
#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    #[error("{db_name} {date_string}: a member file is open by another process")]
    FilesInFlight { db_name: String, date_string: String },

    #[error("{db_name} {date_string}: checksum file missing")]
    MissingChecksum { db_name: String, date_string: String },

    #[error("{db_name} {date_string}: checksum file present but empty")]
    EmptyChecksum { db_name: String, date_string: String },

    #[error("{db_name} {date_string}: no dump file on disk")]
    MissingDump { db_name: String, date_string: String },

    #[error("{db_name} {date_string}: expected exactly one dump and one checksum file")]
    AmbiguousFiles { db_name: String, date_string: String },

    #[error("{db_name} {date_string}: stale {path} survived its replacement")]
    StaleFile {
        db_name: String,
        date_string: String,
        path: std::path::PathBuf,
    },

    #[error(transparent)]
    File(#[from] FileError),
}
