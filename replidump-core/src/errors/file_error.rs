//! Backup file errors.

use std::path::PathBuf;

/// Reasons a path is refused admission as a backup file.
///
/// Parse refusals are never fatal: the file simply stays outside the model
/// and is left to the age-gated sweeper.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("{path}: not inside the incremental backup directory")]
    OutsideIncrementalDir { path: PathBuf },

    #[error("{path}: file name does not match <db>__<date>.<ext>")]
    MalformedName { path: PathBuf },

    #[error("{path}: unrecognized extension {extension:?}")]
    UnknownExtension { path: PathBuf, extension: String },

    #[error("{path}: date segment {date_string:?} is not a valid YYYYMMDD-HHMMSS timestamp")]
    MalformedDate { path: PathBuf, date_string: String },
}

/// Errors operating on a single backup file on disk.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status} for {path}")]
    CommandFailed {
        command: String,
        status: String,
        path: PathBuf,
    },

    #[error("`{command}` reported success but {path} does not exist")]
    MissingOutput { command: String, path: PathBuf },

    #[error("checksum file {path} is missing or empty")]
    EmptyChecksum { path: PathBuf },
}
