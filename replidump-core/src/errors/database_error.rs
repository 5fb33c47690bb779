//! Per-database policy errors.

use super::file_error::FileError;

/// Failures while running one database's backup and retention policy.
///
/// Subprocess failures (dump, compress, hash) are contained to the attempt
/// and never reach here; what remains fatal to a database is the filesystem
/// refusing a delete or copy. Contained at the database boundary: other
/// databases in the same run are unaffected, but any of these flips the
/// process exit code.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("{db_name}: {source}")]
    File { db_name: String, source: FileError },
}
