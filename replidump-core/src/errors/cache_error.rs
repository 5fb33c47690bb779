//! Run cache errors.

use std::path::PathBuf;

/// Errors from the shared run-cache file. All of these abort the run.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("timed out after {waited_secs}s acquiring the lock on {path}")]
    LockTimeout { path: PathBuf, waited_secs: u64 },

    #[error("IO error on run cache {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize run cache state: {0}")]
    Serialize(#[from] serde_json::Error),
}
