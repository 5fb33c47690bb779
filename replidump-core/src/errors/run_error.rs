//! Top-level run errors.

use super::cache_error::CacheError;
use super::config_error::ConfigError;
use super::replica_error::ReplicaError;
use super::snapshot_error::SnapshotError;

/// Fatal errors for a whole orchestrator run.
///
/// Per-database failures are not in here; they are collected and reported
/// without aborting the other databases.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Replica(#[from] ReplicaError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("IO error on {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("failed to build the worker pool: {0}")]
    WorkerPool(String),

    #[error("{failed} of {total} databases failed; see the log for details")]
    DatabasesFailed { failed: usize, total: usize },
}
