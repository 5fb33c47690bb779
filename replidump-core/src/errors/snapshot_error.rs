//! LVM snapshot errors.

/// Errors managing the replica's LVM snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("failed to create snapshot {device} of size {size_gb}G")]
    CreateFailed { device: String, size_gb: u64 },

    #[error("failed to delete snapshot {device}")]
    DeleteFailed { device: String },

    #[error("snapshot {device} is mounted; refusing to delete")]
    Mounted { device: String },

    #[error("snapshot {device} does not exist")]
    DoesNotExist { device: String },

    #[error("unexpected `lvdisplay -c` output for {device}: {output:?}")]
    UnparsableStatus { device: String, output: String },
}
