//! Replica control errors.

/// Errors talking to the MySQL replica or driving its replication threads.
///
/// A failed start or stop is fatal to the whole run.
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    #[error("MySQL error: {0}")]
    Mysql(String),

    #[error("SHOW SLAVE STATUS returned no rows; is this server a replica?")]
    NotAReplica,

    #[error("replication threads failed to stop")]
    StopFailed,

    #[error("replication threads failed to start")]
    StartFailed,
}

impl From<mysql::Error> for ReplicaError {
    fn from(err: mysql::Error) -> Self {
        ReplicaError::Mysql(err.to_string())
    }
}
