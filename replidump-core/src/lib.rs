//! replidump-core: backup engine for MySQL read replicas.
//!
//! A single run quiesces the replica, dumps each database, deduplicates by
//! content hash, rotates short-term and long-term copies per policy, and
//! coordinates with concurrent invocations through a file-locked run cache:
//!
//! - `backup` — files, instances, and the per-database retention policy
//! - `orchestrator` — the end-to-end run
//! - `run_cache` — cross-invocation coordination
//! - `mysql` — database enumeration and replication control
//! - `snapshot` — LVM snapshot refresh
//! - `config` — the immutable settings value

pub mod backup;
pub mod clock;
pub mod config;
pub mod errors;
pub mod mysql;
pub mod orchestrator;
pub mod procinfo;
pub mod run_cache;
pub mod snapshot;

pub use backup::{BackupFile, BackupInstance, DatabaseInstance, FileKind};
pub use config::Settings;
pub use mysql::{MysqlReplica, ReplicaServer};
pub use orchestrator::Orchestrator;
pub use run_cache::RunCacheManager;

#[cfg(test)]
pub(crate) mod testutil;
