//! On-disk shape of the run cache.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One registered running invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningEntry {
    pub pid: u32,
    /// Unix start time of the process, recorded at registration as a
    /// fallback for when the live process table cannot be queried.
    pub started_at: i64,
}

/// The whole cache file, keyed by absolute settings-file path.
///
/// Unknown or missing fields deserialize to empty maps, so a malformed or
/// legacy file degrades to a fresh cache instead of an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunCacheState {
    pub running_backups: HashMap<String, RunningEntry>,
    pub successful_run_times: HashMap<String, i64>,
}
