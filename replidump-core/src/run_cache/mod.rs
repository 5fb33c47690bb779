//! Cross-invocation coordination through a file-locked on-disk map.
//!
//! Multiple invocations of this tool (usually under different settings
//! files) may overlap on one host. They coordinate through a single JSON
//! file guarded by an advisory lock on a sidecar `.lock` file: who is
//! currently running, and when each settings file last completed
//! successfully. Every operation is lock → read → mutate → rewrite → unlock.

mod state;

pub use state::{RunCacheState, RunningEntry};

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use fd_lock::RwLock;
use tracing::{debug, warn};

use crate::clock;
use crate::config::Settings;
use crate::errors::CacheError;
use crate::procinfo;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct RunCacheManager {
    /// Absolute settings-file path; the key under which this invocation is
    /// tracked.
    settings_key: String,
    cache_path: PathBuf,
    lock_path: PathBuf,
    lock_wait: Option<u64>,
    purge_days: Option<i64>,
}

impl RunCacheManager {
    /// Build a manager and immediately sanitize the cache.
    pub fn new(settings: &Settings) -> Result<RunCacheManager, CacheError> {
        let cache_path = settings.backup.running_cache_file.clone();
        let mut lock_name = cache_path.as_os_str().to_os_string();
        lock_name.push(".lock");
        let manager = RunCacheManager {
            settings_key: settings.settings_path.display().to_string(),
            cache_path,
            lock_path: PathBuf::from(lock_name),
            lock_wait: settings.backup.cache_lock_wait,
            purge_days: settings.backup.cache_successful_run_purge_days,
        };
        manager.sanitize()?;
        Ok(manager)
    }

    /// Drop entries for dead or foreign pids and purge expired successes.
    ///
    /// A crashed invocation leaves its pid behind; a recycled pid may now
    /// belong to an unrelated process. An entry survives only if the pid is
    /// alive and its process name still matches this tool's executable.
    fn sanitize(&self) -> Result<(), CacheError> {
        let own_name = procinfo::own_executable_name().unwrap_or_default();
        let purge_days = self.purge_days;
        self.with_state(|state| {
            state.running_backups.retain(|settings_file, entry| {
                if !procinfo::pid_alive(entry.pid) {
                    debug!(%settings_file, pid = entry.pid, "dropping dead pid from run cache");
                    return false;
                }
                let name = procinfo::process_name(entry.pid).unwrap_or_default();
                if !same_executable(&own_name, &name) {
                    debug!(
                        %settings_file,
                        pid = entry.pid,
                        process = %name,
                        "pid was recycled by another program, dropping from run cache"
                    );
                    return false;
                }
                true
            });

            if let Some(purge_days) = purge_days {
                let now = clock::now_ts();
                state
                    .successful_run_times
                    .retain(|_, success_ts| (now - *success_ts) / 86_400 <= purge_days);
            }
        })
    }

    /// "I already finished successfully while a still-running sibling was
    /// underway" — re-running would observe no new replica state, so a run
    /// admitted under this condition would be redundant.
    pub fn have_already_run_while_others_are_still_running(&self) -> Result<bool, CacheError> {
        let settings_key = self.settings_key.clone();
        self.with_state(move |state| {
            let Some(success_ts) = state.successful_run_times.get(&settings_key).copied() else {
                return false;
            };
            state.running_backups.values().any(|entry| {
                let started = procinfo::process_start_time(entry.pid)
                    .map(|t| t as i64)
                    .unwrap_or(entry.started_at);
                started < success_ts
            })
        })
    }

    /// Announce this invocation to its siblings.
    pub fn register_self(&self) -> Result<(), CacheError> {
        let pid = std::process::id();
        let started_at = procinfo::process_start_time(pid)
            .map(|t| t as i64)
            .unwrap_or_else(clock::now_ts);
        let settings_key = self.settings_key.clone();
        debug!(pid, "registering in the run cache");
        self.with_state(move |state| {
            state
                .running_backups
                .insert(settings_key, RunningEntry { pid, started_at });
        })
    }

    /// Remove this invocation's entry. Already being gone is not an error.
    pub fn deregister_self(&self) -> Result<(), CacheError> {
        let settings_key = self.settings_key.clone();
        debug!("deregistering from the run cache");
        self.with_state(move |state| {
            if state.running_backups.remove(&settings_key).is_none() {
                debug!("entry was already gone from the run cache");
            }
        })
    }

    /// Record that a run for this settings file just completed successfully.
    pub fn update_success(&self) -> Result<(), CacheError> {
        let settings_key = self.settings_key.clone();
        self.with_state(move |state| {
            state
                .successful_run_times
                .insert(settings_key, clock::now_ts());
        })
    }

    /// How many invocations are currently registered, this one included.
    pub fn current_running_count(&self) -> Result<usize, CacheError> {
        self.with_state(|state| state.running_backups.len())
    }

    /// A copy of the current cache contents.
    pub fn snapshot(&self) -> Result<RunCacheState, CacheError> {
        self.with_state(|state| state.clone())
    }

    /// Lock, load, apply `f`, store, unlock.
    fn with_state<T>(&self, f: impl FnOnce(&mut RunCacheState) -> T) -> Result<T, CacheError> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|source| CacheError::Io {
                path: self.lock_path.clone(),
                source,
            })?;
        let mut lock = RwLock::new(lock_file);
        let _guard = self.acquire_write(&mut lock)?;

        let mut state = match std::fs::read_to_string(&self.cache_path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(path = %self.cache_path.display(), %err,
                      "run cache was unreadable, reinitializing it");
                RunCacheState::default()
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => RunCacheState::default(),
            Err(source) => {
                return Err(CacheError::Io {
                    path: self.cache_path.clone(),
                    source,
                })
            }
        };

        let result = f(&mut state);

        let serialized = serde_json::to_vec_pretty(&state)?;
        std::fs::write(&self.cache_path, serialized).map_err(|source| CacheError::Io {
            path: self.cache_path.clone(),
            source,
        })?;
        Ok(result)
    }

    fn acquire_write<'a>(
        &self,
        lock: &'a mut RwLock<File>,
    ) -> Result<fd_lock::RwLockWriteGuard<'a, File>, CacheError> {
        let Some(wait_secs) = self.lock_wait else {
            return lock.write().map_err(|source| CacheError::Io {
                path: self.lock_path.clone(),
                source,
            });
        };
        let deadline = Instant::now() + Duration::from_secs(wait_secs);
        loop {
            match lock.try_write() {
                Ok(_guard) => break,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(CacheError::LockTimeout {
                            path: self.lock_path.clone(),
                            waited_secs: wait_secs,
                        });
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(source) => {
                    return Err(CacheError::Io {
                        path: self.lock_path.clone(),
                        source,
                    })
                }
            }
        }
        lock.write().map_err(|source| CacheError::Io {
            path: self.lock_path.clone(),
            source,
        })
    }
}

/// Process names from the kernel are truncated to 15 bytes, so compare by
/// prefix in both directions.
fn same_executable(own_name: &str, other_name: &str) -> bool {
    if own_name.is_empty() || other_name.is_empty() {
        return false;
    }
    own_name.starts_with(other_name) || other_name.starts_with(own_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::settings_for;

    fn manager_for(settings: &Settings) -> RunCacheManager {
        RunCacheManager::new(settings).unwrap()
    }

    #[test]
    fn register_count_deregister() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_for(dir.path());
        let cache = manager_for(&settings);

        assert_eq!(cache.current_running_count().unwrap(), 0);
        cache.register_self().unwrap();
        assert_eq!(cache.current_running_count().unwrap(), 1);

        let snapshot = cache.snapshot().unwrap();
        let entry = snapshot
            .running_backups
            .get(&settings.settings_path.display().to_string())
            .unwrap();
        assert_eq!(entry.pid, std::process::id());

        cache.deregister_self().unwrap();
        assert_eq!(cache.current_running_count().unwrap(), 0);
        // Deregistering twice is tolerated.
        cache.deregister_self().unwrap();
    }

    #[test]
    fn sanitize_drops_dead_pids() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_for(dir.path());

        let state = RunCacheState {
            running_backups: [(
                "/etc/replidump/other.ini".to_string(),
                RunningEntry {
                    pid: 0x0FFF_FFFF,
                    started_at: 0,
                },
            )]
            .into(),
            successful_run_times: Default::default(),
        };
        std::fs::write(
            &settings.backup.running_cache_file,
            serde_json::to_vec(&state).unwrap(),
        )
        .unwrap();

        let cache = manager_for(&settings);
        assert_eq!(cache.current_running_count().unwrap(), 0);
    }

    #[test]
    fn sanitize_purges_expired_successes() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_for(dir.path());
        settings.backup.cache_successful_run_purge_days = Some(7);

        let now = clock::now_ts();
        let state = RunCacheState {
            running_backups: Default::default(),
            successful_run_times: [
                ("/etc/replidump/ancient.ini".to_string(), now - 30 * 86_400),
                ("/etc/replidump/recent.ini".to_string(), now - 3600),
            ]
            .into(),
        };
        std::fs::write(
            &settings.backup.running_cache_file,
            serde_json::to_vec(&state).unwrap(),
        )
        .unwrap();

        let cache = manager_for(&settings);
        let snapshot = cache.snapshot().unwrap();
        assert!(!snapshot
            .successful_run_times
            .contains_key("/etc/replidump/ancient.ini"));
        assert!(snapshot
            .successful_run_times
            .contains_key("/etc/replidump/recent.ini"));
    }

    #[test]
    fn malformed_cache_file_is_reinitialized() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_for(dir.path());
        std::fs::write(&settings.backup.running_cache_file, b"{not json!").unwrap();

        let cache = manager_for(&settings);
        assert_eq!(cache.current_running_count().unwrap(), 0);
        cache.register_self().unwrap();
        assert_eq!(cache.current_running_count().unwrap(), 1);
    }

    #[test]
    fn short_circuit_requires_a_prior_success() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_for(dir.path());
        let cache = manager_for(&settings);

        assert!(!cache
            .have_already_run_while_others_are_still_running()
            .unwrap());
    }

    #[test]
    fn short_circuit_when_a_sibling_predates_our_success() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_for(dir.path());
        let cache = manager_for(&settings);

        // A sibling that is this very process: alive, right executable, and
        // started before the success recorded below.
        let sibling_pid = std::process::id();
        let state = RunCacheState {
            running_backups: [(
                "/etc/replidump/sibling.ini".to_string(),
                RunningEntry {
                    pid: sibling_pid,
                    started_at: clock::now_ts() - 60,
                },
            )]
            .into(),
            successful_run_times: [(
                settings.settings_path.display().to_string(),
                clock::now_ts() + 5,
            )]
            .into(),
        };
        std::fs::write(
            &settings.backup.running_cache_file,
            serde_json::to_vec(&state).unwrap(),
        )
        .unwrap();

        assert!(cache
            .have_already_run_while_others_are_still_running()
            .unwrap());
    }

    #[test]
    fn no_short_circuit_when_success_predates_all_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_for(dir.path());
        let cache = manager_for(&settings);

        let state = RunCacheState {
            running_backups: [(
                "/etc/replidump/sibling.ini".to_string(),
                RunningEntry {
                    pid: std::process::id(),
                    started_at: clock::now_ts(),
                },
            )]
            .into(),
            // Our success is older than any plausible process start time.
            successful_run_times: [(settings.settings_path.display().to_string(), 1)].into(),
        };
        std::fs::write(
            &settings.backup.running_cache_file,
            serde_json::to_vec(&state).unwrap(),
        )
        .unwrap();

        assert!(!cache
            .have_already_run_while_others_are_still_running()
            .unwrap());
    }
}
