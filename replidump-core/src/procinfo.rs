//! Process inspection: pid liveness, identity, and open-file checks.
//!
//! The run cache stores pids of sibling invocations; sanitizing it needs to
//! know whether a pid is still alive and still this tool. Reconciliation
//! needs to know whether a backup file is mid-write by someone else.

use std::path::{Path, PathBuf};

use sysinfo::{Pid, System};

/// Whether a process with this pid currently exists.
pub fn pid_alive(pid: u32) -> bool {
    let mut sys = System::new();
    sys.refresh_process(Pid::from_u32(pid));
    sys.process(Pid::from_u32(pid)).is_some()
}

/// The short name of the process, if it exists.
pub fn process_name(pid: u32) -> Option<String> {
    let mut sys = System::new();
    sys.refresh_process(Pid::from_u32(pid));
    sys.process(Pid::from_u32(pid)).map(|p| p.name().to_string())
}

/// Unix start time of the process, in seconds since the epoch.
pub fn process_start_time(pid: u32) -> Option<u64> {
    let mut sys = System::new();
    sys.refresh_process(Pid::from_u32(pid));
    sys.process(Pid::from_u32(pid)).map(|p| p.start_time())
}

/// File name of the currently running executable.
pub fn own_executable_name() -> Option<String> {
    std::env::current_exe()
        .ok()?
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

/// Whether `path` is currently open by any process on this host.
///
/// Walks `/proc/<pid>/fd`; pids whose fd table cannot be read (permissions,
/// races with process exit) are skipped, so the answer can under-report for
/// other users' processes. The backup directories are owned by the backup
/// user, which is the case that matters.
pub fn is_file_open(path: &Path) -> bool {
    let target = match path.canonicalize() {
        Ok(p) => p,
        // A path that does not resolve cannot be open.
        Err(_) => return false,
    };

    let proc_entries = match std::fs::read_dir("/proc") {
        Ok(entries) => entries,
        Err(_) => return false,
    };

    for entry in proc_entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let fd_dir = PathBuf::from("/proc").join(&name).join("fd");
        let fds = match std::fs::read_dir(&fd_dir) {
            Ok(fds) => fds,
            Err(_) => continue,
        };
        for fd in fds.flatten() {
            if let Ok(link) = std::fs::read_link(fd.path()) {
                if link == target {
                    return true;
                }
            }
        }
    }
    false
}
