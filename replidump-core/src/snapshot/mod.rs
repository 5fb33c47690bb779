//! LVM snapshot management for out-of-band consumers.
//!
//! After an exclusive run the replica's data volume snapshot is refreshed so
//! downstream tooling can mount a quiesced copy. Everything here shells out
//! to the LVM userland tools.

use std::process::Command;

use tracing::{debug, info};

use crate::config::SnapshotSettings;
use crate::errors::SnapshotError;

pub struct LvSnapshot {
    vg: String,
    lv: String,
    snapshot_name: String,
    size_gb: u64,
}

impl LvSnapshot {
    pub fn new(settings: &SnapshotSettings) -> LvSnapshot {
        LvSnapshot {
            vg: settings.vg.clone(),
            lv: settings.lv.clone(),
            snapshot_name: settings.name.clone(),
            size_gb: settings.size_gb,
        }
    }

    fn device(&self) -> String {
        format!("/dev/{}/{}", self.vg, self.snapshot_name)
    }

    fn origin_device(&self) -> String {
        format!("/dev/{}/{}", self.vg, self.lv)
    }

    /// Whether the snapshot device currently exists.
    pub fn exists(&self) -> bool {
        std::path::Path::new(&self.device())
            .symlink_metadata()
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }

    /// Whether the snapshot exists and is mounted, per the 6th colon field
    /// of `lvdisplay -c`.
    pub fn is_mounted(&self) -> Result<bool, SnapshotError> {
        if !self.exists() {
            return Ok(false);
        }
        let device = self.device();
        let output = Command::new("lvdisplay")
            .arg("-c")
            .arg(&device)
            .output()
            .map_err(|source| SnapshotError::Spawn {
                command: "lvdisplay".to_string(),
                source,
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let open_count = stdout
            .trim()
            .split(':')
            .nth(5)
            .and_then(|field| field.trim().parse::<u64>().ok())
            .ok_or_else(|| SnapshotError::UnparsableStatus {
                device: device.clone(),
                output: stdout.trim().to_string(),
            })?;
        Ok(open_count != 0)
    }

    /// Create the snapshot if it does not exist, verifying afterwards.
    pub fn ensure_exists(&self) -> Result<(), SnapshotError> {
        if self.exists() {
            return Ok(());
        }
        info!(device = %self.device(), size_gb = self.size_gb, "creating snapshot");
        let output = Command::new("lvcreate")
            .arg("--snapshot")
            .arg("-L")
            .arg(format!("{}G", self.size_gb))
            .arg("--name")
            .arg(&self.snapshot_name)
            .arg(self.origin_device())
            .output()
            .map_err(|source| SnapshotError::Spawn {
                command: "lvcreate".to_string(),
                source,
            })?;
        debug!(status = %output.status, "lvcreate finished");

        if !self.exists() {
            return Err(SnapshotError::CreateFailed {
                device: self.device(),
                size_gb: self.size_gb,
            });
        }
        Ok(())
    }

    /// Delete the snapshot. Refuses while it is mounted.
    pub fn delete(&self) -> Result<(), SnapshotError> {
        if self.is_mounted()? {
            return Err(SnapshotError::Mounted {
                device: self.device(),
            });
        }
        if !self.exists() {
            return Err(SnapshotError::DoesNotExist {
                device: self.device(),
            });
        }
        info!(device = %self.device(), "removing snapshot");
        let output = Command::new("lvremove")
            .arg("-f")
            .arg(self.device())
            .output()
            .map_err(|source| SnapshotError::Spawn {
                command: "lvremove".to_string(),
                source,
            })?;
        debug!(status = %output.status, "lvremove finished");

        if self.exists() {
            return Err(SnapshotError::DeleteFailed {
                device: self.device(),
            });
        }
        Ok(())
    }

    /// Recreate the snapshot unless it is mounted, and verify one exists
    /// afterwards. A mounted snapshot is left as-is: someone is using it.
    pub fn safe_refresh(&self) -> Result<(), SnapshotError> {
        info!(device = %self.device(), "refreshing snapshot");
        if self.is_mounted()? {
            info!(device = %self.device(), "snapshot is mounted, leaving it alone");
        } else {
            if self.exists() {
                self.delete()?;
            }
            self.ensure_exists()?;
        }

        if !self.exists() {
            return Err(SnapshotError::DoesNotExist {
                device: self.device(),
            });
        }
        debug!(device = %self.device(), "snapshot verified to exist");
        Ok(())
    }
}
