//! Linux isolation backend: cgroups v2 with a v1 fallback.
//!
//! One cgroup per execution under the memory controller root. The limit is
//! written to `memory.max` (v2) or `memory.limit_in_bytes` (v1), the host
//! process is attached via `cgroup.procs`, and the group directory is
//! removed when the execution ends.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use slicli_types::{PluginError, Result};

const CGROUP_ROOT: &str = "/sys/fs/cgroup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CgroupVersion {
    V2,
    V1,
}

fn detect_version() -> Option<CgroupVersion> {
    let controllers = Path::new(CGROUP_ROOT).join("cgroup.controllers");
    if let Ok(content) = fs::read_to_string(&controllers) {
        if content.split_whitespace().any(|c| c == "memory") {
            return Some(CgroupVersion::V2);
        }
    }
    if Path::new(CGROUP_ROOT).join("memory").is_dir() {
        return Some(CgroupVersion::V1);
    }
    None
}

pub(super) struct IsolationGroup {
    name: String,
    dir: PathBuf,
    version: CgroupVersion,
}

impl IsolationGroup {
    pub(super) fn is_available() -> bool {
        detect_version().is_some()
    }

    pub(super) fn create(plugin_name: &str, limit_bytes: u64) -> Result<Self> {
        let version = detect_version().ok_or_else(|| {
            PluginError::PlatformUnsupported("no cgroup memory controller mounted".to_string())
        })?;

        let name = super::group_name(plugin_name);
        let dir = match version {
            CgroupVersion::V2 => Path::new(CGROUP_ROOT).join(&name),
            CgroupVersion::V1 => Path::new(CGROUP_ROOT).join("memory").join(&name),
        };
        fs::create_dir(&dir)?;

        let limit_file = match version {
            CgroupVersion::V2 => dir.join("memory.max"),
            CgroupVersion::V1 => dir.join("memory.limit_in_bytes"),
        };
        if let Err(e) = fs::write(&limit_file, limit_bytes.to_string()) {
            // Do not leave a limitless group behind
            let _ = fs::remove_dir(&dir);
            return Err(e.into());
        }

        debug!(group = %name, limit_bytes, ?version, "Created cgroup");
        Ok(Self { name, dir, version })
    }

    pub(super) fn name(&self) -> &str {
        &self.name
    }

    pub(super) fn attach_current_process(&self) -> Result<()> {
        fs::write(self.dir.join("cgroup.procs"), std::process::id().to_string())?;
        Ok(())
    }

    pub(super) fn usage(&self) -> Result<u64> {
        let usage_file = match self.version {
            CgroupVersion::V2 => self.dir.join("memory.current"),
            CgroupVersion::V1 => self.dir.join("memory.usage_in_bytes"),
        };
        let content = fs::read_to_string(usage_file)?;
        content.trim().parse::<u64>().map_err(|e| {
            PluginError::execution("cgroup", "usage", format!("unparseable usage value: {e}"))
        })
    }

    fn pids(&self) -> Vec<i32> {
        let Ok(content) = fs::read_to_string(self.dir.join("cgroup.procs")) else {
            return Vec::new();
        };
        content
            .lines()
            .filter_map(|line| line.trim().parse::<i32>().ok())
            .collect()
    }

    /// SIGTERM every process in the group except the host, wait out the
    /// grace period, then SIGKILL the survivors. Returns how many processes
    /// were signalled.
    pub(super) async fn terminate_processes(&self, grace: Duration) -> usize {
        let host = std::process::id() as i32;
        let targets: Vec<i32> = self.pids().into_iter().filter(|pid| *pid != host).collect();
        if targets.is_empty() {
            return 0;
        }

        for pid in &targets {
            debug!(group = %self.name, pid, "Sending SIGTERM");
            unsafe {
                libc::kill(*pid, libc::SIGTERM);
            }
        }

        tokio::time::sleep(grace).await;

        let survivors: Vec<i32> = self.pids().into_iter().filter(|pid| *pid != host).collect();
        for pid in &survivors {
            warn!(group = %self.name, pid, "Process survived SIGTERM, sending SIGKILL");
            unsafe {
                libc::kill(*pid, libc::SIGKILL);
            }
        }

        targets.len()
    }

    /// Move remaining processes back to the controller root and remove the
    /// group directory. Best-effort: a group that cannot be removed is
    /// logged, never panicked over.
    pub(super) fn release(&self) {
        let parent_procs = match self.version {
            CgroupVersion::V2 => Path::new(CGROUP_ROOT).join("cgroup.procs"),
            CgroupVersion::V1 => Path::new(CGROUP_ROOT).join("memory").join("cgroup.procs"),
        };
        for pid in self.pids() {
            if let Err(e) = fs::write(&parent_procs, pid.to_string()) {
                warn!(group = %self.name, pid, error = %e, "Failed to re-parent process");
            }
        }
        if let Err(e) = fs::remove_dir(&self.dir) {
            warn!(group = %self.name, error = %e, "Failed to remove cgroup directory");
        } else {
            debug!(group = %self.name, "Removed cgroup");
        }
    }
}
