//! macOS isolation backend.
//!
//! macOS has no cgroup equivalent reachable from user space, so limiting is
//! best-effort: the limit is published through `SLICLI_MEMORY_LIMIT` /
//! `SLICLI_MEMORY_LIMIT_KB` for plugins that spawn children (which can apply
//! rlimits to themselves), and usage is sampled from the host process.

use std::sync::Mutex;
use std::time::Duration;
use sysinfo::{ProcessesToUpdate, System};
use tracing::debug;

use slicli_types::Result;

const LIMIT_ENV: &str = "SLICLI_MEMORY_LIMIT";
const LIMIT_KB_ENV: &str = "SLICLI_MEMORY_LIMIT_KB";

pub(super) struct IsolationGroup {
    name: String,
    system: Mutex<System>,
}

impl IsolationGroup {
    pub(super) fn is_available() -> bool {
        true
    }

    pub(super) fn create(plugin_name: &str, limit_bytes: u64) -> Result<Self> {
        let name = super::group_name(plugin_name);
        std::env::set_var(LIMIT_ENV, limit_bytes.to_string());
        std::env::set_var(LIMIT_KB_ENV, (limit_bytes / 1024).to_string());
        debug!(group = %name, limit_bytes, "Published memory limit hints");
        Ok(Self {
            name,
            system: Mutex::new(System::new()),
        })
    }

    pub(super) fn name(&self) -> &str {
        &self.name
    }

    pub(super) fn attach_current_process(&self) -> Result<()> {
        // Hints are process-wide environment; nothing further to attach
        Ok(())
    }

    /// Resident set size of the host process.
    pub(super) fn usage(&self) -> Result<u64> {
        let mut system = self.system.lock().expect("sysinfo lock poisoned");
        let pid = sysinfo::Pid::from_u32(std::process::id());
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        Ok(system.process(pid).map(|p| p.memory()).unwrap_or(0))
    }

    /// There is no process group to terminate; enforcement on macOS stops
    /// at cancellation of the execution context.
    pub(super) async fn terminate_processes(&self, _grace: Duration) -> usize {
        debug!(group = %self.name, "No OS group to terminate on macOS");
        0
    }

    pub(super) fn release(&self) {
        std::env::remove_var(LIMIT_ENV);
        std::env::remove_var(LIMIT_KB_ENV);
    }
}
