//! Fallback backend for platforms without any isolation facility.

use std::time::Duration;

use slicli_types::{PluginError, Result};

pub(super) struct IsolationGroup {
    name: String,
}

impl IsolationGroup {
    pub(super) fn is_available() -> bool {
        false
    }

    pub(super) fn create(_plugin_name: &str, _limit_bytes: u64) -> Result<Self> {
        Err(PluginError::PlatformUnsupported(format!(
            "no memory isolation backend for {}",
            std::env::consts::OS
        )))
    }

    pub(super) fn name(&self) -> &str {
        &self.name
    }

    pub(super) fn attach_current_process(&self) -> Result<()> {
        Ok(())
    }

    pub(super) fn usage(&self) -> Result<u64> {
        Ok(0)
    }

    pub(super) async fn terminate_processes(&self, _grace: Duration) -> usize {
        0
    }

    pub(super) fn release(&self) {}
}
