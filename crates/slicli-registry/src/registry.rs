//! Plugin registry with per-plugin statistics and lifecycle tracking

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use chrono::Utc;
use slicli_types::{
    LoadedPlugin, Plugin, PluginError, PluginMetadata, PluginStatistics, PluginStatus, PluginType,
    Result,
};

struct RegisteredPlugin {
    plugin: Arc<dyn Plugin>,
    loaded: LoadedPlugin,
}

#[derive(Default)]
struct RegistryState {
    plugins: HashMap<String, RegisteredPlugin>,
    /// Registration order, for order-preserving snapshots and fallback
    /// matching
    order: Vec<String>,
}

/// Thread-safe name→plugin mapping.
///
/// Lookups hand out `Arc<dyn Plugin>` clones and value snapshots; internal
/// maps are never aliased to callers.
#[derive(Default)]
pub struct PluginRegistry {
    state: RwLock<RegistryState>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under its metadata name. Fails with
    /// `ValidationFailed` on malformed metadata and `AlreadyExists` on a
    /// duplicate name.
    pub async fn register(&self, plugin: Arc<dyn Plugin>, metadata: PluginMetadata) -> Result<()> {
        metadata.validate()?;
        let name = metadata.name.clone();

        let mut state = self.state.write().await;
        if state.plugins.contains_key(&name) {
            return Err(PluginError::AlreadyExists(name));
        }

        info!(plugin = %name, version = %metadata.version, "Registering plugin");
        state.order.push(name.clone());
        state.plugins.insert(
            name,
            RegisteredPlugin {
                plugin,
                loaded: LoadedPlugin::new(metadata),
            },
        );
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Arc<dyn Plugin>> {
        let state = self.state.read().await;
        state
            .plugins
            .get(name)
            .map(|entry| Arc::clone(&entry.plugin))
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    /// Snapshot of all plugins in registration order.
    pub async fn get_all(&self) -> Vec<(String, Arc<dyn Plugin>)> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter_map(|name| {
                state
                    .plugins
                    .get(name)
                    .map(|entry| (name.clone(), Arc::clone(&entry.plugin)))
            })
            .collect()
    }

    /// Snapshot of plugins of one type, in registration order.
    pub async fn get_by_type(&self, plugin_type: PluginType) -> Vec<(String, Arc<dyn Plugin>)> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter_map(|name| state.plugins.get(name).map(|entry| (name, entry)))
            .filter(|(_, entry)| entry.loaded.metadata.plugin_type == plugin_type)
            .map(|(name, entry)| (name.clone(), Arc::clone(&entry.plugin)))
            .collect()
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state.plugins.remove(name).is_none() {
            return Err(PluginError::NotFound(name.to_string()));
        }
        state.order.retain(|n| n != name);
        debug!(plugin = %name, "Plugin removed from registry");
        Ok(())
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.plugins.clear();
        state.order.clear();
    }

    pub async fn get_metadata(&self, name: &str) -> Result<PluginMetadata> {
        let state = self.state.read().await;
        state
            .plugins
            .get(name)
            .map(|entry| entry.loaded.metadata.clone())
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    pub async fn get_statistics(&self, name: &str) -> Result<PluginStatistics> {
        let state = self.state.read().await;
        state
            .plugins
            .get(name)
            .map(|entry| entry.loaded.statistics.clone())
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    /// Record one completed execution. A success marks the plugin active
    /// and refreshes `last_used`.
    pub async fn update_statistics(
        &self,
        name: &str,
        duration: Duration,
        success: bool,
        bytes_in: u64,
        bytes_out: u64,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state
            .plugins
            .get_mut(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        entry
            .loaded
            .statistics
            .record_execution(duration, success, bytes_in, bytes_out);
        if success {
            entry.loaded.last_used = Some(Utc::now());
            entry.loaded.status = PluginStatus::Active;
            entry.loaded.status_reason = None;
        }
        Ok(())
    }

    /// Attribute the plugin's latest recorded error to a timeout.
    pub async fn increment_timeout(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state
            .plugins
            .get_mut(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        entry.loaded.statistics.record_timeout();
        Ok(())
    }

    /// Attribute the plugin's latest recorded error to a recovered panic
    /// and move the plugin to the error state.
    pub async fn increment_panic(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state
            .plugins
            .get_mut(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        entry.loaded.statistics.record_panic();
        entry.loaded.status = PluginStatus::Error;
        entry.loaded.status_reason = Some("plugin panicked".to_string());
        warn!(plugin = %name, "Plugin moved to error state after panic");
        Ok(())
    }

    pub async fn get_loaded_plugin(&self, name: &str) -> Result<LoadedPlugin> {
        let state = self.state.read().await;
        state
            .plugins
            .get(name)
            .map(|entry| entry.loaded.clone())
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    /// Snapshot of every plugin's lifecycle record, in registration order.
    pub async fn list_loaded_plugins(&self) -> Vec<LoadedPlugin> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter_map(|name| state.plugins.get(name).map(|entry| entry.loaded.clone()))
            .collect()
    }

    pub async fn set_plugin_status(
        &self,
        name: &str,
        status: PluginStatus,
        reason: impl Into<String>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state
            .plugins
            .get_mut(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        entry.loaded.status = status;
        entry.loaded.status_reason = Some(reason.into());
        Ok(())
    }
}
