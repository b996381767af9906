//! Plugin lifecycle glue: initialize, register, and retire plugins.
//!
//! Registration order matters downstream (fallback matching and snapshots
//! follow it), so hosts register essential plugins first.

use semver::Version;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::discovery::{discover_plugins, DiscoveredPlugin};
use crate::registry::PluginRegistry;
use slicli_types::{Plugin, PluginError, PluginMetadata, PluginType, Result};

/// Loads plugins into a registry and tears them down again. Couples the
/// `init`/`cleanup` ends of the plugin contract to registry membership so
/// a registered plugin is always an initialized one.
pub struct PluginLoader {
    registry: Arc<PluginRegistry>,
    host_version: Version,
    plugin_dirs: Vec<PathBuf>,
}

impl PluginLoader {
    pub fn new(registry: Arc<PluginRegistry>, host_version: Version) -> Self {
        Self {
            registry,
            host_version,
            plugin_dirs: Vec::new(),
        }
    }

    /// Add a directory scanned by [`PluginLoader::discover`].
    pub fn add_plugin_dir(&mut self, dir: impl Into<PathBuf>) {
        self.plugin_dirs.push(dir.into());
    }

    /// Walk the configured directories for installed plugin binaries and
    /// their manifests. Reporting only; binaries are not loaded.
    pub fn discover(&self) -> Vec<DiscoveredPlugin> {
        discover_plugins(&self.plugin_dirs, &self.host_version)
    }

    /// Initialize a plugin and register it. The plugin's own accessors
    /// provide the metadata; a failed `init` leaves the registry untouched.
    pub async fn load(
        &self,
        plugin: Arc<dyn Plugin>,
        plugin_type: PluginType,
        config: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let metadata = PluginMetadata::new(
            plugin.name(),
            plugin.version(),
            plugin.description(),
            plugin_type,
        );
        metadata.validate()?;

        plugin.init(config).await.map_err(|e| {
            PluginError::execution(plugin.name(), "init", e.to_string())
        })?;

        if let Err(e) = self.registry.register(Arc::clone(&plugin), metadata).await {
            // Roll the plugin back to its uninitialized state
            if let Err(cleanup_err) = plugin.cleanup().await {
                warn!(plugin = %plugin.name(), error = %cleanup_err, "Cleanup after failed registration also failed");
            }
            return Err(e);
        }

        info!(plugin = %plugin.name(), version = %plugin.version(), "Plugin loaded");
        Ok(())
    }

    /// Clean a plugin up and drop it from the registry. Cleanup failures
    /// are logged; the plugin is removed regardless so a broken plugin
    /// cannot pin itself in.
    pub async fn unload(&self, name: &str) -> Result<()> {
        let plugin = self.registry.get(name).await?;
        if let Err(e) = plugin.cleanup().await {
            warn!(plugin = %name, error = %e, "Plugin cleanup failed during unload");
        }
        self.registry.remove(name).await?;
        info!(plugin = %name, "Plugin unloaded");
        Ok(())
    }

    /// Unload every registered plugin, in reverse registration order.
    pub async fn shutdown(&self) {
        let names: Vec<String> = self
            .registry
            .get_all()
            .await
            .into_iter()
            .map(|(name, _)| name)
            .rev()
            .collect();
        for name in names {
            if let Err(e) = self.unload(&name).await {
                warn!(plugin = %name, error = %e, "Failed to unload plugin during shutdown");
            }
        }
    }
}
