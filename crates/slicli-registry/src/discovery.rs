//! Plugin discovery: walk configured directories for shared objects and
//! their sibling manifests.
//!
//! Discovery is metadata-only. Loading happens through compile-time
//! registration against [`crate::PluginRegistry`]; the walk reports what is
//! installed and whether each candidate is compatible with this host.

use semver::Version;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::manifest::PluginManifest;

/// One shared object found on disk.
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    /// Path to the shared object
    pub path: PathBuf,
    /// File stem, used as the plugin name when no manifest is present
    pub name: String,
    /// Parsed sibling manifest, when one exists and parses
    pub manifest: Option<PluginManifest>,
    /// Host compatibility; manifest-less plugins are assumed compatible
    pub compatible: bool,
}

/// Walk `dirs` collecting files with the platform shared-object suffix.
/// A sibling `<stem>.toml` manifest is parsed when present; incompatible
/// plugins stay in the result with `compatible = false`.
pub fn discover_plugins(dirs: &[PathBuf], host_version: &Version) -> Vec<DiscoveredPlugin> {
    let mut discovered = Vec::new();

    for dir in dirs {
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "Skipping missing plugin directory");
            continue;
        }
        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Plugin directory walk error");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(std::env::consts::DLL_EXTENSION)
            {
                continue;
            }
            discovered.push(inspect_candidate(path, host_version));
        }
    }

    discovered
}

fn inspect_candidate(path: &Path, host_version: &Version) -> DiscoveredPlugin {
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    let manifest_path = path.with_extension("toml");
    let manifest = if manifest_path.is_file() {
        match PluginManifest::load(&manifest_path) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(
                    path = %manifest_path.display(),
                    error = %e,
                    "Ignoring unreadable plugin manifest"
                );
                None
            }
        }
    } else {
        None
    };

    let compatible = manifest
        .as_ref()
        .map(|m| m.is_compatible(host_version, std::env::consts::OS, std::env::consts::ARCH))
        .unwrap_or(true);

    let name = manifest
        .as_ref()
        .map(|m| m.metadata.name.clone())
        .unwrap_or(name);

    debug!(
        plugin = %name,
        path = %path.display(),
        compatible,
        "Discovered plugin candidate"
    );

    DiscoveredPlugin {
        path: path.to_path_buf(),
        name,
        manifest,
        compatible,
    }
}
