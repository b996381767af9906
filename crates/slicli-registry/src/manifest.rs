//! TOML plugin manifests and host compatibility

use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::Path;

use slicli_types::{PluginError, Result};

/// Sibling manifest describing a discovered plugin binary.
///
/// ```toml
/// [metadata]
/// name = "mermaid"
/// version = "1.2.0"
/// description = "Mermaid diagram renderer"
/// type = "processor"
///
/// [requirements]
/// min_version = "0.2.0"
/// max_version = "1.0.0"
/// os = ["linux", "macos"]
/// arch = ["x86_64", "aarch64"]
///
/// [capabilities]
/// input_formats = ["mermaid"]
/// output_formats = ["html", "svg"]
/// concurrent = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub metadata: ManifestMetadata,
    #[serde(default)]
    pub requirements: Option<ManifestRequirements>,
    #[serde(default)]
    pub capabilities: Option<ManifestCapabilities>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(rename = "type", default)]
    pub plugin_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestRequirements {
    #[serde(default)]
    pub min_version: Option<String>,
    #[serde(default)]
    pub max_version: Option<String>,
    #[serde(default)]
    pub os: Vec<String>,
    #[serde(default)]
    pub arch: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestCapabilities {
    #[serde(default)]
    pub input_formats: Vec<String>,
    #[serde(default)]
    pub output_formats: Vec<String>,
    #[serde(default)]
    pub concurrent: bool,
}

impl PluginManifest {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| PluginError::ValidationFailed(format!("manifest parse error: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// A plugin is compatible iff the host version lies inside
    /// `[min_version, max_version]` and the host OS/arch appear in the
    /// declared lists. Missing bounds and empty lists accept anything.
    pub fn is_compatible(&self, host_version: &Version, os: &str, arch: &str) -> bool {
        let Some(requirements) = &self.requirements else {
            return true;
        };

        if let Some(min) = &requirements.min_version {
            match Version::parse(min) {
                Ok(min) if *host_version >= min => {}
                _ => return false,
            }
        }
        if let Some(max) = &requirements.max_version {
            match Version::parse(max) {
                Ok(max) if *host_version <= max => {}
                _ => return false,
            }
        }
        if !requirements.os.is_empty() && !requirements.os.iter().any(|o| o == os) {
            return false;
        }
        if !requirements.arch.is_empty() && !requirements.arch.iter().any(|a| a == arch) {
            return false;
        }
        true
    }
}
