//! Plugin metadata, lifecycle status, and validation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{PluginError, Result};
use crate::stats::PluginStatistics;

/// Category a plugin belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    Processor,
    Exporter,
    Theme,
}

impl PluginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processor => "processor",
            Self::Exporter => "exporter",
            Self::Theme => "theme",
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginType {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "processor" => Ok(Self::Processor),
            "exporter" => Ok(Self::Exporter),
            "theme" => Ok(Self::Theme),
            other => Err(PluginError::ValidationFailed(format!(
                "unknown plugin type: {other}"
            ))),
        }
    }
}

/// Lifecycle state of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    /// Registered, not yet executed
    Loaded,
    /// At least one successful execution
    Active,
    /// Last execution panicked or the host flagged it
    Error,
    /// Disabled by admin action
    Disabled,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Loaded => "loaded",
            Self::Active => "active",
            Self::Error => "error",
            Self::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// Descriptive metadata supplied at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    #[serde(default)]
    pub author: Option<String>,
}

impl PluginMetadata {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        plugin_type: PluginType,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            plugin_type,
            author: None,
        }
    }

    /// Validate name charset, semver version, and non-empty description.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(PluginError::ValidationFailed(
                "plugin name must not be empty".to_string(),
            ));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(PluginError::ValidationFailed(format!(
                "plugin name {:?} contains characters outside [A-Za-z0-9_-]",
                self.name
            )));
        }
        if semver::Version::parse(&self.version).is_err() {
            return Err(PluginError::ValidationFailed(format!(
                "plugin {}: version {:?} is not valid semver",
                self.name, self.version
            )));
        }
        if self.description.is_empty() {
            return Err(PluginError::ValidationFailed(format!(
                "plugin {}: description must not be empty",
                self.name
            )));
        }
        Ok(())
    }
}

/// A registered plugin together with its lifecycle state and statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadedPlugin {
    pub metadata: PluginMetadata,
    pub status: PluginStatus,
    /// Reason attached to the last status change, if any
    pub status_reason: Option<String>,
    pub loaded_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub statistics: PluginStatistics,
}

impl LoadedPlugin {
    pub fn new(metadata: PluginMetadata) -> Self {
        Self {
            metadata,
            status: PluginStatus::Loaded,
            status_reason: None,
            loaded_at: Utc::now(),
            last_used: None,
            statistics: PluginStatistics::default(),
        }
    }
}
