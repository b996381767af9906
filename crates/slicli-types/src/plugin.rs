//! Core plugin capability contract and its value types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use crate::errors::Result;

/// Per-metadata-entry overhead used when sizing an output for the cache.
const METADATA_ENTRY_OVERHEAD: usize = 100;

/// Input handed to a plugin for one invocation. Immutable per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInput {
    /// Raw content to process
    pub content: String,
    /// Language tag (e.g. "rust", "mermaid")
    pub language: String,
    /// Open options mapping; interpretation is plugin-specific
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

impl PluginInput {
    pub fn new(content: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            language: language.into(),
            options: HashMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}

/// A named auxiliary artifact produced alongside the HTML output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginAsset {
    pub name: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// Result value produced by a plugin invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginOutput {
    pub html: String,
    #[serde(default)]
    pub assets: Vec<PluginAsset>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl PluginOutput {
    pub fn html(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            ..Default::default()
        }
    }

    /// Approximate in-memory size used for cache accounting.
    pub fn size_bytes(&self) -> usize {
        let assets: usize = self
            .assets
            .iter()
            .map(|a| a.name.len() + a.content.len() + a.content_type.len())
            .sum();
        self.html.len() + assets + METADATA_ENTRY_OVERHEAD * self.metadata.len()
    }
}

/// Capability contract implemented by every plugin.
///
/// Implementations are treated as untrusted: the sandbox bounds their
/// execution time, recovers their panics, and (where the OS supports it)
/// constrains their memory. The cancellation token is advisory; a plugin
/// that ignores it is still bounded by its timeout.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin name, charset `[A-Za-z0-9_-]`
    fn name(&self) -> &str;

    /// Semver version string
    fn version(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// One-time initialization with host-provided configuration.
    async fn init(&self, config: HashMap<String, serde_json::Value>) -> Result<()>;

    /// Process one input. Expected to honor `token` but not trusted to.
    async fn execute(&self, token: CancellationToken, input: PluginInput) -> Result<PluginOutput>;

    /// Release plugin-held resources.
    async fn cleanup(&self) -> Result<()>;
}
