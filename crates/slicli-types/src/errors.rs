//! Error types shared across the engine crates

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the plugin engine
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error("plugin already registered: {0}")]
    AlreadyExists(String),

    #[error("metadata validation failed: {0}")]
    ValidationFailed(String),

    #[error("plugin {plugin}: execution timeout after {timeout:?}")]
    Timeout { plugin: String, timeout: Duration },

    /// Cancellation is propagated unwrapped so callers can distinguish it
    /// from timeouts and plugin failures.
    #[error("execution cancelled")]
    Cancelled,

    #[error("plugin {plugin}: {operation} failed: {cause}")]
    ExecutionFailed {
        plugin: String,
        operation: String,
        cause: String,
    },

    #[error("plugin {plugin}: memory limit exceeded ({usage} of {limit} bytes)")]
    ResourceExhausted {
        plugin: String,
        usage: u64,
        limit: u64,
    },

    #[error("memory limiting unsupported on this platform: {0}")]
    PlatformUnsupported(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    /// Wrap a plugin failure with its originating plugin and operation.
    pub fn execution(plugin: impl Into<String>, operation: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            plugin: plugin.into(),
            operation: operation.into(),
            cause: cause.into(),
        }
    }

    /// Whether this error is a propagated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this error is an execution timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether this error came from a recovered panic.
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::ExecutionFailed { cause, .. } if cause.starts_with("panic"))
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display_includes_duration() {
        let err = PluginError::Timeout {
            plugin: "mermaid".to_string(),
            timeout: Duration::from_millis(500),
        };
        let msg = err.to_string();
        assert!(msg.contains("mermaid"));
        assert!(msg.contains("timeout"));
        assert!(msg.contains("500ms"));
    }

    #[test]
    fn cancellation_is_distinguishable() {
        assert!(PluginError::Cancelled.is_cancelled());
        assert!(!PluginError::NotFound("x".into()).is_cancelled());
    }

    #[test]
    fn panic_classification() {
        let err = PluginError::execution("p", "execute", "panic: boom");
        assert!(err.is_panic());
        let err = PluginError::execution("p", "execute", "not a panic");
        assert!(!err.is_panic());
    }
}
