//! Job and result types for batch execution

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use slicli_types::{Plugin, PluginError, PluginInput, PluginOutput};

/// One unit of work: a plugin applied to one input under a timeout.
pub struct ExecutionJob {
    /// Unique within a batch
    pub id: String,
    pub plugin: Arc<dyn Plugin>,
    pub input: PluginInput,
    pub timeout: Duration,
}

impl ExecutionJob {
    pub fn new(plugin: Arc<dyn Plugin>, input: PluginInput, timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            plugin,
            input,
            timeout,
        }
    }
}

/// Outcome of one job. Exactly one of `output`/`error` is set.
#[derive(Debug)]
pub struct ExecutionResult {
    pub job_id: String,
    pub plugin: String,
    pub output: Option<PluginOutput>,
    pub error: Option<PluginError>,
    pub duration: Duration,
    /// Whether the result came from the fingerprint cache
    pub cached: bool,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate outcome of a batch. One failed job never fails the batch;
/// every job reports independently.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub results: Vec<ExecutionResult>,
    pub total_duration: Duration,
    pub successes: usize,
    pub failures: usize,
}

impl BatchResult {
    pub fn merge(&mut self, other: BatchResult) {
        self.successes += other.successes;
        self.failures += other.failures;
        self.results.extend(other.results);
    }
}

/// A job currently holding an execution slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveJob {
    pub job_id: String,
    pub plugin: String,
    /// Time since the job acquired its slot
    pub elapsed: Duration,
}

/// Fingerprint cache counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FingerprintCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}
