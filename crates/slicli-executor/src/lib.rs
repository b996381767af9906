//! # slicli Executor
//!
//! Priority-aware concurrent batch scheduler for plugin jobs. Each job runs
//! through the sandbox/memory-limiter stack under an adjustable concurrency
//! bound; successful results are cached by content fingerprint so repeated
//! inputs skip the plugin entirely.

pub mod executor;
pub mod fingerprint;
pub mod models;

pub use executor::{ConcurrentExecutor, ExecutorConfig};
pub use fingerprint::fingerprint;
pub use models::{ActiveJob, BatchResult, ExecutionJob, ExecutionResult, FingerprintCacheStats};
