//! # slicli Performance
//!
//! Process-wide performance monitoring and adaptive tuning for the plugin
//! engine: gauges for memory and task counts, exponential moving averages
//! for render/plugin timings, a health probe, and an optimizer that feeds
//! concurrency and reclamation decisions back into the executor.

pub mod monitor;
pub mod optimizer;

pub use monitor::{MemoryStats, MonitorConfig, PerformanceMetrics, PerformanceMonitor};
pub use optimizer::{OptimizerConfig, PerformanceOptimizer, TuningAction};
