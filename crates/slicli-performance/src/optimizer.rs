//! Adaptive tuning: feeds monitor observations back into the executor

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::monitor::{MemoryStats, PerformanceMonitor};
use slicli_cache::OutputCache;
use slicli_executor::ConcurrentExecutor;

/// Optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Period between tuning passes
    pub tune_interval: Duration,
    /// Heap ceiling; above 80% of it a reclamation pass is forced
    pub max_heap_mb: u64,
    /// Memory pressure point where concurrency drops to the CPU count
    pub high_memory_bytes: u64,
    /// Idle point where concurrency is raised to 3x the CPU count
    pub low_memory_bytes: u64,
    /// Task count below which the process counts as idle
    pub idle_task_threshold: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            tune_interval: Duration::from_secs(30),
            max_heap_mb: 200,
            high_memory_bytes: 400 * 1024 * 1024,
            low_memory_bytes: 200 * 1024 * 1024,
            idle_task_threshold: 20,
        }
    }
}

/// Decision taken by one tuning pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningAction {
    pub force_reclamation: bool,
    pub set_concurrency: Option<usize>,
}

impl TuningAction {
    fn none() -> Self {
        Self {
            force_reclamation: false,
            set_concurrency: None,
        }
    }
}

/// Decide what to change given current gauges. Pure so the policy is
/// testable without a live process behind it.
pub(crate) fn plan(stats: &MemoryStats, config: &OptimizerConfig, cpus: usize) -> TuningAction {
    let mut action = TuningAction::none();

    let heap_mb = stats.heap_bytes / (1024 * 1024);
    if heap_mb * 10 > config.max_heap_mb * 8 {
        action.force_reclamation = true;
    }

    if stats.rss_bytes > config.high_memory_bytes {
        action.set_concurrency = Some(cpus.max(1));
    } else if stats.rss_bytes < config.low_memory_bytes
        && stats.concurrency_units < config.idle_task_threshold
    {
        action.set_concurrency = Some(3 * cpus.max(1));
    }

    action
}

/// Periodically reads the monitor's gauges and adjusts the executor's
/// concurrency and the reclamation threshold.
pub struct PerformanceOptimizer {
    monitor: Arc<PerformanceMonitor>,
    executor: Arc<ConcurrentExecutor>,
    config: RwLock<OptimizerConfig>,
    runner: std::sync::Mutex<Option<CancellationToken>>,
}

impl PerformanceOptimizer {
    pub fn new(
        monitor: Arc<PerformanceMonitor>,
        executor: Arc<ConcurrentExecutor>,
        config: OptimizerConfig,
    ) -> Arc<Self> {
        let optimizer = Arc::new(Self {
            monitor,
            executor,
            config: RwLock::new(config),
            runner: std::sync::Mutex::new(None),
        });

        // Reclamation drops expired fingerprint entries
        let executor = Arc::clone(&optimizer.executor);
        optimizer.monitor.on_gc(move || {
            executor.clear_expired_cache();
        });

        optimizer
    }

    /// Start the periodic tuning loop; idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut runner = self.runner.lock().expect("runner lock poisoned");
        if runner.is_some() {
            return;
        }
        let token = CancellationToken::new();
        *runner = Some(token.clone());

        let optimizer = Arc::clone(self);
        tokio::spawn(async move {
            let interval = optimizer.config.read().await.tune_interval;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => optimizer.tune_once().await,
                }
            }
            debug!("Optimizer loop stopped");
        });
        info!("Performance optimizer started");
    }

    pub fn stop(&self) {
        if let Some(token) = self.runner.lock().expect("runner lock poisoned").take() {
            token.cancel();
            info!("Performance optimizer stopped");
        }
    }

    /// One tuning pass over the current gauges.
    pub async fn tune_once(&self) {
        let stats = self.monitor.memory_stats();
        let config = self.config.read().await.clone();
        let action = plan(&stats, &config, num_cpus::get());

        if action.force_reclamation {
            debug!(
                heap_mb = stats.heap_bytes / (1024 * 1024),
                threshold_mb = config.max_heap_mb,
                "Heap above reclamation threshold"
            );
            self.monitor.trigger_gc();
        }
        if let Some(concurrency) = action.set_concurrency {
            if concurrency != self.executor.max_concurrent() {
                info!(
                    rss_mb = stats.rss_bytes / (1024 * 1024),
                    concurrency, "Adjusting executor concurrency"
                );
                self.executor.set_max_concurrent(concurrency).await;
            }
        }
    }

    /// Register an output cache so reclamation passes sweep its expired
    /// entries alongside the executor's fingerprint cache.
    pub fn watch_output_cache(&self, cache: Arc<OutputCache>) {
        self.monitor.on_gc(move || cache.cleanup());
    }

    /// Conservative settings for live presentations: low reclamation
    /// threshold, concurrency at the CPU count.
    pub async fn tune_for_presentation(&self) {
        self.config.write().await.max_heap_mb = 150;
        self.executor.set_max_concurrent(num_cpus::get().max(1)).await;
        info!("Applied presentation tuning profile");
    }

    /// Throughput-friendly settings for authoring: aggressive reclamation,
    /// concurrency at 3x the CPU count.
    pub async fn tune_for_development(&self) {
        self.config.write().await.max_heap_mb = 75;
        self.executor
            .set_max_concurrent(3 * num_cpus::get().max(1))
            .await;
        info!("Applied development tuning profile");
    }
}
