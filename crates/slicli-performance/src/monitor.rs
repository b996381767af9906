//! Process-wide performance monitor

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sysinfo::{ProcessesToUpdate, System};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Smoothing factor for the timing moving averages.
const EMA_ALPHA: f64 = 0.1;

/// Monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Period between background samples
    pub sample_interval: Duration,
    /// Memory ceiling for the health probe
    pub max_memory_bytes: u64,
    /// Task-count ceiling for the health probe
    pub max_concurrency_units: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(30),
            max_memory_bytes: 500 * 1024 * 1024,
            max_concurrency_units: 1000,
        }
    }
}

/// Point-in-time process memory and task gauges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub rss_bytes: u64,
    pub virtual_bytes: u64,
    /// Working-set proxy for heap occupancy
    pub heap_bytes: u64,
    pub concurrency_units: usize,
    pub gc_cycles: u64,
}

/// Full metrics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub uptime: Duration,
    pub memory: MemoryStats,
    pub slides_rendered: u64,
    pub plugins_executed: u64,
    pub http_requests: u64,
    pub websocket_connections: u64,
    pub avg_render_time_ms: f64,
    pub avg_plugin_time_ms: f64,
}

#[derive(Default)]
struct Timings {
    /// EMA in milliseconds; None before the first sample
    avg_render_ms: Option<f64>,
    avg_plugin_ms: Option<f64>,
}

fn ema(previous: Option<f64>, sample_ms: f64) -> f64 {
    match previous {
        Some(avg) => avg * (1.0 - EMA_ALPHA) + sample_ms * EMA_ALPHA,
        None => sample_ms,
    }
}

/// Collects operation counters, timing averages, and process gauges.
/// Recording methods are lock-free; `start`/`stop` manage a background
/// sampler and are idempotent.
pub struct PerformanceMonitor {
    config: MonitorConfig,
    started_at: Instant,
    sampler: Mutex<Option<CancellationToken>>,

    slides_rendered: AtomicU64,
    plugins_executed: AtomicU64,
    http_requests: AtomicU64,
    websocket_connections: AtomicU64,
    gc_cycles: AtomicU64,

    timings: Mutex<Timings>,
    system: Mutex<System>,
    /// Reclamation hooks run on `trigger_gc`
    gc_hooks: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            started_at: Instant::now(),
            sampler: Mutex::new(None),
            slides_rendered: AtomicU64::new(0),
            plugins_executed: AtomicU64::new(0),
            http_requests: AtomicU64::new(0),
            websocket_connections: AtomicU64::new(0),
            gc_cycles: AtomicU64::new(0),
            timings: Mutex::new(Timings::default()),
            system: Mutex::new(System::new()),
            gc_hooks: Mutex::new(Vec::new()),
        }
    }

    /// Start the background sampler. Starting an already-started monitor
    /// is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut sampler = self.sampler.lock().expect("sampler lock poisoned");
        if sampler.is_some() {
            debug!("Performance monitor already started");
            return;
        }
        let token = CancellationToken::new();
        *sampler = Some(token.clone());

        let monitor = Arc::clone(self);
        let interval = self.config.sample_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let stats = monitor.memory_stats();
                        debug!(
                            rss_mb = stats.rss_bytes / (1024 * 1024),
                            tasks = stats.concurrency_units,
                            "Performance sample"
                        );
                    }
                }
            }
            debug!("Performance sampler stopped");
        });
        info!("Performance monitor started");
    }

    /// Stop the background sampler. Stopping a stopped monitor is a no-op;
    /// the monitor can be started again afterwards.
    pub fn stop(&self) {
        let mut sampler = self.sampler.lock().expect("sampler lock poisoned");
        if let Some(token) = sampler.take() {
            token.cancel();
            info!("Performance monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.sampler.lock().expect("sampler lock poisoned").is_some()
    }

    pub fn record_slide_render(&self, duration: Duration) {
        self.slides_rendered.fetch_add(1, Ordering::Relaxed);
        let mut timings = self.timings.lock().expect("timings lock poisoned");
        timings.avg_render_ms = Some(ema(timings.avg_render_ms, duration.as_secs_f64() * 1000.0));
    }

    pub fn record_plugin_execution(&self, duration: Duration) {
        self.plugins_executed.fetch_add(1, Ordering::Relaxed);
        let mut timings = self.timings.lock().expect("timings lock poisoned");
        timings.avg_plugin_ms = Some(ema(timings.avg_plugin_ms, duration.as_secs_f64() * 1000.0));
    }

    pub fn record_http_request(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_websocket_connection(&self) {
        self.websocket_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Fresh process gauges. Called by the sampler and by the health/
    /// metrics getters, so readings never go stale between samples.
    pub fn memory_stats(&self) -> MemoryStats {
        let (rss, virt) = {
            let mut system = self.system.lock().expect("sysinfo lock poisoned");
            let pid = sysinfo::Pid::from_u32(std::process::id());
            system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            match system.process(pid) {
                Some(process) => (process.memory(), process.virtual_memory()),
                None => (0, 0),
            }
        };
        MemoryStats {
            rss_bytes: rss,
            virtual_bytes: virt,
            heap_bytes: rss,
            concurrency_units: current_task_count(),
            gc_cycles: self.gc_cycles.load(Ordering::Relaxed),
        }
    }

    pub fn get_metrics(&self) -> PerformanceMetrics {
        let timings = {
            let timings = self.timings.lock().expect("timings lock poisoned");
            (
                timings.avg_render_ms.unwrap_or(0.0),
                timings.avg_plugin_ms.unwrap_or(0.0),
            )
        };
        PerformanceMetrics {
            timestamp: chrono::Utc::now(),
            uptime: self.uptime(),
            memory: self.memory_stats(),
            slides_rendered: self.slides_rendered.load(Ordering::Relaxed),
            plugins_executed: self.plugins_executed.load(Ordering::Relaxed),
            http_requests: self.http_requests.load(Ordering::Relaxed),
            websocket_connections: self.websocket_connections.load(Ordering::Relaxed),
            avg_render_time_ms: timings.0,
            avg_plugin_time_ms: timings.1,
        }
    }

    /// Healthy means memory below the configured ceiling and a sane number
    /// of live tasks.
    pub fn is_healthy(&self) -> bool {
        let stats = self.memory_stats();
        stats.rss_bytes < self.config.max_memory_bytes
            && stats.concurrency_units < self.config.max_concurrency_units
    }

    /// Structured health report for status endpoints.
    pub fn health_status(&self) -> serde_json::Value {
        let metrics = self.get_metrics();
        serde_json::json!({
            "healthy": self.is_healthy(),
            "uptime": format_duration(metrics.uptime),
            "memory_mb": metrics.memory.rss_bytes / (1024 * 1024),
            "heap_mb": metrics.memory.heap_bytes / (1024 * 1024),
            "concurrency_units": metrics.memory.concurrency_units,
            "gc_cycles": metrics.memory.gc_cycles,
            "operations": {
                "slides_rendered": metrics.slides_rendered,
                "plugins_executed": metrics.plugins_executed,
                "http_requests": metrics.http_requests,
                "websocket_connections": metrics.websocket_connections,
            },
            "performance": {
                "avg_render_time_ms": metrics.avg_render_time_ms,
                "plugin_load_time_ms": metrics.avg_plugin_time_ms,
            },
        })
    }

    /// Register a reclamation hook run on every `trigger_gc`.
    pub fn on_gc(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.gc_hooks
            .lock()
            .expect("gc hooks lock poisoned")
            .push(Box::new(hook));
    }

    /// Run all reclamation hooks and count a cycle. Rust has no collector;
    /// reclamation here means dropping expired cache state.
    pub fn trigger_gc(&self) {
        let hooks = self.gc_hooks.lock().expect("gc hooks lock poisoned");
        for hook in hooks.iter() {
            hook();
        }
        let cycle = self.gc_cycles.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(cycle, hooks = hooks.len(), "Reclamation pass completed");
    }
}

/// Live tasks on the current runtime, zero outside one.
fn current_task_count() -> usize {
    tokio::runtime::Handle::try_current()
        .map(|handle| handle.metrics().num_alive_tasks())
        .unwrap_or(0)
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}
