//! Memory-limited plugin execution with OS-level isolation and an active
//! monitoring loop.
//!
//! Each execution gets its own isolation group named
//! `slicli-plugin-<name>-<nanos>`: a cgroup on Linux (v2 preferred, v1
//! fallback), a job object on Windows, and best-effort environment hints on
//! macOS. A monitor task samples the group's usage every
//! `monitoring_interval` and escalates through warning/critical logs to
//! process termination after three consecutive exceedances.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::sandbox::invoke_guarded;
use slicli_types::{Plugin, PluginError, PluginInput, PluginOutput, Result};

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
use linux::IsolationGroup;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
use macos::IsolationGroup;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows::IsolationGroup;

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
mod unsupported;
#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
use unsupported::IsolationGroup;

/// Grace period between SIGTERM and SIGKILL when a group is terminated.
const TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// Consecutive exceedances tolerated before the group is terminated.
const MAX_EXCEEDANCES: u32 = 3;

/// Tunable enforcement policy for the monitoring loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementPolicy {
    /// Whether the monitor runs at all
    pub enforce: bool,
    /// Usage/limit ratio that triggers warning logs
    pub warning_threshold: f64,
    /// Usage/limit ratio that triggers critical logs
    pub critical_threshold: f64,
    /// Count critical-ratio observations as exceedances and terminate on
    /// repeat offenders
    pub kill_on_exceed: bool,
    /// Period between usage probes
    pub monitoring_interval: Duration,
}

impl Default for EnforcementPolicy {
    fn default() -> Self {
        Self {
            enforce: true,
            warning_threshold: 0.80,
            critical_threshold: 0.90,
            kill_on_exceed: false,
            monitoring_interval: Duration::from_millis(100),
        }
    }
}

/// Runs plugins under an OS memory limit and enforces it while they run.
pub struct MemoryLimiter {
    policy: tokio::sync::RwLock<EnforcementPolicy>,
    /// Live isolation groups by name, for `memory_usage` and shutdown
    groups: Arc<DashMap<String, Arc<IsolationGroup>>>,
}

impl Default for MemoryLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLimiter {
    pub fn new() -> Self {
        Self {
            policy: tokio::sync::RwLock::new(EnforcementPolicy::default()),
            groups: Arc::new(DashMap::new()),
        }
    }

    /// Whether OS-level limiting works here: on Linux a cgroup memory
    /// controller must be mounted; macOS and Windows always report true.
    pub fn is_available() -> bool {
        IsolationGroup::is_available()
    }

    /// Fail fast when the platform cannot isolate at all.
    pub fn initialize(&self) -> Result<()> {
        if !Self::is_available() {
            return Err(PluginError::PlatformUnsupported(
                "no memory isolation backend on this host".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn policy(&self) -> EnforcementPolicy {
        self.policy.read().await.clone()
    }

    pub async fn set_policy(&self, policy: EnforcementPolicy) {
        *self.policy.write().await = policy;
    }

    pub async fn set_enforcement(&self, enforce: bool) {
        self.policy.write().await.enforce = enforce;
    }

    pub async fn set_kill_on_exceed(&self, kill_on_exceed: bool) {
        self.policy.write().await.kill_on_exceed = kill_on_exceed;
    }

    pub async fn set_thresholds(&self, warning: f64, critical: f64) {
        let mut policy = self.policy.write().await;
        policy.warning_threshold = warning;
        policy.critical_threshold = critical;
    }

    /// Current usage per live isolation group.
    pub fn memory_usage(&self) -> HashMap<String, u64> {
        self.groups
            .iter()
            .filter_map(|entry| entry.value().usage().ok().map(|usage| (entry.key().clone(), usage)))
            .collect()
    }

    /// Release every remaining isolation group.
    pub fn cleanup(&self) {
        let names: Vec<String> = self.groups.iter().map(|entry| entry.key().clone()).collect();
        for name in names {
            if let Some((_, group)) = self.groups.remove(&name) {
                group.release();
            }
        }
    }

    /// Execute one plugin under `limit_bytes` of memory and `timeout` of
    /// wall time. The isolation group is created before the plugin starts,
    /// monitored while it runs, and released unconditionally afterwards —
    /// on success, timeout, panic, cancellation, and memory kill alike.
    pub async fn execute_with_memory_limit(
        &self,
        token: CancellationToken,
        plugin: Arc<dyn Plugin>,
        input: PluginInput,
        limit_bytes: u64,
        timeout: Duration,
    ) -> Result<PluginOutput> {
        let name = plugin.name().to_string();
        let policy = self.policy.read().await.clone();

        let group = match IsolationGroup::create(&name, limit_bytes) {
            Ok(group) => {
                if let Err(e) = group.attach_current_process() {
                    warn!(plugin = %name, error = %e, "Failed to attach process to isolation group");
                }
                Some(Arc::new(group))
            }
            Err(e) => {
                // Run unisolated rather than refuse: the timeout still bounds
                // the plugin, and availability was the caller's call to check
                warn!(plugin = %name, error = %e, "Memory isolation unavailable for this execution");
                None
            }
        };

        if let Some(group) = &group {
            self.groups.insert(group.name().to_string(), Arc::clone(group));
        }

        let exceeded: Arc<Mutex<Option<(u64, u64)>>> = Arc::new(Mutex::new(None));
        let monitor_stop = CancellationToken::new();
        let exec_token = token.child_token();

        let monitor: Option<JoinHandle<()>> = match (&group, policy.enforce) {
            (Some(group), true) => Some(tokio::spawn(monitor_group(
                Arc::clone(group),
                limit_bytes,
                policy,
                monitor_stop.clone(),
                exec_token.clone(),
                Arc::clone(&exceeded),
                name.clone(),
            ))),
            _ => None,
        };

        let result = invoke_guarded(&exec_token, plugin, input, timeout, &name).await;

        monitor_stop.cancel();
        if let Some(monitor) = monitor {
            let _ = monitor.await;
        }
        if let Some(group) = group {
            self.groups.remove(group.name());
            group.release();
        }

        // A memory kill outranks whatever the aborted plugin reported
        let killed = *exceeded.lock().expect("exceedance lock poisoned");
        if let Some((usage, limit)) = killed {
            return Err(PluginError::ResourceExhausted {
                plugin: name,
                usage,
                limit,
            });
        }
        result
    }
}

/// Unique group name for one execution.
fn group_name(plugin_name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("slicli-plugin-{plugin_name}-{nanos}")
}

#[derive(Default)]
struct MonitorState {
    exceedances: u32,
    last_critical_log: Option<Instant>,
    last_warning_log: Option<Instant>,
}

#[derive(Debug, PartialEq, Eq)]
enum TickAction {
    /// Exceedance budget exhausted; terminate the group
    Terminate,
    LogCritical,
    LogWarning,
    Quiet,
}

const CRITICAL_LOG_THROTTLE: Duration = Duration::from_secs(1);
const WARNING_LOG_THROTTLE: Duration = Duration::from_secs(5);

/// One monitoring observation. Pure so the escalation ladder is testable
/// without an OS group.
fn evaluate_tick(
    usage: u64,
    limit: u64,
    policy: &EnforcementPolicy,
    state: &mut MonitorState,
    now: Instant,
) -> TickAction {
    let ratio = usage as f64 / limit as f64;

    if usage >= limit || (ratio > policy.critical_threshold && policy.kill_on_exceed) {
        state.exceedances += 1;
        if state.exceedances >= MAX_EXCEEDANCES {
            return TickAction::Terminate;
        }
        return throttle_critical(state, now);
    }

    state.exceedances = 0;
    if ratio > policy.critical_threshold {
        throttle_critical(state, now)
    } else if ratio > policy.warning_threshold {
        let due = state
            .last_warning_log
            .map(|at| now.duration_since(at) >= WARNING_LOG_THROTTLE)
            .unwrap_or(true);
        if due {
            state.last_warning_log = Some(now);
            TickAction::LogWarning
        } else {
            TickAction::Quiet
        }
    } else {
        TickAction::Quiet
    }
}

fn throttle_critical(state: &mut MonitorState, now: Instant) -> TickAction {
    let due = state
        .last_critical_log
        .map(|at| now.duration_since(at) >= CRITICAL_LOG_THROTTLE)
        .unwrap_or(true);
    if due {
        state.last_critical_log = Some(now);
        TickAction::LogCritical
    } else {
        TickAction::Quiet
    }
}

async fn monitor_group(
    group: Arc<IsolationGroup>,
    limit: u64,
    policy: EnforcementPolicy,
    stop: CancellationToken,
    exec_cancel: CancellationToken,
    exceeded: Arc<Mutex<Option<(u64, u64)>>>,
    plugin: String,
) {
    let mut ticker = tokio::time::interval(policy.monitoring_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut state = MonitorState::default();

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let usage = match group.usage() {
            Ok(usage) => usage,
            Err(e) => {
                debug!(plugin = %plugin, error = %e, "Usage probe failed");
                continue;
            }
        };

        match evaluate_tick(usage, limit, &policy, &mut state, Instant::now()) {
            TickAction::Terminate => {
                error!(
                    plugin = %plugin,
                    usage_bytes = usage,
                    limit_bytes = limit,
                    "Memory limit exceeded repeatedly; terminating processes in group"
                );
                *exceeded.lock().expect("exceedance lock poisoned") = Some((usage, limit));
                exec_cancel.cancel();
                group.terminate_processes(TERMINATION_GRACE).await;
                break;
            }
            TickAction::LogCritical => {
                error!(
                    plugin = %plugin,
                    usage_bytes = usage,
                    limit_bytes = limit,
                    "Plugin memory usage critical"
                );
            }
            TickAction::LogWarning => {
                warn!(
                    plugin = %plugin,
                    usage_bytes = usage,
                    limit_bytes = limit,
                    "Plugin memory usage above warning threshold"
                );
            }
            TickAction::Quiet => {}
        }
    }
}
