//! Per-plugin execution statistics

use serde::{Deserialize, Serialize};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Monotonic execution counters for one plugin.
///
/// Invariants: `successes + errors == executions` and
/// `timeouts + panics <= errors`. Mutation happens under the registry's
/// write lock, so plain fields suffice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginStatistics {
    pub executions: u64,
    pub successes: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub panics: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub total_duration: Duration,
    pub last_executed: Option<DateTime<Utc>>,
}

impl PluginStatistics {
    /// Record one completed execution.
    pub fn record_execution(
        &mut self,
        duration: Duration,
        success: bool,
        bytes_in: u64,
        bytes_out: u64,
    ) {
        self.executions += 1;
        if success {
            self.successes += 1;
        } else {
            self.errors += 1;
        }
        self.bytes_in += bytes_in;
        self.bytes_out += bytes_out;
        self.total_duration += duration;
        self.last_executed = Some(Utc::now());
    }

    /// Mark the last recorded error as a timeout.
    pub fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    /// Mark the last recorded error as a recovered panic.
    pub fn record_panic(&mut self) {
        self.panics += 1;
    }

    /// Mean execution duration, zero before the first execution.
    pub fn average_duration(&self) -> Duration {
        if self.executions == 0 {
            return Duration::ZERO;
        }
        self.total_duration / self.executions as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_hold_invariant() {
        let mut stats = PluginStatistics::default();
        stats.record_execution(Duration::from_millis(10), true, 100, 200);
        stats.record_execution(Duration::from_millis(30), false, 50, 0);
        stats.record_timeout();

        assert_eq!(stats.executions, 2);
        assert_eq!(stats.successes + stats.errors, stats.executions);
        assert!(stats.timeouts + stats.panics <= stats.errors);
        assert_eq!(stats.bytes_in, 150);
        assert_eq!(stats.bytes_out, 200);
    }

    #[test]
    fn average_duration_is_mean() {
        let mut stats = PluginStatistics::default();
        assert_eq!(stats.average_duration(), Duration::ZERO);

        stats.record_execution(Duration::from_millis(10), true, 0, 0);
        stats.record_execution(Duration::from_millis(30), true, 0, 0);
        assert_eq!(stats.average_duration(), Duration::from_millis(20));
    }

    #[test]
    fn last_executed_updates() {
        let mut stats = PluginStatistics::default();
        assert!(stats.last_executed.is_none());
        stats.record_execution(Duration::from_millis(1), true, 0, 0);
        assert!(stats.last_executed.is_some());
    }
}
