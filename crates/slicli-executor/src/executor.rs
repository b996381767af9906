//! Priority-grouped concurrent executor with a fingerprint result cache

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::fingerprint::fingerprint;
use crate::models::{ActiveJob, BatchResult, ExecutionJob, ExecutionResult, FingerprintCacheStats};
use slicli_registry::PluginRegistry;
use slicli_sandbox::{invoke_guarded, MemoryLimiter};
use slicli_types::{PluginError, PluginInput, PluginOutput};

/// Semaphore capacity used when a non-positive value is requested.
const DEFAULT_MAX_CONCURRENT: usize = 10;

/// Plugins that must run before anything else renders usefully.
const ESSENTIAL_PLUGINS: [&str; 2] = ["syntax-highlight", "code-exec"];

/// Plugins that enhance output but can wait for the essentials.
const ENHANCEMENT_PLUGINS: [&str; 1] = ["mermaid"];

/// Executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Initial concurrency bound; adjustable at runtime
    pub max_concurrent: usize,
    /// Freshness window for cached results
    pub result_ttl: Duration,
    /// When set, every job runs under this OS memory limit
    pub memory_limit_bytes: Option<u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            result_ttl: Duration::from_secs(300),
            memory_limit_bytes: None,
        }
    }
}

struct CachedResult {
    output: PluginOutput,
    stored_at: Instant,
}

struct ActiveEntry {
    plugin: String,
    started: Instant,
}

/// Runs batches of plugin jobs in parallel under an adjustable concurrency
/// bound, with strict ordering between priority groups and a per-input
/// result cache. A batch never fails as a whole; each job reports its own
/// outcome.
pub struct ConcurrentExecutor {
    config: ExecutorConfig,
    semaphore: RwLock<Arc<Semaphore>>,
    max_concurrent: AtomicUsize,
    cache: DashMap<String, CachedResult>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    active: DashMap<String, ActiveEntry>,
    limiter: Arc<MemoryLimiter>,
    registry: Option<Arc<PluginRegistry>>,
}

impl ConcurrentExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let permits = if config.max_concurrent == 0 {
            DEFAULT_MAX_CONCURRENT
        } else {
            config.max_concurrent
        };
        Self {
            semaphore: RwLock::new(Arc::new(Semaphore::new(permits))),
            max_concurrent: AtomicUsize::new(permits),
            cache: DashMap::new(),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            active: DashMap::new(),
            limiter: Arc::new(MemoryLimiter::new()),
            registry: None,
            config,
        }
    }

    /// Wire a registry so executions feed per-plugin statistics.
    pub fn with_registry(mut self, registry: Arc<PluginRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// The memory limiter backing memory-limited jobs, for policy tuning.
    pub fn memory_limiter(&self) -> Arc<MemoryLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Run all `jobs` in parallel, bounded by the current concurrency cap.
    pub async fn execute_concurrent(
        &self,
        token: &CancellationToken,
        jobs: Vec<ExecutionJob>,
    ) -> BatchResult {
        let started = Instant::now();
        let job_count = jobs.len();

        let results =
            futures::future::join_all(jobs.into_iter().map(|job| self.execute_job(token, job)))
                .await;

        let successes = results.iter().filter(|r| r.is_success()).count();
        info!(
            jobs = job_count,
            successes,
            failures = job_count - successes,
            duration_ms = started.elapsed().as_millis() as u64,
            "Batch execution finished"
        );
        BatchResult {
            successes,
            failures: job_count - successes,
            results,
            total_duration: started.elapsed(),
        }
    }

    /// Run groups strictly in order: every job of group *i* completes,
    /// successfully or not, before any job of group *i+1* starts. Jobs
    /// within a group run in parallel.
    pub async fn execute_with_priority(
        &self,
        token: &CancellationToken,
        groups: Vec<Vec<ExecutionJob>>,
    ) -> BatchResult {
        let started = Instant::now();
        let mut batch = BatchResult::default();
        for group in groups {
            let group_result = self.execute_concurrent(token, group).await;
            batch.merge(group_result);
        }
        batch.total_duration = started.elapsed();
        batch
    }

    /// Partition jobs into priority tiers by plugin name: essential
    /// renderers first, enhancements second, everything else last. Empty
    /// tiers are dropped.
    pub fn optimize_for_content(&self, jobs: Vec<ExecutionJob>) -> Vec<Vec<ExecutionJob>> {
        let mut essential = Vec::new();
        let mut enhancement = Vec::new();
        let mut other = Vec::new();

        for job in jobs {
            let name = job.plugin.name();
            if ESSENTIAL_PLUGINS.contains(&name) {
                essential.push(job);
            } else if ENHANCEMENT_PLUGINS.contains(&name) {
                enhancement.push(job);
            } else {
                other.push(job);
            }
        }

        [essential, enhancement, other]
            .into_iter()
            .filter(|tier| !tier.is_empty())
            .collect()
    }

    async fn execute_job(&self, token: &CancellationToken, job: ExecutionJob) -> ExecutionResult {
        let started = Instant::now();
        let plugin_name = job.plugin.name().to_string();
        let key = fingerprint(&plugin_name, &job.input);

        if let Some(output) = self.cache_lookup(&key) {
            debug!(plugin = %plugin_name, job = %job.id, "Fingerprint cache hit");
            return ExecutionResult {
                job_id: job.id,
                plugin: plugin_name,
                output: Some(output),
                error: None,
                duration: started.elapsed(),
                cached: true,
            };
        }

        let semaphore = Arc::clone(&*self.semaphore.read().await);
        let permit = tokio::select! {
            _ = token.cancelled() => {
                return ExecutionResult {
                    job_id: job.id,
                    plugin: plugin_name,
                    output: None,
                    error: Some(PluginError::Cancelled),
                    duration: started.elapsed(),
                    cached: false,
                };
            }
            permit = semaphore.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    return ExecutionResult {
                        job_id: job.id,
                        plugin: plugin_name.clone(),
                        output: None,
                        error: Some(PluginError::execution(
                            &plugin_name,
                            "execute",
                            "executor semaphore closed",
                        )),
                        duration: started.elapsed(),
                        cached: false,
                    };
                }
            },
        };

        self.active.insert(
            job.id.clone(),
            ActiveEntry {
                plugin: plugin_name.clone(),
                started,
            },
        );

        let result = match self.config.memory_limit_bytes {
            Some(limit) => {
                self.limiter
                    .execute_with_memory_limit(
                        token.child_token(),
                        Arc::clone(&job.plugin),
                        job.input.clone(),
                        limit,
                        job.timeout,
                    )
                    .await
            }
            None => {
                invoke_guarded(
                    token,
                    Arc::clone(&job.plugin),
                    job.input.clone(),
                    job.timeout,
                    &plugin_name,
                )
                .await
            }
        };

        self.active.remove(&job.id);
        drop(permit);

        let duration = started.elapsed();
        self.record_statistics(&plugin_name, &result, duration, &job.input)
            .await;

        match result {
            Ok(output) => {
                // Only successes are worth replaying
                self.cache.insert(
                    key,
                    CachedResult {
                        output: output.clone(),
                        stored_at: Instant::now(),
                    },
                );
                ExecutionResult {
                    job_id: job.id,
                    plugin: plugin_name,
                    output: Some(output),
                    error: None,
                    duration,
                    cached: false,
                }
            }
            Err(e) => ExecutionResult {
                job_id: job.id,
                plugin: plugin_name,
                output: None,
                error: Some(e),
                duration,
                cached: false,
            },
        }
    }

    fn cache_lookup(&self, key: &str) -> Option<PluginOutput> {
        let fresh = match self.cache.get(key) {
            Some(entry) => {
                if entry.stored_at.elapsed() <= self.config.result_ttl {
                    Some(entry.output.clone())
                } else {
                    None
                }
            }
            None => {
                self.cache_misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        match fresh {
            Some(output) => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                Some(output)
            }
            None => {
                // Stale entries are removed on access
                self.cache.remove(key);
                self.cache_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn record_statistics(
        &self,
        plugin: &str,
        result: &slicli_types::Result<PluginOutput>,
        duration: Duration,
        input: &PluginInput,
    ) {
        let Some(registry) = &self.registry else {
            return;
        };
        let bytes_in = input.content.len() as u64;
        match result {
            Ok(output) => {
                let _ = registry
                    .update_statistics(plugin, duration, true, bytes_in, output.size_bytes() as u64)
                    .await;
            }
            // Cancelled jobs never ran to completion; they are not an
            // execution from the plugin's point of view
            Err(PluginError::Cancelled) => {}
            Err(e) => {
                let _ = registry
                    .update_statistics(plugin, duration, false, bytes_in, 0)
                    .await;
                if e.is_timeout() {
                    let _ = registry.increment_timeout(plugin).await;
                } else if e.is_panic() {
                    let _ = registry.increment_panic(plugin).await;
                }
            }
        }
    }

    pub fn cache_stats(&self) -> FingerprintCacheStats {
        FingerprintCacheStats {
            entries: self.cache.len(),
            hits: self.cache_hits.load(Ordering::Relaxed),
            misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Drop every cached result older than the freshness window.
    pub fn clear_expired_cache(&self) {
        let ttl = self.config.result_ttl;
        self.cache.retain(|_, entry| entry.stored_at.elapsed() <= ttl);
    }

    /// Replace the concurrency bound. Jobs already holding permits on the
    /// old semaphore drain naturally; new jobs see the new capacity. A
    /// zero request falls back to the default of 10.
    pub async fn set_max_concurrent(&self, max_concurrent: usize) {
        let permits = if max_concurrent == 0 {
            DEFAULT_MAX_CONCURRENT
        } else {
            max_concurrent
        };
        *self.semaphore.write().await = Arc::new(Semaphore::new(permits));
        self.max_concurrent.store(permits, Ordering::Relaxed);
        info!(max_concurrent = permits, "Executor concurrency bound updated");
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::Relaxed)
    }

    /// Jobs currently holding execution slots.
    pub fn active_jobs(&self) -> HashMap<String, ActiveJob> {
        self.active
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    ActiveJob {
                        job_id: entry.key().clone(),
                        plugin: entry.value().plugin.clone(),
                        elapsed: entry.value().started.elapsed(),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use slicli_types::{Plugin, PluginMetadata, PluginType, Result};
    use std::sync::Mutex;

    /// Test plugin with scripted behavior and shared observation state.
    struct ScriptedPlugin {
        name: String,
        delay: Duration,
        fail: bool,
        panic_message: Option<&'static str>,
        invocations: Arc<AtomicUsize>,
        events: Arc<Mutex<Vec<String>>>,
        concurrent_now: Arc<AtomicUsize>,
        concurrent_peak: Arc<AtomicUsize>,
    }

    impl ScriptedPlugin {
        fn named(name: &str) -> Self {
            Self {
                name: name.to_string(),
                delay: Duration::ZERO,
                fail: false,
                panic_message: None,
                invocations: Arc::new(AtomicUsize::new(0)),
                events: Arc::new(Mutex::new(Vec::new())),
                concurrent_now: Arc::new(AtomicUsize::new(0)),
                concurrent_peak: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        fn panicking(mut self, message: &'static str) -> Self {
            self.panic_message = Some(message);
            self
        }
    }

    #[async_trait]
    impl Plugin for ScriptedPlugin {
        fn name(&self) -> &str {
            &self.name
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn description(&self) -> &str {
            "scripted test plugin"
        }
        async fn init(&self, _config: HashMap<String, serde_json::Value>) -> Result<()> {
            Ok(())
        }
        async fn execute(
            &self,
            _token: CancellationToken,
            input: PluginInput,
        ) -> Result<PluginOutput> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            let now = self.concurrent_now.fetch_add(1, Ordering::SeqCst) + 1;
            self.concurrent_peak.fetch_max(now, Ordering::SeqCst);
            self.events.lock().unwrap().push(format!("start:{}", self.name));

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            self.events.lock().unwrap().push(format!("end:{}", self.name));
            self.concurrent_now.fetch_sub(1, Ordering::SeqCst);

            if let Some(message) = self.panic_message {
                panic!("{message}");
            }
            if self.fail {
                return Err(PluginError::InvalidInput("scripted failure".to_string()));
            }
            Ok(PluginOutput::html(format!("<p>{}</p>", input.content)))
        }
        async fn cleanup(&self) -> Result<()> {
            Ok(())
        }
    }

    fn job(plugin: &Arc<ScriptedPlugin>, content: &str) -> ExecutionJob {
        ExecutionJob::new(
            Arc::clone(plugin) as Arc<dyn Plugin>,
            PluginInput::new(content, "text"),
            Duration::from_secs(5),
        )
    }

    fn executor() -> ConcurrentExecutor {
        ConcurrentExecutor::new(ExecutorConfig::default())
    }

    #[tokio::test]
    async fn identical_input_hits_cache_without_reinvoking() {
        let executor = executor();
        let plugin = Arc::new(ScriptedPlugin::named("highlight"));
        let token = CancellationToken::new();

        let first = executor
            .execute_concurrent(&token, vec![job(&plugin, "same content")])
            .await;
        assert!(!first.results[0].cached);
        let first_html = first.results[0].output.as_ref().unwrap().html.clone();

        let second = executor
            .execute_concurrent(&token, vec![job(&plugin, "same content")])
            .await;
        assert!(second.results[0].cached);
        assert_eq!(second.results[0].output.as_ref().unwrap().html, first_html);
        assert_eq!(plugin.invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_options_miss_the_cache() {
        let executor = executor();
        let plugin = Arc::new(ScriptedPlugin::named("highlight"));
        let token = CancellationToken::new();

        let mut first = job(&plugin, "content");
        first.input = first.input.with_option("theme", serde_json::json!("dark"));
        executor.execute_concurrent(&token, vec![first]).await;

        let mut second = job(&plugin, "content");
        second.input = second.input.with_option("theme", serde_json::json!("light"));
        let batch = executor.execute_concurrent(&token, vec![second]).await;

        assert!(!batch.results[0].cached);
        assert_eq!(plugin.invocations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn errors_are_never_cached() {
        let executor = executor();
        let plugin = Arc::new(ScriptedPlugin::named("flaky").failing());
        let token = CancellationToken::new();

        for _ in 0..2 {
            let batch = executor
                .execute_concurrent(&token, vec![job(&plugin, "same")])
                .await;
            assert!(!batch.results[0].is_success());
            assert!(!batch.results[0].cached);
        }
        assert_eq!(plugin.invocations.load(Ordering::SeqCst), 2);
        assert_eq!(executor.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn one_bad_job_does_not_fail_the_batch() {
        let executor = executor();
        let ok = Arc::new(ScriptedPlugin::named("ok"));
        let panics = Arc::new(ScriptedPlugin::named("panics").panicking("kaboom"));
        let slow = Arc::new(ScriptedPlugin::named("slow").with_delay(Duration::from_secs(5)));
        let token = CancellationToken::new();

        let mut timeout_job = job(&slow, "z");
        timeout_job.timeout = Duration::from_millis(50);

        let batch = executor
            .execute_concurrent(
                &token,
                vec![job(&ok, "x"), job(&panics, "y"), timeout_job],
            )
            .await;

        assert_eq!(batch.successes, 1);
        assert_eq!(batch.failures, 2);
        assert_eq!(batch.results.len(), 3);

        let by_plugin: HashMap<&str, &ExecutionResult> = batch
            .results
            .iter()
            .map(|r| (r.plugin.as_str(), r))
            .collect();
        assert!(by_plugin["ok"].is_success());
        assert!(by_plugin["panics"]
            .error
            .as_ref()
            .unwrap()
            .to_string()
            .contains("panic"));
        assert!(by_plugin["slow"].error.as_ref().unwrap().is_timeout());
    }

    #[tokio::test]
    async fn priority_groups_run_in_strict_order() {
        let executor = executor();
        let events = Arc::new(Mutex::new(Vec::new()));

        let mut a = ScriptedPlugin::named("a").with_delay(Duration::from_millis(60));
        let mut b = ScriptedPlugin::named("b").with_delay(Duration::from_millis(30));
        let mut c = ScriptedPlugin::named("c");
        a.events = Arc::clone(&events);
        b.events = Arc::clone(&events);
        c.events = Arc::clone(&events);
        let (a, b, c) = (Arc::new(a), Arc::new(b), Arc::new(c));

        let token = CancellationToken::new();
        let batch = executor
            .execute_with_priority(
                &token,
                vec![vec![job(&a, "1"), job(&b, "2")], vec![job(&c, "3")]],
            )
            .await;
        assert_eq!(batch.successes, 3);

        let events = events.lock().unwrap().clone();
        let position = |needle: &str| events.iter().position(|e| e == needle).unwrap();
        assert!(position("start:c") > position("end:a"));
        assert!(position("start:c") > position("end:b"));
    }

    #[tokio::test]
    async fn optimize_for_content_partitions_by_tier() {
        let executor = executor();
        let jobs = vec![
            job(&Arc::new(ScriptedPlugin::named("toc")), "1"),
            job(&Arc::new(ScriptedPlugin::named("syntax-highlight")), "2"),
            job(&Arc::new(ScriptedPlugin::named("mermaid")), "3"),
            job(&Arc::new(ScriptedPlugin::named("code-exec")), "4"),
        ];

        let groups = executor.optimize_for_content(jobs);
        assert_eq!(groups.len(), 3);
        let names = |group: &Vec<ExecutionJob>| -> Vec<String> {
            group.iter().map(|j| j.plugin.name().to_string()).collect()
        };
        assert_eq!(names(&groups[0]), vec!["syntax-highlight", "code-exec"]);
        assert_eq!(names(&groups[1]), vec!["mermaid"]);
        assert_eq!(names(&groups[2]), vec!["toc"]);
    }

    #[tokio::test]
    async fn empty_tiers_are_dropped() {
        let executor = executor();
        let jobs = vec![job(&Arc::new(ScriptedPlugin::named("toc")), "1")];
        let groups = executor.optimize_for_content(jobs);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0][0].plugin.name(), "toc");
    }

    #[tokio::test]
    async fn concurrency_bound_of_one_serializes_jobs() {
        let executor = executor();
        executor.set_max_concurrent(1).await;
        assert_eq!(executor.max_concurrent(), 1);

        let plugin = Arc::new(ScriptedPlugin::named("gauge").with_delay(Duration::from_millis(20)));
        let token = CancellationToken::new();
        let jobs = (0..4).map(|i| job(&plugin, &format!("input {i}"))).collect();
        executor.execute_concurrent(&token, jobs).await;

        assert_eq!(plugin.concurrent_peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_concurrency_request_falls_back_to_default() {
        let executor = executor();
        executor.set_max_concurrent(0).await;
        assert_eq!(executor.max_concurrent(), DEFAULT_MAX_CONCURRENT);
    }

    #[tokio::test]
    async fn cancellation_fails_pending_jobs_with_cancelled() {
        let executor = Arc::new(executor());
        executor.set_max_concurrent(1).await;

        let slow = Arc::new(ScriptedPlugin::named("slow").with_delay(Duration::from_millis(500)));
        let quick = Arc::new(ScriptedPlugin::named("quick"));
        let token = CancellationToken::new();

        let batch = tokio::spawn({
            let executor = Arc::clone(&executor);
            let token = token.clone();
            let jobs = vec![job(&slow, "blocker"), job(&quick, "queued")];
            async move { executor.execute_concurrent(&token, jobs).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        let batch = batch.await.unwrap();

        let queued = batch.results.iter().find(|r| r.plugin == "quick").unwrap();
        assert!(matches!(queued.error, Some(PluginError::Cancelled)));
        assert_eq!(quick.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn active_jobs_are_visible_while_running() {
        let executor = Arc::new(executor());
        let plugin = Arc::new(ScriptedPlugin::named("worker").with_delay(Duration::from_millis(200)));
        let token = CancellationToken::new();

        let batch = tokio::spawn({
            let executor = Arc::clone(&executor);
            let token = token.clone();
            let jobs = vec![job(&plugin, "x")];
            async move { executor.execute_concurrent(&token, jobs).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let active = executor.active_jobs();
        assert_eq!(active.len(), 1);
        assert!(active.values().any(|j| j.plugin == "worker"));

        batch.await.unwrap();
        assert!(executor.active_jobs().is_empty());
    }

    #[tokio::test]
    async fn clear_cache_round_trip() {
        let executor = executor();
        let plugin = Arc::new(ScriptedPlugin::named("p"));
        let token = CancellationToken::new();
        executor
            .execute_concurrent(&token, vec![job(&plugin, "x")])
            .await;
        assert_eq!(executor.cache_stats().entries, 1);

        executor.clear_cache();
        assert_eq!(executor.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn expired_results_are_dropped_eagerly_and_lazily() {
        let executor = ConcurrentExecutor::new(ExecutorConfig {
            result_ttl: Duration::from_millis(10),
            ..ExecutorConfig::default()
        });
        let plugin = Arc::new(ScriptedPlugin::named("p"));
        let token = CancellationToken::new();

        executor
            .execute_concurrent(&token, vec![job(&plugin, "x")])
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Lazy removal on access: a re-execution reinvokes the plugin
        let batch = executor
            .execute_concurrent(&token, vec![job(&plugin, "x")])
            .await;
        assert!(!batch.results[0].cached);
        assert_eq!(plugin.invocations.load(Ordering::SeqCst), 2);

        // Eager removal
        tokio::time::sleep(Duration::from_millis(30)).await;
        executor.clear_expired_cache();
        assert_eq!(executor.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn registry_statistics_reflect_outcomes() {
        let registry = Arc::new(PluginRegistry::new());
        let slow = Arc::new(ScriptedPlugin::named("slow").with_delay(Duration::from_secs(5)));
        registry
            .register(
                Arc::clone(&slow) as Arc<dyn Plugin>,
                PluginMetadata::new("slow", "1.0.0", "slow plugin", PluginType::Processor),
            )
            .await
            .unwrap();

        let executor = ConcurrentExecutor::new(ExecutorConfig::default())
            .with_registry(Arc::clone(&registry));
        let token = CancellationToken::new();

        let mut timeout_job = job(&slow, "x");
        timeout_job.timeout = Duration::from_millis(50);
        executor.execute_concurrent(&token, vec![timeout_job]).await;

        let stats = registry.get_statistics("slow").await.unwrap();
        assert_eq!(stats.executions, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.successes + stats.errors, stats.executions);
    }
}
