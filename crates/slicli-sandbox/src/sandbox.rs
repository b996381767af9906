//! Sandboxed single-invocation runner: semaphore, timeout, panic recovery

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use slicli_types::{Plugin, PluginError, PluginInput, PluginOutput, Result};

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Global cap on concurrently executing plugins
    pub max_concurrent: usize,
    /// Timeout applied by `execute`
    pub default_timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// Executes one plugin invocation at a time under a shared concurrency
/// gate. The runner itself never fails: plugin panics are recovered into
/// errors, timeouts abort the invocation, and cancellation is surfaced
/// unwrapped.
pub struct SandboxExecutor {
    config: SandboxConfig,
    semaphore: Arc<Semaphore>,
    /// Plugins currently past semaphore acquisition, by start time
    executing: Arc<DashMap<String, Instant>>,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        let permits = config.max_concurrent.max(1);
        Self {
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
            executing: Arc::new(DashMap::new()),
        }
    }

    pub async fn execute(
        &self,
        token: CancellationToken,
        plugin: Arc<dyn Plugin>,
        input: PluginInput,
    ) -> Result<PluginOutput> {
        self.execute_with_timeout(token, plugin, input, self.config.default_timeout)
            .await
    }

    pub async fn execute_with_timeout(
        &self,
        token: CancellationToken,
        plugin: Arc<dyn Plugin>,
        input: PluginInput,
        timeout: Duration,
    ) -> Result<PluginOutput> {
        let name = plugin.name().to_string();

        let permit = tokio::select! {
            _ = token.cancelled() => {
                debug!(plugin = %name, "Cancelled while waiting for execution slot");
                return Err(PluginError::Cancelled);
            }
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit
                .map_err(|_| PluginError::execution(&name, "execute", "semaphore closed"))?,
        };

        self.executing.insert(name.clone(), Instant::now());
        let result = invoke_guarded(&token, plugin, input, timeout, &name).await;
        self.executing.remove(&name);
        drop(permit);

        result
    }

    /// Plugins currently executing, with time elapsed since they acquired
    /// their slot.
    pub fn executing_plugins(&self) -> HashMap<String, Duration> {
        self.executing
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().elapsed()))
            .collect()
    }

    pub fn max_concurrent(&self) -> usize {
        self.config.max_concurrent
    }
}

/// Run the plugin in its own task so a panic unwinds there, bounded by
/// `timeout` and raced against the caller's cancellation. This is the
/// primitive both the sandbox and the concurrent executor invoke through;
/// it applies no concurrency gate of its own.
pub async fn invoke_guarded(
    token: &CancellationToken,
    plugin: Arc<dyn Plugin>,
    input: PluginInput,
    timeout: Duration,
    name: &str,
) -> Result<PluginOutput> {
    let plugin_token = token.child_token();
    let mut task = tokio::spawn({
        let plugin_token = plugin_token.clone();
        async move { plugin.execute(plugin_token, input).await }
    });

    tokio::select! {
        _ = token.cancelled() => {
            plugin_token.cancel();
            task.abort();
            Err(PluginError::Cancelled)
        }
        joined = tokio::time::timeout(timeout, &mut task) => match joined {
            Err(_) => {
                warn!(plugin = %name, timeout_ms = timeout.as_millis() as u64, "Plugin execution timed out");
                plugin_token.cancel();
                task.abort();
                Err(PluginError::Timeout {
                    plugin: name.to_string(),
                    timeout,
                })
            }
            Ok(Ok(result)) => match result {
                Ok(output) => Ok(output),
                Err(e @ PluginError::Cancelled) => Err(e),
                Err(e) => Err(PluginError::execution(name, "execute", e.to_string())),
            },
            Ok(Err(join_err)) => Err(panic_to_error(join_err, name)),
        }
    }
}

fn panic_to_error(join_err: JoinError, name: &str) -> PluginError {
    if join_err.is_panic() {
        let payload = join_err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        warn!(plugin = %name, panic = %message, "Recovered plugin panic");
        PluginError::execution(name, "execute", format!("panic: {message}"))
    } else {
        PluginError::execution(name, "execute", "execution task aborted")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct BehavingPlugin {
        name: &'static str,
        delay: Duration,
        panic_message: Option<&'static str>,
        invocations: AtomicUsize,
    }

    impl BehavingPlugin {
        fn quick(name: &'static str) -> Self {
            Self {
                name,
                delay: Duration::ZERO,
                panic_message: None,
                invocations: AtomicUsize::new(0),
            }
        }

        fn slow(name: &'static str, delay: Duration) -> Self {
            Self {
                delay,
                ..Self::quick(name)
            }
        }

        fn panicking(name: &'static str, message: &'static str) -> Self {
            Self {
                panic_message: Some(message),
                ..Self::quick(name)
            }
        }
    }

    #[async_trait]
    impl Plugin for BehavingPlugin {
        fn name(&self) -> &str {
            self.name
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn description(&self) -> &str {
            "test"
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
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(message) = self.panic_message {
                panic!("{message}");
            }
            Ok(PluginOutput::html(input.content))
        }
        async fn cleanup(&self) -> Result<()> {
            Ok(())
        }
    }

    fn sandbox() -> SandboxExecutor {
        SandboxExecutor::new(SandboxConfig {
            max_concurrent: 2,
            default_timeout: Duration::from_secs(5),
        })
    }

    #[tokio::test]
    async fn successful_execution_returns_output() {
        let sandbox = sandbox();
        let output = sandbox
            .execute(
                CancellationToken::new(),
                Arc::new(BehavingPlugin::quick("echo")),
                PluginInput::new("hello", "text"),
            )
            .await
            .unwrap();
        assert_eq!(output.html, "hello");
    }

    #[tokio::test]
    async fn slow_plugin_times_out() {
        let sandbox = sandbox();
        let err = sandbox
            .execute_with_timeout(
                CancellationToken::new(),
                Arc::new(BehavingPlugin::slow("sleepy", Duration::from_secs(2))),
                PluginInput::new("x", "text"),
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "expected timeout, got {err}");
    }

    #[tokio::test]
    async fn panic_is_recovered_and_sandbox_survives() {
        let sandbox = sandbox();
        let err = sandbox
            .execute(
                CancellationToken::new(),
                Arc::new(BehavingPlugin::panicking("grenade", "boom")),
                PluginInput::new("x", "text"),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("panic"), "got {err}");
        assert!(err.to_string().contains("boom"));

        // A different plugin still executes fine afterwards
        let output = sandbox
            .execute(
                CancellationToken::new(),
                Arc::new(BehavingPlugin::quick("echo")),
                PluginInput::new("still alive", "text"),
            )
            .await
            .unwrap();
        assert_eq!(output.html, "still alive");
    }

    #[tokio::test]
    async fn panics_do_not_leak_semaphore_slots() {
        let sandbox = sandbox();
        // More failures than permits; a leaked slot would hang this loop
        for _ in 0..5 {
            let _ = sandbox
                .execute(
                    CancellationToken::new(),
                    Arc::new(BehavingPlugin::panicking("grenade", "boom")),
                    PluginInput::new("x", "text"),
                )
                .await;
        }
        assert!(sandbox.executing_plugins().is_empty());
    }

    #[tokio::test]
    async fn cancellation_while_queued_returns_cancelled() {
        let sandbox = SandboxExecutor::new(SandboxConfig {
            max_concurrent: 1,
            default_timeout: Duration::from_secs(5),
        });
        let blocker = Arc::new(BehavingPlugin::slow("blocker", Duration::from_secs(1)));

        let token = CancellationToken::new();
        let waiting_token = token.clone();

        let sandbox = Arc::new(sandbox);
        let background = Arc::clone(&sandbox);
        let hold = tokio::spawn(async move {
            background
                .execute(
                    CancellationToken::new(),
                    blocker,
                    PluginInput::new("x", "text"),
                )
                .await
        });

        // Give the blocker time to take the only slot
        tokio::time::sleep(Duration::from_millis(50)).await;
        let queued = tokio::spawn({
            let sandbox = Arc::clone(&sandbox);
            async move {
                sandbox
                    .execute(
                        waiting_token,
                        Arc::new(BehavingPlugin::quick("queued")),
                        PluginInput::new("x", "text"),
                    )
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let err = queued.await.unwrap().unwrap_err();
        assert!(err.is_cancelled(), "expected cancellation, got {err}");
        hold.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancelled_error_is_not_wrapped() {
        struct CooperativePlugin;

        #[async_trait]
        impl Plugin for CooperativePlugin {
            fn name(&self) -> &str {
                "cooperative"
            }
            fn version(&self) -> &str {
                "1.0.0"
            }
            fn description(&self) -> &str {
                "honors cancellation"
            }
            async fn init(&self, _config: HashMap<String, serde_json::Value>) -> Result<()> {
                Ok(())
            }
            async fn execute(
                &self,
                token: CancellationToken,
                _input: PluginInput,
            ) -> Result<PluginOutput> {
                token.cancelled().await;
                Err(PluginError::Cancelled)
            }
            async fn cleanup(&self) -> Result<()> {
                Ok(())
            }
        }

        let sandbox = sandbox();
        let token = CancellationToken::new();
        let task_token = token.clone();
        let sandbox = Arc::new(sandbox);
        let run = tokio::spawn({
            let sandbox = Arc::clone(&sandbox);
            async move {
                sandbox
                    .execute(
                        task_token,
                        Arc::new(CooperativePlugin),
                        PluginInput::new("x", "text"),
                    )
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, PluginError::Cancelled));
    }

    #[tokio::test]
    async fn executing_plugins_reports_in_flight_work() {
        let sandbox = Arc::new(sandbox());
        let background = Arc::clone(&sandbox);
        let run = tokio::spawn(async move {
            background
                .execute(
                    CancellationToken::new(),
                    Arc::new(BehavingPlugin::slow("worker", Duration::from_millis(200))),
                    PluginInput::new("x", "text"),
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let executing = sandbox.executing_plugins();
        assert!(executing.contains_key("worker"));

        run.await.unwrap().unwrap();
        assert!(sandbox.executing_plugins().is_empty());
    }
}
