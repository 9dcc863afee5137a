//! Worker pool for scenario execution
//!
//! Runs scenario invocations concurrently under a fixed concurrency bound,
//! with a timeout watchdog per attempt, per-submission retry policies, and a
//! separate, independently bounded pool for completion callbacks.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::handle::{CompletionCallback, ExecutionHandle, ExecutionOutcome, ExecutionReport};
use crate::config::HarnessConfig;
use crate::execution::{ContextRegistry, ExecutionContext};
use crate::reliability::{RetryDecision, RetryPolicy, RetryTracker};
use crate::scenario::{Scenario, ScenarioError};

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPoolConfig {
    /// Maximum concurrent scenario invocations
    pub max_concurrency: usize,

    /// Maximum concurrently running completion callbacks
    pub callback_concurrency: usize,

    /// Per-attempt timeout used when a submission does not set one
    pub default_timeout: Duration,

    /// Grace period given to cancelled stragglers during shutdown
    pub cancel_grace: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::from_config(&HarnessConfig::default())
    }
}

impl WorkerPoolConfig {
    /// Sizing from `max.threads`, `callback.threads` and the default timeout
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            max_concurrency: config.max_threads.max(1),
            callback_concurrency: config.callback_threads.max(1),
            default_timeout: config.default_timeout,
            cancel_grace: Duration::from_secs(1),
        }
    }

    /// Set maximum concurrency
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Set callback concurrency
    pub fn with_callback_concurrency(mut self, max: usize) -> Self {
        self.callback_concurrency = max.max(1);
        self
    }

    /// Set the default per-attempt timeout (`Duration::ZERO` disables it)
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }
}

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    /// Accepting submissions
    Running,
    /// Completing current work, not accepting new submissions
    Draining,
    /// Stopped
    Stopped,
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// Submissions are only accepted while running
    #[error("worker pool is not running")]
    NotRunning,

    /// `submit` was called outside a tokio runtime
    #[error("no tokio runtime available to run the submission")]
    NoRuntime,

    /// In-flight work had to be cancelled to stop
    #[error("graceful shutdown timed out; {remaining} submission(s) were cancelled")]
    ShutdownTimeout { remaining: usize },
}

/// Per-submission options
#[derive(Clone)]
pub struct SubmitOptions {
    /// Per-attempt timeout; `None` uses the pool default, `Some(ZERO)` disables
    pub timeout: Option<Duration>,
    /// Retry policy for this submission
    pub retry: RetryPolicy,
    /// Fired once after the terminal status is set
    pub on_complete: Option<CompletionCallback>,
    /// Attributes seeded into every attempt's context
    pub attributes: HashMap<String, Value>,
    /// Retry-tracking key; defaults to `<name>#<execution id>`
    pub unit_key: Option<String>,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            retry: RetryPolicy::no_retry(),
            on_complete: None,
            attributes: HashMap::new(),
            unit_key: None,
        }
    }
}

impl std::fmt::Debug for SubmitOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitOptions")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("on_complete", &self.on_complete.is_some())
            .field("attributes", &self.attributes)
            .field("unit_key", &self.unit_key)
            .finish()
    }
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ExecutionReport) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(callback));
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_unit_key(mut self, key: impl Into<String>) -> Self {
        self.unit_key = Some(key.into());
        self
    }
}

struct PoolInner {
    config: WorkerPoolConfig,
    permits: Arc<Semaphore>,
    callback_permits: Arc<Semaphore>,
    registry: Arc<ContextRegistry>,
    retry_tracker: Arc<RetryTracker>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    status: RwLock<WorkerPoolStatus>,
    queued: AtomicUsize,
    active: AtomicUsize,
}

/// Bounded pool executing scenario submissions
///
/// Cloning is cheap and shares the pool. Submissions beyond the concurrency
/// bound queue without limit; callers are responsible for not submitting
/// unbounded work.
///
/// # Example
///
/// ```
/// use loadswarm_engine::worker::{SubmitOptions, WorkerPool, WorkerPoolConfig};
/// use loadswarm_engine::Scenario;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let pool = WorkerPool::new(WorkerPoolConfig::default().with_max_concurrency(4));
/// let scenario = Scenario::new("ping", |_ctx| async { Ok(()) });
///
/// let report = pool.submit(&scenario, SubmitOptions::new()).unwrap().await;
/// assert!(report.outcome.is_success());
/// # });
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .field("active", &self.active())
            .field("queued", &self.queued())
            .finish()
    }
}

impl WorkerPool {
    /// Create a running pool
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self::with_tracker(config, Arc::new(RetryTracker::new()))
    }

    /// Create a running pool sharing an existing retry tracker
    pub fn with_tracker(config: WorkerPoolConfig, retry_tracker: Arc<RetryTracker>) -> Self {
        info!(
            max_concurrency = config.max_concurrency,
            callback_concurrency = config.callback_concurrency,
            default_timeout_ms = config.default_timeout.as_millis() as u64,
            "Starting worker pool"
        );
        Self {
            inner: Arc::new(PoolInner {
                permits: Arc::new(Semaphore::new(config.max_concurrency)),
                callback_permits: Arc::new(Semaphore::new(config.callback_concurrency)),
                config,
                registry: Arc::new(ContextRegistry::new()),
                retry_tracker,
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
                status: RwLock::new(WorkerPoolStatus::Running),
                queued: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
            }),
        }
    }

    /// Submit one scenario invocation
    ///
    /// Must be called from within a tokio runtime. The returned handle
    /// resolves once the submission reaches a terminal outcome.
    pub fn submit(
        &self,
        scenario: &Scenario,
        options: SubmitOptions,
    ) -> Result<ExecutionHandle, WorkerPoolError> {
        if self.status() != WorkerPoolStatus::Running {
            return Err(WorkerPoolError::NotRunning);
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| WorkerPoolError::NoRuntime)?;

        let execution_id = Uuid::now_v7();
        let unit_key = options
            .unit_key
            .clone()
            .unwrap_or_else(|| format!("{}#{}", scenario.name(), execution_id));
        let cancel = self.inner.shutdown.child_token();
        let submitted_at = Utc::now();
        let submitted = Instant::now();

        let submission = Submission {
            inner: Arc::clone(&self.inner),
            scenario: scenario.clone(),
            timeout: options.timeout.unwrap_or(self.inner.config.default_timeout),
            options,
            execution_id,
            unit_key: unit_key.clone(),
            cancel: cancel.clone(),
            submitted_at,
            submitted,
        };

        self.inner.queued.fetch_add(1, Ordering::AcqRel);
        let join = self.inner.tasks.spawn_on(submission.run(), &runtime);
        debug!(%execution_id, scenario = scenario.name(), unit_key = %unit_key, "Submitted");

        Ok(ExecutionHandle {
            execution_id,
            name: Arc::from(scenario.name()),
            unit_key,
            submitted_at,
            submitted,
            cancel,
            join,
        })
    }

    /// Stop accepting work and wait up to `timeout` for in-flight submissions
    ///
    /// Stragglers are cancelled and given a short grace period; in that case
    /// `ShutdownTimeout` is returned. Calling shutdown twice is a no-op.
    #[instrument(skip(self), fields(active = self.active(), queued = self.queued()))]
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), WorkerPoolError> {
        {
            let mut status = self.inner.status.write();
            if *status != WorkerPoolStatus::Running {
                return Ok(());
            }
            *status = WorkerPoolStatus::Draining;
        }

        info!("Initiating graceful shutdown");
        self.inner.tasks.close();

        let result = if tokio::time::timeout(timeout, self.inner.tasks.wait())
            .await
            .is_ok()
        {
            debug!("All submissions completed");
            Ok(())
        } else {
            let remaining = self.inner.tasks.len();
            warn!(remaining, "Shutdown timeout reached, cancelling in-flight work");
            self.inner.shutdown.cancel();
            if tokio::time::timeout(self.inner.config.cancel_grace, self.inner.tasks.wait())
                .await
                .is_err()
            {
                warn!(
                    remaining = self.inner.tasks.len(),
                    "Submissions still running after cancellation"
                );
            }
            Err(WorkerPoolError::ShutdownTimeout { remaining })
        };

        *self.inner.status.write() = WorkerPoolStatus::Stopped;
        info!("Worker pool stopped");
        result
    }

    pub fn status(&self) -> WorkerPoolStatus {
        *self.inner.status.read()
    }

    pub fn is_accepting(&self) -> bool {
        self.status() == WorkerPoolStatus::Running
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.inner.config
    }

    /// Attempts currently running a scenario
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Submissions waiting for their first worker slot
    pub fn queued(&self) -> usize {
        self.inner.queued.load(Ordering::Acquire)
    }

    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.inner.registry
    }

    pub fn retry_tracker(&self) -> &Arc<RetryTracker> {
        &self.inner.retry_tracker
    }
}

/// Everything one spawned submission needs
struct Submission {
    inner: Arc<PoolInner>,
    scenario: Scenario,
    options: SubmitOptions,
    timeout: Duration,
    execution_id: Uuid,
    unit_key: String,
    cancel: CancellationToken,
    submitted_at: chrono::DateTime<Utc>,
    submitted: Instant,
}

/// Decrements a counter on drop
struct Gauge<'a>(&'a AtomicUsize);

impl Drop for Gauge<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Submission {
    async fn run(self) -> ExecutionReport {
        let queued = Gauge(&self.inner.queued);
        let mut queued = Some(queued);
        let policy = &self.options.retry;
        let tracker = &self.inner.retry_tracker;

        let mut attempts = 0;
        let mut run_duration = Duration::ZERO;

        let outcome = loop {
            let attempt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracker.clear(&self.unit_key);
                    break ExecutionOutcome::Cancelled;
                }
                attempt = tracker.begin_attempt(&self.unit_key, policy.retry_delay) => attempt,
            };
            let Some(permit) = self.acquire_worker().await else {
                tracker.clear(&self.unit_key);
                break ExecutionOutcome::Cancelled;
            };
            queued.take();
            attempts = attempt;

            let started = Instant::now();
            let outcome = self.run_attempt(attempt).await;
            run_duration = started.elapsed();
            drop(permit);

            match outcome {
                ExecutionOutcome::Failed(error) => {
                    let decision = policy.decide(&error, attempt);
                    if decision.should_retry() {
                        tracker.record_retry();
                        info!(
                            execution_id = %self.execution_id,
                            unit_key = %self.unit_key,
                            attempt,
                            kind = %error.kind,
                            %decision,
                            "Retrying failed attempt"
                        );
                        continue;
                    }
                    if decision == RetryDecision::Exhausted && policy.max_retries > 0 {
                        tracker.record_exhausted(&self.unit_key);
                    } else {
                        tracker.clear(&self.unit_key);
                    }
                    break ExecutionOutcome::Failed(error);
                }
                ExecutionOutcome::Completed => {
                    tracker.record_recovered(&self.unit_key);
                    break ExecutionOutcome::Completed;
                }
                other => {
                    tracker.clear(&self.unit_key);
                    break other;
                }
            }
        };
        drop(queued);

        let report = ExecutionReport {
            execution_id: self.execution_id,
            name: self.scenario.name().to_string(),
            unit_key: self.unit_key.clone(),
            attempts,
            outcome,
            elapsed: self.submitted.elapsed(),
            run_duration,
            started_at: self.submitted_at,
        };

        if let Some(callback) = self.options.on_complete.clone() {
            self.dispatch_callback(callback, report.clone());
        }
        report
    }

    async fn acquire_worker(&self) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = Arc::clone(&self.inner.permits).acquire_owned() => permit.ok(),
        }
    }

    /// Run one attempt under its watchdog
    async fn run_attempt(&self, attempt: u32) -> ExecutionOutcome {
        let ctx = Arc::new(
            ExecutionContext::new(self.scenario.name(), self.unit_key.clone(), attempt)
                .with_cancellation(&self.cancel)
                .with_attributes(self.options.attributes.clone()),
        );
        let guard = self.inner.registry.register(Arc::clone(&ctx));
        let _active = {
            self.inner.active.fetch_add(1, Ordering::AcqRel);
            Gauge(&self.inner.active)
        };

        let timeout = self.timeout;
        let watchdog = async move {
            if timeout.is_zero() {
                std::future::pending::<()>().await
            } else {
                tokio::time::sleep(timeout).await
            }
        };
        let invocation = AssertUnwindSafe(self.scenario.invoke(Arc::clone(&ctx))).catch_unwind();

        let outcome = tokio::select! {
            result = invocation => match result {
                Ok(Ok(())) => ExecutionOutcome::Completed,
                Ok(Err(error)) => ExecutionOutcome::Failed(error),
                Err(panic) => {
                    let error = ScenarioError::from_panic(panic);
                    error!(
                        execution_id = %ctx.execution_id(),
                        scenario = ctx.name(),
                        error = %error,
                        "Scenario panicked"
                    );
                    ExecutionOutcome::Failed(error)
                }
            },
            _ = watchdog => {
                warn!(
                    execution_id = %ctx.execution_id(),
                    scenario = ctx.name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Scenario timed out"
                );
                ctx.cancel();
                ExecutionOutcome::TimedOut(timeout)
            },
            _ = ctx.cancelled() => ExecutionOutcome::Cancelled,
        };

        ctx.transition(outcome.status());
        if let ExecutionOutcome::Failed(error) = &outcome {
            warn!(
                execution_id = %ctx.execution_id(),
                scenario = ctx.name(),
                attempt,
                error = %error,
                "Scenario attempt failed"
            );
        }
        drop(guard);
        outcome
    }

    fn dispatch_callback(&self, callback: CompletionCallback, report: ExecutionReport) {
        let permits = Arc::clone(&self.inner.callback_permits);
        self.inner.tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let execution_id = report.execution_id;
            let result = tokio::task::spawn_blocking(move || {
                std::panic::catch_unwind(AssertUnwindSafe(|| callback(&report)))
            })
            .await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => {
                    error!(%execution_id, "Completion callback panicked");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionStatus;
    use crate::scenario::FailureKind;
    use std::sync::atomic::AtomicU32;

    fn pool(max: usize) -> WorkerPool {
        WorkerPool::new(
            WorkerPoolConfig::default()
                .with_max_concurrency(max)
                .with_default_timeout(Duration::from_secs(30)),
        )
    }

    fn sleeper(name: &str, ms: u64) -> Scenario {
        Scenario::new(name, move |_ctx| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_submit_completes() {
        let pool = pool(2);
        let report = pool
            .submit(&sleeper("ok", 5), SubmitOptions::new())
            .unwrap()
            .await;

        assert_eq!(report.outcome, ExecutionOutcome::Completed);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.name, "ok");
        assert!(report.run_duration >= Duration::from_millis(5));
        assert!(pool.registry().is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_reported() {
        let pool = pool(2);
        let scenario = Scenario::new("bad", |_ctx| async {
            Err(ScenarioError::assertion("expected 200"))
        });

        let report = pool.submit(&scenario, SubmitOptions::new()).unwrap().await;
        assert_eq!(report.status(), ExecutionStatus::Failed);
        assert_eq!(report.outcome.error().unwrap().kind, FailureKind::Assertion);
    }

    #[tokio::test]
    async fn test_panic_is_captured_and_pool_survives() {
        let pool = pool(1);
        let scenario = Scenario::new("panicky", |_ctx| async { panic!("kaboom") });

        let report = pool.submit(&scenario, SubmitOptions::new()).unwrap().await;
        assert_eq!(report.status(), ExecutionStatus::Failed);
        assert!(report.outcome.error().unwrap().message.contains("kaboom"));

        let report = pool
            .submit(&sleeper("after", 1), SubmitOptions::new())
            .unwrap()
            .await;
        assert!(report.outcome.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_times_out_and_never_retries() {
        let pool = pool(1);
        let calls = Arc::new(AtomicU32::new(0));
        let scenario = {
            let calls = Arc::clone(&calls);
            Scenario::new("slow", move |_ctx| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            })
        };

        let options = SubmitOptions::new()
            .with_timeout(Duration::from_secs(2))
            .with_retry(RetryPolicy::new().with_max_retries(5));
        let report = pool.submit(&scenario, options).unwrap().await;

        assert_eq!(
            report.outcome,
            ExecutionOutcome::TimedOut(Duration::from_secs(2))
        );
        assert_eq!(report.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(pool.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_disables_watchdog() {
        let pool = pool(1);
        let options = SubmitOptions::new().with_timeout(Duration::ZERO);
        let report = pool
            .submit(&sleeper("long", 10_000), options)
            .unwrap()
            .await;
        assert!(report.outcome.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_then_recovers() {
        let pool = pool(2);
        let calls = Arc::new(AtomicU32::new(0));
        let scenario = {
            let calls = Arc::clone(&calls);
            Scenario::new("flaky", move |ctx| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if ctx.attempt() < 3 {
                        return Err(ScenarioError::new("connection reset by peer"));
                    }
                    Ok(())
                }
            })
        };

        let start = Instant::now();
        let options = SubmitOptions::new().with_retry(
            RetryPolicy::new()
                .with_max_retries(3)
                .with_retry_delay(Duration::from_millis(500)),
        );
        let report = pool.submit(&scenario, options).unwrap().await;

        assert!(report.outcome.is_success());
        assert_eq!(report.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(1000));

        let stats = pool.retry_tracker().stats();
        assert_eq!(stats.total_retries, 2);
        assert_eq!(stats.successful_retries, 1);
        assert_eq!(stats.tracked_units, 0);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted_preserves_error() {
        let pool = pool(2);
        let scenario = Scenario::new("down", |ctx| async move {
            Err(ScenarioError::new(format!(
                "connection refused on attempt {}",
                ctx.attempt()
            )))
        });

        let options = SubmitOptions::new().with_retry(
            RetryPolicy::new()
                .with_max_retries(2)
                .with_retry_delay(Duration::ZERO),
        );
        let report = pool.submit(&scenario, options).unwrap().await;

        assert_eq!(report.attempts, 3);
        let error = report.outcome.error().unwrap();
        assert_eq!(error.message, "connection refused on attempt 3");
        assert_eq!(pool.retry_tracker().stats().exhausted, 1);
    }

    #[tokio::test]
    async fn test_assertion_not_retried() {
        let pool = pool(2);
        let options = SubmitOptions::new().with_retry(
            RetryPolicy::new()
                .with_max_retries(5)
                .with_retry_delay(Duration::ZERO),
        );
        let scenario = Scenario::new("wrong", |_ctx| async {
            Err(ScenarioError::assertion("mismatch"))
        });

        let report = pool.submit(&scenario, options).unwrap().await;
        assert_eq!(report.attempts, 1);
        assert_eq!(pool.retry_tracker().stats().total_retries, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let pool = pool(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let scenario = {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            Scenario::new("bounded", move |_ctx| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };

        let handles: Vec<_> = (0..20)
            .map(|_| pool.submit(&scenario, SubmitOptions::new()).unwrap())
            .collect();
        for handle in handles {
            assert!(handle.await.outcome.is_success());
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.queued(), 0);
    }

    #[tokio::test]
    async fn test_callback_fires_once_after_terminal_status() {
        let pool = pool(2);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let options = SubmitOptions::new().on_complete(move |report: &ExecutionReport| {
            let _ = tx.send(report.status());
        });

        let handle = pool.submit(&sleeper("cb", 1), options).unwrap();
        let report = handle.await;

        let status = rx.recv().await.unwrap();
        assert_eq!(status, report.status());
        // Sender dropped with the callback: no second delivery
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_panicking_callback_is_contained() {
        let pool = pool(1);
        let options = SubmitOptions::new().on_complete(|_report: &ExecutionReport| {
            panic!("callback exploded");
        });

        let report = pool.submit(&sleeper("cb", 1), options).unwrap().await;
        assert!(report.outcome.is_success());
        pool.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_running_submission() {
        let pool = pool(1);
        let options = SubmitOptions::new().with_timeout(Duration::ZERO);
        let handle = pool
            .submit(&sleeper("forever", 3_600_000), options)
            .unwrap();
        tokio::task::yield_now().await;

        handle.cancel();
        let report = handle.await;
        assert_eq!(report.outcome, ExecutionOutcome::Cancelled);
        assert!(pool.registry().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_queued_submission() {
        let pool = pool(1);
        let blocker = pool
            .submit(&sleeper("blocker", 200), SubmitOptions::new())
            .unwrap();
        let queued = pool
            .submit(&sleeper("queued", 1), SubmitOptions::new())
            .unwrap();

        queued.cancel();
        let report = queued.await;
        assert_eq!(report.outcome, ExecutionOutcome::Cancelled);
        assert_eq!(report.attempts, 0);
        assert!(blocker.await.outcome.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_retry_delay_forgets_unit() {
        let pool = pool(1);
        let scenario = Scenario::new("flaky", |_ctx| async {
            Err(ScenarioError::new("connection refused"))
        });
        let options = SubmitOptions::new().with_retry(
            RetryPolicy::new()
                .with_max_retries(3)
                .with_retry_delay(Duration::from_secs(10)),
        );

        let handle = pool.submit(&scenario, options).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();
        let report = handle.await;

        assert_eq!(report.outcome, ExecutionOutcome::Cancelled);
        assert_eq!(report.attempts, 1);
        assert_eq!(pool.retry_tracker().stats().tracked_units, 0);
        assert_eq!(pool.retry_tracker().attempts(&report.unit_key), 0);
    }

    #[tokio::test]
    async fn test_attributes_seeded_into_context() {
        let pool = pool(1);
        let scenario = Scenario::new("attrs", |ctx| async move {
            match ctx.attribute("virtual_user") {
                Some(v) if v == serde_json::json!(7) => Ok(()),
                other => Err(ScenarioError::assertion(format!("got {other:?}"))),
            }
        });

        let options = SubmitOptions::new().with_attribute("virtual_user", 7);
        let report = pool.submit(&scenario, options).unwrap().await;
        assert!(report.outcome.is_success());
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_rejected() {
        let pool = pool(1);
        pool.shutdown(Duration::from_secs(1)).await.unwrap();

        assert_eq!(pool.status(), WorkerPoolStatus::Stopped);
        let err = pool
            .submit(&sleeper("late", 1), SubmitOptions::new())
            .unwrap_err();
        assert!(matches!(err, WorkerPoolError::NotRunning));
        // Idempotent
        pool.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_stragglers() {
        let pool = WorkerPool::new(
            WorkerPoolConfig::default()
                .with_max_concurrency(2)
                .with_default_timeout(Duration::ZERO),
        );
        let handle = pool
            .submit(&sleeper("stuck", 3_600_000), SubmitOptions::new())
            .unwrap();
        tokio::task::yield_now().await;

        let err = pool.shutdown(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, WorkerPoolError::ShutdownTimeout { remaining: 1 }));
        assert_eq!(handle.await.outcome, ExecutionOutcome::Cancelled);
    }

    #[test]
    fn test_submit_outside_runtime() {
        let pool = pool(1);
        let err = pool
            .submit(&sleeper("nort", 1), SubmitOptions::new())
            .unwrap_err();
        assert!(matches!(err, WorkerPoolError::NoRuntime));
    }

    #[test]
    fn test_config_from_harness() {
        let config = WorkerPoolConfig::from_config(&HarnessConfig {
            max_threads: 12,
            callback_threads: 3,
            default_timeout: Duration::from_secs(9),
            ..Default::default()
        });
        assert_eq!(config.max_concurrency, 12);
        assert_eq!(config.callback_concurrency, 3);
        assert_eq!(config.default_timeout, Duration::from_secs(9));
        assert_eq!(config.with_max_concurrency(0).max_concurrency, 1);
    }
}
