//! Fixed-concurrency load steps

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::metrics::{MetricsAggregator, PerformanceResult};
use crate::reliability::RetryPolicy;
use crate::scenario::Scenario;
use crate::worker::{ExecutionOutcome, SubmitOptions, WorkerPool};

/// Context attribute holding the step's concurrency level
pub const CONCURRENCY_ATTRIBUTE: &str = "concurrency";

/// Context attribute holding the 1-based virtual user number
pub const VIRTUAL_USER_ATTRIBUTE: &str = "virtual_user";

/// One fixed-concurrency load window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStep {
    /// Virtual users running the scenario in a loop
    pub concurrency: usize,
    /// How long virtual users keep starting new iterations
    pub duration: Duration,
    /// Per-iteration timeout; `None` uses the pool default
    pub iteration_timeout: Option<Duration>,
}

impl LoadStep {
    pub fn new(concurrency: usize, duration: Duration) -> Self {
        Self {
            concurrency,
            duration,
            iteration_timeout: None,
        }
    }

    pub fn with_iteration_timeout(mut self, timeout: Duration) -> Self {
        self.iteration_timeout = Some(timeout);
        self
    }
}

/// Runs load steps through a worker pool, feeding a metrics aggregator
#[derive(Debug, Clone)]
pub struct LoadRunner {
    pool: WorkerPool,
    metrics: Arc<MetricsAggregator>,
    retry: RetryPolicy,
}

impl LoadRunner {
    pub fn new(pool: WorkerPool, metrics: Arc<MetricsAggregator>) -> Self {
        Self {
            pool,
            metrics,
            retry: RetryPolicy::no_retry(),
        }
    }

    /// Retry policy applied to every iteration (none by default)
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    /// Drive `step.concurrency` virtual users for `step.duration`
    ///
    /// Samples recorded under the scenario's name are cleared first. Each
    /// virtual user starts iterations back to back until the window closes;
    /// iterations already running are allowed to finish and are counted.
    /// Completed iterations record their latency, every other outcome records
    /// an error.
    #[instrument(skip(self, scenario), fields(scenario = scenario.name()))]
    pub async fn run_load_step(&self, scenario: &Scenario, step: LoadStep) -> PerformanceResult {
        let test = scenario.name().to_string();
        self.metrics.clear(&test);

        info!(
            concurrency = step.concurrency,
            duration_ms = step.duration.as_millis() as u64,
            "Starting load step"
        );

        let started = Instant::now();
        let window_end = started + step.duration;
        let mut users = JoinSet::new();

        for user in 1..=step.concurrency {
            let pool = self.pool.clone();
            let metrics = Arc::clone(&self.metrics);
            let scenario = scenario.clone();
            let retry = self.retry.clone();
            let test = test.clone();

            users.spawn(async move {
                let mut iterations = 0u64;
                while Instant::now() < window_end {
                    let mut options = SubmitOptions::new()
                        .with_retry(retry.clone())
                        .with_attribute(CONCURRENCY_ATTRIBUTE, step.concurrency)
                        .with_attribute(VIRTUAL_USER_ATTRIBUTE, user);
                    options.timeout = step.iteration_timeout;

                    let handle = match pool.submit(&scenario, options) {
                        Ok(handle) => handle,
                        Err(e) => {
                            warn!(user, error = %e, "Virtual user stopped");
                            break;
                        }
                    };
                    let report = handle.await;
                    match report.outcome {
                        ExecutionOutcome::Completed => {
                            metrics.record_sample(&test, report.run_duration_ms())
                        }
                        _ => metrics.record_error(&test),
                    }
                    iterations += 1;
                }
                debug!(user, iterations, "Virtual user finished");
            });
        }

        while let Some(joined) = users.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Virtual user task failed");
            }
        }

        self.metrics
            .compute_result(&test, step.concurrency, started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ScenarioError;
    use crate::worker::WorkerPoolConfig;
    use std::collections::HashSet;

    fn runner(max: usize) -> LoadRunner {
        let pool = WorkerPool::new(
            WorkerPoolConfig::default()
                .with_max_concurrency(max)
                .with_default_timeout(Duration::from_secs(5)),
        );
        LoadRunner::new(pool, Arc::new(MetricsAggregator::new()))
    }

    fn sleeper(ms: u64) -> Scenario {
        Scenario::new("browse", move |_ctx| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(())
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_step_passes() {
        let runner = runner(20);
        let result = runner
            .run_load_step(&sleeper(50), LoadStep::new(10, Duration::from_secs(2)))
            .await;

        assert_eq!(result.concurrency, 10);
        assert_eq!(result.total_errors, 0);
        assert_eq!(result.error_rate, 0.0);
        assert!(result.latency.avg >= 50.0 && result.latency.avg < 55.0);
        assert!(result.throughput > 0.0);
        // At most 10 users x 2s / 50ms
        assert!(result.total_requests > 300 && result.total_requests <= 400);
        assert!(result.meets_performance_thresholds());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_count_as_errors() {
        let runner = runner(4);
        let scenario = Scenario::new("broken", |_ctx| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err(ScenarioError::new("connection refused"))
        });

        let result = runner
            .run_load_step(&scenario, LoadStep::new(2, Duration::from_secs(1)))
            .await;

        assert_eq!(result.sample_count, 0);
        assert_eq!(result.total_requests, 20);
        assert_eq!(result.total_errors, 20);
        assert_eq!(result.error_rate, 0.0);
        assert_eq!(result.throughput, 0.0);
        assert!(!result.meets_performance_thresholds());
    }

    #[tokio::test(start_paused = true)]
    async fn test_iteration_timeout_counts_as_error() {
        let runner = runner(4);
        let step = LoadStep::new(1, Duration::from_secs(1))
            .with_iteration_timeout(Duration::from_millis(200));

        let result = runner.run_load_step(&sleeper(10_000), step).await;

        assert_eq!(result.total_requests, 5);
        assert_eq!(result.total_errors, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attributes_identify_virtual_users() {
        let runner = runner(8);
        let seen = Arc::new(parking_lot::Mutex::new(HashSet::new()));
        let scenario = {
            let seen = Arc::clone(&seen);
            Scenario::new("who", move |ctx| {
                let seen = Arc::clone(&seen);
                async move {
                    let user = ctx.attribute(VIRTUAL_USER_ATTRIBUTE).and_then(|v| v.as_u64());
                    let level = ctx.attribute(CONCURRENCY_ATTRIBUTE).and_then(|v| v.as_u64());
                    seen.lock().insert((user, level));
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(())
                }
            })
        };

        runner
            .run_load_step(&scenario, LoadStep::new(3, Duration::from_millis(100)))
            .await;

        let seen = seen.lock();
        let expected: HashSet<_> = (1..=3).map(|u| (Some(u), Some(3))).collect();
        assert_eq!(*seen, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_cleared_between_steps() {
        let runner = runner(4);
        runner.metrics().record_sample("browse", 99_999);

        let result = runner
            .run_load_step(&sleeper(20), LoadStep::new(1, Duration::from_millis(100)))
            .await;

        assert!(result.latency.max < 1_000);
        assert!(result.sample_count > 0);
    }
}
