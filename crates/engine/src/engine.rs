//! Explicitly constructed harness engine
//!
//! Owns one worker pool, one metrics aggregator, one report sink and the
//! resource-pool registries scenarios draw handles from. Engines share no
//! state, so tests can run several side by side.

use std::any::{Any, TypeId};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ConfigSource, HarnessConfig};
use crate::load::{LoadRunner, StressError, StressTest};
use crate::metrics::{MetricsAggregator, PerformanceThresholds};
use crate::reliability::RetryPolicy;
use crate::report::{ReportSink, TracingReportSink};
use crate::resource::ResourcePools;
use crate::scenario::Scenario;
use crate::worker::{
    wait_for_batch, BatchExecutionResult, ExecutionHandle, SubmitOptions, WorkerPool,
    WorkerPoolConfig, WorkerPoolError,
};

/// A load harness instance
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use loadswarm_engine::{HarnessConfig, LoadEngine, Scenario};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let engine = LoadEngine::new(HarnessConfig::default());
/// let scenario = Scenario::new("home", |_ctx| async { Ok(()) });
///
/// let handles = (0..3).map(|_| engine.submit(&scenario).unwrap()).collect();
/// let batch = engine.wait_for_batch(handles, Some(Duration::from_secs(5))).await;
/// assert_eq!(batch.success_count, 3);
///
/// engine.shutdown().await.unwrap();
/// # });
/// ```
pub struct LoadEngine {
    config: HarnessConfig,
    pool: WorkerPool,
    metrics: Arc<MetricsAggregator>,
    sink: Arc<dyn ReportSink>,
    /// One `ResourcePools<T>` per handle type
    resources: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for LoadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadEngine")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("resource_registries", &self.resources.len())
            .finish_non_exhaustive()
    }
}

impl LoadEngine {
    pub fn new(config: HarnessConfig) -> Self {
        let pool = WorkerPool::new(WorkerPoolConfig::from_config(&config));
        let metrics = Arc::new(
            MetricsAggregator::new().with_thresholds(PerformanceThresholds::from_config(&config)),
        );
        Self {
            config,
            pool,
            metrics,
            sink: Arc::new(TracingReportSink),
            resources: DashMap::new(),
        }
    }

    /// Build from a configuration source, failing on malformed values
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        Ok(Self::new(HarnessConfig::from_source(source)?))
    }

    /// Route report events to `sink` instead of `tracing`
    pub fn with_report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    pub fn sink(&self) -> &Arc<dyn ReportSink> {
        &self.sink
    }

    /// Resource-pool registry for handles of type `T`, created on first use
    ///
    /// Every call for the same `T` returns the same registry. Its
    /// [`acquire_default`](ResourcePools::acquire_default) waits up to
    /// `resource.acquire.timeout.ms`.
    pub fn resources<T: Send + 'static>(&self) -> Arc<ResourcePools<T>> {
        let key = TypeId::of::<ResourcePools<T>>();
        let existing = self
            .resources
            .entry(key)
            .or_insert_with(|| self.new_registry::<T>())
            .clone();

        match existing.downcast::<ResourcePools<T>>() {
            Ok(pools) => pools,
            Err(_) => {
                warn!(
                    handle_type = std::any::type_name::<T>(),
                    "Resource registry type mismatch, replacing"
                );
                let pools = Arc::new(self.pools_for::<T>());
                self.resources
                    .insert(key, Arc::clone(&pools) as Arc<dyn Any + Send + Sync>);
                pools
            }
        }
    }

    fn pools_for<T: Send + 'static>(&self) -> ResourcePools<T> {
        ResourcePools::new().with_acquire_timeout(self.config.acquire_timeout)
    }

    fn new_registry<T: Send + 'static>(&self) -> Arc<dyn Any + Send + Sync> {
        debug!(
            handle_type = std::any::type_name::<T>(),
            acquire_timeout_ms = self.config.acquire_timeout.as_millis() as u64,
            "Creating resource registry"
        );
        Arc::new(self.pools_for::<T>())
    }

    /// Retry policy built from `retry.count` and `retry.delay`
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config)
    }

    /// Submission options carrying the configured retry policy
    pub fn submit_options(&self) -> SubmitOptions {
        SubmitOptions::new().with_retry(self.retry_policy())
    }

    /// Submit with the configured retry policy and default timeout
    pub fn submit(&self, scenario: &Scenario) -> Result<ExecutionHandle, WorkerPoolError> {
        self.pool.submit(scenario, self.submit_options())
    }

    pub fn submit_with(
        &self,
        scenario: &Scenario,
        options: SubmitOptions,
    ) -> Result<ExecutionHandle, WorkerPoolError> {
        self.pool.submit(scenario, options)
    }

    /// Wait for a batch; `None` uses `parallel.default.timeout.seconds`
    pub async fn wait_for_batch(
        &self,
        executions: Vec<ExecutionHandle>,
        total_timeout: Option<Duration>,
    ) -> BatchExecutionResult {
        wait_for_batch(
            executions,
            total_timeout.unwrap_or(self.config.default_timeout),
        )
        .await
    }

    /// Load runner sharing this engine's pool and aggregator
    pub fn runner(&self) -> LoadRunner {
        LoadRunner::new(self.pool.clone(), Arc::clone(&self.metrics))
    }

    /// Stress ramp using the configured cool-down
    pub fn stress_test(
        &self,
        levels: Vec<usize>,
        step_duration: Duration,
    ) -> Result<StressTest, StressError> {
        Ok(StressTest::new(levels, step_duration)?.with_config(&self.config))
    }

    /// Drain the worker pool and report retry statistics
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        let result = self.pool.shutdown(self.config.default_timeout).await;
        self.pool.retry_tracker().report(self.sink.as_ref());
        match &result {
            Ok(()) => info!("Load engine stopped"),
            Err(e) => warn!(error = %e, "Load engine stopped with cancelled work"),
        }
        result
    }
}
