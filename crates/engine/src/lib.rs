//! Loadswarm Engine
//!
//! A harness that drives many concurrent virtual users against a target
//! system, measures per-iteration latency, and decides pass/fail against
//! performance thresholds.
//!
//! # Features
//!
//! - **Worker pool**: bounded concurrent execution with per-attempt timeout
//!   watchdogs and cancellation
//! - **Retries**: per-submission policies that never retry assertions or
//!   timeouts, with per-unit throttling
//! - **Resource pools**: blocking, bounded pools of reusable handles
//! - **Batches**: wait for many executions under one aggregate deadline
//! - **Metrics**: nearest-rank percentiles, throughput, error rate, grades
//! - **Stress ramps**: stepped load that locates the breaking point
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//! use loadswarm_engine::prelude::*;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let engine = LoadEngine::new(HarnessConfig::default());
//! let scenario = Scenario::new("home-page", |ctx| async move {
//!     ctx.set_attribute("page", "home");
//!     tokio::time::sleep(Duration::from_millis(5)).await;
//!     Ok(())
//! });
//!
//! let result = engine
//!     .runner()
//!     .run_load_step(&scenario, LoadStep::new(4, Duration::from_millis(200)))
//!     .await;
//! result.report(engine.sink().as_ref());
//! println!("{}", result.verdict());
//! # engine.shutdown().await.unwrap();
//! # });
//! ```

pub mod config;
pub mod engine;
pub mod execution;
pub mod load;
pub mod metrics;
pub mod reliability;
pub mod report;
pub mod resource;
pub mod scenario;
pub mod telemetry;
pub mod worker;

pub use config::{ConfigError, ConfigSource, HarnessConfig};
pub use engine::LoadEngine;
pub use execution::{ExecutionContext, ExecutionStatus};
pub use load::{BreakingPoint, LoadRunner, LoadStep, StressReport, StressTest};
pub use metrics::{Grade, MetricsAggregator, PerformanceResult, PerformanceThresholds};
pub use reliability::RetryPolicy;
pub use report::ReportSink;
pub use scenario::{FailureKind, Scenario, ScenarioError, ScenarioResult};
pub use worker::{
    BatchExecutionResult, ExecutionHandle, ExecutionOutcome, ExecutionReport, SubmitOptions,
    WorkerPool,
};

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ConfigSource, HarnessConfig, MapConfigSource};
    pub use crate::engine::LoadEngine;
    pub use crate::execution::{ExecutionContext, ExecutionStatus};
    pub use crate::load::{BreakingPoint, LoadRunner, LoadStep, StressReport, StressTest};
    pub use crate::metrics::{Grade, PerformanceResult, PerformanceThresholds};
    pub use crate::reliability::RetryPolicy;
    pub use crate::report::{ReportSink, TracingReportSink};
    pub use crate::resource::ResourcePools;
    pub use crate::scenario::{FailureKind, Scenario, ScenarioError, ScenarioResult};
    pub use crate::worker::{
        wait_for_batch, BatchExecutionResult, ExecutionHandle, ExecutionOutcome, ExecutionReport,
        SubmitOptions, WorkerPool, WorkerPoolConfig,
    };
}
