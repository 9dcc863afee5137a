//! Stepped stress runs and breaking-point detection

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::runner::{LoadRunner, LoadStep};
use crate::config::HarnessConfig;
use crate::metrics::PerformanceResult;
use crate::report::{Artifact, ReportSink};
use crate::scenario::Scenario;

/// Stress configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StressError {
    /// Levels must be non-empty, non-zero and strictly ascending
    #[error("invalid concurrency levels {levels:?}: {reason}")]
    InvalidLevels { levels: Vec<usize>, reason: String },
}

/// Where a stress run crossed from passing to failing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BreakingPoint {
    /// Every step met its thresholds
    None,
    /// Even the lowest level failed
    AtMinimumLoad { failing: usize },
    /// The first failing level and the passing level before it
    Between {
        last_passing: usize,
        first_failing: usize,
    },
}

impl BreakingPoint {
    /// Scan ordered step results for the first failing step
    pub fn find(steps: &[PerformanceResult]) -> Self {
        match steps.iter().position(|s| !s.meets_performance_thresholds()) {
            None => Self::None,
            Some(0) => Self::AtMinimumLoad {
                failing: steps[0].concurrency,
            },
            Some(i) => Self::Between {
                last_passing: steps[i - 1].concurrency,
                first_failing: steps[i].concurrency,
            },
        }
    }
}

impl fmt::Display for BreakingPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "no breaking point: every level met thresholds"),
            Self::AtMinimumLoad { failing } => {
                write!(f, "failing at minimum load ({failing} users)")
            }
            Self::Between {
                last_passing,
                first_failing,
            } => write!(
                f,
                "breaking point between {last_passing} and {first_failing} users"
            ),
        }
    }
}

/// Ordered step results plus the detected breaking point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressReport {
    pub steps: Vec<PerformanceResult>,
    pub breaking_point: BreakingPoint,
}

impl StressReport {
    pub fn new(steps: Vec<PerformanceResult>) -> Self {
        let breaking_point = BreakingPoint::find(&steps);
        Self {
            steps,
            breaking_point,
        }
    }

    /// Highest level known to meet thresholds
    pub fn safe_concurrency(&self) -> Option<usize> {
        match self.breaking_point {
            BreakingPoint::None => self.steps.last().map(|s| s.concurrency),
            BreakingPoint::AtMinimumLoad { .. } => None,
            BreakingPoint::Between { last_passing, .. } => Some(last_passing),
        }
    }

    pub fn report(&self, sink: &dyn ReportSink) {
        for step in &self.steps {
            sink.log_info(&format!(
                "{} users: grade {}, avg {:.1} ms, p95 {} ms, {:.2}% errors, {:.2} req/s",
                step.concurrency,
                step.grade(),
                step.latency.avg,
                step.latency.p95,
                step.error_rate,
                step.throughput
            ));
        }
        match self.breaking_point {
            BreakingPoint::None => sink.log_pass(&self.breaking_point.to_string()),
            BreakingPoint::AtMinimumLoad { .. } => sink.log_fail(&self.breaking_point.to_string()),
            BreakingPoint::Between { .. } => sink.log_warning(&self.breaking_point.to_string()),
        }
        match Artifact::json("stress-report", self) {
            Ok(artifact) => sink.attach(artifact),
            Err(e) => warn!(error = %e, "Failed to serialize stress report"),
        }
    }
}

/// A ramp over ascending concurrency levels
#[derive(Debug, Clone, PartialEq)]
pub struct StressTest {
    levels: Vec<usize>,
    step_duration: Duration,
    cool_down: Duration,
    iteration_timeout: Option<Duration>,
}

impl StressTest {
    pub fn new(levels: Vec<usize>, step_duration: Duration) -> Result<Self, StressError> {
        let reject = |reason: &str| StressError::InvalidLevels {
            levels: levels.clone(),
            reason: reason.to_string(),
        };
        if levels.is_empty() {
            return Err(reject("at least one level is required"));
        }
        if levels.contains(&0) {
            return Err(reject("levels must be greater than zero"));
        }
        if levels.windows(2).any(|w| w[0] >= w[1]) {
            return Err(reject("levels must be strictly ascending"));
        }

        Ok(Self {
            levels,
            step_duration,
            cool_down: Duration::from_secs(5),
            iteration_timeout: None,
        })
    }

    /// Pause between consecutive steps
    pub fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down = cool_down;
        self
    }

    pub fn with_iteration_timeout(mut self, timeout: Duration) -> Self {
        self.iteration_timeout = Some(timeout);
        self
    }

    /// Cool-down from `stress.cooldown.seconds`
    pub fn with_config(self, config: &HarnessConfig) -> Self {
        self.with_cool_down(config.stress_cool_down)
    }

    pub fn levels(&self) -> &[usize] {
        &self.levels
    }

    pub fn step_duration(&self) -> Duration {
        self.step_duration
    }

    pub fn cool_down(&self) -> Duration {
        self.cool_down
    }

    /// Run one load step per level, cooling down between steps
    #[instrument(skip_all, fields(scenario = scenario.name(), levels = ?self.levels))]
    pub async fn run(&self, runner: &LoadRunner, scenario: &Scenario) -> StressReport {
        let mut steps = Vec::with_capacity(self.levels.len());

        for (i, &concurrency) in self.levels.iter().enumerate() {
            if i > 0 && !self.cool_down.is_zero() {
                info!(cool_down_ms = self.cool_down.as_millis() as u64, "Cooling down");
                tokio::time::sleep(self.cool_down).await;
            }

            let mut step = LoadStep::new(concurrency, self.step_duration);
            step.iteration_timeout = self.iteration_timeout;
            let result = runner.run_load_step(scenario, step).await;
            info!(
                concurrency,
                grade = %result.grade(),
                passed = result.meets_performance_thresholds(),
                "Stress step finished"
            );
            steps.push(result);
        }

        let report = StressReport::new(steps);
        info!(
            breaking_point = %report.breaking_point,
            safe_concurrency = ?report.safe_concurrency(),
            "Stress run finished"
        );
        report
    }
}
