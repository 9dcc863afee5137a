//! Batch coordination: wait for many submissions under one deadline

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::handle::{ExecutionHandle, ExecutionOutcome};
use crate::report::{Artifact, ReportSink};
use crate::scenario::ScenarioError;

/// Smallest wait granted to any single execution
const MIN_WAIT: Duration = Duration::from_secs(1);

/// Failures listed individually in a report
const REPORTED_FAILURES: usize = 10;

/// Why an execution did not count as a success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFailureKind {
    /// The scenario failed
    Error(ScenarioError),
    /// The per-invocation watchdog fired
    TimedOut,
    /// Cancelled before finishing
    Cancelled,
    /// The batch deadline passed while waiting; the execution was cancelled
    DeadlineExceeded,
}

impl BatchFailureKind {
    pub fn is_timeout(&self) -> bool {
        !matches!(self, Self::Error(_))
    }
}

impl fmt::Display for BatchFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(err) => write!(f, "{err}"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::DeadlineExceeded => write!(f, "batch deadline exceeded"),
        }
    }
}

/// One unsuccessful execution in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub execution_id: Uuid,
    pub name: String,
    pub kind: BatchFailureKind,
}

/// Frozen summary of one coordinated wait
///
/// `success_count + failure_count + timeout_count` always equals the number
/// of executions passed to [`wait_for_batch`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchExecutionResult {
    pub success_count: usize,
    pub failure_count: usize,
    pub timeout_count: usize,
    pub elapsed: Duration,
    pub failures: Vec<BatchFailure>,
}

impl BatchExecutionResult {
    pub fn total(&self) -> usize {
        self.success_count + self.failure_count + self.timeout_count
    }

    pub fn all_succeeded(&self) -> bool {
        self.failure_count == 0 && self.timeout_count == 0
    }

    /// Successful executions in percent; 0 for an empty batch
    pub fn success_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.success_count as f64 / total as f64 * 100.0
    }

    fn record(&mut self, handle: &ExecutionHandle, outcome: Option<ExecutionOutcome>) {
        let kind = match outcome {
            Some(ExecutionOutcome::Completed) => {
                self.success_count += 1;
                return;
            }
            Some(ExecutionOutcome::Failed(err)) => BatchFailureKind::Error(err),
            Some(ExecutionOutcome::TimedOut(_)) => BatchFailureKind::TimedOut,
            Some(ExecutionOutcome::Cancelled) => BatchFailureKind::Cancelled,
            None => BatchFailureKind::DeadlineExceeded,
        };

        if kind.is_timeout() {
            self.timeout_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.failures.push(BatchFailure {
            execution_id: handle.execution_id(),
            name: handle.name().to_string(),
            kind,
        });
    }

    /// Emit the batch verdict to a report sink
    pub fn report(&self, sink: &dyn ReportSink) {
        let summary = format!(
            "Batch finished in {:.2}s: {} succeeded, {} failed, {} timed out",
            self.elapsed.as_secs_f64(),
            self.success_count,
            self.failure_count,
            self.timeout_count
        );
        if self.all_succeeded() {
            sink.log_pass(&summary);
        } else {
            sink.log_fail(&summary);
            for failure in self.failures.iter().take(REPORTED_FAILURES) {
                sink.log_warning(&format!(
                    "{} ({}): {}",
                    failure.name, failure.execution_id, failure.kind
                ));
            }
            if self.failures.len() > REPORTED_FAILURES {
                sink.log_warning(&format!(
                    "... and {} more",
                    self.failures.len() - REPORTED_FAILURES
                ));
            }
        }
        match Artifact::json("batch-result", self) {
            Ok(artifact) => sink.attach(artifact),
            Err(e) => warn!(error = %e, "Failed to serialize batch result"),
        }
    }
}

/// Wait for every execution or until `total_timeout` elapses
///
/// Executions are awaited in order, each with the time left until the
/// deadline but never less than one second. An execution still running when
/// its wait elapses is cancelled (best effort) and counted as a timeout.
pub async fn wait_for_batch(
    executions: Vec<ExecutionHandle>,
    total_timeout: Duration,
) -> BatchExecutionResult {
    let started = Instant::now();
    let deadline = started + total_timeout;
    let mut result = BatchExecutionResult::default();
    let total = executions.len();

    debug!(executions = total, timeout_ms = total_timeout.as_millis() as u64, "Waiting for batch");

    for mut handle in executions {
        let wait = deadline.saturating_duration_since(Instant::now()).max(MIN_WAIT);
        match tokio::time::timeout(wait, &mut handle).await {
            Ok(report) => result.record(&handle, Some(report.outcome)),
            Err(_) => {
                handle.cancel();
                warn!(
                    execution_id = %handle.execution_id(),
                    scenario = handle.name(),
                    "Batch wait elapsed, cancelling execution"
                );
                result.record(&handle, None);
            }
        }
    }

    result.elapsed = started.elapsed();
    info!(
        total,
        succeeded = result.success_count,
        failed = result.failure_count,
        timed_out = result.timeout_count,
        elapsed_ms = result.elapsed.as_millis() as u64,
        "Batch complete"
    );
    result
}
