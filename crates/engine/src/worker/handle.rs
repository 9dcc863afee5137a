//! Completion types and the awaitable execution handle

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::execution::ExecutionStatus;
use crate::scenario::ScenarioError;

/// Terminal result of one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The scenario returned `Ok`
    Completed,
    /// The scenario failed on its final attempt
    Failed(ScenarioError),
    /// The watchdog fired after the given allotment
    TimedOut(Duration),
    /// Cancelled by the caller, a batch deadline or pool shutdown
    Cancelled,
}

impl ExecutionOutcome {
    /// Matching terminal context status
    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::Completed => ExecutionStatus::Completed,
            Self::Failed(_) => ExecutionStatus::Failed,
            Self::TimedOut(_) => ExecutionStatus::TimedOut,
            Self::Cancelled => ExecutionStatus::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn error(&self) -> Option<&ScenarioError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Summary of a finished submission, delivered to callbacks and awaiters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Submission id (stable across retry attempts)
    pub execution_id: Uuid,
    pub name: String,
    pub unit_key: String,
    /// Attempts started; 0 when cancelled while queued
    pub attempts: u32,
    pub outcome: ExecutionOutcome,
    /// Wall time from submission to terminal outcome, queueing and retries included
    pub elapsed: Duration,
    /// Run time of the final attempt alone
    pub run_duration: Duration,
    pub started_at: DateTime<Utc>,
}

impl ExecutionReport {
    pub fn status(&self) -> ExecutionStatus {
        self.outcome.status()
    }

    /// Final attempt run time in whole milliseconds
    pub fn run_duration_ms(&self) -> i64 {
        i64::try_from(self.run_duration.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Called once per submission after its terminal status is set
pub type CompletionCallback = Arc<dyn Fn(&ExecutionReport) + Send + Sync>;

/// Handle to a submitted scenario
///
/// Await it to get the [`ExecutionReport`]. Dropping the handle does not
/// cancel the work.
#[derive(Debug)]
pub struct ExecutionHandle {
    pub(super) execution_id: Uuid,
    pub(super) name: Arc<str>,
    pub(super) unit_key: String,
    pub(super) submitted_at: DateTime<Utc>,
    pub(super) submitted: tokio::time::Instant,
    pub(super) cancel: CancellationToken,
    pub(super) join: JoinHandle<ExecutionReport>,
}

impl ExecutionHandle {
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit_key(&self) -> &str {
        &self.unit_key
    }

    /// Request cancellation
    ///
    /// Best effort: a scenario that never yields keeps running until it
    /// does, but the submission resolves as `Cancelled` at its next await
    /// point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    fn lost_report(&self, outcome: ExecutionOutcome) -> ExecutionReport {
        ExecutionReport {
            execution_id: self.execution_id,
            name: self.name.to_string(),
            unit_key: self.unit_key.clone(),
            attempts: 0,
            outcome,
            elapsed: self.submitted.elapsed(),
            run_duration: Duration::ZERO,
            started_at: self.submitted_at,
        }
    }
}

impl Future for ExecutionHandle {
    type Output = ExecutionReport;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.join).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(report)) => Poll::Ready(report),
            Poll::Ready(Err(err)) if err.is_panic() => {
                let error = ScenarioError::from_panic(err.into_panic());
                Poll::Ready(self.lost_report(ExecutionOutcome::Failed(error)))
            }
            Poll::Ready(Err(_)) => Poll::Ready(self.lost_report(ExecutionOutcome::Cancelled)),
        }
    }
}
