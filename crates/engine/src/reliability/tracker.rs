//! Per-unit retry bookkeeping

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::report::{Artifact, ReportSink};

/// Attempt history of one execution unit
#[derive(Debug, Clone, Copy)]
pub struct RetryState {
    /// Attempts started so far
    pub attempts: u32,
    /// When the latest attempt was (or will be) allowed to start
    pub last_attempt_at: Instant,
}

/// Aggregate retry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStats {
    /// Re-attempts started
    pub total_retries: u64,
    /// Units that failed at least once and then completed
    pub successful_retries: u64,
    /// Units that failed terminally after consuming their retry budget
    pub exhausted: u64,
    /// Units currently being tracked
    pub tracked_units: usize,
}

impl RetryStats {
    /// Share of retried units that recovered, in percent
    pub fn recovery_rate(&self) -> f64 {
        let settled = self.successful_retries + self.exhausted;
        if settled == 0 {
            return 0.0;
        }
        self.successful_retries as f64 / settled as f64 * 100.0
    }
}

/// Tracks attempts per execution-unit key and throttles re-attempts
#[derive(Debug, Default)]
pub struct RetryTracker {
    states: DashMap<String, RetryState>,
    total_retries: AtomicU64,
    successful_retries: AtomicU64,
    exhausted: AtomicU64,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next attempt of `key`, waiting out the inter-attempt delay
    ///
    /// Two attempts of the same key never start less than `delay` apart, even
    /// when requested concurrently. Returns the 1-based attempt number.
    pub async fn begin_attempt(&self, key: &str, delay: Duration) -> u32 {
        let now = Instant::now();
        let (attempt, start_at) = {
            let mut state = self.states.entry(key.to_string()).or_insert(RetryState {
                attempts: 0,
                last_attempt_at: now,
            });
            let start_at = if state.attempts == 0 {
                now
            } else {
                (state.last_attempt_at + delay).max(now)
            };
            state.attempts += 1;
            state.last_attempt_at = start_at;
            (state.attempts, start_at)
        };

        if start_at > now {
            debug!(
                unit = key,
                attempt,
                wait_ms = (start_at - now).as_millis() as u64,
                "Throttling retry attempt"
            );
            tokio::time::sleep_until(start_at).await;
        }
        attempt
    }

    /// Count one re-attempt
    pub fn record_retry(&self) {
        self.total_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// A unit completed; counts as recovered if it needed more than one attempt
    pub fn record_recovered(&self, key: &str) {
        if let Some((_, state)) = self.states.remove(key) {
            if state.attempts > 1 {
                self.successful_retries.fetch_add(1, Ordering::Relaxed);
                debug!(unit = key, attempts = state.attempts, "Unit recovered after retry");
            }
        }
    }

    /// A unit failed terminally after its retry budget
    pub fn record_exhausted(&self, key: &str) {
        let attempts = self.states.remove(key).map(|(_, s)| s.attempts).unwrap_or(0);
        self.exhausted.fetch_add(1, Ordering::Relaxed);
        warn!(unit = key, attempts, "Retry budget exhausted");
    }

    /// Forget a unit without touching counters
    pub fn clear(&self, key: &str) {
        self.states.remove(key);
    }

    /// Attempts started for `key`, 0 if untracked
    pub fn attempts(&self, key: &str) -> u32 {
        self.states.get(key).map(|s| s.attempts).unwrap_or(0)
    }

    pub fn state(&self, key: &str) -> Option<RetryState> {
        self.states.get(key).map(|s| *s)
    }

    pub fn stats(&self) -> RetryStats {
        RetryStats {
            total_retries: self.total_retries.load(Ordering::Relaxed),
            successful_retries: self.successful_retries.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            tracked_units: self.states.len(),
        }
    }

    /// Emit retry statistics to a report sink
    pub fn report(&self, sink: &dyn ReportSink) {
        let stats = self.stats();
        sink.log_info(&format!(
            "Retries: {} total, {} recovered, {} exhausted",
            stats.total_retries, stats.successful_retries, stats.exhausted
        ));
        if stats.exhausted > 0 {
            sink.log_warning(&format!(
                "{} unit(s) failed after exhausting retries",
                stats.exhausted
            ));
        }
        match Artifact::json("retry-stats", &stats) {
            Ok(artifact) => sink.attach(artifact),
            Err(e) => warn!(error = %e, "Failed to serialize retry stats"),
        }
    }
}
