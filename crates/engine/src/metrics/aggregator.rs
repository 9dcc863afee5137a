//! Per-test latency sample collection

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::result::{PerformanceResult, PerformanceThresholds};

/// Request counters of one test
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTotals {
    pub requests: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
struct TestSamples {
    samples: Mutex<Vec<i64>>,
    requests: AtomicU64,
    errors: AtomicU64,
}

/// Collects latency samples and request counters per named test
///
/// Samples are append-only while a run is in progress and are only sorted
/// when a result is computed. Nothing is cleared implicitly.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    tests: DashMap<String, Arc<TestSamples>>,
    thresholds: PerformanceThresholds,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(mut self, thresholds: PerformanceThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn thresholds(&self) -> PerformanceThresholds {
        self.thresholds
    }

    fn test(&self, name: &str) -> Arc<TestSamples> {
        if let Some(existing) = self.tests.get(name) {
            return Arc::clone(existing.value());
        }
        Arc::clone(self.tests.entry(name.to_string()).or_default().value())
    }

    /// Record one completed request taking `duration_ms`
    pub fn record_sample(&self, test: &str, duration_ms: i64) {
        let samples = self.test(test);
        samples.samples.lock().push(duration_ms);
        samples.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one failed request; no latency sample is kept
    pub fn record_error(&self, test: &str) {
        let samples = self.test(test);
        samples.requests.fetch_add(1, Ordering::Relaxed);
        samples.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sample_count(&self, test: &str) -> usize {
        self.tests
            .get(test)
            .map(|t| t.samples.lock().len())
            .unwrap_or(0)
    }

    pub fn totals(&self, test: &str) -> RequestTotals {
        self.tests
            .get(test)
            .map(|t| RequestTotals {
                requests: t.requests.load(Ordering::Relaxed),
                errors: t.errors.load(Ordering::Relaxed),
            })
            .unwrap_or_default()
    }

    /// Names of every test with recorded data, sorted
    pub fn test_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tests.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Summarize a finished run
    ///
    /// Call once the run window has closed. An unknown or empty test yields a
    /// zeroed result that fails its thresholds.
    pub fn compute_result(
        &self,
        test: &str,
        concurrency: usize,
        total_duration: Duration,
    ) -> PerformanceResult {
        let (samples, totals) = match self.tests.get(test) {
            Some(t) => (
                t.samples.lock().clone(),
                RequestTotals {
                    requests: t.requests.load(Ordering::Relaxed),
                    errors: t.errors.load(Ordering::Relaxed),
                },
            ),
            None => (Vec::new(), RequestTotals::default()),
        };

        let result = PerformanceResult::compute(
            test,
            concurrency,
            total_duration,
            samples,
            totals.requests,
            totals.errors,
            self.thresholds,
        );
        info!(
            test,
            concurrency,
            requests = result.total_requests,
            errors = result.total_errors,
            avg_ms = result.latency.avg,
            p95_ms = result.latency.p95,
            throughput = result.throughput,
            grade = %result.grade(),
            passed = result.meets_performance_thresholds(),
            "Computed performance result"
        );
        result
    }

    /// Drop all data recorded for `test`
    pub fn clear(&self, test: &str) {
        if self.tests.remove(test).is_some() {
            debug!(test, "Cleared samples");
        }
    }

    pub fn clear_all(&self) {
        self.tests.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Grade;

    #[test]
    fn test_record_and_totals() {
        let metrics = MetricsAggregator::new();
        metrics.record_sample("search", 120);
        metrics.record_sample("search", 80);
        metrics.record_error("search");

        assert_eq!(metrics.sample_count("search"), 2);
        assert_eq!(
            metrics.totals("search"),
            RequestTotals {
                requests: 3,
                errors: 1
            }
        );
        assert_eq!(metrics.totals("other"), RequestTotals::default());
    }

    #[test]
    fn test_tests_are_isolated() {
        let metrics = MetricsAggregator::new();
        metrics.record_sample("a", 1);
        metrics.record_sample("b", 2);
        metrics.record_sample("b", 3);

        assert_eq!(metrics.sample_count("a"), 1);
        assert_eq!(metrics.sample_count("b"), 2);
        assert_eq!(metrics.test_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_compute_result_from_samples() {
        let metrics = MetricsAggregator::new();
        for _ in 0..99 {
            metrics.record_sample("checkout", 100);
        }
        metrics.record_sample("checkout", 5000);

        let result = metrics.compute_result("checkout", 10, Duration::from_secs(5));
        assert_eq!(result.total_requests, 100);
        assert_eq!(result.latency.min, 100);
        assert_eq!(result.latency.max, 5000);
        assert_eq!(result.latency.p95, 100);
        assert_eq!(result.latency.avg, 149.0);
        assert_eq!(result.throughput, 20.0);
        assert!(result.meets_performance_thresholds());
        assert_eq!(result.grade(), Grade::APlus);
    }

    #[test]
    fn test_compute_result_for_unknown_test() {
        let metrics = MetricsAggregator::new();
        let result = metrics.compute_result("nothing", 1, Duration::from_secs(1));

        assert_eq!(result.total_requests, 0);
        assert_eq!(result.latency.max, 0);
        assert!(!result.meets_performance_thresholds());
    }

    #[test]
    fn test_custom_thresholds() {
        let metrics = MetricsAggregator::new().with_thresholds(PerformanceThresholds {
            response_time_ms: 50.0,
            error_rate_percent: 0.0,
            throughput_rps: 1.0,
        });
        metrics.record_sample("api", 60);

        let result = metrics.compute_result("api", 1, Duration::from_secs(1));
        assert!(!result.meets_performance_thresholds());
        assert_eq!(result.violations().len(), 1);
    }

    #[test]
    fn test_clear_is_explicit() {
        let metrics = MetricsAggregator::new();
        metrics.record_sample("a", 10);
        metrics.record_sample("b", 10);

        // Computing a result keeps the samples
        metrics.compute_result("a", 1, Duration::from_secs(1));
        assert_eq!(metrics.sample_count("a"), 1);

        metrics.clear("a");
        assert_eq!(metrics.sample_count("a"), 0);
        assert_eq!(metrics.sample_count("b"), 1);

        metrics.clear_all();
        assert!(metrics.test_names().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_recording() {
        let metrics = Arc::new(MetricsAggregator::new());
        let mut tasks = Vec::new();
        for i in 0..8 {
            let metrics = Arc::clone(&metrics);
            tasks.push(tokio::spawn(async move {
                for j in 0..250 {
                    if j % 10 == 0 {
                        metrics.record_error("load");
                    } else {
                        metrics.record_sample("load", i * 10 + j);
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let totals = metrics.totals("load");
        assert_eq!(totals.requests, 2000);
        assert_eq!(totals.errors, 200);
        assert_eq!(metrics.sample_count("load"), 1800);
    }
}
