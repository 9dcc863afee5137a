//! Performance results, thresholds and grading

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::HarnessConfig;
use crate::report::{Artifact, ReportSink};

/// Pass/fail limits for a run; all three must hold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceThresholds {
    /// Maximum average response time in milliseconds
    pub response_time_ms: f64,
    /// Maximum error rate in percent
    pub error_rate_percent: f64,
    /// Minimum throughput in requests per second
    pub throughput_rps: f64,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            response_time_ms: 3000.0,
            error_rate_percent: 5.0,
            throughput_rps: 10.0,
        }
    }
}

impl PerformanceThresholds {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            response_time_ms: config.response_time_threshold_ms,
            error_rate_percent: config.error_rate_threshold,
            throughput_rps: config.throughput_threshold,
        }
    }

    /// Every violated threshold, in a fixed order
    pub fn violations(
        &self,
        avg_ms: f64,
        error_rate: f64,
        throughput: f64,
    ) -> Vec<ThresholdViolation> {
        let mut violations = Vec::new();
        if avg_ms > self.response_time_ms {
            violations.push(ThresholdViolation::ResponseTime {
                actual_ms: avg_ms,
                limit_ms: self.response_time_ms,
            });
        }
        if error_rate > self.error_rate_percent {
            violations.push(ThresholdViolation::ErrorRate {
                actual_percent: error_rate,
                limit_percent: self.error_rate_percent,
            });
        }
        if throughput < self.throughput_rps {
            violations.push(ThresholdViolation::Throughput {
                actual_rps: throughput,
                minimum_rps: self.throughput_rps,
            });
        }
        violations
    }
}

/// A threshold a run failed to meet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThresholdViolation {
    /// No latency samples were recorded
    NoSamples,
    ResponseTime { actual_ms: f64, limit_ms: f64 },
    ErrorRate { actual_percent: f64, limit_percent: f64 },
    Throughput { actual_rps: f64, minimum_rps: f64 },
}

impl fmt::Display for ThresholdViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSamples => write!(f, "no successful samples recorded"),
            Self::ResponseTime {
                actual_ms,
                limit_ms,
            } => write!(
                f,
                "average response time {actual_ms:.1} ms exceeds {limit_ms} ms"
            ),
            Self::ErrorRate {
                actual_percent,
                limit_percent,
            } => write!(f, "error rate {actual_percent:.2}% exceeds {limit_percent}%"),
            Self::Throughput {
                actual_rps,
                minimum_rps,
            } => write!(
                f,
                "throughput {actual_rps:.2} req/s below {minimum_rps} req/s"
            ),
        }
    }
}

/// Letter grade for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    /// Map metrics onto a grade; `F` whenever thresholds are not met
    pub fn from_metrics(
        error_rate: f64,
        avg_ms: f64,
        throughput: f64,
        meets_thresholds: bool,
    ) -> Self {
        if !meets_thresholds {
            return Self::F;
        }
        const BANDS: [(Grade, f64, f64, f64); 4] = [
            (Grade::APlus, 0.0, 1000.0, 20.0),
            (Grade::A, 1.0, 2000.0, 15.0),
            (Grade::B, 2.0, 3000.0, 10.0),
            (Grade::C, 5.0, 5000.0, 5.0),
        ];
        BANDS
            .iter()
            .find(|(_, max_errors, max_avg, min_rps)| {
                error_rate <= *max_errors && avg_ms <= *max_avg && throughput >= *min_rps
            })
            .map(|(grade, ..)| *grade)
            .unwrap_or(Self::D)
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::APlus => "A+",
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        };
        write!(f, "{s}")
    }
}

/// Summary statistics over completed-iteration latencies, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub min: i64,
    pub max: i64,
    pub avg: f64,
    pub p50: i64,
    pub p90: i64,
    pub p95: i64,
    pub p99: i64,
}

impl LatencyStats {
    /// Compute statistics from unsorted samples; zeroed when empty
    pub fn from_samples(mut samples: Vec<i64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_unstable();
        let sum: i128 = samples.iter().map(|&s| s as i128).sum();

        Self {
            min: samples[0],
            max: samples[samples.len() - 1],
            avg: sum as f64 / samples.len() as f64,
            p50: percentile(&samples, 50.0),
            p90: percentile(&samples, 90.0),
            p95: percentile(&samples, 95.0),
            p99: percentile(&samples, 99.0),
        }
    }
}

/// Nearest-rank percentile of an ascending slice
///
/// Index is `ceil(p / 100 * n) - 1`, clamped to `[0, n - 1]`. Returns 0 for
/// an empty slice.
pub fn percentile(sorted: &[i64], p: f64) -> i64 {
    if sorted.is_empty() {
        return 0;
    }
    let n = sorted.len();
    let rank = (p / 100.0 * n as f64).ceil() as i64 - 1;
    let idx = rank.clamp(0, n as i64 - 1) as usize;
    sorted[idx]
}

/// Immutable snapshot of one run of a named test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceResult {
    pub test_name: String,
    pub concurrency: usize,
    pub duration: Duration,
    pub total_requests: u64,
    pub total_errors: u64,
    pub latency: LatencyStats,
    pub sample_count: usize,
    /// Errors in percent of total requests
    pub error_rate: f64,
    /// Requests per second over the run duration
    pub throughput: f64,
    pub thresholds: PerformanceThresholds,
    meets_thresholds: bool,
    grade: Grade,
    violations: Vec<ThresholdViolation>,
}

impl PerformanceResult {
    /// Evaluate a finished run
    pub fn compute(
        test_name: impl Into<String>,
        concurrency: usize,
        duration: Duration,
        samples: Vec<i64>,
        total_requests: u64,
        total_errors: u64,
        thresholds: PerformanceThresholds,
    ) -> Self {
        let sample_count = samples.len();
        let latency = LatencyStats::from_samples(samples);

        // Without a single completed sample every derived metric stays zero
        let (error_rate, throughput, violations) = if sample_count == 0 {
            (0.0, 0.0, vec![ThresholdViolation::NoSamples])
        } else {
            let error_rate = if total_requests == 0 {
                0.0
            } else {
                total_errors as f64 / total_requests as f64 * 100.0
            };
            let secs = duration.as_secs_f64();
            let throughput = if secs > 0.0 {
                total_requests as f64 / secs
            } else {
                0.0
            };
            let violations = thresholds.violations(latency.avg, error_rate, throughput);
            (error_rate, throughput, violations)
        };
        let meets_thresholds = violations.is_empty();

        Self {
            test_name: test_name.into(),
            concurrency,
            duration,
            total_requests,
            total_errors,
            latency,
            sample_count,
            error_rate,
            throughput,
            thresholds,
            meets_thresholds,
            grade: Grade::from_metrics(error_rate, latency.avg, throughput, meets_thresholds),
            violations,
        }
    }

    /// The pass/fail verdict callers consult
    pub fn meets_performance_thresholds(&self) -> bool {
        self.meets_thresholds
    }

    pub fn grade(&self) -> Grade {
        self.grade
    }

    pub fn violations(&self) -> &[ThresholdViolation] {
        &self.violations
    }

    /// Human-readable verdict: grade plus each violated threshold
    pub fn verdict(&self) -> String {
        if self.meets_thresholds {
            format!(
                "Grade {}: {} meets thresholds (avg {:.1} ms, {:.2}% errors, {:.2} req/s)",
                self.grade, self.test_name, self.latency.avg, self.error_rate, self.throughput
            )
        } else {
            let reasons: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
            format!(
                "Grade {}: {} failed thresholds: {}",
                self.grade,
                self.test_name,
                reasons.join("; ")
            )
        }
    }

    /// Emit the verdict and the serialized result to a report sink
    pub fn report(&self, sink: &dyn ReportSink) {
        sink.log_info(&format!(
            "{} @ {} users: {} requests, p50 {} ms, p95 {} ms, p99 {} ms",
            self.test_name,
            self.concurrency,
            self.total_requests,
            self.latency.p50,
            self.latency.p95,
            self.latency.p99
        ));
        if self.meets_thresholds {
            sink.log_pass(&self.verdict());
        } else {
            sink.log_fail(&self.verdict());
        }
        match Artifact::json(format!("{}-performance", self.test_name), self) {
            Ok(artifact) => sink.attach(artifact),
            Err(e) => warn!(error = %e, "Failed to serialize performance result"),
        }
    }
}
