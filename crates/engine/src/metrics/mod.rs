//! Latency metrics and performance verdicts
//!
//! This module provides:
//! - [`MetricsAggregator`] - Per-test latency samples and request counters
//! - [`PerformanceResult`] - Immutable run summary with thresholds and grade
//! - [`percentile`] - Nearest-rank percentile over sorted samples

mod aggregator;
mod result;

pub use aggregator::{MetricsAggregator, RequestTotals};
pub use result::{
    percentile, Grade, LatencyStats, PerformanceResult, PerformanceThresholds, ThresholdViolation,
};
