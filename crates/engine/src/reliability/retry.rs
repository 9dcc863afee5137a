//! Retry policy implementation

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::HarnessConfig;
use crate::scenario::{FailureKind, ScenarioError};

/// Message fragments that mark a failure as an environmental hiccup
const DEFAULT_TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "stale element",
    "no such element",
    "connection reset",
    "connection refused",
    "session",
    "transport",
];

/// Per-submission retry configuration
///
/// `max_retries` counts re-attempts, so a unit runs at most
/// `max_retries + 1` times. Attempt numbers are 1-based.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Re-attempts allowed after the first attempt
    pub max_retries: u32,

    /// Minimum gap between two attempts of the same unit
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,

    /// Lower-case message fragments treated as transient
    #[serde(default)]
    pub transient_patterns: Vec<String>,

    /// Failure kinds that are never retried
    #[serde(default)]
    pub non_retryable_kinds: Vec<FailureKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of consulting a [`RetryPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryDecision {
    /// Failure matches a transient kind or pattern
    RetryTransient,
    /// Unclassified failure, retried optimistically
    RetryUnclassified,
    /// Failure kind can never succeed on another attempt
    NotRetryable,
    /// Retry budget used up
    Exhausted,
}

impl RetryDecision {
    pub fn should_retry(self) -> bool {
        matches!(self, Self::RetryTransient | Self::RetryUnclassified)
    }
}

impl fmt::Display for RetryDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryTransient => write!(f, "retry (transient)"),
            Self::RetryUnclassified => write!(f, "retry (unclassified)"),
            Self::NotRetryable => write!(f, "not retryable"),
            Self::Exhausted => write!(f, "retries exhausted"),
        }
    }
}

impl RetryPolicy {
    /// Two retries, one second apart, assertions never retried
    pub fn new() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
            transient_patterns: DEFAULT_TRANSIENT_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            non_retryable_kinds: vec![FailureKind::Assertion],
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            retry_delay: Duration::ZERO,
            ..Self::new()
        }
    }

    /// Policy using `retry.count` and `retry.delay`
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new()
            .with_max_retries(config.retry_count)
            .with_retry_delay(config.retry_delay)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Add a message fragment (case-insensitive) to treat as transient
    pub fn with_transient_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.transient_patterns.push(pattern.into().to_lowercase());
        self
    }

    /// Never retry failures of `kind`
    pub fn with_non_retryable_kind(mut self, kind: FailureKind) -> Self {
        if !self.non_retryable_kinds.contains(&kind) {
            self.non_retryable_kinds.push(kind);
        }
        self
    }

    /// Upper bound on attempts for one unit
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Classify the failure of attempt number `attempt`
    ///
    /// Rules apply in order: budget, non-retryable kind, transient match,
    /// then an optimistic default.
    pub fn decide(&self, error: &ScenarioError, attempt: u32) -> RetryDecision {
        if attempt > self.max_retries {
            return RetryDecision::Exhausted;
        }
        if self.non_retryable_kinds.contains(&error.kind) {
            return RetryDecision::NotRetryable;
        }
        if error.kind.is_transient() || self.matches_transient_pattern(&error.message) {
            return RetryDecision::RetryTransient;
        }
        RetryDecision::RetryUnclassified
    }

    pub fn should_retry(&self, error: &ScenarioError, attempt: u32) -> bool {
        self.decide(error, attempt).should_retry()
    }

    fn matches_transient_pattern(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.transient_patterns
            .iter()
            .any(|p| message.contains(p.as_str()))
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.retry_delay, Duration::from_secs(1));
        assert_eq!(policy.non_retryable_kinds, vec![FailureKind::Assertion]);
    }

    #[test]
    fn test_no_retry_policy() {
        let policy = RetryPolicy::no_retry();
        let err = ScenarioError::new("connection reset");
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.decide(&err, 1), RetryDecision::Exhausted);
    }

    #[test]
    fn test_assertion_never_retried() {
        let policy = RetryPolicy::new().with_max_retries(100);
        let err = ScenarioError::assertion("expected 3 items, found 2");
        for attempt in 1..=100 {
            assert!(!policy.should_retry(&err, attempt));
        }
        assert_eq!(policy.decide(&err, 1), RetryDecision::NotRetryable);
    }

    #[test]
    fn test_transient_retried_until_budget_exhausted() {
        let policy = RetryPolicy::new().with_max_retries(3);
        let err = ScenarioError::new("stale element reference");

        let retried: Vec<u32> = (1..=10)
            .filter(|&attempt| policy.should_retry(&err, attempt))
            .collect();
        assert_eq!(retried, vec![1, 2, 3]);
        assert_eq!(policy.decide(&err, 4), RetryDecision::Exhausted);
    }

    #[test]
    fn test_budget_checked_before_kind() {
        let policy = RetryPolicy::new().with_max_retries(1);
        let err = ScenarioError::assertion("bad");
        assert_eq!(policy.decide(&err, 2), RetryDecision::Exhausted);
    }

    #[test]
    fn test_unclassified_retried_optimistically() {
        let policy = RetryPolicy::new();
        let err = ScenarioError::new("disk quota exceeded");
        assert_eq!(policy.decide(&err, 1), RetryDecision::RetryUnclassified);
        assert!(policy.should_retry(&err, 2));
    }

    #[test]
    fn test_custom_transient_pattern() {
        let policy = RetryPolicy::new().with_transient_pattern("503 Service Unavailable");
        let err = ScenarioError::new("upstream said 503 service unavailable");
        assert_eq!(err.kind, FailureKind::Other);
        assert_eq!(policy.decide(&err, 1), RetryDecision::RetryTransient);
    }

    #[test]
    fn test_custom_non_retryable_kind() {
        let policy = RetryPolicy::new()
            .with_non_retryable_kind(FailureKind::Session)
            .with_non_retryable_kind(FailureKind::Session);
        assert_eq!(policy.non_retryable_kinds.len(), 2);
        let err = ScenarioError::new("invalid session id");
        assert_eq!(policy.decide(&err, 1), RetryDecision::NotRetryable);
    }

    #[test]
    fn test_from_config() {
        let config = HarnessConfig {
            retry_count: 5,
            retry_delay: Duration::from_millis(20),
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.retry_delay, Duration::from_millis(20));
    }

    #[test]
    fn test_policy_serde_uses_millis() {
        let policy = RetryPolicy::new().with_retry_delay(Duration::from_millis(1500));
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["retry_delay"], 1500);
        assert_eq!(json["non_retryable_kinds"][0], "assertion");

        let back: RetryPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back, policy);
    }
}
