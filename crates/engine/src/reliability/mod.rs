//! Retry classification and per-unit retry tracking
//!
//! This module provides:
//! - [`RetryPolicy`] - Decides whether a failed attempt is worth repeating
//! - [`RetryTracker`] - Counts attempts per unit and throttles re-attempts
//!
//! # Example
//!
//! ```
//! use loadswarm_engine::reliability::RetryPolicy;
//! use loadswarm_engine::ScenarioError;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new()
//!     .with_max_retries(3)
//!     .with_retry_delay(Duration::from_millis(500))
//!     .with_transient_pattern("503 service unavailable");
//!
//! assert!(policy.should_retry(&ScenarioError::new("connection reset by peer"), 1));
//! assert!(!policy.should_retry(&ScenarioError::assertion("wrong total"), 1));
//! assert!(!policy.should_retry(&ScenarioError::new("connection reset by peer"), 4));
//! ```

mod retry;
mod tracker;

pub use retry::{RetryDecision, RetryPolicy};
pub use tracker::{RetryState, RetryStats, RetryTracker};
