//! Load steps and stress ramps
//!
//! A [`LoadRunner`] drives a fixed number of virtual users for a fixed
//! window and returns a [`PerformanceResult`](crate::metrics::PerformanceResult).
//! A [`StressTest`] runs one load step per ascending concurrency level and
//! reports the [`BreakingPoint`].

mod runner;
mod stress;

pub use runner::{LoadRunner, LoadStep, CONCURRENCY_ATTRIBUTE, VIRTUAL_USER_ATTRIBUTE};
pub use stress::{BreakingPoint, StressError, StressReport, StressTest};
