//! Worker pool and batch coordination
//!
//! This module provides:
//! - [`WorkerPool`] - Bounded concurrent execution of scenario submissions
//! - [`ExecutionHandle`] - Awaitable handle resolving to an [`ExecutionReport`]
//! - [`wait_for_batch`] - Wait for many handles under one aggregate deadline

mod batch;
mod handle;
mod pool;

pub use batch::{wait_for_batch, BatchExecutionResult, BatchFailure, BatchFailureKind};
pub use handle::{CompletionCallback, ExecutionHandle, ExecutionOutcome, ExecutionReport};
pub use pool::{SubmitOptions, WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus};
