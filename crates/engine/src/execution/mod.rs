//! Execution tracking
//!
//! This module provides:
//! - [`ExecutionContext`] - Identity, attributes and status of one in-flight attempt
//! - [`ContextRegistry`] - Concurrent registry of in-flight contexts
//!
//! A context is created `Running` when an attempt starts, moves forward to a
//! terminal status exactly once, and is removed from the registry by a
//! [`RegistrationGuard`] on every exit path.

mod context;
mod registry;

pub use context::{ExecutionContext, ExecutionStatus};
pub use registry::{ContextRegistry, RegistrationGuard};
