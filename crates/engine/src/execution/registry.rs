//! Registry of in-flight execution contexts

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use super::context::{ExecutionContext, ExecutionStatus};

/// Concurrent map of execution id to context
///
/// Registration returns a [`RegistrationGuard`]; dropping the guard removes
/// the context, so removal happens on success, failure, timeout, panic and
/// task abort alike.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    contexts: DashMap<Uuid, Arc<ExecutionContext>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a context until the returned guard is dropped
    pub fn register(self: &Arc<Self>, ctx: Arc<ExecutionContext>) -> RegistrationGuard {
        let id = ctx.execution_id();
        if self.contexts.insert(id, Arc::clone(&ctx)).is_some() {
            warn!(execution_id = %id, "Execution id registered twice");
        }
        debug!(
            execution_id = %id,
            name = ctx.name(),
            attempt = ctx.attempt(),
            "Context registered"
        );

        RegistrationGuard {
            registry: Arc::clone(self),
            ctx,
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<ExecutionContext>> {
        self.contexts.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a context; returns `false` if it was already gone
    pub fn remove(&self, id: &Uuid) -> bool {
        self.contexts.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Snapshot of the contexts still running
    pub fn running(&self) -> Vec<Arc<ExecutionContext>> {
        self.contexts
            .iter()
            .filter(|entry| entry.value().status() == ExecutionStatus::Running)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Request cancellation of every registered context
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for entry in self.contexts.iter() {
            if !entry.value().is_cancelled() {
                entry.value().cancel();
                cancelled += 1;
            }
        }
        cancelled
    }
}

/// Removes its context from the registry when dropped
#[must_use = "dropping the guard immediately unregisters the context"]
pub struct RegistrationGuard {
    registry: Arc<ContextRegistry>,
    ctx: Arc<ExecutionContext>,
}

impl RegistrationGuard {
    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        // An attempt dropped mid-flight (task aborted) never reached a terminal status
        if self.ctx.transition(ExecutionStatus::Cancelled) {
            debug!(execution_id = %self.ctx.execution_id(), "Context dropped while running");
        }
        self.registry.remove(&self.ctx.execution_id());
    }
}
