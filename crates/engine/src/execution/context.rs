//! Execution context for a single scenario attempt

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Lifecycle status of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Context passed to every scenario invocation
///
/// The context provides:
/// - Identity of the attempt (execution id, unit key, attempt number, worker)
/// - A string-keyed attribute bag the scenario may read and write
/// - Cancellation detection for cooperative scenarios
///
/// Status only moves forward: once terminal it never changes again.
#[derive(Debug)]
pub struct ExecutionContext {
    execution_id: Uuid,
    name: String,
    unit_key: String,
    attempt: u32,
    worker: String,
    created_at: DateTime<Utc>,
    attributes: Mutex<HashMap<String, Value>>,
    status: Mutex<ExecutionStatus>,
    cancel: CancellationToken,
}

impl ExecutionContext {
    /// Create a running context on the current thread
    pub fn new(name: impl Into<String>, unit_key: impl Into<String>, attempt: u32) -> Self {
        let thread = std::thread::current();
        let worker = match thread.name() {
            Some(name) => format!("{name}/{:?}", thread.id()),
            None => format!("{:?}", thread.id()),
        };

        Self {
            execution_id: Uuid::now_v7(),
            name: name.into(),
            unit_key: unit_key.into(),
            attempt,
            worker,
            created_at: Utc::now(),
            attributes: Mutex::new(HashMap::new()),
            status: Mutex::new(ExecutionStatus::Running),
            cancel: CancellationToken::new(),
        }
    }

    /// Tie this context's cancellation to a parent token
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Seed attributes before the scenario runs
    pub fn with_attributes(self, attributes: HashMap<String, Value>) -> Self {
        self.attributes.lock().extend(attributes);
        self
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key identifying the execution unit across retry attempts
    pub fn unit_key(&self) -> &str {
        &self.unit_key
    }

    /// Attempt number (1-based)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Thread that created the context
    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> ExecutionStatus {
        *self.status.lock()
    }

    /// Move to `next`, returning `false` if the context is already terminal
    pub fn transition(&self, next: ExecutionStatus) -> bool {
        let mut status = self.status.lock();
        if status.is_terminal() || *status == next {
            return false;
        }
        *status = next;
        true
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.lock().insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.attributes.lock().get(key).cloned()
    }

    pub fn remove_attribute(&self, key: &str) -> Option<Value> {
        self.attributes.lock().remove(key)
    }

    /// Snapshot of all attributes
    pub fn attributes(&self) -> HashMap<String, Value> {
        self.attributes.lock().clone()
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_context_is_running() {
        let ctx = ExecutionContext::new("login", "login#1", 1);
        assert_eq!(ctx.status(), ExecutionStatus::Running);
        assert_eq!(ctx.name(), "login");
        assert_eq!(ctx.unit_key(), "login#1");
        assert_eq!(ctx.attempt(), 1);
        assert!(!ctx.worker().is_empty());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_transitions_only_move_forward() {
        let ctx = ExecutionContext::new("login", "login#1", 1);

        assert!(ctx.transition(ExecutionStatus::TimedOut));
        assert!(!ctx.transition(ExecutionStatus::Completed));
        assert!(!ctx.transition(ExecutionStatus::Running));
        assert_eq!(ctx.status(), ExecutionStatus::TimedOut);
    }

    #[test]
    fn test_running_to_running_is_not_a_transition() {
        let ctx = ExecutionContext::new("login", "login#1", 1);
        assert!(!ctx.transition(ExecutionStatus::Running));
        assert!(ctx.transition(ExecutionStatus::Completed));
    }

    #[test]
    fn test_attributes() {
        let mut seed = HashMap::new();
        seed.insert("user".to_string(), json!("alice"));
        let ctx = ExecutionContext::new("login", "login#1", 1).with_attributes(seed);

        ctx.set_attribute("items", 3);
        assert_eq!(ctx.attribute("user"), Some(json!("alice")));
        assert_eq!(ctx.attribute("items"), Some(json!(3)));
        assert_eq!(ctx.attributes().len(), 2);
        assert_eq!(ctx.remove_attribute("items"), Some(json!(3)));
        assert!(ctx.attribute("items").is_none());
    }

    #[test]
    fn test_parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let ctx = ExecutionContext::new("login", "login#1", 1).with_cancellation(&parent);

        parent.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ExecutionStatus::TimedOut.to_string(), "timed_out");
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }
}
