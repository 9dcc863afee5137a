//! Scenarios: caller-supplied units of simulated user work
//!
//! The harness never looks inside a scenario. It only runs it, times it, and
//! inspects the [`ScenarioError`] it returns to decide whether a retry could
//! help.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::execution::ExecutionContext;

/// Broad category of a scenario failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Logic-level expectation mismatch; retrying cannot change the outcome
    Assertion,
    /// The target did not answer in time
    Timeout,
    /// A previously located element is no longer attached
    StaleElement,
    /// An element could not be found or interacted with
    MissingElement,
    /// Transport-level connection problem
    Connection,
    /// Client session or driver transport failure
    Session,
    /// Anything unclassified
    Other,
}

impl FailureKind {
    /// Classify a failure from its message
    pub fn classify(message: &str) -> Self {
        let message = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| message.contains(n));
        let has_word = |word: &str| {
            message
                .split(|c: char| !c.is_alphanumeric() && c != '_')
                .any(|w| w == word)
        };

        // A bare "expected" is an assertion only when nothing transient matched
        if has(&["assertion", "assert_eq"]) || has_word("assert") {
            Self::Assertion
        } else if has(&["stale element", "stale_element"]) {
            Self::StaleElement
        } else if has(&[
            "no such element",
            "element not found",
            "not interactable",
            "click intercepted",
        ]) {
            Self::MissingElement
        } else if has(&[
            "timeout",
            "timed out",
            "deadline exceeded",
            "expected condition failed",
            "tried for",
        ]) {
            Self::Timeout
        } else if has(&[
            "connection reset",
            "connection refused",
            "connection closed",
            "broken pipe",
            "unreachable",
        ]) {
            Self::Connection
        } else if has(&["session", "transport", "webdriver"]) {
            Self::Session
        } else if has_word("expected") {
            Self::Assertion
        } else {
            Self::Other
        }
    }

    /// Infrastructure hiccups that are worth another attempt
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::StaleElement
                | Self::MissingElement
                | Self::Connection
                | Self::Session
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Assertion => "assertion",
            Self::Timeout => "timeout",
            Self::StaleElement => "stale_element",
            Self::MissingElement => "missing_element",
            Self::Connection => "connection",
            Self::Session => "session",
            Self::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// Error returned by a scenario iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ScenarioError {
    pub kind: FailureKind,
    pub message: String,
}

impl ScenarioError {
    /// Create an error, classifying it from the message
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: FailureKind::classify(&message),
            message,
        }
    }

    /// An assertion failure, never retried
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::with_kind(FailureKind::Assertion, message)
    }

    pub fn with_kind(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A panic captured from scenario code
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::new(format!("scenario panicked: {detail}"))
    }
}

impl From<anyhow::Error> for ScenarioError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// Result of one scenario invocation
pub type ScenarioResult = Result<(), ScenarioError>;

type ScenarioFn = dyn Fn(Arc<ExecutionContext>) -> BoxFuture<'static, ScenarioResult> + Send + Sync;

/// A named unit of work executed once per iteration
///
/// The closure receives the iteration's [`ExecutionContext`] for attribute
/// storage and cancellation checks. Cloning is cheap.
///
/// # Example
///
/// ```
/// use loadswarm_engine::{Scenario, ScenarioError};
///
/// let scenario = Scenario::new("checkout", |ctx| async move {
///     ctx.set_attribute("step", "cart");
///     if ctx.is_cancelled() {
///         return Err(ScenarioError::new("cancelled before checkout"));
///     }
///     Ok(())
/// });
/// assert_eq!(scenario.name(), "checkout");
/// ```
#[derive(Clone)]
pub struct Scenario {
    name: Arc<str>,
    run: Arc<ScenarioFn>,
}

impl Scenario {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<ExecutionContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ScenarioResult> + Send + 'static,
    {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            run: Arc::new(move |ctx| Box::pin(f(ctx))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start one invocation
    pub fn invoke(&self, ctx: Arc<ExecutionContext>) -> BoxFuture<'static, ScenarioResult> {
        (self.run)(ctx)
    }
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_transient_messages() {
        assert_eq!(
            FailureKind::classify("Timed out waiting for page load"),
            FailureKind::Timeout
        );
        assert_eq!(
            FailureKind::classify("StaleElementReferenceException: stale element reference"),
            FailureKind::StaleElement
        );
        assert_eq!(
            FailureKind::classify("no such element: #login"),
            FailureKind::MissingElement
        );
        assert_eq!(
            FailureKind::classify("Connection reset by peer"),
            FailureKind::Connection
        );
        assert_eq!(
            FailureKind::classify("invalid session id"),
            FailureKind::Session
        );
    }

    #[test]
    fn test_classify_assertion_and_other() {
        assert_eq!(
            FailureKind::classify("AssertionError: expected 200 but was 500"),
            FailureKind::Assertion
        );
        assert_eq!(
            FailureKind::classify("Total mismatch: expected 42, got 41"),
            FailureKind::Assertion
        );
        assert_eq!(FailureKind::classify("disk full"), FailureKind::Other);
        assert_eq!(FailureKind::classify("unexpected EOF"), FailureKind::Other);
        assert!(!FailureKind::Assertion.is_transient());
        assert!(!FailureKind::Other.is_transient());
        assert!(FailureKind::Connection.is_transient());
    }

    #[test]
    fn test_wait_timeouts_mentioning_expected_are_transient() {
        let err = ScenarioError::new(
            "Expected condition failed: waiting for visibility of element located by \
             By.id: checkout (tried for 10 second(s) with 500 milliseconds interval)",
        );
        assert_eq!(err.kind, FailureKind::Timeout);
        assert!(err.kind.is_transient());

        assert_eq!(
            FailureKind::classify("Timed out waiting for page load, expected title 'Home'"),
            FailureKind::Timeout
        );
        assert_eq!(
            FailureKind::classify("no such element, expected #cart to exist"),
            FailureKind::MissingElement
        );
    }

    #[test]
    fn test_error_display_and_constructors() {
        let err = ScenarioError::assertion("total mismatch");
        assert_eq!(err.kind, FailureKind::Assertion);
        assert_eq!(err.to_string(), "assertion: total mismatch");

        let err: ScenarioError = anyhow::anyhow!("connection refused").into();
        assert_eq!(err.kind, FailureKind::Connection);
    }

    #[test]
    fn test_panic_payload_is_captured() {
        let err = ScenarioError::from_panic(Box::new("boom"));
        assert!(err.message.contains("boom"));

        let err = ScenarioError::from_panic(Box::new(String::from("kaboom")));
        assert!(err.message.contains("kaboom"));
    }

    #[tokio::test]
    async fn test_scenario_invocation() {
        let scenario = Scenario::new("noop", |ctx| async move {
            ctx.set_attribute("visited", true);
            Ok(())
        });
        let ctx = Arc::new(ExecutionContext::new("noop", "noop#1", 1));

        scenario.invoke(ctx.clone()).await.unwrap();
        assert_eq!(ctx.attribute("visited"), Some(serde_json::json!(true)));
        assert_eq!(format!("{scenario:?}"), "Scenario { name: \"noop\" }");
    }
}
