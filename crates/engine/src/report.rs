//! Report sink
//!
//! The harness emits structured events (pass, fail, warning, attached
//! artifacts) to a [`ReportSink`] and never consumes anything back. Rendering
//! is entirely the sink's business.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Severity of a report event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportLevel {
    Info,
    Pass,
    Fail,
    Warning,
    Attachment,
}

impl fmt::Display for ReportLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
            Self::Warning => write!(f, "warning"),
            Self::Attachment => write!(f, "attachment"),
        }
    }
}

/// An artifact attached to a report (serialized results, captured output)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            body,
        }
    }

    /// Serialize `value` as pretty JSON
    pub fn json<T: Serialize>(name: impl Into<String>, value: &T) -> serde_json::Result<Self> {
        Ok(Self::new(
            name,
            "application/json",
            serde_json::to_vec_pretty(value)?,
        ))
    }

    pub fn text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name, "text/plain", text.into().into_bytes())
    }
}

/// A single event delivered to a sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEvent {
    pub level: ReportLevel,
    pub message: String,
    pub artifact: Option<Artifact>,
    pub at: DateTime<Utc>,
}

impl ReportEvent {
    pub fn new(level: ReportLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            artifact: None,
            at: Utc::now(),
        }
    }

    pub fn attachment(artifact: Artifact) -> Self {
        Self {
            level: ReportLevel::Attachment,
            message: artifact.name.clone(),
            artifact: Some(artifact),
            at: Utc::now(),
        }
    }
}

/// Receiver of structured harness events
///
/// Fire-and-forget: implementations must not block for long and must not
/// panic. Only [`emit`](ReportSink::emit) is required.
pub trait ReportSink: Send + Sync {
    fn emit(&self, event: ReportEvent);

    fn log_info(&self, message: &str) {
        self.emit(ReportEvent::new(ReportLevel::Info, message));
    }

    fn log_pass(&self, message: &str) {
        self.emit(ReportEvent::new(ReportLevel::Pass, message));
    }

    fn log_fail(&self, message: &str) {
        self.emit(ReportEvent::new(ReportLevel::Fail, message));
    }

    fn log_warning(&self, message: &str) {
        self.emit(ReportEvent::new(ReportLevel::Warning, message));
    }

    fn attach(&self, artifact: Artifact) {
        self.emit(ReportEvent::attachment(artifact));
    }
}

impl<S: ReportSink + ?Sized> ReportSink for Arc<S> {
    fn emit(&self, event: ReportEvent) {
        (**self).emit(event)
    }
}

/// Forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReportSink;

impl ReportSink for TracingReportSink {
    fn emit(&self, event: ReportEvent) {
        match event.level {
            ReportLevel::Info => tracing::info!(target: "loadswarm::report", "{}", event.message),
            ReportLevel::Pass => {
                tracing::info!(target: "loadswarm::report", outcome = "pass", "{}", event.message)
            }
            ReportLevel::Fail => {
                tracing::error!(target: "loadswarm::report", outcome = "fail", "{}", event.message)
            }
            ReportLevel::Warning => {
                tracing::warn!(target: "loadswarm::report", "{}", event.message)
            }
            ReportLevel::Attachment => {
                let (content_type, bytes) = event
                    .artifact
                    .as_ref()
                    .map(|a| (a.content_type.as_str(), a.body.len()))
                    .unwrap_or(("", 0));
                tracing::info!(
                    target: "loadswarm::report",
                    name = %event.message,
                    content_type,
                    bytes,
                    "Artifact attached"
                );
            }
        }
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReportSink;

impl ReportSink for NullReportSink {
    fn emit(&self, _event: ReportEvent) {}
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingReportSink {
    events: Mutex<Vec<ReportEvent>>,
}

impl RecordingReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReportEvent> {
        self.events.lock().clone()
    }

    /// Events of one level, in emission order
    pub fn events_at(&self, level: ReportLevel) -> Vec<ReportEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.level == level)
            .cloned()
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.message.clone()).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl ReportSink for RecordingReportSink {
    fn emit(&self, event: ReportEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingReportSink::new();
        sink.log_info("starting");
        sink.log_pass("step ok");
        sink.log_warning("slow");
        sink.log_fail("step failed");

        let levels: Vec<_> = sink.events().iter().map(|e| e.level).collect();
        assert_eq!(
            levels,
            vec![
                ReportLevel::Info,
                ReportLevel::Pass,
                ReportLevel::Warning,
                ReportLevel::Fail
            ]
        );
        assert_eq!(sink.events_at(ReportLevel::Fail)[0].message, "step failed");
    }

    #[test]
    fn test_json_artifact() {
        let artifact = Artifact::json("result", &serde_json::json!({"p95": 100})).unwrap();
        assert_eq!(artifact.content_type, "application/json");
        let value: serde_json::Value = serde_json::from_slice(&artifact.body).unwrap();
        assert_eq!(value["p95"], 100);
    }

    #[test]
    fn test_attach_through_arc() {
        let sink = Arc::new(RecordingReportSink::new());
        let dyn_sink: Arc<dyn ReportSink> = sink.clone();
        dyn_sink.attach(Artifact::text("log", "hello"));

        let events = sink.events_at(ReportLevel::Attachment);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "log");
        assert_eq!(events[0].artifact.as_ref().unwrap().body, b"hello".to_vec());
    }

    #[test]
    fn test_level_display() {
        assert_eq!(ReportLevel::Pass.to_string(), "pass");
        assert_eq!(ReportLevel::Attachment.to_string(), "attachment");
    }
}
