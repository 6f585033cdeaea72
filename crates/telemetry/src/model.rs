//! Data model for execution spans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of work a span represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// One whole agent run (the root).
    Agent,
    /// A model call.
    Llm,
    /// A tool execution.
    Tool,
    /// One guardrail phase.
    Guardrail,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent => write!(f, "agent"),
            Self::Llm => write!(f, "llm"),
            Self::Tool => write!(f, "tool"),
            Self::Guardrail => write!(f, "guardrail"),
        }
    }
}

/// How a span finished.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Running,
    Ok,
    Error,
    Cancelled,
}

impl std::fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Ok => write!(f, "ok"),
            Self::Error => write!(f, "error"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A single traced execution unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Span {
    /// Unique identifier.
    pub id: String,
    /// The run this span belongs to.
    pub trace_id: String,
    /// Parent span id (None for the root).
    pub parent_id: Option<String>,
    pub kind: SpanKind,
    /// Human-readable label (e.g. tool name, model name).
    pub name: String,
    pub started_at: DateTime<Utc>,
    /// None while the span is open.
    pub ended_at: Option<DateTime<Utc>>,
    /// Computed on end.
    pub duration_ms: Option<u64>,
    pub status: SpanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Span {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Whether this span's interval lies within `other`'s.
    pub fn within(&self, other: &Span) -> bool {
        let (Some(end), Some(other_end)) = (self.ended_at, other.ended_at) else {
            return false;
        };
        self.started_at >= other.started_at && end <= other_end
    }
}

/// Opaque reference to an open span, returned by `start_span`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpanHandle {
    pub(crate) id: String,
}

impl SpanHandle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn span(start: i64, end: i64) -> Span {
        let base = Utc::now();
        Span {
            id: "s".into(),
            trace_id: "t".into(),
            parent_id: None,
            kind: SpanKind::Tool,
            name: "calculator".into(),
            started_at: base + Duration::milliseconds(start),
            ended_at: Some(base + Duration::milliseconds(end)),
            duration_ms: Some((end - start) as u64),
            status: SpanStatus::Ok,
            error: None,
            attributes: serde_json::Map::new(),
        }
    }

    #[test]
    fn kind_and_status_display() {
        assert_eq!(SpanKind::Guardrail.to_string(), "guardrail");
        assert_eq!(SpanStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn span_serializes_export_shape() {
        let json = serde_json::to_value(span(0, 5)).unwrap();
        assert_eq!(json["kind"], "tool");
        assert_eq!(json["status"], "ok");
        assert!(json["parent_id"].is_null());
        assert!(json.get("error").is_none());
        assert!(json["attributes"].is_object());
    }

    #[test]
    fn open_span_is_never_within() {
        let mut open = span(0, 5);
        open.ended_at = None;
        assert!(open.is_open());
        assert!(!open.within(&span(0, 10)));
    }
}
