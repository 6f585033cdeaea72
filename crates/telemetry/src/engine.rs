//! Per-run span recorder with a stack of open spans.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::TelemetryError;
use crate::exporter::SpanExporter;
use crate::model::{Span, SpanHandle, SpanKind, SpanStatus};

#[derive(Debug, Default)]
struct TraceState {
    /// Every span ever started, in open order.
    spans: Vec<Span>,
    /// Ids of open spans, innermost last.
    stack: Vec<String>,
    /// Ids already handed to an exporter.
    flushed: HashSet<String>,
}

impl TraceState {
    fn position(&self, id: &str) -> Option<usize> {
        self.spans.iter().position(|s| s.id == id)
    }
}

/// Records one trace.
///
/// Timestamps are derived from a monotonic clock anchored at construction,
/// so a child's `[start, end)` always falls inside its parent's.
pub struct TracingEngine {
    trace_id: String,
    enabled: bool,
    base: DateTime<Utc>,
    origin: Instant,
    state: Mutex<TraceState>,
}

impl TracingEngine {
    pub fn new() -> Self {
        Self::with_trace_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_trace_id(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            enabled: true,
            base: Utc::now(),
            origin: Instant::now(),
            state: Mutex::new(TraceState::default()),
        }
    }

    /// An engine that records nothing. Every operation succeeds.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.base + elapsed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TraceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a span as a child of `parent`, or of the innermost open span.
    pub fn start_span(
        &self,
        kind: SpanKind,
        name: &str,
        parent: Option<&SpanHandle>,
    ) -> SpanHandle {
        let id = uuid::Uuid::new_v4().to_string();
        if !self.enabled {
            return SpanHandle { id };
        }

        let mut state = self.lock();
        let parent_id = parent
            .map(|p| p.id.clone())
            .or_else(|| state.stack.last().cloned());
        state.spans.push(Span {
            id: id.clone(),
            trace_id: self.trace_id.clone(),
            parent_id,
            kind,
            name: name.to_string(),
            started_at: self.now(),
            ended_at: None,
            duration_ms: None,
            status: SpanStatus::Running,
            error: None,
            attributes: serde_json::Map::new(),
        });
        state.stack.push(id.clone());
        debug!(trace_id = %self.trace_id, span_id = %id, kind = %kind, name, "Span started");
        SpanHandle { id }
    }

    /// Close the innermost open span.
    pub fn end_span(&self, handle: &SpanHandle, status: SpanStatus) -> Result<(), TelemetryError> {
        self.finish(handle, status, None)
    }

    /// Close the innermost open span with `SpanStatus::Error`.
    pub fn end_span_with_error(
        &self,
        handle: &SpanHandle,
        error: impl Into<String>,
    ) -> Result<(), TelemetryError> {
        self.finish(handle, SpanStatus::Error, Some(error.into()))
    }

    fn finish(
        &self,
        handle: &SpanHandle,
        status: SpanStatus,
        error: Option<String>,
    ) -> Result<(), TelemetryError> {
        if !self.enabled {
            return Ok(());
        }

        let mut state = self.lock();
        let idx = state
            .position(&handle.id)
            .ok_or_else(|| TelemetryError::UnknownSpan(handle.id.clone()))?;
        if !state.spans[idx].is_open() {
            return Err(TelemetryError::AlreadyEnded(handle.id.clone()));
        }
        match state.stack.last() {
            Some(top) if *top == handle.id => {}
            Some(top) => {
                return Err(TelemetryError::OutOfOrder {
                    expected: top.clone(),
                    got: handle.id.clone(),
                });
            }
            None => return Err(TelemetryError::UnknownSpan(handle.id.clone())),
        }

        state.stack.pop();
        let ended = self.now();
        let span = &mut state.spans[idx];
        span.ended_at = Some(ended);
        span.duration_ms = Some(
            (ended - span.started_at)
                .num_milliseconds()
                .try_into()
                .unwrap_or(0),
        );
        span.status = status;
        span.error = error;
        debug!(
            trace_id = %self.trace_id,
            span_id = %span.id,
            status = %status,
            duration_ms = span.duration_ms,
            "Span ended"
        );
        Ok(())
    }

    /// Close every open span, innermost first. Returns how many were closed.
    pub fn close_all(&self, status: SpanStatus) -> usize {
        if !self.enabled {
            return 0;
        }
        let mut closed = 0;
        loop {
            let top = self.lock().stack.last().cloned();
            let Some(id) = top else { break };
            if self.end_span(&SpanHandle { id }, status).is_err() {
                break;
            }
            closed += 1;
        }
        closed
    }

    /// Set an attribute on any span of this trace, open or finished.
    pub fn set_attribute(
        &self,
        handle: &SpanHandle,
        key: &str,
        value: impl Into<serde_json::Value>,
    ) -> Result<(), TelemetryError> {
        if !self.enabled {
            return Ok(());
        }
        let mut state = self.lock();
        let idx = state
            .position(&handle.id)
            .ok_or_else(|| TelemetryError::UnknownSpan(handle.id.clone()))?;
        state.spans[idx]
            .attributes
            .insert(key.to_string(), value.into());
        Ok(())
    }

    /// Snapshot of all spans in open order.
    pub fn export(&self) -> Vec<Span> {
        self.lock().spans.clone()
    }

    pub fn open_count(&self) -> usize {
        self.lock().stack.len()
    }

    /// Hand finished spans not yet flushed to `exporter`.
    pub fn flush(&self, exporter: &dyn SpanExporter) -> Result<usize, TelemetryError> {
        if !self.enabled {
            return Ok(0);
        }
        let mut state = self.lock();
        let batch: Vec<Span> = state
            .spans
            .iter()
            .filter(|s| !s.is_open() && !state.flushed.contains(&s.id))
            .cloned()
            .collect();
        if batch.is_empty() {
            return Ok(0);
        }
        exporter.export(&batch)?;
        state.flushed.extend(batch.iter().map(|s| s.id.clone()));
        Ok(batch.len())
    }

    /// Serialize all spans as a JSON array.
    pub fn to_json(&self) -> Result<serde_json::Value, TelemetryError> {
        Ok(serde_json::to_value(self.export())?)
    }
}

impl Default for TracingEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::CollectingExporter;

    #[test]
    fn nested_spans_link_to_stack_top() {
        let engine = TracingEngine::new();
        let root = engine.start_span(SpanKind::Agent, "run", None);
        let llm = engine.start_span(SpanKind::Llm, "gpt-4o-mini", None);
        engine.end_span(&llm, SpanStatus::Ok).unwrap();
        let tool = engine.start_span(SpanKind::Tool, "calculator", None);
        engine.end_span(&tool, SpanStatus::Ok).unwrap();
        engine.end_span(&root, SpanStatus::Ok).unwrap();

        let spans = engine.export();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].parent_id, None);
        assert_eq!(spans[1].parent_id.as_deref(), Some(root.id()));
        assert_eq!(spans[2].parent_id.as_deref(), Some(root.id()));
        for child in &spans[1..] {
            assert!(child.within(&spans[0]));
            assert_eq!(child.trace_id, engine.trace_id());
        }
        assert_eq!(engine.open_count(), 0);
    }

    #[test]
    fn explicit_parent_wins_over_stack() {
        let engine = TracingEngine::new();
        let root = engine.start_span(SpanKind::Agent, "run", None);
        let _inner = engine.start_span(SpanKind::Guardrail, "input", None);
        let sibling = engine.start_span(SpanKind::Tool, "x", Some(&root));
        let spans = engine.export();
        assert_eq!(spans[2].parent_id.as_deref(), Some(root.id()));
        assert_eq!(spans[2].id, sibling.id());
    }

    #[test]
    fn out_of_order_end_is_rejected() {
        let engine = TracingEngine::new();
        let root = engine.start_span(SpanKind::Agent, "run", None);
        let child = engine.start_span(SpanKind::Llm, "m", None);

        let err = engine.end_span(&root, SpanStatus::Ok).unwrap_err();
        assert!(matches!(err, TelemetryError::OutOfOrder { .. }));

        engine.end_span(&child, SpanStatus::Ok).unwrap();
        let err = engine.end_span(&child, SpanStatus::Ok).unwrap_err();
        assert!(matches!(err, TelemetryError::AlreadyEnded(_)));
        engine.end_span(&root, SpanStatus::Ok).unwrap();
    }

    #[test]
    fn foreign_handle_is_unknown() {
        let a = TracingEngine::new();
        let b = TracingEngine::new();
        let h = a.start_span(SpanKind::Agent, "run", None);
        assert!(matches!(
            b.end_span(&h, SpanStatus::Ok),
            Err(TelemetryError::UnknownSpan(_))
        ));
    }

    #[test]
    fn error_and_attributes_recorded() {
        let engine = TracingEngine::new();
        let h = engine.start_span(SpanKind::Tool, "weather", None);
        engine.set_attribute(&h, "city", "Paris").unwrap();
        engine.end_span_with_error(&h, "boom").unwrap();

        let span = &engine.export()[0];
        assert_eq!(span.status, SpanStatus::Error);
        assert_eq!(span.error.as_deref(), Some("boom"));
        assert_eq!(span.attributes["city"], "Paris");
        assert!(span.duration_ms.is_some());
    }

    #[test]
    fn close_all_unwinds_innermost_first() {
        let engine = TracingEngine::new();
        engine.start_span(SpanKind::Agent, "run", None);
        engine.start_span(SpanKind::Llm, "m", None);
        assert_eq!(engine.close_all(SpanStatus::Cancelled), 2);
        let spans = engine.export();
        assert!(spans.iter().all(|s| s.status == SpanStatus::Cancelled));
        assert!(spans[1].within(&spans[0]));
    }

    #[test]
    fn disabled_engine_records_nothing() {
        let engine = TracingEngine::disabled();
        let h = engine.start_span(SpanKind::Agent, "run", None);
        engine.set_attribute(&h, "k", 1).unwrap();
        engine.end_span(&h, SpanStatus::Ok).unwrap();
        assert!(engine.export().is_empty());
        assert_eq!(engine.flush(&CollectingExporter::new()).unwrap(), 0);
    }

    #[test]
    fn flush_sends_each_finished_span_once() {
        let engine = TracingEngine::new();
        let exporter = CollectingExporter::new();
        let root = engine.start_span(SpanKind::Agent, "run", None);
        let llm = engine.start_span(SpanKind::Llm, "m", None);
        engine.end_span(&llm, SpanStatus::Ok).unwrap();

        assert_eq!(engine.flush(&exporter).unwrap(), 1);
        assert_eq!(engine.flush(&exporter).unwrap(), 0);

        engine.end_span(&root, SpanStatus::Ok).unwrap();
        assert_eq!(engine.flush(&exporter).unwrap(), 1);
        assert_eq!(exporter.spans().len(), 2);
    }

    #[test]
    fn json_export_is_an_array() {
        let engine = TracingEngine::new();
        let h = engine.start_span(SpanKind::Agent, "run", None);
        engine.end_span(&h, SpanStatus::Ok).unwrap();
        let json = engine.to_json().unwrap();
        assert_eq!(json.as_array().map(Vec::len), Some(1));
        assert_eq!(json[0]["kind"], "agent");
    }
}
