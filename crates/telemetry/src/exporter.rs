//! Span exporters: where finished spans go after `flush`.

use std::sync::{Mutex, PoisonError};

use tracing::info;

use crate::TelemetryError;
use crate::model::Span;

/// A sink for finished spans.
pub trait SpanExporter: Send + Sync {
    fn name(&self) -> &str;

    fn export(&self, spans: &[Span]) -> Result<(), TelemetryError>;
}

/// Drops everything.
#[derive(Debug, Default)]
pub struct NullExporter;

impl SpanExporter for NullExporter {
    fn name(&self) -> &str {
        "null"
    }

    fn export(&self, _spans: &[Span]) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Emits one `tracing` event per span.
#[derive(Debug, Default)]
pub struct LogExporter;

impl SpanExporter for LogExporter {
    fn name(&self) -> &str {
        "log"
    }

    fn export(&self, spans: &[Span]) -> Result<(), TelemetryError> {
        for span in spans {
            let attributes = serde_json::to_string(&span.attributes)?;
            info!(
                trace_id = %span.trace_id,
                span_id = %span.id,
                parent_id = span.parent_id.as_deref().unwrap_or("-"),
                kind = %span.kind,
                name = %span.name,
                status = %span.status,
                duration_ms = span.duration_ms.unwrap_or(0),
                error = span.error.as_deref().unwrap_or(""),
                attributes = %attributes,
                "span"
            );
        }
        Ok(())
    }
}

/// Keeps exported spans in memory. Used by tests and the CLI.
#[derive(Debug, Default)]
pub struct CollectingExporter {
    spans: Mutex<Vec<Span>>,
}

impl CollectingExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> Vec<Span> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SpanExporter for CollectingExporter {
    fn name(&self) -> &str {
        "collect"
    }

    fn export(&self, spans: &[Span]) -> Result<(), TelemetryError> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(spans);
        Ok(())
    }
}

/// Resolve an exporter from its config name (`[tracing] exporter`).
pub fn exporter_by_name(name: &str) -> Option<Box<dyn SpanExporter>> {
    match name {
        "null" | "none" => Some(Box::new(NullExporter)),
        "log" => Some(Box::new(LogExporter)),
        "collect" => Some(Box::new(CollectingExporter::new())),
        _ => None,
    }
}
