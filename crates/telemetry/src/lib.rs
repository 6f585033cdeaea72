//! Execution tracing for Wardline agent runs.
//!
//! One [`TracingEngine`] records one run: a tree of timed, attributed
//! spans rooted at a single `agent` span, with `llm`, `tool` and
//! `guardrail` spans beneath it. Spans close strictly last-opened,
//! first-closed. Finished spans are handed to a [`SpanExporter`]; the
//! observability sink behind it lives outside this crate.

pub mod engine;
pub mod exporter;
pub mod model;

pub use engine::TracingEngine;
pub use exporter::{CollectingExporter, LogExporter, NullExporter, SpanExporter, exporter_by_name};
pub use model::{Span, SpanHandle, SpanKind, SpanStatus};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("span {got} closed out of order; innermost open span is {expected}")]
    OutOfOrder { expected: String, got: String },

    #[error("unknown span id: {0}")]
    UnknownSpan(String),

    #[error("span already ended: {0}")]
    AlreadyEnded(String),

    #[error("span export failed: {0}")]
    Export(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
