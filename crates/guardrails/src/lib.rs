//! Guardrails: ordered input/output safety checks with tripwire semantics.
//!
//! Input guardrails run once per run against the user's message before any
//! model call. Output guardrails run against the model's candidate final
//! answer before it is returned. Within a phase, guardrails run in
//! registration order and the first trip ends the phase:
//!
//! ```text
//! text ──▶ [guard 1] ──▶ [guard 2] ──▶ ... ──▶ Ok(possibly rewritten text)
//!              │             │
//!              └── trip ─────┴──────────────▶ Err(GuardrailTripped)
//! ```
//!
//! A guardrail that errors or panics counts as tripped.
//!
//! # Example config
//!
//! ```toml
//! [[guardrails]]
//! name = "no-credentials"
//! kind = "blocklist"
//! phase = "output"
//! patterns = ["sk-[A-Za-z0-9]{20,}"]
//! message = "Response appears to contain credentials"
//! ```

mod builtin;
mod engine;
mod model;

pub use builtin::{BlocklistGuardrail, FnGuardrail, MaxLengthGuardrail, RedactGuardrail};
pub use engine::{Guardrail, GuardrailEngine};
pub use model::{
    GuardrailContext, GuardrailLogEntry, GuardrailResult, GuardrailTripped, LogOutcome, Phase,
};

/// Errors from building or running a guardrail.
#[derive(Debug, thiserror::Error)]
pub enum GuardrailError {
    #[error("invalid pattern in guardrail '{name}': {reason}")]
    InvalidPattern { name: String, reason: String },

    #[error("invalid guardrail '{name}': {reason}")]
    InvalidConfig { name: String, reason: String },

    #[error("guardrail check failed: {0}")]
    Check(String),
}
