//! Guardrail data model: verdicts, trips, and the evaluation log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wardline_core::message::Message;

/// Which side of the model a guardrail protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Input,
    Output,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// What a guardrail gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct GuardrailContext<'a> {
    pub phase: Phase,
    /// The text under check, including rewrites from earlier guardrails.
    pub text: &'a str,
    /// Conversation so far, if the caller has one.
    pub messages: &'a [Message],
}

/// The verdict of a single guardrail check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailResult {
    /// `false` trips the wire.
    pub passed: bool,
    #[serde(default)]
    pub reason: String,
    /// Filled in by the engine when the guardrail leaves it empty.
    #[serde(default)]
    pub guardrail_name: String,
    /// Replacement text; only honoured on a pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewritten: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl GuardrailResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: String::new(),
            guardrail_name: String::new(),
            rewritten: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn trip(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
            ..Self::pass()
        }
    }

    /// Pass, replacing the checked text.
    pub fn rewrite(text: impl Into<String>) -> Self {
        Self {
            rewritten: Some(text.into()),
            ..Self::pass()
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Raised when a guardrail trips. Terminal for the run.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{phase} guardrail '{guardrail_name}' tripped: {reason}")]
pub struct GuardrailTripped {
    pub phase: Phase,
    pub guardrail_name: String,
    pub reason: String,
}

/// Why an evaluation landed in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutcome {
    Tripped,
    Rewritten,
    /// The check itself failed and was treated as a trip.
    Errored,
}

/// An entry in the guardrail evaluation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailLogEntry {
    pub guardrail_name: String,
    pub phase: Phase,
    pub outcome: LogOutcome,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tripped_display_names_phase_and_guard() {
        let err = GuardrailTripped {
            phase: Phase::Output,
            guardrail_name: "no-secrets".into(),
            reason: "api key".into(),
        };
        assert_eq!(
            err.to_string(),
            "output guardrail 'no-secrets' tripped: api key"
        );
    }

    #[test]
    fn rewrite_is_a_pass() {
        let r = GuardrailResult::rewrite("clean");
        assert!(r.passed);
        assert_eq!(r.rewritten.as_deref(), Some("clean"));
    }

    #[test]
    fn result_serializes_without_empty_fields() {
        let json = serde_json::to_value(GuardrailResult::trip("nope")).unwrap();
        assert_eq!(json["passed"], false);
        assert!(json.get("rewritten").is_none());
        assert!(json.get("metadata").is_none());
    }
}
