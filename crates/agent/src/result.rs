//! What a run produces.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use wardline_core::error::ProviderError;
use wardline_core::message::Message;
use wardline_core::provider::Usage;
use wardline_guardrails::GuardrailTripped;

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    MaxTurnsReached,
    GuardrailTripped,
    Error,
    Cancelled,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::MaxTurnsReached => "max_turns_reached",
            Self::GuardrailTripped => "guardrail_tripped",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tool invocation inside a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub tool_name: String,
    /// Parsed arguments, or the raw string when it was not valid JSON.
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub duration_ms: u64,
}

impl ToolCallRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// One model call and the tool calls it asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_output: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl TurnRecord {
    pub(crate) fn new(turn_number: u32) -> Self {
        Self {
            turn_number,
            llm_output: None,
            tool_calls: Vec::new(),
            is_final: false,
            usage: None,
        }
    }
}

/// The outcome of [`AgentLoop::run`](crate::AgentLoop::run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunResult {
    /// The answer to show the user. The refusal text on a trip, empty on error.
    pub final_output: String,
    pub total_turns: u32,
    pub tool_calls_count: u32,
    pub stopped_reason: StopReason,
    pub turns: Vec<TurnRecord>,
    /// Every message sent to or received from the model, in order.
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tripped_by: Option<GuardrailTripped>,
    pub trace_id: String,
    #[serde(default)]
    pub usage: Usage,
}

impl AgentRunResult {
    pub fn is_completed(&self) -> bool {
        self.stopped_reason == StopReason::Completed
    }

    pub fn was_tripped(&self) -> bool {
        self.stopped_reason == StopReason::GuardrailTripped
    }
}

/// Errors surfaced to [`AgentHooks::on_error`](crate::AgentHooks::on_error).
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("model call failed: {0}")]
    Model(#[from] ProviderError),

    #[error("hook '{hook}' failed: {message}")]
    Hook { hook: String, message: String },

    #[error(transparent)]
    GuardrailTripped(#[from] GuardrailTripped),
}
