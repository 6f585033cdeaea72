//! Memory extraction: turning buffered conversation into structured facts.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;
use wardline_core::error::MemoryError;
use wardline_core::message::{Message, Role};
use wardline_core::provider::{Provider, ProviderRequest};

/// Pulls a fact delta out of a conversation.
///
/// The returned map is merged into long-term memory. An empty map means
/// nothing new was learned.
#[async_trait]
pub trait MemoryExtractor: Send + Sync {
    async fn extract(
        &self,
        conversation: &[Message],
        current: &Map<String, Value>,
    ) -> Result<Map<String, Value>, MemoryError>;
}

pub const DEFAULT_EXTRACTION_PROMPT: &str = "\
You extract durable facts about the user from a conversation.

Rules:
1. Only record what the user said about themselves, never the assistant.
2. Do not guess. Only extract facts stated explicitly.
3. Return only fields with new information. Use nested objects for groups.
4. Reply with a single JSON object and nothing else.

Known facts:
{current_memory}

Conversation:
{conversation}";

/// Extracts facts by asking a model.
pub struct LlmMemoryExtractor {
    provider: Arc<dyn Provider>,
    model: String,
    prompt_template: String,
}

impl LlmMemoryExtractor {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            prompt_template: DEFAULT_EXTRACTION_PROMPT.to_string(),
        }
    }

    /// Template with `{current_memory}` and `{conversation}` placeholders.
    pub fn with_prompt(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    fn render_prompt(&self, conversation: &[Message], current: &Map<String, Value>) -> String {
        let memory = serde_json::to_string_pretty(current).unwrap_or_else(|_| "{}".into());
        let lines: Vec<String> = conversation
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant))
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect();
        self.prompt_template
            .replace("{current_memory}", &memory)
            .replace("{conversation}", &lines.join("\n"))
    }
}

#[async_trait]
impl MemoryExtractor for LlmMemoryExtractor {
    async fn extract(
        &self,
        conversation: &[Message],
        current: &Map<String, Value>,
    ) -> Result<Map<String, Value>, MemoryError> {
        if conversation.is_empty() {
            return Ok(Map::new());
        }

        let mut request = ProviderRequest::new(
            self.model.clone(),
            vec![Message::user(self.render_prompt(conversation, current))],
        );
        request.temperature = 0.0;

        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| MemoryError::ExtractionFailed(format!("model call failed: {e}")))?;

        let facts = parse_fact_object(&response.message.content)?;
        debug!(keys = facts.len(), provider = self.provider.name(), "Facts extracted");
        Ok(facts)
    }
}

/// Parse a JSON object from model output.
///
/// Accepts a bare object, one wrapped in a code fence, or one embedded in
/// surrounding prose.
pub fn parse_fact_object(text: &str) -> Result<Map<String, Value>, MemoryError> {
    let trimmed = text.trim();
    let unfenced: String = if trimmed.starts_with("```") {
        trimmed
            .lines()
            .filter(|l| !l.trim_start().starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        trimmed.to_string()
    };

    let parsed = serde_json::from_str::<Value>(unfenced.trim()).ok().or_else(|| {
        let start = unfenced.find('{')?;
        let end = unfenced.rfind('}')?;
        (end > start)
            .then(|| serde_json::from_str::<Value>(&unfenced[start..=end]).ok())
            .flatten()
    });

    match parsed {
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(MemoryError::ExtractionFailed(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        None => Err(MemoryError::ExtractionFailed(
            "model output contained no JSON object".into(),
        )),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
