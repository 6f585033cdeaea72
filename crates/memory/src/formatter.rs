//! Renders memory tiers into a text block for the system prompt.

use serde_json::{Map, Value};
use wardline_core::message::{Message, Role};

#[derive(Debug, Clone, Copy)]
pub struct FormatOptions {
    /// Hard upper bound on the rendered length, in characters.
    pub max_chars: usize,
    /// How many of the newest short-term messages to consider.
    pub recent_turns: usize,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            max_chars: 2000,
            recent_turns: 10,
        }
    }
}

/// Render long-term facts, working scratch and recent turns.
///
/// Output is deterministic: object keys are sorted at every level. When the
/// result exceeds `max_chars`, the oldest turns go first; if the fixed
/// sections alone are still too long the text is cut at `max_chars`.
/// Returns `None` when there is nothing to render.
pub fn format_memory(
    long_term: &Map<String, Value>,
    short_term: &[Message],
    working: &Map<String, Value>,
    opts: FormatOptions,
) -> Option<String> {
    let mut fixed = Vec::new();

    let facts = render_map(long_term);
    if !facts.is_empty() {
        fixed.push(format!("Known facts about the user:\n{}", facts.join("\n")));
    }
    let scratch = render_map(working);
    if !scratch.is_empty() {
        fixed.push(format!("Current session context:\n{}", scratch.join("\n")));
    }

    let skip = short_term.len().saturating_sub(opts.recent_turns);
    let mut turns: Vec<String> = short_term[skip..]
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant) && !m.content.is_empty())
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect();

    if fixed.is_empty() && turns.is_empty() {
        return None;
    }

    let assemble = |turns: &[String]| {
        let mut parts = fixed.clone();
        if !turns.is_empty() {
            parts.push(format!("Recent conversation:\n{}", turns.join("\n")));
        }
        parts.join("\n\n")
    };

    let mut text = assemble(&turns);
    while text.chars().count() > opts.max_chars && !turns.is_empty() {
        turns.remove(0);
        text = assemble(&turns);
    }
    if text.chars().count() > opts.max_chars {
        text = text.chars().take(opts.max_chars).collect();
    }
    if text.trim().is_empty() {
        return None;
    }
    Some(text)
}

fn render_map(map: &Map<String, Value>) -> Vec<String> {
    let mut lines = Vec::new();
    render_into(map, "", &mut lines);
    lines
}

fn render_into(map: &Map<String, Value>, prefix: &str, out: &mut Vec<String>) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    for key in keys {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match &map[key.as_str()] {
            Value::Null => {}
            Value::Object(nested) => render_into(nested, &path, out),
            Value::Array(items) if items.is_empty() => {}
            Value::Array(items) => {
                let rendered: Vec<String> = items.iter().map(scalar).collect();
                out.push(format!("- {path}: {}", rendered.join(", ")));
            }
            Value::String(s) if s.is_empty() => {}
            other => out.push(format!("- {path}: {}", scalar(other))),
        }
    }
}

fn scalar(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
