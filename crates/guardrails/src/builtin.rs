//! Built-in guardrails.

use async_trait::async_trait;
use regex_lite::Regex;

use crate::GuardrailError;
use crate::engine::Guardrail;
use crate::model::{GuardrailContext, GuardrailResult};

fn compile(name: &str, patterns: &[String]) -> Result<Vec<Regex>, GuardrailError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| GuardrailError::InvalidPattern {
                name: name.to_string(),
                reason: format!("'{p}': {e}"),
            })
        })
        .collect()
}

/// Trips when the text is longer than `max_chars` characters.
pub struct MaxLengthGuardrail {
    name: String,
    max_chars: usize,
}

impl MaxLengthGuardrail {
    pub fn new(name: &str, max_chars: usize) -> Self {
        Self {
            name: name.to_string(),
            max_chars,
        }
    }
}

#[async_trait]
impl Guardrail for MaxLengthGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &GuardrailContext<'_>) -> Result<GuardrailResult, GuardrailError> {
        let len = ctx.text.chars().count();
        if len > self.max_chars {
            return Ok(GuardrailResult::trip(format!(
                "text is {len} characters, limit is {}",
                self.max_chars
            ))
            .with_meta("length", len));
        }
        Ok(GuardrailResult::pass())
    }
}

/// Trips on the first matching pattern.
pub struct BlocklistGuardrail {
    name: String,
    patterns: Vec<Regex>,
    message: Option<String>,
}

impl BlocklistGuardrail {
    pub fn new(name: &str, patterns: &[String]) -> Result<Self, GuardrailError> {
        Ok(Self {
            name: name.to_string(),
            patterns: compile(name, patterns)?,
            message: None,
        })
    }

    /// Reason reported on a trip instead of the matched pattern.
    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }
}

#[async_trait]
impl Guardrail for BlocklistGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &GuardrailContext<'_>) -> Result<GuardrailResult, GuardrailError> {
        match self.patterns.iter().find(|re| re.is_match(ctx.text)) {
            Some(re) => {
                let reason = self
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("matched blocked pattern '{}'", re.as_str()));
                Ok(GuardrailResult::trip(reason).with_meta("pattern", re.as_str()))
            }
            None => Ok(GuardrailResult::pass()),
        }
    }
}

/// Replaces every match with a fixed string and passes.
pub struct RedactGuardrail {
    name: String,
    patterns: Vec<Regex>,
    replacement: String,
}

impl RedactGuardrail {
    pub fn new(name: &str, patterns: &[String], replacement: &str) -> Result<Self, GuardrailError> {
        Ok(Self {
            name: name.to_string(),
            patterns: compile(name, patterns)?,
            replacement: replacement.to_string(),
        })
    }
}

#[async_trait]
impl Guardrail for RedactGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &GuardrailContext<'_>) -> Result<GuardrailResult, GuardrailError> {
        let mut text = ctx.text.to_string();
        let mut hits = 0;
        for re in &self.patterns {
            let found = re.find_iter(&text).count();
            if found > 0 {
                text = re.replace_all(&text, self.replacement.as_str()).into_owned();
                hits += found;
            }
        }
        if hits == 0 {
            return Ok(GuardrailResult::pass());
        }
        Ok(GuardrailResult::rewrite(text).with_meta("redactions", hits))
    }
}

type CheckFn =
    dyn Fn(&GuardrailContext<'_>) -> Result<GuardrailResult, GuardrailError> + Send + Sync;

/// A guardrail backed by a synchronous closure.
pub struct FnGuardrail {
    name: String,
    check: Box<CheckFn>,
}

impl FnGuardrail {
    pub fn new<F>(name: &str, check: F) -> Self
    where
        F: Fn(&GuardrailContext<'_>) -> Result<GuardrailResult, GuardrailError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.to_string(),
            check: Box::new(check),
        }
    }
}

#[async_trait]
impl Guardrail for FnGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &GuardrailContext<'_>) -> Result<GuardrailResult, GuardrailError> {
        (self.check)(ctx)
    }
}
