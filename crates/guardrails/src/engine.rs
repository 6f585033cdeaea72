//! Guardrail enforcement engine.
//!
//! Holds the ordered input and output lists and evaluates one phase at a
//! time, returning either the (possibly rewritten) text or the trip.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, warn};
use wardline_config::GuardrailConfig;
use wardline_core::message::Message;

use crate::GuardrailError;
use crate::builtin::{BlocklistGuardrail, MaxLengthGuardrail, RedactGuardrail};
use crate::model::{
    GuardrailContext, GuardrailLogEntry, GuardrailResult, GuardrailTripped, LogOutcome, Phase,
};

/// Maximum evaluation log entries kept in memory.
const MAX_GUARDRAIL_LOG: usize = 5_000;

/// One safety check.
///
/// Checks may suspend (e.g. to call a moderation service). Returning an
/// error is equivalent to tripping.
#[async_trait]
pub trait Guardrail: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self, ctx: &GuardrailContext<'_>) -> Result<GuardrailResult, GuardrailError>;
}

/// The guardrail engine.
///
/// Built once and shared behind an `Arc`; only the evaluation log mutates.
#[derive(Default)]
pub struct GuardrailEngine {
    input: Vec<Arc<dyn Guardrail>>,
    output: Vec<Arc<dyn Guardrail>>,
    log: RwLock<Vec<GuardrailLogEntry>>,
}

impl GuardrailEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the configured built-in guardrails. Disabled entries are skipped.
    pub fn from_config(configs: &[GuardrailConfig]) -> Result<Self, GuardrailError> {
        let mut engine = Self::new();
        for cfg in configs.iter().filter(|c| c.enabled) {
            let guard: Arc<dyn Guardrail> = match cfg.kind.as_str() {
                "max_length" => {
                    let max = cfg.max_chars.ok_or_else(|| GuardrailError::InvalidConfig {
                        name: cfg.name.clone(),
                        reason: "max_length needs max_chars".into(),
                    })?;
                    Arc::new(MaxLengthGuardrail::new(&cfg.name, max))
                }
                "blocklist" => {
                    let mut g = BlocklistGuardrail::new(&cfg.name, &cfg.patterns)?;
                    if !cfg.message.is_empty() {
                        g = g.with_message(&cfg.message);
                    }
                    Arc::new(g)
                }
                "redact" => Arc::new(RedactGuardrail::new(
                    &cfg.name,
                    &cfg.patterns,
                    &cfg.replacement,
                )?),
                other => {
                    return Err(GuardrailError::InvalidConfig {
                        name: cfg.name.clone(),
                        reason: format!("unknown kind '{other}'"),
                    });
                }
            };

            match cfg.phase.as_str() {
                "input" => engine.add_input(guard),
                "output" => engine.add_output(guard),
                "both" => {
                    engine.add_input(guard.clone());
                    engine.add_output(guard);
                }
                other => {
                    return Err(GuardrailError::InvalidConfig {
                        name: cfg.name.clone(),
                        reason: format!("unknown phase '{other}'"),
                    });
                }
            }
        }
        Ok(engine)
    }

    pub fn add_input(&mut self, guard: Arc<dyn Guardrail>) {
        debug!(guardrail = %guard.name(), "Input guardrail added");
        self.input.push(guard);
    }

    pub fn add_output(&mut self, guard: Arc<dyn Guardrail>) {
        debug!(guardrail = %guard.name(), "Output guardrail added");
        self.output.push(guard);
    }

    pub fn input_count(&self) -> usize {
        self.input.len()
    }

    pub fn output_count(&self) -> usize {
        self.output.len()
    }

    /// Run the input phase. Returns the text downstream should use.
    pub async fn check_input(
        &self,
        text: &str,
        messages: &[Message],
    ) -> Result<String, GuardrailTripped> {
        self.run_phase(Phase::Input, &self.input, text, messages).await
    }

    /// Run the output phase. Returns the text downstream should use.
    pub async fn check_output(
        &self,
        text: &str,
        messages: &[Message],
    ) -> Result<String, GuardrailTripped> {
        self.run_phase(Phase::Output, &self.output, text, messages)
            .await
    }

    /// Get the evaluation log.
    pub fn log(&self) -> Vec<GuardrailLogEntry> {
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn run_phase(
        &self,
        phase: Phase,
        guards: &[Arc<dyn Guardrail>],
        text: &str,
        messages: &[Message],
    ) -> Result<String, GuardrailTripped> {
        let mut current = text.to_string();

        for guard in guards {
            let ctx = GuardrailContext {
                phase,
                text: &current,
                messages,
            };
            let outcome = AssertUnwindSafe(guard.check(&ctx)).catch_unwind().await;

            let (result, errored) = match outcome {
                Ok(Ok(result)) => (result, false),
                Ok(Err(e)) => (GuardrailResult::trip(e.to_string()), true),
                Err(_) => (GuardrailResult::trip("guardrail panicked"), true),
            };

            let name = if result.guardrail_name.is_empty() {
                guard.name().to_string()
            } else {
                result.guardrail_name.clone()
            };

            if !result.passed {
                let outcome = if errored {
                    LogOutcome::Errored
                } else {
                    LogOutcome::Tripped
                };
                warn!(guardrail = %name, %phase, reason = %result.reason, "Guardrail TRIPPED");
                self.record(&name, phase, outcome, &result.reason);
                return Err(GuardrailTripped {
                    phase,
                    guardrail_name: name,
                    reason: result.reason,
                });
            }

            if let Some(rewritten) = result.rewritten {
                debug!(guardrail = %name, %phase, "Guardrail rewrote content");
                self.record(&name, phase, LogOutcome::Rewritten, &result.reason);
                current = rewritten;
            }
        }

        Ok(current)
    }

    fn record(&self, name: &str, phase: Phase, outcome: LogOutcome, reason: &str) {
        let entry = GuardrailLogEntry {
            guardrail_name: name.to_string(),
            phase,
            outcome,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        };
        let mut log = self.log.write().unwrap_or_else(PoisonError::into_inner);
        if log.len() >= MAX_GUARDRAIL_LOG {
            log.drain(..MAX_GUARDRAIL_LOG / 10);
        }
        log.push(entry);
    }
}
