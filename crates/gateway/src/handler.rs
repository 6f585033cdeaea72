//! The innermost handler: memory in, agent run, memory out, reply.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use wardline_agent::{AgentHooks, AgentLoop, AgentRunResult, NoopHooks, StopReason};
use wardline_config::AgentConfig;
use wardline_core::error::MemoryError;
use wardline_core::message::Role;
use wardline_core::provider::Provider;
use wardline_guardrails::GuardrailEngine;
use wardline_memory::{MemorySession, SessionManager};
use wardline_telemetry::{SpanExporter, TracingEngine};
use wardline_tools::ToolRegistry;

use crate::PipelineError;
use crate::outbound::Outbound;
use crate::pipeline::{Handler, MiddlewareContext};

pub const RESET_COMMAND: &str = "/reset";
pub const CLEAR_COMMAND: &str = "/clear";

const RESET_REPLY: &str = "Conversation history cleared.";
const CLEAR_REPLY: &str = "All memory about you has been cleared.";

/// Runs one agent turn per inbound message.
///
/// The session for `(agent_id, user_id)` stays locked for the whole turn,
/// so messages from one user are handled one at a time.
pub struct AgentHandler {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    guardrails: Arc<GuardrailEngine>,
    sessions: Arc<SessionManager>,
    outbound: Arc<dyn Outbound>,
    hooks: Arc<dyn AgentHooks>,
    agent: AgentConfig,
    tracing_enabled: bool,
    exporter: Option<Arc<dyn SpanExporter>>,
}

impl AgentHandler {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        sessions: Arc<SessionManager>,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        Self {
            provider,
            tools,
            guardrails: Arc::new(GuardrailEngine::new()),
            sessions,
            outbound,
            hooks: Arc::new(NoopHooks),
            agent: AgentConfig::default(),
            tracing_enabled: true,
            exporter: None,
        }
    }

    pub fn with_agent_config(mut self, agent: AgentConfig) -> Self {
        self.agent = agent;
        self
    }

    pub fn with_guardrails(mut self, guardrails: Arc<GuardrailEngine>) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn AgentHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Record spans for each run and flush them to `exporter`.
    pub fn with_exporter(mut self, exporter: Arc<dyn SpanExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.tracing_enabled = enabled;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    async fn run_turn(
        &self,
        session: &mut MemorySession,
        text: &str,
    ) -> Result<AgentRunResult, PipelineError> {
        session.load().await?;
        // History goes as messages, so the memory block carries facts only.
        let history = session.history().await?;
        let memory_block = session.format_facts_for_prompt().await?;

        let tracer = Arc::new(if self.tracing_enabled {
            TracingEngine::new()
        } else {
            TracingEngine::disabled()
        });
        let agent = AgentLoop::from_config(
            Arc::clone(&self.provider),
            Arc::clone(&self.tools),
            &self.agent,
        )
        .with_guardrails(Arc::clone(&self.guardrails))
        .with_hooks(Arc::clone(&self.hooks))
        .with_tracer(Arc::clone(&tracer));

        let result = agent.run(text, &history, memory_block.as_deref()).await;

        if let Some(exporter) = &self.exporter {
            match tracer.flush(exporter.as_ref()) {
                Ok(count) => debug!(exporter = exporter.name(), spans = count, "Spans flushed"),
                Err(e) => warn!(exporter = exporter.name(), error = %e, "Span export failed"),
            }
        }
        Ok(result)
    }

    /// Append the turn to memory, run extraction if due, and persist.
    async fn remember(
        &self,
        session: &mut MemorySession,
        result: &AgentRunResult,
        original: &str,
    ) -> Result<(), PipelineError> {
        // The user message as the model saw it, after input rewrites.
        let user_text = result
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map_or(original, |m| m.content.as_str());

        // The reply is already decided; a failed extraction keeps its buffer
        // and is retried on a later turn. Store errors still propagate.
        store_turn(session, Role::User, user_text).await?;
        if !result.final_output.is_empty() {
            store_turn(session, Role::Assistant, &result.final_output).await?;
        }
        match session.extract_if_needed().await {
            Ok(Some(facts)) => {
                debug!(namespace = %session.namespace(), keys = facts.len(), "Facts extracted")
            }
            Ok(None) => {}
            Err(MemoryError::ExtractionFailed(reason)) => {
                warn!(namespace = %session.namespace(), error = %reason, "Memory extraction failed")
            }
            Err(e) => return Err(e.into()),
        }
        session.save().await?;
        Ok(())
    }
}

/// Add one message, downgrading extractor failures to a warning under
/// either failure policy.
async fn store_turn(
    session: &mut MemorySession,
    role: Role,
    text: &str,
) -> Result<(), PipelineError> {
    let failure = match session.add_message(role, text).await {
        Ok(report) => report.extraction_error,
        Err(MemoryError::ExtractionFailed(reason)) => Some(reason),
        Err(e) => return Err(e.into()),
    };
    if let Some(reason) = failure {
        warn!(namespace = %session.namespace(), error = %reason, "Memory extraction failed");
    }
    Ok(())
}

#[async_trait]
impl Handler for AgentHandler {
    async fn handle(&self, ctx: &mut MiddlewareContext) -> Result<(), PipelineError> {
        let agent_id = ctx.message.agent_id.clone();
        let user_id = ctx.message.user_id.clone();
        let text = ctx.message.text.clone();

        let reply = match text.trim() {
            RESET_COMMAND => {
                let shared = self.sessions.session(&agent_id, &user_id);
                shared.lock().await.clear_history().await?;
                info!(%agent_id, %user_id, "Session history reset");
                RESET_REPLY.to_string()
            }
            CLEAR_COMMAND => {
                self.sessions.reset(&agent_id, &user_id).await?;
                info!(%agent_id, %user_id, "Session memory cleared");
                CLEAR_REPLY.to_string()
            }
            _ => {
                let shared = self.sessions.session(&agent_id, &user_id);
                let mut session = shared.lock().await;
                let result = self.run_turn(&mut session, &text).await?;

                ctx.set_extra("trace_id", result.trace_id.clone());
                ctx.set_extra("stopped_reason", result.stopped_reason.as_str());
                ctx.set_extra("total_turns", result.total_turns);
                ctx.set_extra("tool_calls", result.tool_calls_count);

                match result.stopped_reason {
                    StopReason::Completed | StopReason::MaxTurnsReached => {
                        self.remember(&mut session, &result, &text).await?;
                    }
                    StopReason::GuardrailTripped => {
                        if let Some(trip) = &result.tripped_by {
                            ctx.set_extra("tripped_by", trip.guardrail_name.clone());
                        }
                    }
                    StopReason::Error => {
                        return Err(PipelineError::Agent(
                            result.error.unwrap_or_else(|| "unknown error".into()),
                        ));
                    }
                    StopReason::Cancelled => {
                        info!(%agent_id, %user_id, "Run cancelled; no reply sent");
                        return Ok(());
                    }
                }
                result.final_output
            }
        };

        if !reply.is_empty() {
            self.outbound.send(&ctx.message.chat_id, &reply).await?;
        }
        ctx.response = Some(reply);
        Ok(())
    }
}
