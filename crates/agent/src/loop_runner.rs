//! The agent reasoning loop implementation.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wardline_config::AgentConfig;
use wardline_core::message::{Message, MessageToolCall};
use wardline_core::provider::{Provider, ProviderRequest, Usage};
use wardline_core::tool::ToolCall;
use wardline_guardrails::{GuardrailEngine, GuardrailTripped, Phase};
use wardline_telemetry::{SpanHandle, SpanKind, SpanStatus, TracingEngine};
use wardline_tools::ToolRegistry;

use crate::hooks::{AgentHooks, HookRunner, NoopHooks};
use crate::result::{AgentError, AgentRunResult, StopReason, ToolCallRecord, TurnRecord};

/// The loop that orchestrates model calls, tool dispatch and guardrails.
///
/// Built once per request and consumed by [`AgentLoop::run`].
pub struct AgentLoop {
    /// The model backend
    provider: Arc<dyn Provider>,

    /// Tools the model may call
    tools: Arc<ToolRegistry>,

    guardrails: Arc<GuardrailEngine>,

    /// Span sink for this run
    tracer: Arc<TracingEngine>,

    hooks: Arc<dyn AgentHooks>,

    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: Option<u32>,

    /// Model calls allowed before the run gives up
    max_turns: u32,

    /// Shown to the user instead of tripped content
    refusal_message: String,

    cancel: CancellationToken,
}

impl AgentLoop {
    /// Create an agent loop with default settings and no guardrails.
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>) -> Self {
        Self::from_config(provider, tools, &AgentConfig::default())
    }

    /// Create an agent loop from the `[agent]` config section.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            guardrails: Arc::new(GuardrailEngine::new()),
            tracer: Arc::new(TracingEngine::new()),
            hooks: Arc::new(NoopHooks),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_turns: config.max_turns.max(1),
            refusal_message: config.refusal_message.clone(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_guardrails(mut self, guardrails: Arc<GuardrailEngine>) -> Self {
        self.guardrails = guardrails;
        self
    }

    /// Record spans into `tracer` instead of a private one.
    pub fn with_tracer(mut self, tracer: Arc<TracingEngine>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn AgentHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the default max tokens per model response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Set the maximum number of model calls. Clamped to at least one.
    pub fn with_max_turns(mut self, max: u32) -> Self {
        self.max_turns = max.max(1);
        self
    }

    pub fn with_refusal_message(mut self, message: impl Into<String>) -> Self {
        self.refusal_message = message.into();
        self
    }

    /// Stop the run when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn tracer(&self) -> Arc<TracingEngine> {
        Arc::clone(&self.tracer)
    }

    /// Run the loop to completion.
    ///
    /// `history` goes between the system prompt and the new user message;
    /// `extra_context` (typically formatted memory) is sent as a second
    /// system message. Never fails: every outcome is described by the
    /// returned [`AgentRunResult`].
    pub async fn run(
        self,
        input: &str,
        history: &[Message],
        extra_context: Option<&str>,
    ) -> AgentRunResult {
        let hooks = HookRunner::new(Arc::clone(&self.hooks));
        let root = self.tracer.start_span(SpanKind::Agent, "agent_run", None);
        self.attr(&root, "model", self.model.clone());
        self.attr(&root, "max_turns", self.max_turns);
        info!(trace_id = %self.tracer.trace_id(), model = %self.model, "Agent run started");

        let mut state = RunState::new(self.seed_messages(history, extra_context));

        if self.cancel.is_cancelled() {
            return self.finish(&root, state, Outcome::new(StopReason::Cancelled, 1));
        }

        let user_text = match self.guard(Phase::Input, &root, input, &state.messages).await {
            Ok(text) => text,
            Err(trip) => {
                let outcome = Outcome::tripped(1, trip, &self.refusal_message);
                return self.finish(&root, state, outcome);
            }
        };
        state.messages.push(Message::user(user_text));

        let tool_defs = self.tools.definitions();
        let mut turn: u32 = 0;

        loop {
            if turn >= self.max_turns {
                let final_output = self.last_output_for_user(&root, &state).await;
                warn!(max_turns = self.max_turns, "Max turns reached without a final answer");
                let outcome =
                    Outcome::new(StopReason::MaxTurnsReached, self.max_turns).output(final_output);
                return self.finish(&root, state, outcome);
            }
            if self.cancel.is_cancelled() {
                let outcome = Outcome::new(StopReason::Cancelled, turn.max(1));
                return self.finish(&root, state, outcome);
            }
            turn += 1;

            let llm_span = self.tracer.start_span(SpanKind::Llm, &self.model, Some(&root));
            self.attr(&llm_span, "turn", turn);

            let mut request = ProviderRequest::new(self.model.clone(), state.messages.clone());
            request.temperature = self.temperature;
            request.max_tokens = self.max_tokens;
            request.tools = tool_defs.clone();

            hooks.fire("on_llm_start", |h| h.on_llm_start(turn, &state.messages));
            debug!(turn, messages = state.messages.len(), "Calling model");

            let call = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                response = self.provider.complete(request) => Some(response),
            };

            let response = match call {
                None => {
                    self.close(&llm_span, SpanStatus::Cancelled, None);
                    info!(turn, "Agent run cancelled during model call");
                    return self.finish(&root, state, Outcome::new(StopReason::Cancelled, turn));
                }
                Some(Err(e)) => {
                    self.close(&llm_span, SpanStatus::Error, Some(e.to_string()));
                    let err = AgentError::from(e);
                    error!(turn, error = %err, "Model call failed");
                    hooks.report(&err);
                    let outcome = Outcome::new(StopReason::Error, turn).error(err.to_string());
                    return self.finish(&root, state, outcome);
                }
                Some(Ok(response)) => response,
            };

            if let Some(usage) = response.usage {
                self.attr(&llm_span, "prompt_tokens", usage.prompt_tokens);
                self.attr(&llm_span, "completion_tokens", usage.completion_tokens);
                self.attr(&llm_span, "total_tokens", usage.total_tokens);
                state.add_usage(usage);
            }
            self.attr(&llm_span, "response_model", response.model.clone());
            self.close(&llm_span, SpanStatus::Ok, None);
            hooks.fire("on_llm_end", |h| h.on_llm_end(turn, &response));

            let mut record = TurnRecord::new(turn);
            record.usage = response.usage;
            if !response.message.content.is_empty() {
                record.llm_output = Some(response.message.content.clone());
            }

            if !response.wants_tools() {
                record.is_final = true;
                let verdict = self
                    .guard(Phase::Output, &root, &response.message.content, &state.messages)
                    .await;
                hooks.fire("on_turn_end", |h| h.on_turn_end(&record));
                state.turns.push(record);

                let outcome = match verdict {
                    Ok(text) => {
                        state.messages.push(Message::assistant(text.clone()));
                        Outcome::new(StopReason::Completed, turn).output(text)
                    }
                    Err(trip) => Outcome::tripped(turn, trip, &self.refusal_message),
                };
                return self.finish(&root, state, outcome);
            }

            state.messages.push(response.message.clone());
            for call in &response.message.tool_calls {
                let (tool_record, content) = self.dispatch(&hooks, &root, call).await;
                state
                    .messages
                    .push(Message::tool_result(call.id.clone(), content));
                state.tool_calls_count += 1;
                record.tool_calls.push(tool_record);
            }
            hooks.fire("on_turn_end", |h| h.on_turn_end(&record));
            state.turns.push(record);
        }
    }

    fn seed_messages(&self, history: &[Message], extra_context: Option<&str>) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 3);
        if !self.system_prompt.is_empty() {
            messages.push(Message::system(self.system_prompt.clone()));
        }
        if let Some(extra) = extra_context.filter(|c| !c.trim().is_empty()) {
            messages.push(Message::system(extra));
        }
        messages.extend(history.iter().cloned());
        messages
    }

    /// Run one guardrail phase under its own span. Phases with no
    /// guardrails registered pass through without a span.
    async fn guard(
        &self,
        phase: Phase,
        root: &SpanHandle,
        text: &str,
        messages: &[Message],
    ) -> Result<String, GuardrailTripped> {
        let registered = match phase {
            Phase::Input => self.guardrails.input_count(),
            Phase::Output => self.guardrails.output_count(),
        };
        if registered == 0 {
            return Ok(text.to_string());
        }

        let span = self
            .tracer
            .start_span(SpanKind::Guardrail, &phase.to_string(), Some(root));
        self.attr(&span, "guardrails", registered);

        let verdict = match phase {
            Phase::Input => self.guardrails.check_input(text, messages).await,
            Phase::Output => self.guardrails.check_output(text, messages).await,
        };
        match &verdict {
            Ok(checked) => {
                self.attr(&span, "rewritten", checked != text);
                self.close(&span, SpanStatus::Ok, None);
            }
            Err(trip) => {
                self.attr(&span, "tripped_by", trip.guardrail_name.clone());
                self.close(&span, SpanStatus::Error, Some(trip.to_string()));
                warn!(phase = %phase, guardrail = %trip.guardrail_name, "Guardrail tripped");
            }
        }
        verdict
    }

    /// The last thing the model said, if it survives the output guardrails.
    async fn last_output_for_user(&self, root: &SpanHandle, state: &RunState) -> String {
        let last = state
            .turns
            .last()
            .and_then(|t| t.llm_output.clone())
            .unwrap_or_default();
        if last.is_empty() {
            return last;
        }
        self.guard(Phase::Output, root, &last, &state.messages)
            .await
            .unwrap_or_default()
    }

    /// Execute one requested tool call. Returns the record and the content
    /// of the tool message for the model.
    async fn dispatch(
        &self,
        hooks: &HookRunner,
        root: &SpanHandle,
        call: &MessageToolCall,
    ) -> (ToolCallRecord, String) {
        hooks.fire("on_tool_start", |h| h.on_tool_start(call));
        let span = self.tracer.start_span(SpanKind::Tool, &call.name, Some(root));
        self.attr(&span, "call_id", call.id.clone());

        let started = Instant::now();
        let parsed = ToolCall::try_from(call);
        let arguments = match &parsed {
            Ok(c) => Value::Object(c.arguments.clone().into_inner()),
            Err(_) => Value::String(call.arguments.clone()),
        };
        let outcome = match parsed {
            Ok(c) => self.tools.execute_call(&c).await,
            Err(e) => Err(e),
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut record = ToolCallRecord {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments,
            result: None,
            error: None,
            error_kind: None,
            duration_ms,
        };

        let content = match outcome {
            Ok(value) => {
                self.close(&span, SpanStatus::Ok, None);
                debug!(tool = %call.name, duration_ms, "Tool call succeeded");
                let content = tool_content(&value);
                record.result = Some(value);
                content
            }
            Err(err) => {
                self.close(&span, SpanStatus::Error, Some(err.to_string()));
                debug!(tool = %call.name, kind = err.kind(), "Tool call failed");
                record.error = Some(err.to_string());
                record.error_kind = Some(err.kind().to_string());
                json!({"error": {"kind": err.kind(), "message": err.to_string()}}).to_string()
            }
        };

        hooks.fire("on_tool_end", |h| h.on_tool_end(&record));
        (record, content)
    }

    fn finish(&self, root: &SpanHandle, state: RunState, outcome: Outcome) -> AgentRunResult {
        let status = match outcome.reason {
            StopReason::Completed | StopReason::MaxTurnsReached => SpanStatus::Ok,
            StopReason::GuardrailTripped | StopReason::Error => SpanStatus::Error,
            StopReason::Cancelled => SpanStatus::Cancelled,
        };
        self.attr(root, "stopped_reason", outcome.reason.as_str());
        self.attr(root, "total_turns", outcome.total_turns);
        self.attr(root, "tool_calls_count", state.tool_calls_count);

        let error = outcome.error.clone().or_else(|| {
            outcome
                .tripped_by
                .as_ref()
                .map(|t| t.to_string())
                .filter(|_| status == SpanStatus::Error)
        });
        let closed = match &error {
            Some(e) => self.tracer.end_span_with_error(root, e.clone()),
            None => self.tracer.end_span(root, status),
        };
        if let Err(e) = closed {
            warn!(error = %e, "Agent span closed out of order; closing all open spans");
            self.tracer.close_all(status);
        }

        info!(
            trace_id = %self.tracer.trace_id(),
            stopped_reason = %outcome.reason,
            total_turns = outcome.total_turns,
            tool_calls = state.tool_calls_count,
            "Agent run finished"
        );

        AgentRunResult {
            final_output: outcome.final_output,
            total_turns: outcome.total_turns,
            tool_calls_count: state.tool_calls_count,
            stopped_reason: outcome.reason,
            turns: state.turns,
            messages: state.messages,
            error: outcome.error,
            tripped_by: outcome.tripped_by,
            trace_id: self.tracer.trace_id().to_string(),
            usage: state.usage,
        }
    }

    fn attr(&self, span: &SpanHandle, key: &str, value: impl Into<Value>) {
        if let Err(e) = self.tracer.set_attribute(span, key, value) {
            warn!(key, error = %e, "Failed to set span attribute");
        }
    }

    fn close(&self, span: &SpanHandle, status: SpanStatus, error: Option<String>) {
        let closed = match error {
            Some(e) => self.tracer.end_span_with_error(span, e),
            None => self.tracer.end_span(span, status),
        };
        if let Err(e) = closed {
            warn!(error = %e, "Failed to close span");
        }
    }
}

/// Mutable bookkeeping for one run.
struct RunState {
    messages: Vec<Message>,
    turns: Vec<TurnRecord>,
    tool_calls_count: u32,
    usage: Usage,
}

impl RunState {
    fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            turns: Vec::new(),
            tool_calls_count: 0,
            usage: Usage::default(),
        }
    }

    fn add_usage(&mut self, usage: Usage) {
        self.usage.prompt_tokens += usage.prompt_tokens;
        self.usage.completion_tokens += usage.completion_tokens;
        self.usage.total_tokens += usage.total_tokens;
    }
}

struct Outcome {
    reason: StopReason,
    total_turns: u32,
    final_output: String,
    error: Option<String>,
    tripped_by: Option<GuardrailTripped>,
}

impl Outcome {
    fn new(reason: StopReason, total_turns: u32) -> Self {
        Self {
            reason,
            total_turns,
            final_output: String::new(),
            error: None,
            tripped_by: None,
        }
    }

    fn tripped(total_turns: u32, trip: GuardrailTripped, refusal: &str) -> Self {
        Self {
            final_output: refusal.to_string(),
            tripped_by: Some(trip),
            ..Self::new(StopReason::GuardrailTripped, total_turns)
        }
    }

    fn output(mut self, text: String) -> Self {
        self.final_output = text;
        self
    }

    fn error(mut self, message: String) -> Self {
        self.error = Some(message);
        self
    }
}

fn tool_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookError;
    use crate::test_helpers::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use wardline_core::error::ProviderError;
    use wardline_core::message::Role;
    use wardline_core::provider::ProviderResponse;
    use wardline_core::tool::{ParamType, ToolArgs};
    use wardline_guardrails::{FnGuardrail, GuardrailResult};
    use wardline_tools::FunctionTool;

    fn weather_registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(
                FunctionTool::new("get_weather", |args: ToolArgs| async move {
                    let city = args.str("city")?.to_string();
                    Ok(Value::String(format!("{city}: 25C")))
                })
                .describe("Look up the weather for a city")
                .param("city", ParamType::String),
            ))
            .unwrap();
        Arc::new(registry)
    }

    fn blocking_engine(phase: Phase, needle: &'static str) -> Arc<GuardrailEngine> {
        let guard = Arc::new(FnGuardrail::new("no_secrets", move |ctx| {
            if ctx.text.contains(needle) {
                Ok(GuardrailResult::trip("contains a secret"))
            } else {
                Ok(GuardrailResult::pass())
            }
        }));
        let mut engine = GuardrailEngine::new();
        match phase {
            Phase::Input => engine.add_input(guard),
            Phase::Output => engine.add_output(guard),
        }
        Arc::new(engine)
    }

    #[tokio::test]
    async fn text_answer_completes_in_one_turn() {
        let provider = Arc::new(SequentialMockProvider::single_text("Hello!"));
        let agent = AgentLoop::new(provider.clone(), Arc::new(ToolRegistry::new()))
            .with_system_prompt("Be nice.");

        let result = agent.run("Hi", &[], None).await;

        assert_eq!(result.stopped_reason, StopReason::Completed);
        assert_eq!(result.final_output, "Hello!");
        assert_eq!(result.total_turns, 1);
        assert_eq!(result.tool_calls_count, 0);
        assert_eq!(result.usage.total_tokens, 15);
        let roles: Vec<Role> = result.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert!(result.turns[0].is_final);

        // No tools registered: no schema is sent.
        assert!(provider.requests()[0].tools.is_empty());
    }

    #[tokio::test]
    async fn history_and_extra_context_are_ordered() {
        let provider = Arc::new(SequentialMockProvider::single_text("ok"));
        let agent = AgentLoop::new(provider.clone(), Arc::new(ToolRegistry::new()))
            .with_system_prompt("sys");
        let history = vec![Message::user("earlier"), Message::assistant("reply")];

        agent
            .run("now", &history, Some("Known facts about the user:\n- name: Ada"))
            .await;

        let sent = &provider.requests()[0].messages;
        let contents: Vec<&str> = sent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec![
                "sys",
                "Known facts about the user:\n- name: Ada",
                "earlier",
                "reply",
                "now"
            ]
        );
        assert_eq!(sent[1].role, Role::System);
    }

    #[tokio::test]
    async fn tool_call_then_answer() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("get_weather", serde_json::json!({"city": "Paris"}))],
            "It is 25C in Paris.",
        ));
        let agent = AgentLoop::new(provider.clone(), weather_registry());

        let result = agent.run("Weather in Paris?", &[], None).await;

        assert_eq!(result.stopped_reason, StopReason::Completed);
        assert_eq!(result.total_turns, 2);
        assert_eq!(result.tool_calls_count, 1);
        assert_eq!(result.final_output, "It is 25C in Paris.");

        let tool_msg = result
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert_eq!(tool_msg.content, "Paris: 25C");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_get_weather"));

        let record = &result.turns[0].tool_calls[0];
        assert_eq!(record.result, Some(Value::String("Paris: 25C".into())));
        assert_eq!(record.arguments, serde_json::json!({"city": "Paris"}));

        // The second call carries the tool result and the schema.
        let second = &provider.requests()[1];
        assert_eq!(second.tools.len(), 1);
        assert_eq!(second.messages.last().unwrap().role, Role::Tool);
    }

    #[tokio::test]
    async fn several_calls_in_one_turn_keep_their_order() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![
                make_tool_call_with_id("call_1", "get_weather", serde_json::json!({"city": "Paris"})),
                make_tool_call_with_id("call_2", "get_weather", serde_json::json!({"city": "Rome"})),
            ],
            "Both are warm.",
        ));
        let agent = AgentLoop::new(provider, weather_registry());

        let result = agent.run("Paris and Rome?", &[], None).await;

        assert_eq!(result.stopped_reason, StopReason::Completed);
        assert_eq!(result.tool_calls_count, 2);
        let tool_msgs: Vec<(&str, &str)> = result
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| (m.tool_call_id.as_deref().unwrap(), m.content.as_str()))
            .collect();
        assert_eq!(
            tool_msgs,
            vec![("call_1", "Paris: 25C"), ("call_2", "Rome: 25C")]
        );
        let ids: Vec<&str> = result.turns[0]
            .tool_calls
            .iter()
            .map(|r| r.call_id.as_str())
            .collect();
        assert_eq!(ids, vec!["call_1", "call_2"]);
    }

    #[tokio::test]
    async fn cancellation_between_turns_keeps_counters() {
        let token = CancellationToken::new();
        let mut registry = ToolRegistry::new();
        let stopper = token.clone();
        registry
            .register(Arc::new(FunctionTool::new("stop", move |_args: ToolArgs| {
                let stopper = stopper.clone();
                async move {
                    stopper.cancel();
                    Ok(Value::String("stopping".into()))
                }
            })))
            .unwrap();
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("stop", serde_json::json!({}))],
            "never sent",
        ));
        let agent = AgentLoop::new(provider.clone(), Arc::new(registry)).with_cancellation(token);
        let tracer = agent.tracer();

        let result = agent.run("stop after the tool", &[], None).await;

        assert_eq!(result.stopped_reason, StopReason::Cancelled);
        assert_eq!(result.total_turns, 1);
        assert_eq!(result.tool_calls_count, 1);
        assert_eq!(result.turns.len(), 1);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(result.messages.last().unwrap().content, "stopping");
        assert_eq!(tracer.open_count(), 0);
    }

    #[tokio::test]
    async fn tool_errors_are_fed_back_to_the_model() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("does_not_exist", serde_json::json!({}))],
            "Sorry, I could not do that.",
        ));
        let agent = AgentLoop::new(provider, weather_registry());

        let result = agent.run("do it", &[], None).await;

        assert_eq!(result.stopped_reason, StopReason::Completed);
        assert_eq!(result.tool_calls_count, 1);
        let tool_msg = result
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        let body: Value = serde_json::from_str(&tool_msg.content).unwrap();
        assert_eq!(body["error"]["kind"], "not_found");
        assert!(body["error"]["message"].as_str().unwrap().contains("does_not_exist"));
        assert_eq!(
            result.turns[0].tool_calls[0].error_kind.as_deref(),
            Some("not_found")
        );
    }

    #[tokio::test]
    async fn malformed_arguments_are_reported_not_fatal() {
        let mut bad = make_tool_call("get_weather", serde_json::json!({}));
        bad.arguments = "{not json".into();
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(vec![bad], "done"));
        let agent = AgentLoop::new(provider, weather_registry());

        let result = agent.run("weather", &[], None).await;

        assert_eq!(result.stopped_reason, StopReason::Completed);
        let record = &result.turns[0].tool_calls[0];
        assert_eq!(record.error_kind.as_deref(), Some("invalid_arguments"));
        assert_eq!(record.arguments, Value::String("{not json".into()));
    }

    #[tokio::test]
    async fn always_tool_calling_model_hits_max_turns() {
        let provider = Arc::new(AlwaysToolProvider::new("get_weather"));
        let agent = AgentLoop::new(provider.clone(), weather_registry()).with_max_turns(3);

        let result = agent.run("loop forever", &[], None).await;

        assert_eq!(result.stopped_reason, StopReason::MaxTurnsReached);
        assert_eq!(result.total_turns, 3);
        assert_eq!(result.tool_calls_count, 3);
        assert_eq!(provider.call_count(), 3);
        assert_eq!(result.final_output, "thinking 3");
    }

    #[tokio::test]
    async fn input_trip_skips_the_model() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let agent = AgentLoop::new(provider.clone(), Arc::new(ToolRegistry::new()))
            .with_guardrails(blocking_engine(Phase::Input, "password"))
            .with_refusal_message("Blocked.");

        let result = agent.run("my password is hunter2", &[], None).await;

        assert_eq!(result.stopped_reason, StopReason::GuardrailTripped);
        assert_eq!(result.total_turns, 1);
        assert_eq!(result.final_output, "Blocked.");
        assert_eq!(provider.call_count(), 0);
        let trip = result.tripped_by.unwrap();
        assert_eq!(trip.phase, Phase::Input);
        assert_eq!(trip.guardrail_name, "no_secrets");
    }

    #[tokio::test]
    async fn output_trip_returns_refusal_not_content() {
        let provider = Arc::new(SequentialMockProvider::single_text("the secret is 42"));
        let agent = AgentLoop::new(provider, Arc::new(ToolRegistry::new()))
            .with_guardrails(blocking_engine(Phase::Output, "secret"))
            .with_refusal_message("I can't share that.");

        let result = agent.run("tell me", &[], None).await;

        assert_eq!(result.stopped_reason, StopReason::GuardrailTripped);
        assert_eq!(result.final_output, "I can't share that.");
        assert!(result.messages.iter().all(|m| !m.content.contains("secret is 42")));
        assert_eq!(result.tripped_by.unwrap().phase, Phase::Output);
    }

    #[tokio::test]
    async fn input_rewrite_replaces_user_message() {
        let provider = Arc::new(SequentialMockProvider::single_text("ok"));
        let mut engine = GuardrailEngine::new();
        engine.add_input(Arc::new(FnGuardrail::new("lower", |ctx| {
            Ok(GuardrailResult::rewrite(ctx.text.to_lowercase()))
        })));
        let agent = AgentLoop::new(provider.clone(), Arc::new(ToolRegistry::new()))
            .with_guardrails(Arc::new(engine));

        agent.run("SHOUTING", &[], None).await;

        let sent = &provider.requests()[0].messages;
        assert_eq!(sent.last().unwrap().content, "shouting");
    }

    struct FailingProvider;

    #[async_trait::async_trait]
    impl Provider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn complete(&self, _: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::ApiError {
                status_code: 503,
                message: "overloaded".into(),
            })
        }
    }

    #[derive(Default)]
    struct ErrorLog {
        errors: Mutex<Vec<String>>,
    }

    impl AgentHooks for ErrorLog {
        fn on_error(&self, error: &AgentError) {
            self.errors.lock().unwrap().push(error.to_string());
        }
    }

    #[tokio::test]
    async fn model_error_ends_run_and_reaches_on_error() {
        let hooks = Arc::new(ErrorLog::default());
        let agent = AgentLoop::new(Arc::new(FailingProvider), Arc::new(ToolRegistry::new()))
            .with_hooks(hooks.clone());
        let tracer = agent.tracer();

        let result = agent.run("hi", &[], None).await;

        assert_eq!(result.stopped_reason, StopReason::Error);
        assert_eq!(result.total_turns, 1);
        assert!(result.error.as_deref().unwrap().contains("overloaded"));
        assert!(result.final_output.is_empty());
        assert_eq!(hooks.errors.lock().unwrap().len(), 1);
        assert_eq!(tracer.open_count(), 0);
    }

    struct HangingProvider;

    #[async_trait::async_trait]
    impl Provider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(&self, _: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn cancellation_races_the_model_call() {
        let token = CancellationToken::new();
        let agent = AgentLoop::new(Arc::new(HangingProvider), Arc::new(ToolRegistry::new()))
            .with_cancellation(token.clone());
        let tracer = agent.tracer();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let result = agent.run("hi", &[], None).await;
        canceller.await.unwrap();

        assert_eq!(result.stopped_reason, StopReason::Cancelled);
        assert_eq!(result.total_turns, 1);
        assert_eq!(tracer.open_count(), 0);
        let spans = tracer.export();
        assert!(spans.iter().all(|s| !s.is_open()));
        assert!(spans.iter().all(|s| s.status == SpanStatus::Cancelled));
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_calls() {
        let token = CancellationToken::new();
        token.cancel();
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let agent = AgentLoop::new(provider.clone(), Arc::new(ToolRegistry::new()))
            .with_cancellation(token);

        let result = agent.run("hi", &[], None).await;

        assert_eq!(result.stopped_reason, StopReason::Cancelled);
        assert_eq!(result.total_turns, 1);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn one_model_call_and_one_tool_call_make_three_spans() {
        let provider = Arc::new(AlwaysToolProvider::new("get_weather"));
        let agent = AgentLoop::new(provider, weather_registry()).with_max_turns(1);
        let tracer = agent.tracer();

        let result = agent.run("weather", &[], None).await;
        assert_eq!(result.trace_id, tracer.trace_id());

        let spans = tracer.export();
        assert_eq!(spans.len(), 3);
        let root = spans.iter().find(|s| s.kind == SpanKind::Agent).unwrap();
        let llm: Vec<_> = spans.iter().filter(|s| s.kind == SpanKind::Llm).collect();
        let tool: Vec<_> = spans.iter().filter(|s| s.kind == SpanKind::Tool).collect();
        assert_eq!(llm.len(), 1);
        assert_eq!(tool.len(), 1);
        assert!(root.parent_id.is_none());
        for child in llm.iter().chain(tool.iter()) {
            assert_eq!(child.parent_id.as_deref(), Some(root.id.as_str()));
            assert!(child.within(root));
        }
        assert_eq!(llm[0].attributes["total_tokens"], 15);
        assert_eq!(tool[0].name, "get_weather");
    }

    #[tokio::test]
    async fn guardrail_phases_get_their_own_spans() {
        let provider = Arc::new(SequentialMockProvider::single_text("fine"));
        let agent = AgentLoop::new(provider, Arc::new(ToolRegistry::new()))
            .with_guardrails(blocking_engine(Phase::Output, "secret"));
        let tracer = agent.tracer();

        agent.run("hi", &[], None).await;

        let guard_spans: Vec<_> = tracer
            .export()
            .into_iter()
            .filter(|s| s.kind == SpanKind::Guardrail)
            .collect();
        assert_eq!(guard_spans.len(), 1);
        assert_eq!(guard_spans[0].name, "output");
        assert_eq!(guard_spans[0].status, SpanStatus::Ok);
    }

    struct PanickyHooks {
        turns_seen: Mutex<Vec<u32>>,
        errors: Mutex<usize>,
    }

    impl AgentHooks for PanickyHooks {
        fn on_llm_start(&self, _: u32, _: &[Message]) -> Result<(), HookError> {
            panic!("hook bug");
        }

        fn on_tool_end(&self, _: &ToolCallRecord) -> Result<(), HookError> {
            Err("tool hook failed".into())
        }

        fn on_turn_end(&self, turn: &TurnRecord) -> Result<(), HookError> {
            self.turns_seen.lock().unwrap().push(turn.turn_number);
            Ok(())
        }

        fn on_error(&self, _: &AgentError) {
            *self.errors.lock().unwrap() += 1;
        }
    }

    #[tokio::test]
    async fn failing_hooks_do_not_stop_the_run() {
        let hooks = Arc::new(PanickyHooks {
            turns_seen: Mutex::new(Vec::new()),
            errors: Mutex::new(0),
        });
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("get_weather", serde_json::json!({"city": "Oslo"}))],
            "cold",
        ));
        let agent = AgentLoop::new(provider, weather_registry()).with_hooks(hooks.clone());

        let result = agent.run("weather", &[], None).await;

        assert_eq!(result.stopped_reason, StopReason::Completed);
        assert_eq!(*hooks.turns_seen.lock().unwrap(), vec![1, 2]);
        // Two on_llm_start panics and one on_tool_end error.
        assert_eq!(*hooks.errors.lock().unwrap(), 3);
    }
}
