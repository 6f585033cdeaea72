//! The reasoning loop for Wardline.
//!
//! A run follows a **call → dispatch → observe** cycle:
//!
//! 1. **Check** the user input against the input guardrails
//! 2. **Build context** (system prompt + memory block + history + input)
//! 3. **Call the model** with the registered tool schema
//! 4. **If tool calls**: execute them in order, append the results, go to 3
//! 5. **If text**: check it against the output guardrails and return it
//!
//! The loop stops on a final answer, a tripped guardrail, a model error,
//! cancellation, or when `max_turns` model calls have been made. Every
//! step is recorded as a span and reported to the [`AgentHooks`].

pub mod hooks;
pub mod loop_runner;
pub mod result;

#[cfg(test)]
mod test_helpers;

pub use hooks::{AgentHooks, HookError, NoopHooks};
pub use loop_runner::AgentLoop;
pub use result::{AgentError, AgentRunResult, StopReason, ToolCallRecord, TurnRecord};
pub use tokio_util::sync::CancellationToken;
