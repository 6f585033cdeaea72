//! Observer hooks for a run.
//!
//! Hooks see the run as it happens but cannot change it. A hook that
//! returns an error or panics is logged and reported to
//! [`AgentHooks::on_error`]; the run carries on. A panic inside `on_error`
//! itself is logged and dropped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{error, warn};
use wardline_core::message::{Message, MessageToolCall};
use wardline_core::provider::ProviderResponse;

use crate::result::{AgentError, ToolCallRecord, TurnRecord};

pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Callbacks fired inline by [`AgentLoop`](crate::AgentLoop). Every method
/// defaults to a no-op.
pub trait AgentHooks: Send + Sync {
    fn on_llm_start(&self, _turn: u32, _messages: &[Message]) -> Result<(), HookError> {
        Ok(())
    }

    fn on_llm_end(&self, _turn: u32, _response: &ProviderResponse) -> Result<(), HookError> {
        Ok(())
    }

    fn on_tool_start(&self, _call: &MessageToolCall) -> Result<(), HookError> {
        Ok(())
    }

    fn on_tool_end(&self, _record: &ToolCallRecord) -> Result<(), HookError> {
        Ok(())
    }

    fn on_turn_end(&self, _turn: &TurnRecord) -> Result<(), HookError> {
        Ok(())
    }

    fn on_error(&self, _error: &AgentError) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl AgentHooks for NoopHooks {}

/// Invokes hooks with failures contained.
pub(crate) struct HookRunner {
    hooks: Arc<dyn AgentHooks>,
}

impl HookRunner {
    pub(crate) fn new(hooks: Arc<dyn AgentHooks>) -> Self {
        Self { hooks }
    }

    pub(crate) fn fire<F>(&self, hook: &'static str, f: F)
    where
        F: FnOnce(&dyn AgentHooks) -> Result<(), HookError>,
    {
        let message = match catch_unwind(AssertUnwindSafe(|| f(self.hooks.as_ref()))) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
        };
        warn!(hook, error = %message, "Agent hook failed");
        self.report(&AgentError::Hook {
            hook: hook.to_string(),
            message,
        });
    }

    pub(crate) fn report(&self, err: &AgentError) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.hooks.on_error(err))) {
            error!(
                reason = %panic_message(panic.as_ref()),
                "on_error hook panicked; ignoring"
            );
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        errors: Mutex<Vec<String>>,
    }

    impl AgentHooks for Recorder {
        fn on_turn_end(&self, turn: &TurnRecord) -> Result<(), HookError> {
            if turn.turn_number == 2 {
                panic!("boom on turn 2");
            }
            Err("turn hook refused".into())
        }

        fn on_error(&self, error: &AgentError) {
            self.errors.lock().unwrap().push(error.to_string());
        }
    }

    struct PanickyOnError;

    impl AgentHooks for PanickyOnError {
        fn on_llm_start(&self, _: u32, _: &[Message]) -> Result<(), HookError> {
            Err("nope".into())
        }

        fn on_error(&self, _: &AgentError) {
            panic!("on_error exploded");
        }
    }

    #[test]
    fn errors_and_panics_reach_on_error() {
        let recorder = Arc::new(Recorder::default());
        let runner = HookRunner::new(recorder.clone());

        runner.fire("on_turn_end", |h| h.on_turn_end(&TurnRecord::new(1)));
        runner.fire("on_turn_end", |h| h.on_turn_end(&TurnRecord::new(2)));

        let errors = recorder.errors.lock().unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("turn hook refused"));
        assert!(errors[1].contains("boom on turn 2"));
    }

    #[test]
    fn panic_in_on_error_is_swallowed() {
        let runner = HookRunner::new(Arc::new(PanickyOnError));
        runner.fire("on_llm_start", |h| h.on_llm_start(1, &[]));
    }

    #[test]
    fn noop_hooks_never_fail() {
        let runner = HookRunner::new(Arc::new(NoopHooks));
        runner.fire("on_tool_start", |h| {
            h.on_tool_start(&MessageToolCall {
                id: "c1".into(),
                name: "t".into(),
                arguments: "{}".into(),
            })
        });
    }
}
