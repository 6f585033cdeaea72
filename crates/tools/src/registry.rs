//! The tool registry: named tools, derived schemas, guarded dispatch.
//!
//! The registry is built once at startup, wrapped in an `Arc`, and only read
//! afterwards. `execute` never panics and never lets a tool failure escape
//! as anything but a [`ToolError`].

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};
use wardline_core::error::ToolError;
use wardline_core::provider::ToolDefinition;
use wardline_core::tool::{Tool, ToolArgs, ToolCall};

use crate::schema::{derive_definition, validate_args};

/// A registry of available tools, kept in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
    timeout: Option<Duration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every tool call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Register a tool. Fails if the name is already taken.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        debug!(tool = %name, "Tool registered");
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Definitions for every tool, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| derive_definition(t.as_ref())).collect()
    }

    /// `[{name, description, parameters}, ...]`
    pub fn to_json_schema(&self) -> Value {
        Value::Array(self.definitions().iter().map(ToolDefinition::to_json).collect())
    }

    /// `[{type: "function", function: {...}}, ...]`
    pub fn to_openai_schema(&self) -> Value {
        Value::Array(
            self.definitions()
                .iter()
                .map(ToolDefinition::to_openai)
                .collect(),
        )
    }

    /// Validate arguments and run the named tool.
    pub async fn execute(&self, name: &str, args: ToolArgs) -> Result<Value, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let args = if tool.raw_schema().is_some() {
            args
        } else {
            validate_args(name, &tool.parameters(), args)?
        };

        debug!(tool = %name, "Executing tool");
        let guarded = AssertUnwindSafe(tool.execute(args)).catch_unwind();

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(tool = %name, timeout_secs = limit.as_secs(), "Tool timed out");
                    return Err(ToolError::Timeout {
                        tool_name: name.to_string(),
                        timeout_secs: limit.as_secs(),
                    });
                }
            },
            None => guarded.await,
        };

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                warn!(tool = %name, error = %err, "Tool failed");
                Err(attribute(name, err))
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!(tool = %name, %reason, "Tool panicked");
                Err(ToolError::ExecutionFailed {
                    tool_name: name.to_string(),
                    reason: format!("tool panicked: {reason}"),
                })
            }
        }
    }

    /// Run a parsed tool call.
    pub async fn execute_call(&self, call: &ToolCall) -> Result<Value, ToolError> {
        self.execute(&call.name, call.arguments.clone()).await
    }
}

/// Make sure an error raised inside a body names the tool it came from.
fn attribute(name: &str, err: ToolError) -> ToolError {
    match err {
        ToolError::InvalidArguments { tool_name, reason } if tool_name.is_empty() => {
            ToolError::InvalidArguments {
                tool_name: name.to_string(),
                reason,
            }
        }
        ToolError::NotFound(inner) | ToolError::Duplicate(inner) => ToolError::ExecutionFailed {
            tool_name: name.to_string(),
            reason: format!("tool raised an unexpected registry error for '{inner}'"),
        },
        other => other,
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionTool;
    use serde_json::json;
    use wardline_core::tool::ParamType;

    fn weather() -> Arc<dyn Tool> {
        Arc::new(
            FunctionTool::new("get_weather", |args: ToolArgs| async move {
                let city = args.str("city")?.to_string();
                Ok(json!(format!("{city}: 25C")))
            })
            .doc("Get the weather for a city.\n\nArgs:\n    city: City name.\n")
            .param("city", ParamType::String),
        )
    }

    fn echo() -> Arc<dyn Tool> {
        Arc::new(
            FunctionTool::new("echo", |args: ToolArgs| async move {
                Ok(Value::Object(args.into_inner()))
            })
            .describe("Echoes back its arguments")
            .param("text", ParamType::String),
        )
    }

    #[tokio::test]
    async fn get_weather_returns_city_forecast() {
        let mut registry = ToolRegistry::new();
        registry.register(weather()).unwrap();

        let out = registry
            .execute("get_weather", ToolArgs::new().with("city", "Paris"))
            .await
            .unwrap();
        assert_eq!(out, json!("Paris: 25C"));
    }

    #[tokio::test]
    async fn missing_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("missing_tool", ToolArgs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(name) if name == "missing_tool"));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(weather()).unwrap();
        let err = registry.register(weather()).unwrap_err();
        assert!(matches!(err, ToolError::Duplicate(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn schema_export_keeps_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(weather()).unwrap();
        registry.register(echo()).unwrap();

        let schema = registry.to_json_schema();
        assert_eq!(schema[0]["name"], "get_weather");
        assert_eq!(schema[0]["description"], "Get the weather for a city.");
        assert_eq!(
            schema[0]["parameters"]["properties"]["city"]["description"],
            "City name."
        );
        assert_eq!(schema[1]["name"], "echo");

        let openai = registry.to_openai_schema();
        assert_eq!(openai[1]["type"], "function");
        assert_eq!(openai[1]["function"], schema[1]);
    }

    #[tokio::test]
    async fn missing_argument_is_invalid_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(weather()).unwrap();
        let err = registry
            .execute("get_weather", ToolArgs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn arguments_are_coerced_before_the_body_runs() {
        let mut registry = ToolRegistry::new();
        registry.register(echo()).unwrap();
        let out = registry
            .execute("echo", ToolArgs::new().with("text", 42))
            .await
            .unwrap();
        assert_eq!(out, json!({"text": "42"}));
    }

    #[tokio::test]
    async fn panicking_body_becomes_execution_failure() {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(FunctionTool::new("boom", |_args| async move {
                if true {
                    panic!("kaboom");
                }
                Ok(Value::Null)
            })))
            .unwrap();

        let err = registry.execute("boom", ToolArgs::new()).await.unwrap_err();
        match err {
            ToolError::ExecutionFailed { tool_name, reason } => {
                assert_eq!(tool_name, "boom");
                assert!(reason.contains("kaboom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let mut registry = ToolRegistry::new().with_timeout(Duration::from_millis(20));
        registry
            .register(Arc::new(FunctionTool::new("slow", |_args| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Value::Null)
            })))
            .unwrap();

        let err = registry.execute("slow", ToolArgs::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }

    #[tokio::test]
    async fn raw_schema_tools_skip_validation() {
        let tool = FunctionTool::new("external", |args: ToolArgs| async move {
            Ok(json!(args.len()))
        })
        .describe("Defined elsewhere")
        .raw_schema(json!({"type": "object", "properties": {"q": {"oneOf": [{"type": "string"}]}}}));

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(tool)).unwrap();

        assert_eq!(
            registry.to_json_schema()[0]["parameters"]["properties"]["q"]["oneOf"][0]["type"],
            "string"
        );
        let out = registry
            .execute("external", ToolArgs::new().with("anything", true))
            .await
            .unwrap();
        assert_eq!(out, json!(1));
    }

    #[tokio::test]
    async fn execute_call_uses_parsed_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(weather()).unwrap();
        let call = ToolCall {
            id: "call_1".into(),
            name: "get_weather".into(),
            arguments: ToolArgs::new().with("city", "Lyon"),
        };
        assert_eq!(
            registry.execute_call(&call).await.unwrap(),
            json!("Lyon: 25C")
        );
    }
}
