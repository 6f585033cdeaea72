//! Tool trait: the abstraction over "call a tool".
//!
//! A tool declares its parameters as an ordered list of [`ToolParam`]s; the
//! registry derives the call schema from that list, validates and coerces
//! incoming arguments against it, then hands the tool a [`ToolArgs`] map.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ToolError;
use crate::message::MessageToolCall;

/// JSON types a tool parameter can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// The JSON Schema `type` keyword for this parameter type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,

    #[serde(rename = "type")]
    pub param_type: ParamType,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub required: bool,

    /// Filled in when the caller omits an optional parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Allowed values, if the parameter is an enumeration.
    #[serde(default, rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<Value>,
}

impl ToolParam {
    /// A required parameter.
    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: String::new(),
            required: true,
            default: None,
            enum_values: Vec::new(),
        }
    }

    /// An optional parameter without a default.
    pub fn optional(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set a default value. A parameter with a default is never required.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self.required = false;
        self
    }

    /// Restrict the parameter to a fixed set of values.
    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }
}

/// Validated tool arguments, keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolArgs(Map<String, Value>);

impl ToolArgs {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build from a JSON value; anything but an object (or null) is rejected.
    pub fn from_value(tool_name: &str, value: Value) -> Result<Self, ToolError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::new()),
            other => Err(ToolError::InvalidArguments {
                tool_name: tool_name.to_string(),
                reason: format!("arguments must be a JSON object, got {other}"),
            }),
        }
    }

    /// Builder-style insert, handy in tests.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Required string argument.
    pub fn str(&self, key: &str) -> Result<&str, ToolError> {
        self.get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| missing(key, "string"))
    }

    /// Required integer argument.
    pub fn i64(&self, key: &str) -> Result<i64, ToolError> {
        self.get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| missing(key, "integer"))
    }

    /// Required number argument.
    pub fn f64(&self, key: &str) -> Result<f64, ToolError> {
        self.get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| missing(key, "number"))
    }

    /// Required boolean argument.
    pub fn bool(&self, key: &str) -> Result<bool, ToolError> {
        self.get(key)
            .and_then(Value::as_bool)
            .ok_or_else(|| missing(key, "boolean"))
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

fn missing(key: &str, expected: &str) -> ToolError {
    ToolError::InvalidArguments {
        tool_name: String::new(),
        reason: format!("argument '{key}' missing or not a {expected}"),
    }
}

impl From<Map<String, Value>> for ToolArgs {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl IntoIterator for ToolArgs {
    type Item = (String, Value);
    type IntoIter = serde_json::map::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Parsed arguments
    pub arguments: ToolArgs,
}

impl TryFrom<&MessageToolCall> for ToolCall {
    type Error = ToolError;

    /// Parse the raw argument string the model produced. An empty string
    /// means "no arguments".
    fn try_from(call: &MessageToolCall) -> Result<Self, Self::Error> {
        let raw = call.arguments.trim();
        let value = if raw.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments {
                tool_name: call.name.clone(),
                reason: format!("arguments are not valid JSON: {e}"),
            })?
        };
        Ok(Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: ToolArgs::from_value(&call.name, value)?,
        })
    }
}

/// The core Tool trait.
///
/// Tools are registered in the `ToolRegistry` and made available to the
/// agent loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "calculator").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// Declared parameters, in declaration order.
    fn parameters(&self) -> Vec<ToolParam> {
        Vec::new()
    }

    /// A verbatim JSON Schema for tools defined elsewhere. When present it
    /// is exported as-is and argument validation is skipped.
    fn raw_schema(&self) -> Option<Value> {
        None
    }

    /// Execute the tool with already validated arguments.
    async fn execute(&self, args: ToolArgs) -> Result<Value, ToolError>;
}
