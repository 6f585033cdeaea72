//! `FunctionTool`: build a tool from an async closure.
//!
//! ```ignore
//! let weather = FunctionTool::new("get_weather", |args: ToolArgs| async move {
//!     let city = args.str("city")?.to_string();
//!     Ok(json!(format!("{city}: 25C")))
//! })
//! .doc("Get the weather for a city.\n\nArgs:\n    city: City name.")
//! .param("city", ParamType::String);
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use wardline_core::error::ToolError;
use wardline_core::tool::{ParamType, Tool, ToolArgs, ToolParam};

use crate::schema::{parse_args_section, summary_line};

type Handler = Arc<dyn Fn(ToolArgs) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// A tool whose body is an async closure returning `anyhow::Result<Value>`.
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    params: Vec<ToolParam>,
    arg_docs: HashMap<String, String>,
    raw_schema: Option<Value>,
    handler: Handler,
}

impl FunctionTool {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            params: Vec::new(),
            arg_docs: HashMap::new(),
            raw_schema: None,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    /// Set the description explicitly. Takes precedence over [`Self::doc`].
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attach a Google-style doc string. Its first line becomes the
    /// description when none is set; its `Args:` section describes any
    /// parameter declared without a description, before or after this call.
    pub fn doc(mut self, doc: &str) -> Self {
        if self.description.is_empty() {
            if let Some(line) = summary_line(doc) {
                self.description = line.to_string();
            }
        }
        self.arg_docs = parse_args_section(doc);
        for p in &mut self.params {
            if p.description.is_empty() {
                if let Some(d) = self.arg_docs.get(&p.name) {
                    p.description = d.clone();
                }
            }
        }
        self
    }

    /// Declare a required parameter.
    pub fn param(self, name: &str, param_type: ParamType) -> Self {
        self.with_param(ToolParam::required(name, param_type))
    }

    /// Declare an optional parameter with a default value.
    pub fn optional(self, name: &str, param_type: ParamType, default: impl Into<Value>) -> Self {
        self.with_param(ToolParam::optional(name, param_type).with_default(default))
    }

    /// Declare a fully specified parameter.
    pub fn with_param(mut self, mut param: ToolParam) -> Self {
        if param.description.is_empty() {
            if let Some(d) = self.arg_docs.get(&param.name) {
                param.description = d.clone();
            }
        }
        self.params.push(param);
        self
    }

    /// Export this JSON Schema verbatim instead of the declared parameters.
    pub fn raw_schema(mut self, schema: Value) -> Self {
        self.raw_schema = Some(schema);
        self
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Vec<ToolParam> {
        self.params.clone()
    }

    fn raw_schema(&self) -> Option<Value> {
        self.raw_schema.clone()
    }

    async fn execute(&self, args: ToolArgs) -> Result<Value, ToolError> {
        (self.handler)(args).await.map_err(|e| {
            // Keep typed tool errors raised inside the body via `?`.
            match e.downcast::<ToolError>() {
                Ok(tool_err) => tool_err,
                Err(other) => ToolError::ExecutionFailed {
                    tool_name: self.name.clone(),
                    reason: format!("{other:#}"),
                },
            }
        })
    }
}
