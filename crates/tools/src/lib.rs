//! Tool registry, schema derivation, and built-in tools for Wardline.
//!
//! Tools are registered once into a [`ToolRegistry`], which derives the
//! call schema sent to the model and guards every dispatch: unknown names,
//! bad arguments, failing or panicking bodies and timeouts all come back
//! as a [`ToolError`](wardline_core::ToolError).

pub mod calculator;
pub mod current_time;
pub mod function;
pub mod registry;
pub mod schema;

use std::sync::Arc;

use wardline_core::error::ToolError;
use wardline_core::tool::Tool;

pub use function::FunctionTool;
pub use registry::ToolRegistry;
pub use schema::{coerce_value, parameters_schema, parse_args_section, validate_args};

/// The built-in tools, in registration order.
pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(calculator::CalculatorTool),
        Arc::new(current_time::CurrentTimeTool),
    ]
}

/// A registry holding every built-in tool.
pub fn builtin_registry() -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    for tool in builtin_tools() {
        registry.register(tool)?;
    }
    Ok(registry)
}
