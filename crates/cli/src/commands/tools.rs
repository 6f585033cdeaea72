//! `wardline tools`: print the built-in tool schema.

use serde_json::Value;
use wardline_tools::{ToolRegistry, builtin_tools};

pub fn builtin_registry() -> anyhow::Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in builtin_tools() {
        registry.register(tool)?;
    }
    Ok(registry)
}

pub fn schema(openai: bool) -> anyhow::Result<Value> {
    let registry = builtin_registry()?;
    Ok(if openai {
        registry.to_openai_schema()
    } else {
        registry.to_json_schema()
    })
}

pub fn run(openai: bool) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&schema(openai)?)?);
    Ok(())
}
