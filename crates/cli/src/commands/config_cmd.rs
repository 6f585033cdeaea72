//! `wardline config`: configuration management commands.

use std::path::Path;

use wardline_config::AppConfig;

use super::{config_file, load_config};

/// Non-fatal observations about a valid config.
pub fn warnings(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.memory.backend == "memory" {
        warnings.push("memory.backend = \"memory\" loses all memory on restart".to_string());
    }
    if config.agent.system_prompt.trim().is_empty() {
        warnings.push("agent.system_prompt is empty".to_string());
    }
    if config.gateway.allowed_users.is_empty()
        || config.gateway.allowed_users.iter().any(|u| u == "*")
    {
        warnings.push("gateway.allowed_users lets every sender through".to_string());
    }
    for g in config.guardrails.iter().filter(|g| !g.enabled) {
        warnings.push(format!("guardrail '{}' is disabled", g.name));
    }

    warnings
}

pub fn validate(path: Option<&Path>) -> anyhow::Result<()> {
    println!("🔍 Validating configuration...");

    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e:#}");
            return Err(e);
        }
    };
    println!("   ✅ Config parsed successfully");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Agent:       {}", config.agent.agent_id);
    println!("   Model:       {}", config.agent.model);
    println!("   Max turns:   {}", config.agent.max_turns);
    println!(
        "   Memory:      {} ({})",
        config.memory.backend,
        config.memory.resolved_path().display()
    );
    println!("   Guardrails:  {}", config.guardrails.len());
    println!(
        "   Tracing:     {}",
        if config.tracing.enabled {
            config.tracing.exporter.as_str()
        } else {
            "off"
        }
    );

    Ok(())
}

pub fn show(path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub fn path(path: Option<&Path>) {
    println!("{}", config_file(path).display());
}
