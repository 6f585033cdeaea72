//! `wardline memory`: inspect and clear stored memory.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use wardline_core::memory::MemoryStore;
use wardline_memory::{MemorySession, SessionSettings};

use super::load_config;

/// Render every tier of one session as a report.
pub async fn render(session: &mut MemorySession) -> anyhow::Result<String> {
    let ctx = session.load().await?;
    let mut out = format!("🧠 Memory for {}\n", session.namespace());

    out.push_str("\nLong-term facts:\n");
    out.push_str(&pretty_or_none(&Value::Object(ctx.long_term)));

    out.push_str("\nWorking memory:\n");
    out.push_str(&pretty_or_none(&Value::Object(ctx.working)));

    out.push_str(&format!("\nShort-term history ({}):\n", ctx.short_term.len()));
    if ctx.short_term.is_empty() {
        out.push_str("  (empty)\n");
    }
    for m in &ctx.short_term {
        out.push_str(&format!(
            "  [{}] {}: {}\n",
            m.timestamp.format("%Y-%m-%d %H:%M:%S"),
            m.role,
            m.content
        ));
    }

    if let Some(block) = session.format_for_prompt().await? {
        out.push_str("\nPrompt block:\n");
        for line in block.lines() {
            out.push_str(&format!("  {line}\n"));
        }
    }
    Ok(out)
}

fn pretty_or_none(value: &Value) -> String {
    match value {
        Value::Object(map) if map.is_empty() => "  (empty)\n".to_string(),
        other => {
            let text = serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string());
            text.lines().map(|l| format!("  {l}\n")).collect()
        }
    }
}

async fn open(
    config_path: Option<&Path>,
    agent: Option<&str>,
    user: &str,
) -> anyhow::Result<MemorySession> {
    let config = load_config(config_path)?;
    let store: Arc<dyn MemoryStore> = wardline_memory::open_store(&config.memory).await?;
    let agent_id = agent.unwrap_or(&config.agent.agent_id);
    Ok(MemorySession::new(
        agent_id,
        user,
        store,
        SessionSettings::from_config(&config.memory),
    ))
}

pub async fn show(config_path: Option<&Path>, agent: Option<&str>, user: &str) -> anyhow::Result<()> {
    let mut session = open(config_path, agent, user).await?;
    print!("{}", render(&mut session).await?);
    Ok(())
}

pub async fn clear(
    config_path: Option<&Path>,
    agent: Option<&str>,
    user: &str,
    confirm: bool,
) -> anyhow::Result<()> {
    if !confirm {
        println!("⚠️  This will delete ALL memory for user '{user}' permanently.");
        println!("   Run with --confirm to proceed:");
        println!("   wardline memory clear --user {user} --confirm");
        return Ok(());
    }

    let mut session = open(config_path, agent, user).await?;
    session.clear_all().await?;
    println!("✅ Cleared memory for {}.", session.namespace());
    Ok(())
}
