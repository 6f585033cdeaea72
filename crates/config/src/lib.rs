//! Configuration loading, validation, and management for Wardline.
//!
//! Loads configuration from `~/.wardline/config.toml` with environment
//! variable overrides. Validates all settings at startup; a bad config is
//! fatal before any run starts.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.wardline/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Reasoning loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Memory tiers and store backend
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Span recording and export
    #[serde(default)]
    pub tracing: TracingConfig,

    /// Interception pipeline settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Input/output guardrails, evaluated in declaration order
    #[serde(default)]
    pub guardrails: Vec<GuardrailConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Identifies the agent in memory namespaces
    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Upper bound on model calls per run
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Returned instead of any content a guardrail blocked
    #[serde(default = "default_refusal_message")]
    pub refusal_message: String,

    /// Per-call tool timeout; unset means no timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_timeout_secs: Option<u64>,
}

fn default_agent_id() -> String {
    "default".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_turns() -> u32 {
    10
}
fn default_system_prompt() -> String {
    "You are a helpful assistant. Use the available tools when they help.".into()
}
fn default_refusal_message() -> String {
    "Sorry, I can't help with that request.".into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
            max_turns: default_max_turns(),
            system_prompt: default_system_prompt(),
            refusal_message: default_refusal_message(),
            tool_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "sqlite", "file" or "memory"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// Database file (sqlite) or directory (file). Defaults under `~/.wardline/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Maximum number of short-term messages kept per session
    #[serde(default = "default_short_term_capacity")]
    pub short_term_capacity: usize,

    /// Fraction of capacity at which extraction runs before eviction
    #[serde(default = "default_extraction_threshold")]
    pub extraction_threshold: f64,

    /// "evict_and_warn" or "evict_and_error"
    #[serde(default = "default_extraction_failure_policy")]
    pub extraction_failure_policy: String,

    /// Buffered turns that trigger extraction
    #[serde(default = "default_trigger_count")]
    pub trigger_count: usize,

    /// Seconds since the last extraction that trigger extraction
    #[serde(default = "default_trigger_interval_secs")]
    pub trigger_interval_secs: u64,

    /// How long loaded long-term facts stay cached
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Character budget for the rendered memory block
    #[serde(default = "default_prompt_max_chars")]
    pub prompt_max_chars: usize,

    /// Most recent short-term turns considered for the prompt
    #[serde(default = "default_prompt_recent_turns")]
    pub prompt_recent_turns: usize,

    /// Live sessions kept in the gateway's cache; idle ones beyond this are dropped
    #[serde(default = "default_max_cached_sessions")]
    pub max_cached_sessions: usize,
}

fn default_memory_backend() -> String {
    "sqlite".into()
}
fn default_short_term_capacity() -> usize {
    20
}
fn default_extraction_threshold() -> f64 {
    0.8
}
fn default_extraction_failure_policy() -> String {
    "evict_and_warn".into()
}
fn default_trigger_count() -> usize {
    10
}
fn default_trigger_interval_secs() -> u64 {
    300
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_prompt_max_chars() -> usize {
    2000
}
fn default_prompt_recent_turns() -> usize {
    10
}
fn default_max_cached_sessions() -> usize {
    1024
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            path: None,
            short_term_capacity: default_short_term_capacity(),
            extraction_threshold: default_extraction_threshold(),
            extraction_failure_policy: default_extraction_failure_policy(),
            trigger_count: default_trigger_count(),
            trigger_interval_secs: default_trigger_interval_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            prompt_max_chars: default_prompt_max_chars(),
            prompt_recent_turns: default_prompt_recent_turns(),
            max_cached_sessions: default_max_cached_sessions(),
        }
    }
}

impl MemoryConfig {
    /// The configured store path, or the backend's default location.
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(p) => PathBuf::from(p),
            None if self.backend == "file" => AppConfig::config_dir().join("memory"),
            None => AppConfig::config_dir().join("memory.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// "log" or "null"
    #[serde(default = "default_exporter")]
    pub exporter: String,
}

fn default_true() -> bool {
    true
}
fn default_exporter() -> String {
    "log".into()
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exporter: default_exporter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Allowlist of sender IDs. Empty or ["*"] = allow all.
    #[serde(default = "default_allowed_users")]
    pub allowed_users: Vec<String>,

    /// Reply sent when a downstream layer fails
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,

    /// Whether to install the request logging middleware
    #[serde(default = "default_true")]
    pub log_requests: bool,
}

fn default_allowed_users() -> Vec<String> {
    vec!["*".into()]
}
fn default_fallback_reply() -> String {
    "Something went wrong while handling your message. Please try again.".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            allowed_users: default_allowed_users(),
            fallback_reply: default_fallback_reply(),
            log_requests: true,
        }
    }
}

/// Configuration for one built-in guardrail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    /// Unique name, reported when the guardrail trips
    pub name: String,

    /// "max_length", "blocklist" or "redact"
    pub kind: String,

    /// "input", "output" or "both"
    #[serde(default = "default_phase")]
    pub phase: String,

    /// Character limit (max_length)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_chars: Option<usize>,

    /// Regex patterns (blocklist, redact)
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Replacement text (redact)
    #[serde(default = "default_replacement")]
    pub replacement: String,

    /// Reason reported on a trip
    #[serde(default)]
    pub message: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_phase() -> String {
    "both".into()
}
fn default_replacement() -> String {
    "[REDACTED]".into()
}

impl AppConfig {
    /// Load configuration from the default path (~/.wardline/config.toml),
    /// then apply environment overrides:
    /// - `WARDLINE_MODEL`
    /// - `WARDLINE_MAX_TURNS`
    /// - `WARDLINE_MEMORY_BACKEND`
    /// - `WARDLINE_MEMORY_PATH`
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `WARDLINE_*` overrides using the given variable lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("WARDLINE_MODEL") {
            self.agent.model = model;
        }

        if let Some(raw) = lookup("WARDLINE_MAX_TURNS") {
            self.agent.max_turns = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "WARDLINE_MAX_TURNS must be a positive integer, got '{raw}'"
                ))
            })?;
        }

        if let Some(backend) = lookup("WARDLINE_MEMORY_BACKEND") {
            self.memory.backend = backend;
        }

        if let Some(path) = lookup("WARDLINE_MEMORY_PATH") {
            self.memory.path = Some(path);
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".wardline")
    }

    /// Get the configuration file path.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::ValidationError(msg));

        if !(0.0..=2.0).contains(&self.agent.temperature) {
            return fail("agent.temperature must be between 0.0 and 2.0".into());
        }
        if self.agent.max_turns == 0 {
            return fail("agent.max_turns must be at least 1".into());
        }
        if self.agent.tool_timeout_secs == Some(0) {
            return fail("agent.tool_timeout_secs must be greater than 0".into());
        }

        let memory = &self.memory;
        if !matches!(memory.backend.as_str(), "sqlite" | "file" | "memory") {
            return fail(format!(
                "memory.backend must be one of sqlite, file, memory (got '{}')",
                memory.backend
            ));
        }
        if memory.short_term_capacity == 0 {
            return fail("memory.short_term_capacity must be at least 1".into());
        }
        if memory.max_cached_sessions == 0 {
            return fail("memory.max_cached_sessions must be at least 1".into());
        }
        if !(memory.extraction_threshold > 0.0 && memory.extraction_threshold <= 1.0) {
            return fail("memory.extraction_threshold must be in (0.0, 1.0]".into());
        }
        if !matches!(
            memory.extraction_failure_policy.as_str(),
            "evict_and_warn" | "evict_and_error"
        ) {
            return fail(format!(
                "memory.extraction_failure_policy must be evict_and_warn or evict_and_error (got '{}')",
                memory.extraction_failure_policy
            ));
        }
        if memory.trigger_count == 0 {
            return fail("memory.trigger_count must be at least 1".into());
        }
        if memory.prompt_max_chars == 0 {
            return fail("memory.prompt_max_chars must be greater than 0".into());
        }

        if !matches!(self.tracing.exporter.as_str(), "log" | "null") {
            return fail(format!(
                "tracing.exporter must be log or null (got '{}')",
                self.tracing.exporter
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for g in &self.guardrails {
            if !seen.insert(g.name.as_str()) {
                return fail(format!("duplicate guardrail name '{}'", g.name));
            }
            if !matches!(g.phase.as_str(), "input" | "output" | "both") {
                return fail(format!(
                    "guardrail '{}': phase must be input, output or both",
                    g.name
                ));
            }
            match g.kind.as_str() {
                "max_length" if g.max_chars.is_none() => {
                    return fail(format!("guardrail '{}': max_length needs max_chars", g.name));
                }
                "blocklist" | "redact" if g.patterns.is_empty() => {
                    return fail(format!(
                        "guardrail '{}': {} needs at least one pattern",
                        g.name, g.kind
                    ));
                }
                "max_length" | "blocklist" | "redact" => {}
                other => {
                    return fail(format!("guardrail '{}': unknown kind '{other}'", g.name));
                }
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for wardline_core::Error {
    fn from(err: ConfigError) -> Self {
        wardline_core::Error::Config {
            message: err.to_string(),
        }
    }
}
