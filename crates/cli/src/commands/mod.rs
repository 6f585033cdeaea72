//! Subcommand implementations.

pub mod config_cmd;
pub mod init;
pub mod memory;
pub mod tools;

use std::path::{Path, PathBuf};

use anyhow::Context;
use wardline_config::AppConfig;

/// The config file in effect: `--config` when given, else the default.
pub fn config_file(path: Option<&Path>) -> PathBuf {
    path.map_or_else(AppConfig::config_path, Path::to_path_buf)
}

/// Load, apply `WARDLINE_*` overrides, and validate.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let file = config_file(path);
    let mut config = AppConfig::load_from(&file)
        .with_context(|| format!("Failed to load config from {}", file.display()))?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}
