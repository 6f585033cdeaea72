//! `wardline init`: first-time setup.

use std::path::Path;

use wardline_config::AppConfig;

use super::config_file;

#[derive(Debug, PartialEq, Eq)]
pub enum InitOutcome {
    Created,
    Overwritten,
    AlreadyExists,
}

/// Write the default config to `path`, creating parent directories.
pub fn write_default(path: &Path, force: bool) -> anyhow::Result<InitOutcome> {
    let existed = path.exists();
    if existed && !force {
        return Ok(InitOutcome::AlreadyExists);
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(if existed {
        InitOutcome::Overwritten
    } else {
        InitOutcome::Created
    })
}

pub fn run(path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let path = config_file(path);

    println!("Wardline: first-time setup");
    println!("==========================\n");

    match write_default(&path, force)? {
        InitOutcome::Created => {
            println!("✅ Created config at: {}", path.display());
            println!("\n📝 Next steps:");
            println!("   1. Review [agent], [memory] and [[guardrails]] in the file");
            println!("   2. Run: wardline config validate\n");
        }
        InitOutcome::Overwritten => {
            println!("✅ Replaced config at: {}", path.display());
        }
        InitOutcome::AlreadyExists => {
            println!("⚠️  Config already exists at: {}", path.display());
            println!("   Edit it manually or re-run with --force.\n");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_a_loadable_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        assert_eq!(write_default(&path, false).unwrap(), InitOutcome::Created);
        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.agent.model, AppConfig::default().agent.model);
    }

    #[test]
    fn keeps_existing_file_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent]\nmodel = \"custom\"\n").unwrap();

        assert_eq!(write_default(&path, false).unwrap(), InitOutcome::AlreadyExists);
        assert!(std::fs::read_to_string(&path).unwrap().contains("custom"));

        assert_eq!(write_default(&path, true).unwrap(), InitOutcome::Overwritten);
        assert!(!std::fs::read_to_string(&path).unwrap().contains("custom"));
    }
}
