//! Wardline CLI: the main entry point.
//!
//! Commands:
//! - `init`    : write the default config file
//! - `config`  : show, validate or locate the configuration
//! - `memory`  : inspect or clear one user's memory
//! - `tools`   : print the tool schema sent to the model

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(
    name = "wardline",
    about = "Wardline: guarded, tool-using, memory-backed agent core",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.wardline/config.toml
    #[arg(short, long, global = true, env = "WARDLINE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Inspect or clear stored memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Print the schema of the built-in tools
    Tools {
        #[arg(short, long, value_enum, default_value_t = SchemaFormat::Plain)]
        format: SchemaFormat,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Load and validate the configuration
    Validate,
    /// Print the config file path
    Path,
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Print every memory tier for one user
    Show {
        #[arg(short, long)]
        user: String,
        /// Defaults to `agent.agent_id`
        #[arg(short, long)]
        agent: Option<String>,
    },
    /// Delete every memory tier for one user
    Clear {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        agent: Option<String>,
        /// Required to actually delete
        #[arg(long)]
        confirm: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemaFormat {
    Plain,
    Openai,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Init { force } => commands::init::run(config_path, force)?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Validate => commands::config_cmd::validate(config_path)?,
            ConfigAction::Path => commands::config_cmd::path(config_path),
        },
        Commands::Memory { action } => match action {
            MemoryAction::Show { user, agent } => {
                commands::memory::show(config_path, agent.as_deref(), &user).await?
            }
            MemoryAction::Clear {
                user,
                agent,
                confirm,
            } => commands::memory::clear(config_path, agent.as_deref(), &user, confirm).await?,
        },
        Commands::Tools { format } => {
            commands::tools::run(matches!(format, SchemaFormat::Openai))?
        }
    }

    Ok(())
}
