//! vcmd - Voice Commander in the terminal
//!
//! Type what you would say. Each line runs through intent resolution, risk
//! classification and confirmation before any tool is called.

mod commands;
mod config;
mod offline;
mod output;
mod repl;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commander::{intent::OpenAiCompatibleService, IntentService, McpToolClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// vcmd - risk-gated voice commands
#[derive(Parser)]
#[command(name = "vcmd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Drive the Voice Commander pipeline from the terminal")]
#[command(long_about = r#"
vcmd runs typed utterances through the Voice Commander pipeline: context
enrichment, LLM intent mapping, risk classification and spoken-style
confirmation.

Examples:
  vcmd                               # Interactive session in the current directory
  vcmd --offline                     # Keyword intents and dry-run tools, no network
  vcmd tools                         # List the tool dictionary
  vcmd assess delete_file path=/etc/passwd
  vcmd config --show
"#)]
struct Cli {
    /// Configuration file (defaults to ~/.vcmd/config.toml)
    #[arg(short, long, env = "VCMD_CONFIG")]
    config: Option<PathBuf>,

    /// Working directory (defaults to current directory)
    #[arg(short = 'd', long)]
    directory: Option<PathBuf>,

    /// Use keyword intent matching and dry-run tools instead of the network
    #[arg(long)]
    offline: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available tools with their risk levels
    Tools,

    /// Score a tool call without running it
    Assess {
        /// Tool name, e.g. delete_file
        tool: String,

        /// Parameters as key=value
        params: Vec<String>,

        /// Utterance the call came from (checked for admin keywords)
        #[arg(short, long)]
        text: Option<String>,
    },

    /// Configuration management
    Config {
        /// Show the merged configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("commander={level},vcmd={level},warn", level = log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = config::Config::load(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Tools) => commands::list_tools(&config).await?,
        Some(Commands::Assess { tool, params, text }) => {
            commands::assess(&config, &tool, &params, text.as_deref())?
        }
        Some(Commands::Config { .. }) => commands::show_config(&config)?,
        None => {
            let work_dir = match cli.directory {
                Some(dir) => dir,
                None => std::env::current_dir().context("cannot determine current directory")?,
            };

            let (intent_service, tool_client): (Arc<dyn IntentService>, Arc<dyn McpToolClient>) =
                if cli.offline {
                    (
                        Arc::new(offline::KeywordIntentService),
                        Arc::new(offline::DryRunToolClient::default()),
                    )
                } else {
                    // No MCP transport ships with the CLI; tools are always dry-run
                    (
                        Arc::new(OpenAiCompatibleService::from_config(&config.commander.intent)),
                        Arc::new(offline::DryRunToolClient::default()),
                    )
                };

            let commander =
                commander::initialize_commander(config.commander.clone(), intent_service, tool_client)
                    .await?;
            commander.start_background_tasks();

            let mut repl = repl::VoiceRepl::new(
                Arc::new(commander),
                config,
                work_dir.display().to_string(),
                cli.offline,
            )?;
            repl.run().await?;
        }
    }

    Ok(())
}
