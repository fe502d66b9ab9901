//! chatstream - streaming chat client CLI
//!
#![doc = "chatstream - streaming chat client CLI"]
#![doc = "Main entry point for the chatstream application."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chatstream::cli::{Cli, Commands};
use chatstream::commands;
use chatstream::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Initialize tracing
    init_tracing(cli.verbose, config.logging.json);

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Chat { conversation } => {
            tracing::info!("Starting interactive chat mode");
            if let Some(id) = &conversation {
                tracing::debug!("Resuming conversation: {}", id);
            }
            commands::chat::run_chat(config, conversation).await?;
            Ok(())
        }
        Commands::Ask {
            prompt,
            conversation,
        } => {
            tracing::info!("Sending one-shot prompt");
            commands::chat::run_ask(config, prompt, conversation).await?;
            Ok(())
        }
        Commands::History { command } => {
            tracing::info!("Starting history command");
            commands::history::handle_history(&config, command)?;
            Ok(())
        }
        Commands::Replay { id, turn } => {
            tracing::info!("Replaying recorded frames of conversation {}", id);
            commands::replay::run_replay(&config, &id, turn)?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose {
        "chatstream=debug"
    } else {
        "chatstream=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
