//! Command-line interface definition for chatstream
//!
//! This module defines the CLI structure using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// chatstream - streaming chat client
///
/// Talk to a streaming chat endpoint, keep several conversations side by
/// side, and inspect the saved history.
#[derive(Parser, Debug, Clone)]
#[command(name = "chatstream")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the directory of the conversation database
    #[arg(long, env = "CHATSTREAM_STORAGE_PATH")]
    pub storage_path: Option<PathBuf>,

    /// Override the chat server base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Resume a saved conversation by id
        #[arg(long)]
        conversation: Option<String>,
    },

    /// Send a single prompt and print the answer
    Ask {
        /// Prompt text
        #[arg(short, long)]
        prompt: String,

        /// Continue a saved conversation instead of starting a new one
        #[arg(long)]
        conversation: Option<String>,
    },

    /// Manage saved conversations
    History {
        /// History subcommand
        #[command(subcommand)]
        command: HistoryCommand,
    },

    /// Print the recorded event frames of a saved conversation
    Replay {
        /// Conversation id
        id: String,

        /// Only show the given assistant turn (0-based)
        #[arg(long)]
        turn: Option<usize>,
    },
}

/// History subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum HistoryCommand {
    /// List saved conversations
    List,

    /// Delete a saved conversation
    Delete {
        /// Conversation id
        id: String,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
