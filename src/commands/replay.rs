//! Replay recorded event frames for debugging
//!
//! Every assistant turn of a conversation keeps the frames it received.
//! This command prints them in arrival order, one line per frame.

use colored::Colorize;

use crate::commands::{open_store, resolve_conversation_id};
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::protocol::RawFrame;
use crate::store::Conversation;

/// Run the replay command
///
/// # Arguments
///
/// * `config` - Global configuration
/// * `id` - Conversation id or unique id prefix
/// * `turn` - Only print this assistant turn (0-based)
///
/// # Returns
///
/// Returns Ok(()) on success, or an error if the conversation or turn does
/// not exist
pub fn run_replay(config: &Config, id: &str, turn: Option<usize>) -> Result<()> {
    let store = open_store(config)?;
    let snapshot = store.snapshot();
    let id = resolve_conversation_id(&snapshot, id)?;
    let conversation = snapshot
        .conversation(&id)
        .ok_or_else(|| ChatError::ConversationNotFound(id.clone()))?;

    for line in replay_lines(conversation, turn)? {
        println!("{}", line);
    }
    Ok(())
}

fn replay_lines(conversation: &Conversation, turn: Option<usize>) -> Result<Vec<String>> {
    let turns: Vec<(usize, &Vec<RawFrame>)> = match turn {
        Some(index) => {
            let frames = conversation.events_log.get(index).ok_or_else(|| {
                anyhow::anyhow!(
                    "Conversation {} has {} turns; turn {} does not exist",
                    conversation.id,
                    conversation.events_log.len(),
                    index
                )
            })?;
            vec![(index, frames)]
        }
        None => conversation.events_log.iter().enumerate().collect(),
    };

    let mut lines = vec![format!("Conversation {}", conversation.id.cyan())];
    if turns.is_empty() {
        lines.push("No recorded frames.".yellow().to_string());
    }
    for (index, frames) in turns {
        lines.push(format!(
            "{} ({} frames)",
            format!("Turn {}", index).bold(),
            frames.len()
        ));
        for frame in frames {
            lines.push(format!("  {:<22} {}", frame.kind.green(), frame.content));
        }
    }
    Ok(lines)
}
