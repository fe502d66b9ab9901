use colored::Colorize;
use prettytable::{format, Table};

use crate::cli::HistoryCommand;
use crate::commands::{open_store, resolve_conversation_id, short_id};
use crate::config::Config;
use crate::error::Result;
use crate::protocol::Role;
use crate::store::{Conversation, StoreState};

/// Handle history commands
pub fn handle_history(config: &Config, command: HistoryCommand) -> Result<()> {
    let store = open_store(config)?;

    match command {
        HistoryCommand::List => {
            let snapshot = store.snapshot();
            let rows = history_rows(&snapshot);

            if rows.is_empty() {
                println!("{}", "No conversation history found.".yellow());
                return Ok(());
            }

            let mut table = Table::new();
            table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

            table.add_row(prettytable::row![
                "ID".bold(),
                "Title".bold(),
                "Messages".bold(),
                "Last Updated".bold()
            ]);

            for row in rows {
                table.add_row(prettytable::row![
                    short_id(&row.id).cyan(),
                    row.title,
                    row.message_count,
                    row.updated
                ]);
            }

            println!("\nConversation History:");
            table.printstd();
            println!();
            println!(
                "Use {} to resume a conversation.",
                "chatstream chat --conversation <ID>".cyan()
            );
            println!();
        }
        HistoryCommand::Delete { id } => {
            let id = resolve_conversation_id(&store.snapshot(), &id)?;
            store.delete_conversation(&id)?;
            store.persist()?;
            println!("{}", format!("Deleted conversation {}", id).green());
        }
    }

    Ok(())
}

struct HistoryRow {
    id: String,
    title: String,
    message_count: usize,
    updated: String,
}

fn history_rows(state: &StoreState) -> Vec<HistoryRow> {
    state
        .conversations_by_recency()
        .into_iter()
        .filter(|c| !c.messages.is_empty())
        .map(|c| HistoryRow {
            id: c.id.clone(),
            title: title_of(c),
            message_count: c.messages.len(),
            updated: c.updated_at.format("%Y-%m-%d %H:%M").to_string(),
        })
        .collect()
}

/// Summary if the server sent one, otherwise the first user message.
fn title_of(conversation: &Conversation) -> String {
    let title = conversation
        .summary
        .clone()
        .or_else(|| {
            conversation
                .messages
                .iter()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
        })
        .unwrap_or_else(|| "-".to_string());
    let title = title.lines().next().unwrap_or_default().to_string();

    if title.chars().count() > 40 {
        format!("{}...", title.chars().take(37).collect::<String>())
    } else {
        title
    }
}
