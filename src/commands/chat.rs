//! Interactive chat mode and one-shot prompts
//!
//! Both commands send messages through the conversation store and render
//! the assistant message as it grows by watching store snapshots.

use std::io::Write;

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::commands::special_commands::{parse_special_command, print_help, SpecialCommand};
use crate::commands::{open_store, resolve_conversation_id, short_id};
use crate::config::Config;
use crate::error::Result;
use crate::protocol::ConfirmationDecision;
use crate::store::{ChatStore, ConfirmationState, Conversation, Message, PendingTurn, StoreState};
use crate::transport::{ChatClient, StreamOutcome};

/// Start interactive chat mode
///
/// # Arguments
///
/// * `config` - Global configuration (consumed)
/// * `conversation` - Optional id (or unique prefix) of a saved conversation to resume
///
/// # Errors
///
/// Returns an error if the client or store cannot be created, or the
/// requested conversation does not exist.
pub async fn run_chat(config: Config, conversation: Option<String>) -> Result<()> {
    let client = ChatClient::from_config(&config.client)?;
    let store = open_store(&config)?;
    select_or_start(&store, conversation.as_deref())?;

    let mut rl = DefaultEditor::new()?;
    print_welcome_banner(&client);

    loop {
        let prompt = format!(
            "[{}] >> ",
            store
                .current_conversation_id()
                .as_deref()
                .map(short_id)
                .unwrap_or("-")
                .cyan()
        );
        match rl.readline(&prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(trimmed)?;

                let command = match parse_special_command(trimmed) {
                    Ok(command) => command,
                    Err(e) => {
                        println!("{}", e.to_string().red());
                        continue;
                    }
                };
                if command == SpecialCommand::Exit {
                    break;
                }
                if let Err(e) = handle_input(&store, &client, command, trimmed).await {
                    println!("{}", format!("Error: {}", e).red());
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                tracing::error!("Readline error: {:?}", err);
                break;
            }
        }
    }

    store.persist()?;
    Ok(())
}

/// Send a single prompt and print the answer
///
/// # Errors
///
/// Returns an error if the store cannot be opened, the conversation does not
/// exist, or the stream fails.
pub async fn run_ask(config: Config, prompt: String, conversation: Option<String>) -> Result<()> {
    let client = ChatClient::from_config(&config.client)?;
    let store = open_store(&config)?;
    select_or_start(&store, conversation.as_deref())?;

    let turn = store.send_message(&prompt, &client, None)?;
    let outcome = render_turn(&store, turn).await;
    store.persist()?;

    match outcome {
        StreamOutcome::Failed => {
            anyhow::bail!("The answer stream failed; the error was recorded in the conversation")
        }
        StreamOutcome::Completed | StreamOutcome::Cancelled => Ok(()),
    }
}

fn select_or_start(store: &ChatStore, conversation: Option<&str>) -> Result<()> {
    match conversation {
        Some(id) => {
            let id = resolve_conversation_id(&store.snapshot(), id)?;
            store.select_conversation(&id)?;
            tracing::info!("Resuming conversation {}", id);
        }
        None => {
            store.new_conversation();
        }
    }
    Ok(())
}

async fn handle_input(
    store: &ChatStore,
    client: &ChatClient,
    command: SpecialCommand,
    input: &str,
) -> Result<()> {
    match command {
        SpecialCommand::None => {
            let turn = store.send_message(input, client, None)?;
            render_turn(store, turn).await;
        }
        SpecialCommand::New => {
            let id = store.new_conversation();
            println!("Started conversation {}\n", short_id(&id).cyan());
        }
        SpecialCommand::Stop => {
            if let Some(id) = store.current_conversation_id() {
                store.stop_answering(&id)?;
            }
        }
        SpecialCommand::List => print_conversations(&store.snapshot()),
        SpecialCommand::Switch(id) => {
            let id = resolve_conversation_id(&store.snapshot(), &id)?;
            store.select_conversation(&id)?;
            let snapshot = store.snapshot();
            if let Some(conversation) = snapshot.conversation(&id) {
                print_transcript(conversation);
            }
        }
        SpecialCommand::Delete(id) => {
            let id = resolve_conversation_id(&store.snapshot(), &id)?;
            store.delete_conversation(&id)?;
            println!("{}", format!("Deleted conversation {}", id).green());
        }
        SpecialCommand::Confirm {
            confirmation_id,
            confirmed,
        } => {
            let message_id = find_confirmation(&store.snapshot(), &confirmation_id)?;
            let decision = ConfirmationDecision::new(confirmation_id, confirmed);
            let turn = store.send_silent_confirmation(&message_id, &[decision], client)?;
            render_turn(store, turn).await;
        }
        SpecialCommand::Help => print_help(),
        SpecialCommand::Exit => {}
    }
    Ok(())
}

fn find_confirmation(state: &StoreState, confirmation_id: &str) -> Result<String> {
    state
        .current()
        .and_then(|c| {
            c.messages
                .iter()
                .rev()
                .find(|m| {
                    m.confirmation_states.get(confirmation_id) == Some(&ConfirmationState::Pending)
                })
        })
        .map(|m| m.id.clone())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No pending confirmation `{}` in the current conversation",
                confirmation_id
            )
        })
}

/// Print the assistant message of `turn` as it streams.
///
/// CTRL-C while streaming stops the answer.
async fn render_turn(store: &ChatStore, turn: PendingTurn) -> StreamOutcome {
    let PendingTurn {
        message_id, stream, ..
    } = turn;
    let mut rx = store.subscribe();
    let mut printed = 0;
    let mut stopping = false;

    let join = stream.join();
    tokio::pin!(join);

    let outcome = loop {
        tokio::select! {
            outcome = &mut join => break outcome,
            changed = rx.changed() => {
                if changed.is_err() {
                    break (&mut join).await;
                }
                let snapshot = rx.borrow_and_update().clone();
                print_delta(&snapshot, &message_id, &mut printed);
            }
            _ = tokio::signal::ctrl_c(), if !stopping => {
                stopping = true;
                let snapshot = store.snapshot();
                if let Some((conversation, _)) = snapshot.find_message(&message_id) {
                    if let Err(e) = store.stop_answering(&conversation.id) {
                        tracing::warn!("Failed to stop answer: {}", e);
                    }
                }
            }
        }
    };

    let snapshot = store.snapshot();
    print_delta(&snapshot, &message_id, &mut printed);
    println!();
    if let Some((conversation, message)) = snapshot.find_message(&message_id) {
        print_message_extras(conversation, message);
    }
    if outcome == StreamOutcome::Cancelled {
        println!("{}", "(answer stopped)".yellow());
    }
    println!();
    outcome
}

fn print_delta(state: &StoreState, message_id: &str, printed: &mut usize) {
    let Some((_, message)) = state.find_message(message_id) else {
        return;
    };
    let content = message.content.as_str();
    if content.len() < *printed || !content.is_char_boundary(*printed) {
        // The message was cleared or rewritten.
        println!();
        *printed = 0;
    }
    if content.len() > *printed {
        print!("{}", &content[*printed..]);
        let _ = std::io::stdout().flush();
        *printed = content.len();
    }
}

fn print_message_extras(conversation: &Conversation, message: &Message) {
    for (i, reference) in message.references.iter().enumerate() {
        let url = reference.url.as_deref().unwrap_or("");
        println!("  [{}] {} {}", i + 1, reference.title.bold(), url.dimmed());
    }
    for id in message.images.keys() {
        println!("  {} {}", "image:".dimmed(), id);
    }
    for task in &message.tasks {
        let status = task.status.as_deref().unwrap_or("pending");
        println!("  - [{}] {}", status.cyan(), task.description);
    }
    for (id, request) in &message.confirmation_requests {
        if message.confirmation_states.get(id) == Some(&ConfirmationState::Pending) {
            println!(
                "  {} {} wants to run {} {}",
                "confirm?".yellow().bold(),
                id,
                request.tool_name.bold(),
                request.arguments
            );
            println!("  Use {} to answer.", format!("/confirm {} yes|no", id).cyan());
        }
    }
    if let Some(followups) = &conversation.followup_messages {
        for followup in followups {
            println!("  {} {}", "suggested:".dimmed(), followup);
        }
    }
}

fn print_transcript(conversation: &Conversation) {
    println!();
    for message in &conversation.messages {
        let role = message.role.to_string();
        println!("{} {}", format!("{}:", role).bold(), message.content);
    }
    println!();
}

fn print_conversations(state: &StoreState) {
    let current = state.current_conversation.as_deref();
    for conversation in state.conversations_by_recency() {
        let marker = if Some(conversation.id.as_str()) == current {
            "*".green()
        } else {
            " ".normal()
        };
        println!(
            "{} {} ({} messages)",
            marker,
            conversation.id.cyan(),
            conversation.messages.len()
        );
    }
    println!();
}

fn print_welcome_banner(client: &ChatClient) {
    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║              chatstream Interactive Chat                     ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");
    println!("Server: {}\n", client.endpoint().as_str().cyan());
    println!("Type '/help' for available commands, 'exit' to quit\n");
}
