//! Special commands parser for interactive chat mode
//!
//! Commands are prefixed with `/` and are case-insensitive; their arguments
//! (conversation and confirmation ids) keep their case. Anything else typed
//! at the prompt is sent to the chat server.

use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command was given an unsupported argument
    #[error("Unsupported argument for {command}: {arg}\n\nType '/help' to see valid usage")]
    UnsupportedArgument { command: String, arg: String },

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Special commands that can be executed during interactive chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Start a new conversation
    New,

    /// Stop the answer of the current conversation
    Stop,

    /// List conversations
    List,

    /// Select a conversation by id or unique id prefix
    Switch(String),

    /// Delete a conversation by id or unique id prefix
    Delete(String),

    /// Answer a tool confirmation request
    Confirm {
        /// Confirmation id from the request
        confirmation_id: String,
        /// Approve (`true`) or decline (`false`)
        confirmed: bool,
    },

    /// Display help information
    Help,

    /// Exit the interactive session
    Exit,

    /// Not a special command; send the input as a message
    None,
}

/// Parse a user input string into a special command
///
/// # Arguments
///
/// * `input` - The user input string to parse
///
/// # Returns
///
/// Returns Ok(SpecialCommand) for valid commands or SpecialCommand::None for non-commands.
///
/// # Errors
///
/// Returns CommandError::UnknownCommand if input starts with "/" but is not a valid command.
/// Returns CommandError::UnsupportedArgument if a command receives an invalid argument.
/// Returns CommandError::MissingArgument if a command requires an argument but none was provided.
///
/// # Examples
///
/// ```
/// use chatstream::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// assert_eq!(parse_special_command("/new").unwrap(), SpecialCommand::New);
/// assert_eq!(
///     parse_special_command("/switch conv-AB").unwrap(),
///     SpecialCommand::Switch("conv-AB".to_string())
/// );
/// assert_eq!(parse_special_command("hello").unwrap(), SpecialCommand::None);
/// assert!(parse_special_command("/foo").is_err());
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if !trimmed.starts_with('/') && lower != "exit" && lower != "quit" {
        return Ok(SpecialCommand::None);
    }

    let mut parts = trimmed.split_whitespace();
    let command = parts.next().unwrap_or_default().to_lowercase();
    let args: Vec<&str> = parts.collect();

    match command.as_str() {
        "exit" | "quit" | "/exit" | "/quit" => Ok(SpecialCommand::Exit),
        "/new" => Ok(SpecialCommand::New),
        "/stop" => Ok(SpecialCommand::Stop),
        "/list" | "/ls" => Ok(SpecialCommand::List),
        "/help" | "/?" => Ok(SpecialCommand::Help),
        "/switch" => single_argument("/switch", "/switch <conversation_id>", &args)
            .map(SpecialCommand::Switch),
        "/delete" => single_argument("/delete", "/delete <conversation_id>", &args)
            .map(SpecialCommand::Delete),
        "/confirm" => parse_confirm(&args),
        other => Err(CommandError::UnknownCommand(other.to_string())),
    }
}

fn single_argument(command: &str, usage: &str, args: &[&str]) -> Result<String, CommandError> {
    match args {
        [] => Err(CommandError::MissingArgument {
            command: command.to_string(),
            usage: usage.to_string(),
        }),
        [id] => Ok((*id).to_string()),
        [_, extra, ..] => Err(CommandError::UnsupportedArgument {
            command: command.to_string(),
            arg: (*extra).to_string(),
        }),
    }
}

fn parse_confirm(args: &[&str]) -> Result<SpecialCommand, CommandError> {
    const USAGE: &str = "/confirm <confirmation_id> <yes|no>";
    let (id, answer) = match args {
        [id, answer] => (*id, *answer),
        [_, _, extra, ..] => {
            return Err(CommandError::UnsupportedArgument {
                command: "/confirm".to_string(),
                arg: (*extra).to_string(),
            })
        }
        _ => {
            return Err(CommandError::MissingArgument {
                command: "/confirm".to_string(),
                usage: USAGE.to_string(),
            })
        }
    };

    let confirmed = match answer.to_lowercase().as_str() {
        "yes" | "y" | "approve" => true,
        "no" | "n" | "decline" => false,
        other => {
            return Err(CommandError::UnsupportedArgument {
                command: "/confirm".to_string(),
                arg: other.to_string(),
            })
        }
    };

    Ok(SpecialCommand::Confirm {
        confirmation_id: id.to_string(),
        confirmed,
    })
}

/// Display help information for interactive chat mode
pub fn print_help() {
    println!(
        r#"
Special Commands for Interactive Chat Mode
===========================================

CONVERSATIONS:
  /new              - Start a new conversation
  /list             - List conversations (/ls also works)
  /switch <id>      - Switch to a conversation (unique id prefix is enough)
  /delete <id>      - Delete a conversation

ANSWERS:
  /stop             - Stop the current answer (CTRL-C while streaming also works)
  /confirm <id> yes - Approve a pending tool confirmation
  /confirm <id> no  - Decline a pending tool confirmation

SESSION CONTROL:
  /help             - Show this help message
  exit              - Exit interactive mode
  quit              - Same as exit

NOTES:
  - Commands are case-insensitive, ids are not
  - Regular text (not starting with /) is sent to the chat server
"#
    );
}
