/*!
Command handlers for the CLI

This module provides the handlers invoked by the CLI entrypoint:

- `chat`     - Interactive chat session and the one-shot `ask` command
- `history`  - List and delete saved conversations
- `replay`   - Print the recorded event frames of a conversation

The handlers open the conversation store through [`open_store`] so every
command sees the same saved history.
*/

use std::sync::Arc;

use crate::config::Config;
use crate::dispatch::EventRegistry;
use crate::error::{ChatError, Result};
use crate::persistence::SledPersistence;
use crate::store::{ChatStore, StoreState};

pub mod chat;
pub mod history;
pub mod replay;
pub mod special_commands;

/// Open the sled-backed conversation store and load saved history.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or the saved history
/// cannot be decoded.
pub fn open_store(config: &Config) -> Result<ChatStore> {
    let persistence = SledPersistence::open_or_default(config.store.history_path.as_deref())?;
    let store = ChatStore::new(
        config.store.clone(),
        EventRegistry::new(),
        Some(Arc::new(persistence)),
    );
    store.hydrate()?;
    Ok(store)
}

/// Resolve a full conversation id from an exact id or a unique prefix.
///
/// # Errors
///
/// Returns `ChatError::ConversationNotFound` when nothing matches or the
/// prefix is ambiguous.
///
/// # Examples
///
/// ```
/// use chatstream::commands::resolve_conversation_id;
/// use chatstream::store::StoreState;
///
/// let state = StoreState::default();
/// assert!(resolve_conversation_id(&state, "abc").is_err());
/// ```
pub fn resolve_conversation_id(state: &StoreState, id_or_prefix: &str) -> Result<String> {
    if state.conversations.contains_key(id_or_prefix) {
        return Ok(id_or_prefix.to_string());
    }

    let mut matches = state
        .conversations
        .keys()
        .filter(|id| id.starts_with(id_or_prefix));
    match (matches.next(), matches.next()) {
        (Some(id), None) if !id_or_prefix.is_empty() => Ok(id.clone()),
        (Some(_), Some(_)) => Err(ChatError::ConversationNotFound(format!(
            "{} (ambiguous prefix)",
            id_or_prefix
        ))
        .into()),
        _ => Err(ChatError::ConversationNotFound(id_or_prefix.to_string()).into()),
    }
}

/// Shorten an id for display.
pub(crate) fn short_id(id: &str) -> &str {
    match id.char_indices().nth(12) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}
