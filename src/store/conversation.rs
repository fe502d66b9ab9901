//! Conversation and message records
//!
//! These are the values held in a [`StoreState`](super::StoreState)
//! snapshot. Streaming fields (`is_loading`, `active_stream`) are transient
//! and never serialized.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ChatError;
use crate::protocol::{
    ConfirmationRequest, HistoryEntry, LiveUpdate, RawFrame, Reference, Role, ServerState, Task,
};

/// Prefix of locally generated conversation ids.
pub const TEMPORARY_ID_PREFIX: &str = "temp-";

/// Generate a fresh temporary conversation id.
pub fn new_temporary_id() -> String {
    format!("{}{}", TEMPORARY_ID_PREFIX, Uuid::new_v4())
}

/// Whether `id` is a locally generated placeholder.
pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMPORARY_ID_PREFIX)
}

/// User decision on a confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationState {
    /// Awaiting a decision.
    Pending,
    /// Approved.
    Confirmed,
    /// Rejected.
    Declined,
    /// Left undecided when other requests of the same message were answered.
    Skipped,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Local id, unique within the conversation.
    pub id: String,
    /// Author.
    pub role: Role,
    /// Accumulated text.
    pub content: String,
    /// Id assigned by the server (`message_id` frame).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    /// Source references, in arrival order.
    #[serde(default)]
    pub references: Vec<Reference>,
    /// Live updates keyed by update id.
    #[serde(default)]
    pub live_updates: BTreeMap<String, LiveUpdate>,
    /// Image URLs keyed by image id.
    #[serde(default)]
    pub images: BTreeMap<String, String>,
    /// Confirmation requests keyed by confirmation id.
    #[serde(default)]
    pub confirmation_requests: BTreeMap<String, ConfirmationRequest>,
    /// Decision per confirmation id.
    #[serde(default)]
    pub confirmation_states: BTreeMap<String, ConfirmationState>,
    /// Usage statistics (opaque).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    /// Plan items, unique by id.
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// The next text delta must be preceded by a paragraph break.
    #[serde(default)]
    pub has_confirmation_break: bool,
}

impl Message {
    fn new(id: String, role: Role, content: String) -> Self {
        Self {
            id,
            role,
            content,
            server_id: None,
            references: Vec::new(),
            live_updates: BTreeMap::new(),
            images: BTreeMap::new(),
            confirmation_requests: BTreeMap::new(),
            confirmation_states: BTreeMap::new(),
            usage: None,
            tasks: Vec::new(),
            has_confirmation_break: false,
        }
    }

    /// Confirmation ids still awaiting a decision.
    pub fn pending_confirmations(&self) -> Vec<&str> {
        self.confirmation_states
            .iter()
            .filter(|(_, state)| **state == ConfirmationState::Pending)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Fields supplied when adding a message; the id is assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    /// Author.
    pub role: Role,
    /// Initial text.
    pub content: String,
}

impl NewMessage {
    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant message; empty content makes a streaming placeholder.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The stream currently feeding a conversation.
#[derive(Debug, Clone)]
pub struct ActiveStream {
    /// Identifies the stream so frames from a replaced stream can be dropped.
    pub id: Uuid,
    /// Cancellation signal shared with the read loop.
    pub token: CancellationToken,
}

/// One conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation id; temporary until the server assigns one.
    pub id: String,
    /// Messages in display order.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Id of the most recently added message.
    #[serde(default)]
    pub last_message_id: Option<String>,
    /// Suggested follow-up prompts from the last answer.
    #[serde(default)]
    pub followup_messages: Option<Vec<String>>,
    /// Server state echoed back with each request.
    #[serde(default)]
    pub server_state: Option<ServerState>,
    /// Per-conversation options sent as `user_settings`.
    #[serde(default)]
    pub chat_options: Option<Map<String, Value>>,
    /// Raw frames, one list per assistant turn.
    #[serde(default)]
    pub events_log: Vec<Vec<RawFrame>>,
    /// Latest server-provided summary.
    #[serde(default)]
    pub summary: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last message change.
    pub updated_at: DateTime<Utc>,
    /// A stream is in flight.
    #[serde(skip)]
    pub is_loading: bool,
    /// Handle of the in-flight stream.
    #[serde(skip)]
    pub active_stream: Option<ActiveStream>,
}

impl Conversation {
    /// Empty conversation with a temporary id.
    pub fn new_temporary() -> Self {
        Self::with_id(new_temporary_id())
    }

    /// Empty conversation with the given id.
    pub fn with_id(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            messages: Vec::new(),
            last_message_id: None,
            followup_messages: None,
            server_state: None,
            chat_options: None,
            events_log: Vec::new(),
            summary: None,
            created_at: now,
            updated_at: now,
            is_loading: false,
            active_stream: None,
        }
    }

    /// Whether the id is still a local placeholder.
    pub fn is_temporary(&self) -> bool {
        is_temporary_id(&self.id)
    }

    /// Look up a message by id.
    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    /// Look up a message by id for mutation.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::MessageNotFound`] when absent.
    pub fn message_mut(&mut self, message_id: &str) -> Result<&mut Message, ChatError> {
        let conversation_id = &self.id;
        self.messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| ChatError::MessageNotFound {
                conversation_id: conversation_id.clone(),
                message_id: message_id.to_string(),
            })
    }

    /// Append a message and return its freshly assigned id.
    pub fn push_message(&mut self, message: NewMessage) -> String {
        let id = Uuid::new_v4().to_string();
        self.messages
            .push(Message::new(id.clone(), message.role, message.content));
        self.last_message_id = Some(id.clone());
        self.updated_at = Utc::now();
        id
    }

    /// Remove a message; `last_message_id` falls back to the message before it.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::MessageNotFound`] when absent.
    pub fn remove_message(&mut self, message_id: &str) -> Result<Message, ChatError> {
        let index = self
            .messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| ChatError::MessageNotFound {
                conversation_id: self.id.clone(),
                message_id: message_id.to_string(),
            })?;
        let removed = self.messages.remove(index);
        self.last_message_id = self.messages.last().map(|m| m.id.clone());
        self.updated_at = Utc::now();
        Ok(removed)
    }

    /// Request history built from the messages before `end` (exclusive).
    ///
    /// Only user and assistant messages are sent.
    pub fn history_until(&self, end: usize) -> Vec<HistoryEntry> {
        self.messages
            .iter()
            .take(end)
            .filter(|m| matches!(m.role, Role::User | Role::Assistant))
            .map(|m| HistoryEntry {
                role: m.role,
                content: m.content.clone(),
            })
            .collect()
    }

    /// Cancel and drop the in-flight stream, if any.
    pub fn cancel_stream(&mut self) {
        if let Some(stream) = self.active_stream.take() {
            stream.token.cancel();
        }
        self.is_loading = false;
    }

    /// Cancel any in-flight stream and install a new one.
    pub fn replace_stream(&mut self) -> ActiveStream {
        self.cancel_stream();
        let stream = ActiveStream {
            id: Uuid::new_v4(),
            token: CancellationToken::new(),
        };
        self.active_stream = Some(stream.clone());
        self.is_loading = true;
        stream
    }

    /// Whether `stream_id` is the stream currently feeding this conversation.
    pub fn owns_stream(&self, stream_id: Uuid) -> bool {
        self.active_stream.as_ref().map(|s| s.id) == Some(stream_id)
    }
}
