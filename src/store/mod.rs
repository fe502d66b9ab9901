//! Conversation store
//!
//! [`ChatStore`] owns every conversation and publishes immutable
//! [`StoreState`] snapshots through a `tokio::sync::watch` channel. Each
//! mutation clones the state shallowly (conversations are shared behind
//! `Arc`), edits the draft, and publishes the result, so a reader holding an
//! older snapshot never observes a partial update.
//!
//! Streams are started by [`ChatStore::send_message`] and
//! [`ChatStore::send_silent_confirmation`]. Each conversation carries at most
//! one active stream; starting another cancels the previous one.

pub mod conversation;
mod stream;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::dispatch::{DispatchContext, EventRegistry};
use crate::error::{ChatError, Result};
use crate::persistence::Persistence;
use crate::protocol::{ChatEvent, ChatRequest, ConfirmationDecision, HistoryEntry, RawFrame};
use crate::transport::{ChatClient, StreamHandle};

pub use conversation::{
    is_temporary_id, ActiveStream, ConfirmationState, Conversation, Message, NewMessage,
    TEMPORARY_ID_PREFIX,
};
use stream::ConversationStream;

/// An immutable view of every conversation.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    /// Conversations keyed by id.
    pub conversations: HashMap<String, Arc<Conversation>>,
    /// Selected conversation.
    pub current_conversation: Option<String>,
    /// Saved history has been loaded; persistence writes are enabled.
    pub hydrated: bool,
}

impl StoreState {
    /// Look up a conversation.
    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.get(id).map(Arc::as_ref)
    }

    /// Mutable access to a conversation, cloning it if a snapshot shares it.
    pub fn conversation_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.get_mut(id).map(Arc::make_mut)
    }

    /// The selected conversation.
    pub fn current(&self) -> Option<&Conversation> {
        self.current_conversation
            .as_deref()
            .and_then(|id| self.conversation(id))
    }

    /// Find a message in any conversation.
    pub fn find_message(&self, message_id: &str) -> Option<(&Conversation, &Message)> {
        self.conversations.values().find_map(|c| {
            c.message(message_id)
                .map(|message| (c.as_ref(), message))
        })
    }

    /// Conversations ordered by last update, newest first.
    pub fn conversations_by_recency(&self) -> Vec<&Conversation> {
        let mut list: Vec<&Conversation> = self.conversations.values().map(Arc::as_ref).collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        list
    }

    fn insert_fresh(&mut self) -> String {
        let conversation = Conversation::new_temporary();
        let id = conversation.id.clone();
        self.conversations.insert(id.clone(), Arc::new(conversation));
        self.current_conversation = Some(id.clone());
        id
    }

    fn current_or_fresh(&mut self) -> String {
        match self.current_conversation.clone() {
            Some(id) if self.conversations.contains_key(&id) => id,
            _ => self.insert_fresh(),
        }
    }
}

/// Serialized form of the store.
#[derive(Debug, Serialize, Deserialize)]
struct SavedStore {
    conversations: Vec<Conversation>,
    #[serde(default)]
    current_conversation: Option<String>,
}

/// A streaming turn started by the store.
#[derive(Debug)]
pub struct PendingTurn {
    /// Conversation id at the time the turn started.
    pub conversation_id: String,
    /// Assistant message receiving the stream.
    pub message_id: String,
    /// Handle of the stream task.
    pub stream: StreamHandle,
}

struct Inner {
    state: watch::Sender<Arc<StoreState>>,
    registry: EventRegistry,
    persistence: Option<Arc<dyn Persistence>>,
    config: StoreConfig,
}

/// Shared handle to the conversation store. Cheap to clone.
///
/// # Examples
///
/// ```
/// use chatstream::store::{ChatStore, NewMessage};
///
/// # fn main() -> chatstream::error::Result<()> {
/// let store = ChatStore::in_memory();
/// let id = store.new_conversation();
/// store.add_message(&id, NewMessage::user("hello"))?;
/// assert_eq!(store.snapshot().conversation(&id).unwrap().messages.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ChatStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ChatStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStore")
            .field("registry", &self.inner.registry)
            .field("persistent", &self.inner.persistence.is_some())
            .finish()
    }
}

impl ChatStore {
    /// Create an empty store.
    ///
    /// # Arguments
    ///
    /// * `config` - Storage key and timezone
    /// * `registry` - Event handlers used for every stream
    /// * `persistence` - Optional backend; writes start after [`ChatStore::hydrate`]
    pub fn new(
        config: StoreConfig,
        registry: EventRegistry,
        persistence: Option<Arc<dyn Persistence>>,
    ) -> Self {
        let (state, _) = watch::channel(Arc::new(StoreState::default()));
        Self {
            inner: Arc::new(Inner {
                state,
                registry,
                persistence,
                config,
            }),
        }
    }

    /// Store with default settings, built-in handlers, and no persistence.
    pub fn in_memory() -> Self {
        Self::new(StoreConfig::default(), EventRegistry::new(), None)
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<StoreState> {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreState>> {
        self.inner.state.subscribe()
    }

    /// Id of the selected conversation.
    pub fn current_conversation_id(&self) -> Option<String> {
        self.inner.state.borrow().current_conversation.clone()
    }

    /// Apply `f` to a draft of the state and publish the result.
    fn update<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> R {
        let mut output = None;
        self.inner.state.send_modify(|snapshot| {
            output = Some(f(Arc::make_mut(snapshot)));
        });
        // send_modify always invokes the closure exactly once.
        output.expect("send_modify runs the closure")
    }

    /// Load saved conversations and enable persistence.
    ///
    /// Conversations already in memory win over saved ones with the same id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or the saved blob is
    /// not valid. The store stays unhydrated in that case.
    pub fn hydrate(&self) -> Result<()> {
        let saved = match &self.inner.persistence {
            Some(persistence) => persistence.load(&self.inner.config.storage_key)?,
            None => None,
        };
        let saved: Option<SavedStore> = saved
            .map(|blob| serde_json::from_slice(&blob))
            .transpose()
            .map_err(|e| ChatError::Storage(format!("Saved history is corrupt: {}", e)))?;

        let loaded = self.update(|state| {
            let mut loaded = 0;
            if let Some(saved) = saved {
                for mut conversation in saved.conversations {
                    conversation.is_loading = false;
                    conversation.active_stream = None;
                    if !state.conversations.contains_key(&conversation.id) {
                        state
                            .conversations
                            .insert(conversation.id.clone(), Arc::new(conversation));
                        loaded += 1;
                    }
                }
                if state.current_conversation.is_none() {
                    state.current_conversation = saved
                        .current_conversation
                        .filter(|id| state.conversations.contains_key(id));
                }
            }
            state.hydrated = true;
            loaded
        });

        tracing::info!("Hydrated {} saved conversations", loaded);
        Ok(())
    }

    /// Write the current state to the backend.
    ///
    /// Empty temporary conversations are not saved.
    ///
    /// # Returns
    ///
    /// `false` if nothing was written (no backend, or not yet hydrated).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the backend write fails.
    pub fn persist(&self) -> Result<bool> {
        let Some(persistence) = &self.inner.persistence else {
            return Ok(false);
        };
        let snapshot = self.snapshot();
        if !snapshot.hydrated {
            tracing::debug!("Skipping persist before hydration");
            return Ok(false);
        }

        let saved = SavedStore {
            conversations: snapshot
                .conversations_by_recency()
                .into_iter()
                .filter(|c| !(c.is_temporary() && c.messages.is_empty()))
                .cloned()
                .collect(),
            current_conversation: snapshot.current_conversation.clone(),
        };
        let blob = serde_json::to_vec(&saved)?;
        persistence.save(&self.inner.config.storage_key, &blob)?;
        tracing::debug!("Persisted {} conversations", saved.conversations.len());
        Ok(true)
    }

    fn persist_quietly(&self) {
        if let Err(e) = self.persist() {
            tracing::warn!("Failed to persist conversations: {}", e);
        }
    }

    /// Create and select an empty conversation.
    ///
    /// Other temporary conversations without an in-flight stream are
    /// discarded.
    pub fn new_conversation(&self) -> String {
        let id = self.update(|state| {
            let before = state.conversations.len();
            state
                .conversations
                .retain(|_, c| !(c.is_temporary() && c.active_stream.is_none()));
            let removed = before - state.conversations.len();
            if removed > 0 {
                tracing::debug!("Discarded {} temporary conversations", removed);
            }
            state.insert_fresh()
        });
        self.persist_quietly();
        id
    }

    /// Select an existing conversation.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::ConversationNotFound`] if `id` does not exist.
    pub fn select_conversation(&self, id: &str) -> Result<()> {
        self.update(|state| {
            if !state.conversations.contains_key(id) {
                return Err(ChatError::ConversationNotFound(id.to_string()));
            }
            state.current_conversation = Some(id.to_string());
            Ok(())
        })?;
        self.persist_quietly();
        Ok(())
    }

    /// Delete a conversation, cancelling its stream first.
    ///
    /// When the deleted conversation was selected, the most recently
    /// updated remaining one is selected, or a fresh one is created.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::ConversationNotFound`] if `id` does not exist.
    pub fn delete_conversation(&self, id: &str) -> Result<()> {
        self.update(|state| {
            let Some(removed) = state.conversations.remove(id) else {
                return Err(ChatError::ConversationNotFound(id.to_string()));
            };
            if let Some(stream) = &removed.active_stream {
                stream.token.cancel();
            }
            if state.current_conversation.as_deref() == Some(id) {
                let next = state
                    .conversations_by_recency()
                    .first()
                    .map(|c| c.id.clone());
                match next {
                    Some(next) => state.current_conversation = Some(next),
                    None => {
                        state.insert_fresh();
                    }
                }
            }
            Ok(())
        })?;
        tracing::info!("Deleted conversation `{}`", id);
        self.persist_quietly();
        Ok(())
    }

    /// Append a message to a conversation.
    ///
    /// # Returns
    ///
    /// The id assigned to the new message.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::ConversationNotFound`] if the conversation does
    /// not exist.
    pub fn add_message(&self, conversation_id: &str, message: NewMessage) -> Result<String> {
        let id = self.update(|state| {
            state
                .conversation_mut(conversation_id)
                .map(|c| c.push_message(message))
                .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))
        })?;
        self.persist_quietly();
        Ok(id)
    }

    /// Remove a message from a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::ConversationNotFound`] or
    /// [`ChatError::MessageNotFound`] when the target does not exist.
    pub fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        self.update(|state| {
            let conversation = state
                .conversation_mut(conversation_id)
                .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?;
            conversation.remove_message(message_id).map(|_| ())
        })?;
        self.persist_quietly();
        Ok(())
    }

    /// Cancel the in-flight stream of a conversation and clear its loading
    /// state. A no-op when nothing is streaming.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::ConversationNotFound`] if the conversation does
    /// not exist.
    pub fn stop_answering(&self, conversation_id: &str) -> Result<()> {
        self.update(|state| {
            let conversation = state
                .conversation_mut(conversation_id)
                .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?;
            if conversation.active_stream.is_some() {
                tracing::info!("Stopping answer in conversation `{}`", conversation_id);
            }
            conversation.cancel_stream();
            Ok::<_, ChatError>(())
        })?;
        self.persist_quietly();
        Ok(())
    }

    /// Replace the options sent as `user_settings` with each request.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::ConversationNotFound`] if the conversation does
    /// not exist.
    pub fn set_chat_options(
        &self,
        conversation_id: &str,
        options: Option<Map<String, Value>>,
    ) -> Result<()> {
        self.update(|state| {
            let conversation = state
                .conversation_mut(conversation_id)
                .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?;
            conversation.chat_options = options;
            Ok::<_, ChatError>(())
        })?;
        self.persist_quietly();
        Ok(())
    }

    /// Send a user message in the selected conversation and stream the
    /// answer into a new assistant message.
    ///
    /// A conversation is created if none is selected. Any stream already
    /// running in the conversation is cancelled. Must be called from within
    /// a Tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `text` - User message
    /// * `client` - Transport used for the request
    /// * `extra_context` - Entries merged last into the request context
    ///
    /// # Errors
    ///
    /// Only store invariant violations are returned; transport failures are
    /// written into the assistant message.
    pub fn send_message(
        &self,
        text: &str,
        client: &ChatClient,
        extra_context: Option<Map<String, Value>>,
    ) -> Result<PendingTurn> {
        let prepared = self.update(|state| {
            let conversation_id = state.current_or_fresh();
            let conversation = state
                .conversation_mut(&conversation_id)
                .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.clone()))?;

            let history = conversation.history_until(conversation.messages.len());
            conversation.push_message(NewMessage::user(text));
            let message_id = conversation.push_message(NewMessage::assistant(""));
            conversation.followup_messages = None;
            conversation.events_log.push(Vec::new());

            let context = self.request_context(conversation, extra_context);
            let stream = conversation.replace_stream();

            Ok::<_, ChatError>(Prepared {
                conversation_id,
                message_id,
                stream,
                request: ChatRequest {
                    message: text.to_string(),
                    history,
                    context,
                },
            })
        })?;

        tracing::info!(
            "Sending message in conversation `{}`",
            prepared.conversation_id
        );
        Ok(self.start(prepared, client))
    }

    /// Answer confirmation requests of an assistant message and resume the
    /// answer in the same message.
    ///
    /// Decided requests become confirmed or declined; any other pending
    /// request of the message becomes skipped. The request carries an empty
    /// message, the history before the confirmed message, and the decisions
    /// as `confirmed_tools` in the context.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::ConversationNotFound`] if no conversation is
    /// selected, or [`ChatError::MessageNotFound`] if the message is not in
    /// it. The store is left unchanged in both cases.
    pub fn send_silent_confirmation(
        &self,
        message_id: &str,
        decisions: &[ConfirmationDecision],
        client: &ChatClient,
    ) -> Result<PendingTurn> {
        let prepared = self.update(|state| {
            let conversation_id = state
                .current()
                .map(|c| c.id.clone())
                .ok_or_else(|| ChatError::ConversationNotFound("no conversation selected".into()))?;
            let index = state
                .current()
                .and_then(|c| c.messages.iter().position(|m| m.id == message_id))
                .ok_or_else(|| ChatError::MessageNotFound {
                    conversation_id: conversation_id.clone(),
                    message_id: message_id.to_string(),
                })?;

            let conversation = state
                .conversation_mut(&conversation_id)
                .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.clone()))?;
            let history: Vec<HistoryEntry> = conversation.history_until(index);

            let message = &mut conversation.messages[index];
            for decision in decisions {
                if !message
                    .confirmation_requests
                    .contains_key(&decision.confirmation_id)
                {
                    tracing::warn!(
                        "Decision for unknown confirmation `{}`",
                        decision.confirmation_id
                    );
                }
                let decided = if decision.confirmed {
                    ConfirmationState::Confirmed
                } else {
                    ConfirmationState::Declined
                };
                message
                    .confirmation_states
                    .insert(decision.confirmation_id.clone(), decided);
            }
            for entry in message.confirmation_states.values_mut() {
                if *entry == ConfirmationState::Pending {
                    *entry = ConfirmationState::Skipped;
                }
            }
            message.has_confirmation_break = true;
            message.live_updates.clear();
            conversation.events_log.push(Vec::new());

            let mut context = self.request_context(conversation, None);
            context.insert(
                "confirmed_tools".to_string(),
                serde_json::to_value(decisions).unwrap_or_default(),
            );
            let stream = conversation.replace_stream();

            Ok::<_, ChatError>(Prepared {
                conversation_id,
                message_id: message_id.to_string(),
                stream,
                request: ChatRequest {
                    message: String::new(),
                    history,
                    context,
                },
            })
        })?;

        tracing::info!(
            "Sending {} confirmation decisions in conversation `{}`",
            decisions.len(),
            prepared.conversation_id
        );
        Ok(self.start(prepared, client))
    }

    fn request_context(
        &self,
        conversation: &Conversation,
        extra_context: Option<Map<String, Value>>,
    ) -> Map<String, Value> {
        let mut context = Map::new();
        if let Some(server_state) = &conversation.server_state {
            context.insert("state".to_string(), server_state.state.clone());
            context.insert(
                "signature".to_string(),
                Value::String(server_state.signature.clone()),
            );
        }
        if !conversation.is_temporary() {
            context.insert(
                "conversation_id".to_string(),
                Value::String(conversation.id.clone()),
            );
        }
        if let Some(options) = &conversation.chat_options {
            context.insert("user_settings".to_string(), Value::Object(options.clone()));
        }
        context.insert(
            "timezone".to_string(),
            Value::String(self.inner.config.timezone.clone()),
        );
        if let Some(extra) = extra_context {
            context.extend(extra);
        }
        context
    }

    fn start(&self, prepared: Prepared, client: &ChatClient) -> PendingTurn {
        let Prepared {
            conversation_id,
            message_id,
            stream,
            request,
        } = prepared;
        let handler = ConversationStream::new(
            self.clone(),
            conversation_id.clone(),
            message_id.clone(),
            stream.id,
        );
        let handle = client.open_stream(
            client.endpoint().clone(),
            request,
            handler,
            stream.token,
            HashMap::new(),
        );
        PendingTurn {
            conversation_id,
            message_id,
            stream: handle,
        }
    }

    /// Dispatch one frame of `stream_id`, then append `frame` to the
    /// current turn of the events log.
    ///
    /// # Returns
    ///
    /// The conversation id after dispatch, or `None` if the frame was
    /// dropped because the stream is no longer active.
    pub(crate) fn apply_stream_event(
        &self,
        conversation_id: &str,
        message_id: &str,
        stream_id: Uuid,
        frame: RawFrame,
        event: &ChatEvent,
    ) -> Result<Option<String>> {
        let registry = &self.inner.registry;
        self.update(|state| -> Result<Option<String>> {
            let Some(conversation) = state.conversation(conversation_id) else {
                tracing::debug!("Dropping frame for missing conversation `{}`", conversation_id);
                return Ok(None);
            };
            if !conversation.owns_stream(stream_id) {
                tracing::debug!("Dropping frame from superseded stream {}", stream_id);
                return Ok(None);
            }

            let outcome = registry.dispatch(
                event,
                state,
                &DispatchContext {
                    conversation_id,
                    message_id,
                },
            )?;

            if let Some(conversation) = state.conversation_mut(&outcome.conversation_id) {
                match conversation.events_log.last_mut() {
                    Some(turn) => turn.push(frame),
                    None => conversation.events_log.push(vec![frame]),
                }
            }
            Ok(Some(outcome.conversation_id))
        })
    }

    /// Clear the streaming state if `stream_id` is still active, then
    /// persist.
    pub(crate) fn finish_stream(&self, conversation_id: &str, stream_id: Uuid) {
        let finished = self.update(|state| match state.conversation_mut(conversation_id) {
            Some(conversation) if conversation.owns_stream(stream_id) => {
                conversation.active_stream = None;
                conversation.is_loading = false;
                true
            }
            _ => false,
        });
        if finished {
            tracing::debug!("Stream finished for conversation `{}`", conversation_id);
            self.persist_quietly();
        }
    }
}

struct Prepared {
    conversation_id: String,
    message_id: String,
    stream: ActiveStream,
    request: ChatRequest,
}
