//! Event dispatch
//!
//! [`EventRegistry`] routes each decoded [`ChatEvent`] to the code that
//! applies it to the store state. Built-in tags are handled by an exhaustive
//! `match` in [`builtin`]; applications extend the protocol by registering an
//! [`EventHandler`] for their own tags.
//!
//! A handler runs in two phases:
//!
//! 1. `handle` mutates a draft of the target conversation and may return an
//!    auxiliary value.
//! 2. `after` receives that value together with the whole state, for updates
//!    that span conversations (the built-in `conversation_id` promotion is
//!    the canonical case).

pub mod builtin;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{ChatError, Result};
use crate::protocol::events::is_builtin_tag;
use crate::protocol::ChatEvent;
use crate::store::{Conversation, StoreState};

/// Identifies what a frame is being applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchContext<'a> {
    /// Conversation the stream belongs to.
    pub conversation_id: &'a str,
    /// Assistant message being streamed into.
    pub message_id: &'a str,
}

/// Result of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Id of the target conversation after dispatch; differs from the
    /// context id when the conversation was promoted.
    pub conversation_id: String,
    /// Whether any handler ran.
    pub handled: bool,
}

/// Application-defined handler for a custom event tag.
///
/// # Examples
///
/// ```
/// use chatstream::dispatch::{DispatchContext, EventHandler};
/// use chatstream::store::Conversation;
/// use serde_json::Value;
///
/// struct Mood;
///
/// impl EventHandler for Mood {
///     fn handle(
///         &self,
///         content: &Value,
///         conversation: &mut Conversation,
///         _ctx: &DispatchContext<'_>,
///     ) -> Option<Value> {
///         conversation.summary = content.as_str().map(str::to_string);
///         None
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Apply the payload to the target conversation.
    ///
    /// # Returns
    ///
    /// An optional value handed to [`EventHandler::after`].
    fn handle(
        &self,
        content: &Value,
        conversation: &mut Conversation,
        ctx: &DispatchContext<'_>,
    ) -> Option<Value>;

    /// Apply follow-up changes with access to the whole state.
    fn after(&self, _aux: Option<Value>, _state: &mut StoreState, _ctx: &DispatchContext<'_>) {}
}

/// Registry of custom event handlers plus the built-in dispatch.
///
/// Constructed explicitly and handed to the store; there is no global
/// registry.
#[derive(Default, Clone)]
pub struct EventRegistry {
    custom: HashMap<String, Arc<dyn EventHandler>>,
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.custom.keys().collect();
        kinds.sort();
        f.debug_struct("EventRegistry")
            .field("custom", &kinds)
            .finish()
    }
}

impl EventRegistry {
    /// Registry with only the built-in tags.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a custom tag, replacing any earlier one.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Registry`] if `kind` is a built-in tag or empty.
    pub fn register(&mut self, kind: impl Into<String>, handler: Arc<dyn EventHandler>) -> Result<()> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(ChatError::Registry("event tag must not be empty".to_string()).into());
        }
        if is_builtin_tag(&kind) {
            return Err(ChatError::Registry(format!(
                "`{}` is a built-in tag and cannot be overridden",
                kind
            ))
            .into());
        }
        if self.custom.insert(kind.clone(), handler).is_some() {
            tracing::debug!("Replaced handler for custom event `{}`", kind);
        }
        Ok(())
    }

    /// Whether a handler exists for `kind` (built-in or custom).
    pub fn is_registered(&self, kind: &str) -> bool {
        is_builtin_tag(kind) || self.custom.contains_key(kind)
    }

    /// Apply one event to `state`.
    ///
    /// Unregistered custom tags are logged and ignored.
    ///
    /// # Arguments
    ///
    /// * `event` - Decoded frame
    /// * `state` - Draft of the store state
    /// * `ctx` - Target conversation and message
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::ConversationNotFound`] or
    /// [`ChatError::MessageNotFound`] when the target does not exist.
    pub fn dispatch(
        &self,
        event: &ChatEvent,
        state: &mut StoreState,
        ctx: &DispatchContext<'_>,
    ) -> Result<DispatchOutcome> {
        let unchanged = || DispatchOutcome {
            conversation_id: ctx.conversation_id.to_string(),
            handled: false,
        };

        if let ChatEvent::Custom { kind, content } = event {
            let Some(handler) = self.custom.get(kind) else {
                tracing::warn!("No handler registered for event `{}`; ignoring", kind);
                return Ok(unchanged());
            };
            let conversation = state
                .conversation_mut(ctx.conversation_id)
                .ok_or_else(|| ChatError::ConversationNotFound(ctx.conversation_id.to_string()))?;
            let aux = handler.handle(content, conversation, ctx);
            handler.after(aux, state, ctx);
            let conversation_id = if state.conversations.contains_key(ctx.conversation_id) {
                ctx.conversation_id.to_string()
            } else {
                state
                    .current_conversation
                    .clone()
                    .unwrap_or_else(|| ctx.conversation_id.to_string())
            };
            return Ok(DispatchOutcome {
                conversation_id,
                handled: true,
            });
        }

        let conversation = state
            .conversation_mut(ctx.conversation_id)
            .ok_or_else(|| ChatError::ConversationNotFound(ctx.conversation_id.to_string()))?;
        let effect = builtin::apply(event, conversation, ctx.message_id)?;
        let conversation_id = match effect {
            Some(effect) => builtin::apply_after(effect, state),
            None => ctx.conversation_id.to_string(),
        };

        Ok(DispatchOutcome {
            conversation_id,
            handled: true,
        })
    }
}
