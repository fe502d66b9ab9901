//! Handlers for the built-in event tags
//!
//! Each handler is a plain function over a mutable conversation draft.
//! Only `conversation_id` needs a second phase with access to the whole
//! store state, expressed as an [`AfterEffect`].

use crate::error::{ChatError, Result};
use crate::protocol::{
    ChatEvent, ConfirmationRequest, Image, LiveUpdate, Reference, ServerState, Task,
};
use crate::store::{ConfirmationState, Conversation, Message, StoreState};

/// Store-level work left over after a built-in handler ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AfterEffect {
    /// Re-key a temporary conversation under its server-assigned id.
    PromoteConversation {
        /// Temporary id.
        from: String,
        /// Server id.
        to: String,
    },
}

/// Apply a built-in event to `conversation`.
///
/// # Errors
///
/// Returns [`ChatError::MessageNotFound`] when a message-level event targets
/// a message that does not exist.
pub(crate) fn apply(
    event: &ChatEvent,
    conversation: &mut Conversation,
    message_id: &str,
) -> Result<Option<AfterEffect>> {
    match event {
        ChatEvent::Text(delta) => append_text(conversation.message_mut(message_id)?, delta),
        ChatEvent::Error(text) => append_text(conversation.message_mut(message_id)?, text),
        ChatEvent::Reference(reference) => {
            add_reference(conversation.message_mut(message_id)?, reference)
        }
        ChatEvent::MessageId(id) => set_server_id(conversation.message_mut(message_id)?, id),
        ChatEvent::ConversationId(id) => return Ok(promote_conversation(conversation, id)),
        ChatEvent::StateUpdate(state) => set_server_state(conversation, state),
        ChatEvent::FollowupMessages(messages) => {
            conversation.followup_messages = Some(messages.clone())
        }
        ChatEvent::LiveUpdate(update) => {
            upsert_live_update(conversation.message_mut(message_id)?, update)
        }
        ChatEvent::Image(image) => add_image(conversation.message_mut(message_id)?, image),
        ChatEvent::ChunkedContent(chunk) => {
            tracing::warn!(
                "Chunk {} of content `{}` reached dispatch without reassembly; ignoring",
                chunk.chunk_index,
                chunk.id
            );
        }
        ChatEvent::ClearMessage => conversation.message_mut(message_id)?.content.clear(),
        ChatEvent::Usage(usage) => conversation.message_mut(message_id)?.usage = Some(usage.clone()),
        ChatEvent::PlanItem(task) => upsert_task(conversation.message_mut(message_id)?, task),
        ChatEvent::ConversationSummary(summary) => conversation.summary = Some(summary.clone()),
        ChatEvent::ConfirmationRequest(request) => {
            add_confirmation_request(conversation.message_mut(message_id)?, request)
        }
        ChatEvent::Custom { kind, .. } => {
            return Err(ChatError::Registry(format!("`{}` is not a built-in tag", kind)).into())
        }
    }
    Ok(None)
}

fn append_text(message: &mut Message, delta: &str) {
    if message.has_confirmation_break && !delta.is_empty() {
        if !message.content.is_empty() {
            message.content.push_str("\n\n");
        }
        message.has_confirmation_break = false;
    }
    message.content.push_str(delta);
}

fn add_reference(message: &mut Message, reference: &Reference) {
    message.references.push(reference.clone());
}

fn set_server_id(message: &mut Message, id: &str) {
    message.server_id = Some(id.to_string());
}

fn promote_conversation(conversation: &Conversation, id: &str) -> Option<AfterEffect> {
    if conversation.id == id {
        return None;
    }
    if !conversation.is_temporary() {
        tracing::warn!(
            "Ignoring conversation id `{}` for already assigned conversation `{}`",
            id,
            conversation.id
        );
        return None;
    }
    Some(AfterEffect::PromoteConversation {
        from: conversation.id.clone(),
        to: id.to_string(),
    })
}

fn set_server_state(conversation: &mut Conversation, state: &ServerState) {
    conversation.server_state = Some(state.clone());
}

fn upsert_live_update(message: &mut Message, update: &LiveUpdate) {
    message
        .live_updates
        .insert(update.update_id.clone(), update.clone());
}

fn add_image(message: &mut Message, image: &Image) {
    message.images.insert(image.id.clone(), image.url.clone());
}

fn upsert_task(message: &mut Message, task: &Task) {
    match message.tasks.iter_mut().find(|t| t.id == task.id) {
        Some(existing) => *existing = task.clone(),
        None => message.tasks.push(task.clone()),
    }
}

fn add_confirmation_request(message: &mut Message, request: &ConfirmationRequest) {
    let id = request.confirmation_id.clone();
    message
        .confirmation_requests
        .insert(id.clone(), request.clone());
    message
        .confirmation_states
        .insert(id, ConfirmationState::Pending);
}

/// Run an after-effect against the whole state.
///
/// # Returns
///
/// The id under which the conversation is now stored.
pub(crate) fn apply_after(effect: AfterEffect, state: &mut StoreState) -> String {
    match effect {
        AfterEffect::PromoteConversation { from, to } => {
            let Some(mut conversation) = state.conversations.remove(&from) else {
                return to;
            };
            std::sync::Arc::make_mut(&mut conversation).id = to.clone();
            if let Some(replaced) = state.conversations.insert(to.clone(), conversation) {
                tracing::warn!("Conversation `{}` already exists; replacing it", to);
                if let Some(stream) = &replaced.active_stream {
                    stream.token.cancel();
                }
            }
            if state.current_conversation.as_deref() == Some(from.as_str()) {
                state.current_conversation = Some(to.clone());
            }
            tracing::info!("Conversation `{}` promoted to `{}`", from, to);
            to
        }
    }
}
