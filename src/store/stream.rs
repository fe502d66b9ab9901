//! Stream handler that feeds one assistant turn into the store

use async_trait::async_trait;
use uuid::Uuid;

use crate::chunks::ChunkReassembler;
use crate::error::{ChatError, Result};
use crate::protocol::{ChatEvent, RawFrame};
use crate::store::ChatStore;
use crate::transport::StreamHandler;

/// Applies frames of one stream to the conversation that started it.
///
/// Frames are dropped once the conversation has moved on to another stream
/// or has been deleted.
pub(crate) struct ConversationStream {
    store: ChatStore,
    conversation_id: String,
    message_id: String,
    stream_id: Uuid,
    reassembler: ChunkReassembler,
}

impl ConversationStream {
    pub(crate) fn new(
        store: ChatStore,
        conversation_id: String,
        message_id: String,
        stream_id: Uuid,
    ) -> Self {
        Self {
            store,
            conversation_id,
            message_id,
            stream_id,
            reassembler: ChunkReassembler::default(),
        }
    }

    fn apply(&mut self, frame: RawFrame, event: &ChatEvent) -> Result<()> {
        if let Some(id) = self.store.apply_stream_event(
            &self.conversation_id,
            &self.message_id,
            self.stream_id,
            frame,
            event,
        )? {
            self.conversation_id = id;
        }
        Ok(())
    }
}

#[async_trait]
impl StreamHandler for ConversationStream {
    async fn on_message(&mut self, frame: RawFrame, event: ChatEvent) -> Result<()> {
        match event {
            // Only the assembled payload is logged.
            ChatEvent::ChunkedContent(chunk) => match self.reassembler.ingest(chunk)? {
                Some(composite) => self.apply(composite.to_raw(), &composite),
                None => Ok(()),
            },
            event => self.apply(frame, &event),
        }
    }

    async fn on_error(&mut self, error: ChatError) {
        tracing::error!(
            "Stream for conversation `{}` failed: {}",
            self.conversation_id,
            error
        );
        let event = ChatEvent::Text(error.to_string());
        if let Err(e) = self.apply(event.to_raw(), &event) {
            tracing::warn!("Could not record stream error: {}", e);
        }
        self.store
            .finish_stream(&self.conversation_id, self.stream_id);
    }

    async fn on_close(&mut self) {
        if !self.reassembler.is_empty() {
            tracing::warn!(
                "Stream closed with incomplete chunked content: {:?}",
                self.reassembler.pending_ids()
            );
        }
        self.store
            .finish_stream(&self.conversation_id, self.stream_id);
    }
}
