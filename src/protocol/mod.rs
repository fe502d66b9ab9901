//! Wire protocol types for the streaming chat endpoint
//!
//! - [`events`]: the `{type, content}` frames received on the stream
//! - [`request`]: the JSON body sent with each streaming request

pub mod events;
pub mod request;

pub use events::{
    ChatEvent, ChunkedContent, ConfirmationRequest, Image, LiveUpdate, LiveUpdateContent,
    LiveUpdateType, RawFrame, Reference, ServerState, Task,
};
pub use request::{ChatRequest, ConfirmationDecision, HistoryEntry, Role};
