//! Error types for chatstream
//!
//! This module defines all error types used throughout the crate,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for chatstream operations
///
/// Covers transport failures, frame decoding, chunk reassembly, store
/// invariant violations, persistence, and configuration.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The chat endpoint answered with a non-success status
    #[error("Chat endpoint returned HTTP {status}")]
    HttpStatus {
        /// Numeric HTTP status code
        status: u16,
    },

    /// The streaming request could not be opened
    #[error("Connection error: {0}")]
    Connection(String),

    /// Reading the response body failed mid-stream
    #[error("Stream read error: {0}")]
    StreamRead(String),

    /// A single frame could not be decoded
    #[error("Frame parse error: {0}")]
    FrameParse(String),

    /// Too many consecutive frames failed to decode
    #[error("Stream aborted after {count} consecutive malformed frames")]
    MalformedFrames {
        /// Number of consecutive failures that triggered the abort
        count: usize,
    },

    /// A stream handler failed to apply a frame
    #[error("Frame handler error: {0}")]
    Handler(String),

    /// Chunked content could not be reassembled
    #[error("Chunk reassembly error: {0}")]
    Chunk(String),

    /// Event registry misuse (e.g. registering a built-in tag)
    #[error("Registry error: {0}")]
    Registry(String),

    /// Mutation targeted a conversation that does not exist
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    /// Mutation targeted a message that does not exist
    #[error("Message not found: {message_id} in conversation {conversation_id}")]
    MessageNotFound {
        /// Conversation that was searched
        conversation_id: String,
        /// Message id that was missing
        message_id: String,
    },

    /// Persistence backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client construction errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for chatstream operations
///
/// Uses `anyhow::Error` so call sites can attach context; downcast to
/// [`ChatError`] when the variant matters.
pub type Result<T> = anyhow::Result<T>;
