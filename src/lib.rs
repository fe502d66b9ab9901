//! chatstream - streaming chat client library
//!
//! This library talks to a chat server that answers each message with a
//! server-sent event stream of typed frames, and keeps the resulting
//! conversations in a snapshot-based store.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `protocol`: Wire types for event frames and chat requests
//! - `transport`: Streaming HTTP client and SSE frame decoding
//! - `chunks`: Reassembly of payloads split over several frames
//! - `dispatch`: Built-in and application-registered event handlers
//! - `store`: Conversations, messages, and stream orchestration
//! - `persistence`: Key/value backends for saved history
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli` / `commands`: Command-line interface
//!
//! # Example
//!
//! ```no_run
//! use chatstream::{ChatClient, ChatStore, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let client = ChatClient::from_config(&config.client)?;
//!     let store = ChatStore::in_memory();
//!     let turn = store.send_message("Hello", &client, None)?;
//!     turn.stream.join().await;
//!
//!     let snapshot = store.snapshot();
//!     let (_, answer) = snapshot.find_message(&turn.message_id).unwrap();
//!     println!("{}", answer.content);
//!     Ok(())
//! }
//! ```

pub mod chunks;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod persistence;
pub mod protocol;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::{DispatchContext, EventHandler, EventRegistry};
pub use error::{ChatError, Result};
pub use protocol::{ChatEvent, ChatRequest, RawFrame};
pub use store::{ChatStore, Conversation, Message, StoreState};
pub use transport::{ChatClient, StreamHandle, StreamHandler, StreamOutcome};
