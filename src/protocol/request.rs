//! Request body sent to the chat endpoint

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End user.
    User,
    /// Model output.
    Assistant,
    /// System instruction.
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        };
        f.write_str(s)
    }
}

/// One prior message as sent in the request history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Author.
    pub role: Role,
    /// Message text.
    pub content: String,
}

/// The user's decision on a single confirmation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationDecision {
    /// Confirmation identifier from the `confirmation_request` frame.
    pub confirmation_id: String,
    /// `true` to approve, `false` to decline.
    pub confirmed: bool,
}

impl ConfirmationDecision {
    /// Build a decision.
    pub fn new(confirmation_id: impl Into<String>, confirmed: bool) -> Self {
        Self {
            confirmation_id: confirmation_id.into(),
            confirmed,
        }
    }
}

/// JSON body of a streaming chat request.
///
/// # Examples
///
/// ```
/// use chatstream::protocol::ChatRequest;
///
/// let request = ChatRequest::new("Hello");
/// let body = serde_json::to_value(&request).unwrap();
/// assert_eq!(body["message"], "Hello");
/// assert!(body["history"].as_array().unwrap().is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The new user message (empty for silent confirmations).
    pub message: String,
    /// Prior turns, oldest first.
    pub history: Vec<HistoryEntry>,
    /// Merged request context (server state, ids, options, timezone, ...).
    pub context: Map<String, Value>,
}

impl ChatRequest {
    /// Request with empty history and context.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            history: Vec::new(),
            context: Map::new(),
        }
    }
}
