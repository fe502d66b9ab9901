//! Event frames received from the chat endpoint
//!
//! Every `data:` line on the stream carries a JSON envelope of the form
//! `{"type": <tag>, "content": <payload>}`. The envelope is first decoded
//! into a [`RawFrame`], then converted into the closed [`ChatEvent`] union.
//! Tags that are not built in become [`ChatEvent::Custom`] so they can be
//! routed to handlers registered on an
//! [`EventRegistry`](crate::dispatch::EventRegistry).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ChatError;

// ---------------------------------------------------------------------------
// Event tags
// ---------------------------------------------------------------------------

/// Incremental assistant text.
pub const TAG_TEXT: &str = "text";
/// A source reference attached to the answer.
pub const TAG_REFERENCE: &str = "reference";
/// Server-assigned id of the assistant message.
pub const TAG_MESSAGE_ID: &str = "message_id";
/// Server-assigned id of the conversation.
pub const TAG_CONVERSATION_ID: &str = "conversation_id";
/// Opaque server state blob plus signature.
pub const TAG_STATE_UPDATE: &str = "state_update";
/// Suggested follow-up prompts.
pub const TAG_FOLLOWUP_MESSAGES: &str = "followup_messages";
/// Progress notification keyed by update id.
pub const TAG_LIVE_UPDATE: &str = "live_update";
/// Image reference.
pub const TAG_IMAGE: &str = "image";
/// One segment of a payload split across frames.
pub const TAG_CHUNKED_CONTENT: &str = "chunked_content";
/// Truncate the current message content.
pub const TAG_CLEAR_MESSAGE: &str = "clear_message";
/// Token usage statistics.
pub const TAG_USAGE: &str = "usage";
/// Plan item / task.
pub const TAG_PLAN_ITEM: &str = "plan_item";
/// Summary of the conversation so far.
pub const TAG_CONVERSATION_SUMMARY: &str = "conversation_summary";
/// Request for the user to confirm a tool invocation.
pub const TAG_CONFIRMATION_REQUEST: &str = "confirmation_request";
/// Application-level error reported by the server.
pub const TAG_ERROR: &str = "error";

/// Alternative spellings accepted for [`TAG_PLAN_ITEM`].
const PLAN_ITEM_ALIASES: &[&str] = &["task", "todo_item"];

/// All built-in tags. Custom handlers may not claim any of these.
pub const BUILTIN_TAGS: &[&str] = &[
    TAG_TEXT,
    TAG_REFERENCE,
    TAG_MESSAGE_ID,
    TAG_CONVERSATION_ID,
    TAG_STATE_UPDATE,
    TAG_FOLLOWUP_MESSAGES,
    TAG_LIVE_UPDATE,
    TAG_IMAGE,
    TAG_CHUNKED_CONTENT,
    TAG_CLEAR_MESSAGE,
    TAG_USAGE,
    TAG_PLAN_ITEM,
    TAG_CONVERSATION_SUMMARY,
    TAG_CONFIRMATION_REQUEST,
    TAG_ERROR,
];

/// Returns `true` when `kind` names a built-in tag (including aliases).
pub fn is_builtin_tag(kind: &str) -> bool {
    BUILTIN_TAGS.contains(&kind) || PLAN_ITEM_ALIASES.contains(&kind)
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Undecoded frame envelope, as found on the wire and in the events log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    /// Event tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Tag-specific payload; `null` when absent.
    #[serde(default)]
    pub content: Value,
}

impl RawFrame {
    /// Parse the JSON text following a `data:` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::FrameParse`] when the text is not a JSON object
    /// with a string `type` field.
    pub fn parse(payload: &str) -> std::result::Result<Self, ChatError> {
        serde_json::from_str(payload).map_err(|e| ChatError::FrameParse(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A source document the answer refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    /// Display title.
    pub title: String,
    /// Excerpt or full content.
    #[serde(default)]
    pub content: String,
    /// Optional link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Server-owned conversation state echoed back on the next request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerState {
    /// Opaque state blob.
    pub state: Value,
    /// Signature the server uses to verify the blob.
    pub signature: String,
}

/// Phase of a live update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveUpdateType {
    /// Work started.
    Start,
    /// Work finished.
    Finish,
}

/// Human-readable body of a live update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveUpdateContent {
    /// Short label.
    pub label: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Progress notification; later updates with the same id replace earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveUpdate {
    /// Update identifier.
    pub update_id: String,
    /// Phase.
    #[serde(rename = "type")]
    pub kind: LiveUpdateType,
    /// Body.
    pub content: LiveUpdateContent,
}

/// Image attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    /// Image identifier.
    pub id: String,
    /// Resolved URL (may be a `data:` URL).
    pub url: String,
}

fn default_content_type() -> String {
    "image".to_string()
}

/// One indexed segment of a payload too large for a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkedContent {
    /// Content id shared by all segments.
    pub id: String,
    /// Kind of the reassembled content (`image`).
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Zero-based index of this segment.
    pub chunk_index: usize,
    /// Number of segments announced by the server.
    pub total_chunks: usize,
    /// MIME type of the reassembled payload.
    pub mime_type: String,
    /// Base64 slice.
    pub data: String,
}

/// Plan item reported by the server. Identity is the `id` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier.
    pub id: String,
    /// Task description.
    #[serde(default)]
    pub description: String,
    /// Free-form status (`pending`, `in_progress`, `completed`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Any further fields the server sends.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Server request for the user to approve a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    /// Confirmation identifier.
    pub confirmation_id: String,
    /// Tool awaiting approval.
    pub tool_name: String,
    /// Human-readable description of the tool.
    #[serde(default)]
    pub tool_description: String,
    /// Arguments the tool would be called with.
    #[serde(default)]
    pub arguments: Value,
}

/// Payloads that may arrive either as a bare string or wrapped in an object.
#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrObject {
    Text(String),
    Summary { summary: String },
    Message { message: String },
}

impl TextOrObject {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) | Self::Summary { summary: s } | Self::Message { message: s } => s,
        }
    }
}

// ---------------------------------------------------------------------------
// Typed events
// ---------------------------------------------------------------------------

/// A decoded event frame.
///
/// The built-in variants form a closed set; dispatch over them is an
/// exhaustive `match`. Anything else is carried as [`ChatEvent::Custom`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Text delta appended to the assistant message.
    Text(String),
    /// Source reference.
    Reference(Reference),
    /// Server id of the assistant message.
    MessageId(String),
    /// Server id of the conversation.
    ConversationId(String),
    /// Server state blob.
    StateUpdate(ServerState),
    /// Suggested follow-up prompts.
    FollowupMessages(Vec<String>),
    /// Progress notification.
    LiveUpdate(LiveUpdate),
    /// Image reference.
    Image(Image),
    /// Segment of a chunked payload.
    ChunkedContent(ChunkedContent),
    /// Truncate the message content.
    ClearMessage,
    /// Usage statistics (opaque).
    Usage(Value),
    /// Plan item.
    PlanItem(Task),
    /// Conversation summary.
    ConversationSummary(String),
    /// Tool confirmation request.
    ConfirmationRequest(ConfirmationRequest),
    /// Application-level error text.
    Error(String),
    /// Tag not known to this crate.
    Custom {
        /// Original tag.
        kind: String,
        /// Original payload.
        content: Value,
    },
}

fn decode<T: serde::de::DeserializeOwned>(
    kind: &str,
    content: Value,
) -> std::result::Result<T, ChatError> {
    serde_json::from_value(content)
        .map_err(|e| ChatError::FrameParse(format!("invalid `{}` payload: {}", kind, e)))
}

impl TryFrom<RawFrame> for ChatEvent {
    type Error = ChatError;

    fn try_from(frame: RawFrame) -> std::result::Result<Self, ChatError> {
        let RawFrame { kind, content } = frame;
        let event = match kind.as_str() {
            TAG_TEXT => ChatEvent::Text(decode(&kind, content)?),
            TAG_REFERENCE => ChatEvent::Reference(decode(&kind, content)?),
            TAG_MESSAGE_ID => ChatEvent::MessageId(decode(&kind, content)?),
            TAG_CONVERSATION_ID => ChatEvent::ConversationId(decode(&kind, content)?),
            TAG_STATE_UPDATE => ChatEvent::StateUpdate(decode(&kind, content)?),
            TAG_FOLLOWUP_MESSAGES => ChatEvent::FollowupMessages(decode(&kind, content)?),
            TAG_LIVE_UPDATE => ChatEvent::LiveUpdate(decode(&kind, content)?),
            TAG_IMAGE => ChatEvent::Image(decode(&kind, content)?),
            TAG_CHUNKED_CONTENT => ChatEvent::ChunkedContent(decode(&kind, content)?),
            TAG_CLEAR_MESSAGE => ChatEvent::ClearMessage,
            TAG_USAGE => ChatEvent::Usage(content),
            TAG_CONVERSATION_SUMMARY => ChatEvent::ConversationSummary(
                decode::<TextOrObject>(&kind, content)?.into_string(),
            ),
            TAG_CONFIRMATION_REQUEST => ChatEvent::ConfirmationRequest(decode(&kind, content)?),
            TAG_ERROR => ChatEvent::Error(decode::<TextOrObject>(&kind, content)?.into_string()),
            k if k == TAG_PLAN_ITEM || PLAN_ITEM_ALIASES.contains(&k) => {
                ChatEvent::PlanItem(decode(&kind, content)?)
            }
            _ => ChatEvent::Custom {
                kind: kind.clone(),
                content,
            },
        };
        Ok(event)
    }
}

impl ChatEvent {
    /// Decode the JSON text following a `data:` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::FrameParse`] when the envelope is malformed or
    /// a built-in payload does not have the expected shape.
    ///
    /// # Examples
    ///
    /// ```
    /// use chatstream::protocol::ChatEvent;
    ///
    /// let event = ChatEvent::parse(r#"{"type":"text","content":"Hi"}"#).unwrap();
    /// assert_eq!(event, ChatEvent::Text("Hi".to_string()));
    /// ```
    pub fn parse(payload: &str) -> std::result::Result<Self, ChatError> {
        RawFrame::parse(payload)?.try_into()
    }

    /// Wire tag of this event.
    pub fn kind(&self) -> &str {
        match self {
            Self::Text(_) => TAG_TEXT,
            Self::Reference(_) => TAG_REFERENCE,
            Self::MessageId(_) => TAG_MESSAGE_ID,
            Self::ConversationId(_) => TAG_CONVERSATION_ID,
            Self::StateUpdate(_) => TAG_STATE_UPDATE,
            Self::FollowupMessages(_) => TAG_FOLLOWUP_MESSAGES,
            Self::LiveUpdate(_) => TAG_LIVE_UPDATE,
            Self::Image(_) => TAG_IMAGE,
            Self::ChunkedContent(_) => TAG_CHUNKED_CONTENT,
            Self::ClearMessage => TAG_CLEAR_MESSAGE,
            Self::Usage(_) => TAG_USAGE,
            Self::PlanItem(_) => TAG_PLAN_ITEM,
            Self::ConversationSummary(_) => TAG_CONVERSATION_SUMMARY,
            Self::ConfirmationRequest(_) => TAG_CONFIRMATION_REQUEST,
            Self::Error(_) => TAG_ERROR,
            Self::Custom { kind, .. } => kind,
        }
    }

    /// Re-encode the event as an envelope. Used for frames produced
    /// locally, such as reassembled chunks and stream errors.
    pub fn to_raw(&self) -> RawFrame {
        fn value<T: Serialize>(payload: &T) -> Value {
            serde_json::to_value(payload).unwrap_or_default()
        }

        let content = match self {
            Self::Text(s)
            | Self::MessageId(s)
            | Self::ConversationId(s)
            | Self::ConversationSummary(s) => Value::String(s.clone()),
            Self::Error(message) => serde_json::json!({ "message": message }),
            Self::Reference(r) => value(r),
            Self::StateUpdate(s) => value(s),
            Self::FollowupMessages(m) => value(m),
            Self::LiveUpdate(u) => value(u),
            Self::Image(i) => value(i),
            Self::ChunkedContent(c) => value(c),
            Self::ClearMessage => Value::Null,
            Self::Usage(u) => u.clone(),
            Self::PlanItem(t) => value(t),
            Self::ConfirmationRequest(c) => value(c),
            Self::Custom { content, .. } => content.clone(),
        };

        RawFrame {
            kind: self.kind().to_string(),
            content,
        }
    }
}
