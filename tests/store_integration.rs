//! Conversation store integration tests
//!
//! Drives `ChatStore::send_message` and `send_silent_confirmation` against a
//! `wiremock` chat endpoint and checks the resulting snapshots.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatstream::protocol::ConfirmationDecision;
use chatstream::store::{is_temporary_id, ConfirmationState};
use chatstream::{
    ChatStore, Conversation, DispatchContext, EventHandler, EventRegistry, StreamOutcome,
};
use common::{create_temp_store, make_client, open_store_at, sse_body, CHAT_PATH};

async fn mount_sse(server: &MockServer, message: &str, frames: &[Value]) {
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(body_partial_json(json!({ "message": message })))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body(frames), "text/event-stream"),
        )
        .mount(server)
        .await;
}

fn hello_frames() -> Vec<Value> {
    vec![
        json!({"type": "text", "content": "Hello"}),
        json!({"type": "text", "content": " there!"}),
        json!({"type": "message_id", "content": "msg-123"}),
        json!({"type": "conversation_id", "content": "conv-456"}),
    ]
}

#[tokio::test]
async fn test_send_message_streams_answer_and_promotes_conversation() {
    let server = MockServer::start().await;
    mount_sse(&server, "Hi", &hello_frames()).await;

    let client = make_client(&server);
    let store = ChatStore::in_memory();
    let temp_id = store.new_conversation();
    assert!(is_temporary_id(&temp_id));

    let turn = store.send_message("Hi", &client, None).unwrap();
    assert_eq!(turn.conversation_id, temp_id);
    {
        let snapshot = store.snapshot();
        let conversation = snapshot.conversation(&temp_id).unwrap();
        assert!(conversation.is_loading);
        assert_eq!(conversation.messages.len(), 2);
    }

    assert_eq!(turn.stream.join().await, StreamOutcome::Completed);

    let snapshot = store.snapshot();
    assert!(snapshot.conversation(&temp_id).is_none());
    assert_eq!(snapshot.current_conversation.as_deref(), Some("conv-456"));
    let conversation = snapshot.conversation("conv-456").unwrap();
    assert_eq!(conversation.id, "conv-456");
    assert!(!conversation.is_loading);
    assert!(conversation.active_stream.is_none());

    let answer = conversation.message(&turn.message_id).unwrap();
    assert_eq!(answer.content, "Hello there!");
    assert_eq!(answer.server_id.as_deref(), Some("msg-123"));
    assert_eq!(conversation.events_log.len(), 1);
    assert_eq!(conversation.events_log[0].len(), 4);
}

#[tokio::test]
async fn test_follow_up_request_carries_history_and_conversation_id() {
    let server = MockServer::start().await;
    let mut frames = hello_frames();
    frames.push(json!({"type": "state_update", "content": {"state": {"step": 1}, "signature": "sig-1"}}));
    mount_sse(&server, "Hi", &frames).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "message": "And?",
            "history": [
                {"role": "user", "content": "Hi"},
                {"role": "assistant", "content": "Hello there!"}
            ],
            "context": {
                "conversation_id": "conv-456",
                "state": {"step": 1},
                "signature": "sig-1",
                "user_settings": {"tone": "brief"},
                "page": "docs"
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse_body(&[json!({"type": "text", "content": "More."})]),
            "text/event-stream",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let client = make_client(&server);
    let store = ChatStore::in_memory();
    store.new_conversation();

    let first = store.send_message("Hi", &client, None).unwrap();
    first.stream.join().await;

    let mut options = serde_json::Map::new();
    options.insert("tone".to_string(), json!("brief"));
    store.set_chat_options("conv-456", Some(options)).unwrap();

    let mut extra = serde_json::Map::new();
    extra.insert("page".to_string(), json!("docs"));
    let second = store.send_message("And?", &client, Some(extra)).unwrap();
    assert_eq!(second.stream.join().await, StreamOutcome::Completed);

    let snapshot = store.snapshot();
    let conversation = snapshot.conversation("conv-456").unwrap();
    assert_eq!(conversation.messages.len(), 4);
    assert_eq!(
        conversation.message(&second.message_id).unwrap().content,
        "More."
    );
    assert_eq!(conversation.events_log.len(), 2);
}

#[tokio::test]
async fn test_second_send_aborts_first_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"message": "first"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(
                    sse_body(&[json!({"type": "text", "content": "stale answer"})]),
                    "text/event-stream",
                )
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    mount_sse(
        &server,
        "second",
        &[json!({"type": "text", "content": "fresh answer"})],
    )
    .await;

    let client = make_client(&server);
    let store = ChatStore::in_memory();
    store.new_conversation();

    let first = store.send_message("first", &client, None).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = store.send_message("second", &client, None).unwrap();

    assert!(first.stream.is_cancelled());
    let first_outcome = tokio::time::timeout(Duration::from_secs(2), first.stream.join())
        .await
        .expect("superseded stream finishes promptly");
    assert_eq!(first_outcome, StreamOutcome::Cancelled);
    assert_eq!(second.stream.join().await, StreamOutcome::Completed);

    let snapshot = store.snapshot();
    let conversation = snapshot.current().unwrap();
    assert_eq!(conversation.message(&first.message_id).unwrap().content, "");
    assert_eq!(
        conversation.message(&second.message_id).unwrap().content,
        "fresh answer"
    );
    assert!(!conversation.is_loading);
}

#[tokio::test]
async fn test_stop_then_delete_leaves_no_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(Vec::new(), "text/event-stream")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = make_client(&server);
    let store = ChatStore::in_memory();
    let id = store.new_conversation();

    let turn = store.send_message("slow", &client, None).unwrap();
    store.stop_answering(&id).unwrap();
    {
        let snapshot = store.snapshot();
        let conversation = snapshot.conversation(&id).unwrap();
        assert!(!conversation.is_loading);
        assert!(conversation.active_stream.is_none());
    }
    store.delete_conversation(&id).unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(2), turn.stream.join())
        .await
        .expect("stopped stream finishes promptly");
    assert_eq!(outcome, StreamOutcome::Cancelled);

    let snapshot = store.snapshot();
    assert_eq!(snapshot.conversations.len(), 1);
    let current = snapshot.current().unwrap();
    assert_ne!(current.id, id);
    assert!(snapshot
        .conversations
        .values()
        .all(|c| c.active_stream.is_none() && !c.is_loading));
}

#[tokio::test]
async fn test_delete_conversation_aborts_in_flight_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(
                    sse_body(&[json!({"type": "text", "content": "never seen"})]),
                    "text/event-stream",
                )
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = make_client(&server);
    let store = ChatStore::in_memory();
    let id = store.new_conversation();
    let turn = store.send_message("slow", &client, None).unwrap();

    store.delete_conversation(&id).unwrap();
    assert!(turn.stream.is_cancelled());
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(2), turn.stream.join())
            .await
            .expect("deleted stream finishes promptly"),
        StreamOutcome::Cancelled
    );

    let snapshot = store.snapshot();
    assert_eq!(snapshot.conversations.len(), 1);
    assert!(snapshot.find_message(&turn.message_id).is_none());
}

#[tokio::test]
async fn test_http_error_written_into_assistant_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = make_client(&server);
    let store = ChatStore::in_memory();
    store.new_conversation();
    let turn = store.send_message("hi", &client, None).unwrap();
    assert_eq!(turn.stream.join().await, StreamOutcome::Failed);

    let snapshot = store.snapshot();
    let (conversation, message) = snapshot.find_message(&turn.message_id).unwrap();
    assert!(message.content.contains("500"));
    assert!(!conversation.is_loading);
    assert!(conversation.active_stream.is_none());
}

#[tokio::test]
async fn test_silent_confirmation_resumes_same_message() {
    let server = MockServer::start().await;
    mount_sse(
        &server,
        "clean up",
        &[
            json!({"type": "text", "content": "I need approval."}),
            json!({"type": "live_update", "content": {
                "update_id": "u1", "type": "start", "content": {"label": "Planning"}
            }}),
            json!({"type": "confirmation_request", "content": {
                "confirmation_id": "c1", "tool_name": "delete_file", "arguments": {"path": "a.txt"}
            }}),
            json!({"type": "confirmation_request", "content": {
                "confirmation_id": "c2", "tool_name": "delete_file", "arguments": {"path": "b.txt"}
            }}),
        ],
    )
    .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "message": "",
            "history": [{"role": "user", "content": "clean up"}],
            "context": {"confirmed_tools": [{"confirmation_id": "c1", "confirmed": true}]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse_body(&[json!({"type": "text", "content": "Deleted a.txt."})]),
            "text/event-stream",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let client = make_client(&server);
    let store = ChatStore::in_memory();
    store.new_conversation();

    let turn = store.send_message("clean up", &client, None).unwrap();
    turn.stream.join().await;
    {
        let snapshot = store.snapshot();
        let (_, message) = snapshot.find_message(&turn.message_id).unwrap();
        assert_eq!(message.pending_confirmations(), vec!["c1", "c2"]);
        assert_eq!(message.live_updates.len(), 1);
    }

    let resumed = store
        .send_silent_confirmation(
            &turn.message_id,
            &[ConfirmationDecision::new("c1", true)],
            &client,
        )
        .unwrap();
    assert_eq!(resumed.message_id, turn.message_id);
    {
        let snapshot = store.snapshot();
        let (_, message) = snapshot.find_message(&turn.message_id).unwrap();
        assert_eq!(
            message.confirmation_states.get("c1"),
            Some(&ConfirmationState::Confirmed)
        );
        assert_eq!(
            message.confirmation_states.get("c2"),
            Some(&ConfirmationState::Skipped)
        );
        assert!(message.live_updates.is_empty());
    }
    assert_eq!(resumed.stream.join().await, StreamOutcome::Completed);

    let snapshot = store.snapshot();
    let (conversation, message) = snapshot.find_message(&turn.message_id).unwrap();
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(message.content, "I need approval.\n\nDeleted a.txt.");
    assert!(!message.has_confirmation_break);
    assert_eq!(conversation.events_log.len(), 2);
}

#[tokio::test]
async fn test_chunked_image_reassembled_out_of_order() {
    let server = MockServer::start().await;
    mount_sse(
        &server,
        "draw",
        &[
            json!({"type": "chunked_content", "content": {
                "id": "img-1", "content_type": "image", "chunk_index": 1,
                "total_chunks": 2, "mime_type": "image/png", "data": "bG8="
            }}),
            json!({"type": "chunked_content", "content": {
                "id": "img-1", "content_type": "image", "chunk_index": 0,
                "total_chunks": 2, "mime_type": "image/png", "data": "aGVs"
            }}),
        ],
    )
    .await;

    let client = make_client(&server);
    let store = ChatStore::in_memory();
    store.new_conversation();
    let turn = store.send_message("draw", &client, None).unwrap();
    turn.stream.join().await;

    let snapshot = store.snapshot();
    let (conversation, message) = snapshot.find_message(&turn.message_id).unwrap();
    assert_eq!(
        message.images.get("img-1").map(String::as_str),
        Some("data:image/png;base64,aGVsbG8=")
    );
    // Only the composite frame is logged.
    assert_eq!(conversation.events_log[0].len(), 1);
    assert_eq!(conversation.events_log[0][0].kind, "image");
}

#[tokio::test]
async fn test_invalid_chunked_content_fails_stream_into_message() {
    let server = MockServer::start().await;
    mount_sse(
        &server,
        "draw",
        &[
            json!({"type": "text", "content": "Here you go:"}),
            json!({"type": "chunked_content", "content": {
                "id": "img-2", "content_type": "image", "chunk_index": 0,
                "total_chunks": 2, "mime_type": "image/png", "data": "!!"
            }}),
            json!({"type": "chunked_content", "content": {
                "id": "img-2", "content_type": "image", "chunk_index": 1,
                "total_chunks": 2, "mime_type": "image/png", "data": "@@"
            }}),
            json!({"type": "text", "content": " never shown"}),
        ],
    )
    .await;

    let client = make_client(&server);
    let store = ChatStore::in_memory();
    store.new_conversation();
    let turn = store.send_message("draw", &client, None).unwrap();
    assert_eq!(turn.stream.join().await, StreamOutcome::Failed);

    let snapshot = store.snapshot();
    let (conversation, message) = snapshot.find_message(&turn.message_id).unwrap();
    assert!(message.content.starts_with("Here you go:"));
    assert!(message.content.contains("not valid base64"));
    assert!(!message.content.contains("never shown"));
    assert!(message.images.is_empty());
    assert!(conversation.active_stream.is_none());
    assert!(!conversation.is_loading);
}

struct Mood;

impl EventHandler for Mood {
    fn handle(
        &self,
        content: &Value,
        conversation: &mut Conversation,
        _ctx: &DispatchContext<'_>,
    ) -> Option<Value> {
        conversation.summary = content.as_str().map(|s| format!("mood: {}", s));
        None
    }
}

#[tokio::test]
async fn test_custom_events_use_registry_and_unknown_tags_are_ignored() {
    let server = MockServer::start().await;
    mount_sse(
        &server,
        "how are you",
        &[
            json!({"type": "mood", "content": "cheerful"}),
            json!({"type": "sparkles", "content": {"count": 3}}),
            json!({"type": "text", "content": "Fine!"}),
        ],
    )
    .await;

    let mut registry = EventRegistry::new();
    registry.register("mood", Arc::new(Mood)).unwrap();
    let store = ChatStore::new(Default::default(), registry, None);
    store.new_conversation();

    let client = make_client(&server);
    let turn = store.send_message("how are you", &client, None).unwrap();
    assert_eq!(turn.stream.join().await, StreamOutcome::Completed);

    let snapshot = store.snapshot();
    let (conversation, message) = snapshot.find_message(&turn.message_id).unwrap();
    assert_eq!(conversation.summary.as_deref(), Some("mood: cheerful"));
    assert_eq!(message.content, "Fine!");
    assert_eq!(conversation.events_log[0].len(), 3);
}

#[tokio::test]
async fn test_history_survives_reopen() {
    let server = MockServer::start().await;
    mount_sse(&server, "Hi", &hello_frames()).await;
    let client = make_client(&server);

    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("history");
    let message_id = {
        let store = open_store_at(db.clone(), EventRegistry::new());
        store.new_conversation();
        let turn = store.send_message("Hi", &client, None).unwrap();
        turn.stream.join().await;
        turn.message_id
    };

    let store = open_store_at(db, EventRegistry::new());
    let snapshot = store.snapshot();
    assert_eq!(snapshot.current_conversation.as_deref(), Some("conv-456"));
    let conversation = snapshot.conversation("conv-456").unwrap();
    assert_eq!(conversation.message(&message_id).unwrap().content, "Hello there!");
    assert!(!conversation.is_loading);
    assert_eq!(conversation.events_log.len(), 1);
}

#[tokio::test]
async fn test_empty_new_conversation_not_persisted() {
    let (store, tmp) = create_temp_store();
    store.new_conversation();
    assert!(store.persist().unwrap());
    assert_eq!(store.snapshot().conversations.len(), 1);
    drop(store);

    let reopened = open_store_at(tmp.path().join("history"), EventRegistry::new());
    assert!(reopened.snapshot().conversations.is_empty());
}
