use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;
use wiremock::MockServer;

use chatstream::config::StoreConfig;
use chatstream::persistence::SledPersistence;
use chatstream::transport::ChatClient;
use chatstream::{ChatError, ChatEvent, ChatStore, EventRegistry, RawFrame, StreamHandler};

/// Path the chat endpoint is mounted on in tests.
#[allow(dead_code)]
pub const CHAT_PATH: &str = "/api/chat";

/// Build an SSE body with one `data:` line per frame.
#[allow(dead_code)]
pub fn sse_body(frames: &[Value]) -> Vec<u8> {
    frames
        .iter()
        .map(|f| format!("data: {}\n\n", f))
        .collect::<String>()
        .into_bytes()
}

/// Client targeting the chat endpoint of a mock server.
#[allow(dead_code)]
pub fn make_client(server: &MockServer) -> ChatClient {
    let endpoint = url::Url::parse(&format!("{}{}", server.uri(), CHAT_PATH)).expect("valid url");
    ChatClient::new(endpoint, HashMap::new(), Duration::from_secs(10)).expect("client builds")
}

/// Sled-backed store in a fresh temporary directory, already hydrated.
#[allow(dead_code)]
pub fn create_temp_store() -> (ChatStore, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let store = open_store_at(tmp.path().join("history"), EventRegistry::new());
    (store, tmp)
}

/// Open and hydrate a sled-backed store at `path`.
#[allow(dead_code)]
pub fn open_store_at(path: PathBuf, registry: EventRegistry) -> ChatStore {
    let persistence = SledPersistence::open(path).expect("failed to open sled store");
    let store = ChatStore::new(StoreConfig::default(), registry, Some(Arc::new(persistence)));
    store.hydrate().expect("hydrate succeeds");
    store
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Records every handler callback.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct Collector {
    pub events: Vec<ChatEvent>,
    pub errors: Vec<String>,
    pub closed: usize,
}

#[async_trait::async_trait]
impl StreamHandler for Collector {
    async fn on_message(&mut self, _frame: RawFrame, event: ChatEvent) -> chatstream::Result<()> {
        self.events.push(event);
        Ok(())
    }

    async fn on_error(&mut self, error: ChatError) {
        self.errors.push(error.to_string());
    }

    async fn on_close(&mut self) {
        self.closed += 1;
    }
}
