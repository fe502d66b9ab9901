//! HTTP client for the streaming chat endpoint
//!
//! [`ChatClient`] POSTs a [`ChatRequest`] with
//! `Accept: text/event-stream` and streams the response body through
//! [`consume_event_stream`]. Every failure before the body starts
//! (connection error, non-success status) is reported through the
//! handler's `on_error`, never returned to the caller.

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::{ChatError, Result};
use crate::protocol::ChatRequest;
use crate::transport::{consume_event_stream, StreamHandle, StreamHandler, StreamOutcome};

/// Streaming chat client.
///
/// Cheap to clone; clones share the underlying connection pool.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use chatstream::transport::ChatClient;
///
/// let client = ChatClient::new(
///     url::Url::parse("http://localhost:8000/api/chat").unwrap(),
///     HashMap::new(),
///     Duration::from_secs(30),
/// )
/// .unwrap();
/// assert_eq!(client.endpoint().path(), "/api/chat");
/// ```
#[derive(Debug, Clone)]
pub struct ChatClient {
    http_client: reqwest::Client,
    endpoint: url::Url,
    headers: HashMap<String, String>,
    max_parse_errors: usize,
}

impl ChatClient {
    /// Construct a client targeting `endpoint`.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Default chat endpoint URL
    /// * `headers` - Extra headers added to every request
    /// * `timeout` - Timeout for a whole streaming request
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        endpoint: url::Url,
        headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ChatError::Http)?;

        Ok(Self {
            http_client,
            endpoint,
            headers,
            max_parse_errors: 3,
        })
    }

    /// Construct a client from the `client` section of the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URL is invalid or the HTTP client
    /// cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let client = Self::new(
            config.endpoint_url()?,
            config.headers.clone(),
            Duration::from_secs(config.timeout_seconds),
        )?;
        Ok(client.with_max_parse_errors(config.max_consecutive_parse_errors))
    }

    /// Override how many consecutive malformed frames abort a stream.
    pub fn with_max_parse_errors(mut self, max: usize) -> Self {
        self.max_parse_errors = max.max(1);
        self
    }

    /// Default endpoint used by the conversation store.
    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    /// Start a stream on a new task and return its handle.
    ///
    /// The handler receives every frame; see the module docs of
    /// [`crate::transport`] for the callback contract.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Chat endpoint URL
    /// * `request` - Request body
    /// * `handler` - Frame receiver, moved into the task
    /// * `token` - Cancellation token; cancelling it stops delivery
    /// * `extra_headers` - Headers for this request only
    pub fn open_stream<H>(
        &self,
        endpoint: url::Url,
        request: ChatRequest,
        mut handler: H,
        token: CancellationToken,
        extra_headers: HashMap<String, String>,
    ) -> StreamHandle
    where
        H: StreamHandler + 'static,
    {
        let client = self.clone();
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            client
                .run_stream(&endpoint, &request, &mut handler, &task_token, &extra_headers)
                .await
        });
        StreamHandle::new(token, task)
    }

    /// Run a stream to completion on the current task.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Chat endpoint URL
    /// * `request` - Request body
    /// * `handler` - Frame receiver
    /// * `token` - Cancellation token
    /// * `extra_headers` - Headers for this request only
    ///
    /// # Returns
    ///
    /// How the stream ended. Errors have already been passed to
    /// `handler.on_error`.
    pub async fn run_stream<H>(
        &self,
        endpoint: &url::Url,
        request: &ChatRequest,
        handler: &mut H,
        token: &CancellationToken,
        extra_headers: &HashMap<String, String>,
    ) -> StreamOutcome
    where
        H: StreamHandler + ?Sized,
    {
        if token.is_cancelled() {
            return StreamOutcome::Cancelled;
        }

        let mut req = self
            .http_client
            .post(endpoint.as_str())
            .header("Accept", "text/event-stream")
            .header("Content-Type", "application/json")
            .json(request);

        for (k, v) in self.headers.iter().chain(extra_headers.iter()) {
            req = req.header(k.as_str(), v.as_str());
        }

        tracing::info!(
            "Opening chat stream to {} ({} history entries)",
            endpoint,
            request.history.len()
        );

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return StreamOutcome::Cancelled,
            response = req.send() => response,
        };

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("Chat request failed: {}", e);
                handler.on_error(ChatError::Connection(e.to_string())).await;
                return StreamOutcome::Failed;
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::error!("Chat endpoint returned HTTP {}", status);
            handler
                .on_error(ChatError::HttpStatus {
                    status: status.as_u16(),
                })
                .await;
            return StreamOutcome::Failed;
        }

        consume_event_stream(
            response.bytes_stream(),
            handler,
            token,
            self.max_parse_errors,
        )
        .await
    }
}
