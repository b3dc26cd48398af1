//! Core `ChatBackend` trait and the streaming `OllamaChat` implementation.
//!
//! `OllamaChat` calls Ollama's `/api/chat` with `stream: true` and turns the
//! newline-delimited JSON reply into a [`DeltaStream`] of [`ChatChunk`]s.
//! All connection details come from [`LlmConfig`]; nothing is hardcoded.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LlmConfig;
use crate::llm::ndjson::NdjsonDecoder;

// ---------------------------------------------------------------------------
// LlmError
// ---------------------------------------------------------------------------

/// Errors that can occur while opening or reading a chat stream.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The server did not answer within the configured timeout.
    #[error("chat request timed out")]
    Timeout,

    /// The server answered with a non-success status.
    #[error("chat endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The backend reported an error object inside the stream.
    #[error("chat backend error: {0}")]
    Api(String),

    /// A stream line could not be parsed as the expected JSON.
    #[error("failed to parse chat stream: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Messages and chunks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the conversation sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A tool invocation requested by the model.  The pipeline never executes
/// these; they are handed back to the caller as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One incremental piece of the streamed reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatChunk {
    /// Reply text delta; may be empty.
    pub content: String,
    /// Tool calls announced in this chunk.
    pub tool_calls: Vec<ToolCall>,
}

impl ChatChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn is_tool_call_signal(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Stream of reply chunks; an `Err` item ends the reply.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, LlmError>> + Send>>;

// ---------------------------------------------------------------------------
// ChatBackend trait
// ---------------------------------------------------------------------------

/// Async trait for streaming chat backends.
///
/// `stream_chat` fails only when the stream cannot be started at all; errors
/// after that arrive as items of the returned stream.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<DeltaStream, LlmError>;
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireLine {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Parse one NDJSON line into a chunk plus the `done` flag.
fn parse_line(line: &str) -> Result<(ChatChunk, bool), LlmError> {
    let wire: WireLine =
        serde_json::from_str(line).map_err(|e| LlmError::Parse(format!("{e}: {line}")))?;

    if let Some(err) = wire.error {
        return Err(LlmError::Api(err));
    }

    let chunk = wire
        .message
        .map(|m| ChatChunk {
            content: m.content,
            tool_calls: m
                .tool_calls
                .into_iter()
                .map(|tc| ToolCall {
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                })
                .collect(),
        })
        .unwrap_or_default();

    Ok((chunk, wire.done))
}

// ---------------------------------------------------------------------------
// OllamaChat
// ---------------------------------------------------------------------------

/// Streams replies from an Ollama server's `/api/chat` endpoint.
pub struct OllamaChat {
    client: reqwest::Client,
    config: LlmConfig,
}

impl OllamaChat {
    /// Build an `OllamaChat` from application config.
    ///
    /// `timeout_secs` bounds connecting and waiting for the response
    /// headers only; the body is a long-lived stream.
    pub fn from_config(config: &LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
        }
    }
}

struct StreamState<B> {
    bytes: B,
    decoder: NdjsonDecoder,
    pending: VecDeque<Result<ChatChunk, LlmError>>,
    finished: bool,
}

impl<B> StreamState<B> {
    /// Queue every parsed line; stop reading after `done` or an error.
    fn accept(&mut self, lines: impl IntoIterator<Item = String>) {
        for line in lines {
            if self.finished {
                return;
            }
            match parse_line(&line) {
                Ok((chunk, done)) => {
                    if !chunk.content.is_empty() || chunk.is_tool_call_signal() {
                        self.pending.push_back(Ok(chunk));
                    }
                    self.finished = done;
                }
                Err(e) => {
                    self.pending.push_back(Err(e));
                    self.finished = true;
                }
            }
        }
    }
}

/// Adapt a raw byte stream into a [`DeltaStream`].
fn decode_stream<B, T, E>(bytes: B) -> DeltaStream
where
    B: Stream<Item = Result<T, E>> + Send + Unpin + 'static,
    T: AsRef<[u8]> + Send,
    E: Into<LlmError> + Send + 'static,
{
    let state = StreamState {
        bytes,
        decoder: NdjsonDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    let stream = futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    let lines = st.decoder.push(chunk.as_ref());
                    st.accept(lines);
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(e.into()), st));
                }
                None => {
                    let rest = st.decoder.finish();
                    st.accept(rest);
                    st.finished = true;
                }
            }
        }
    });

    Box::pin(stream)
}

#[async_trait]
impl ChatBackend for OllamaChat {
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<DeltaStream, LlmError> {
        let url = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));

        let body = serde_json::json!({
            "model":      self.config.model,
            "messages":   messages,
            "stream":     true,
            "keep_alive": -1,
            "options":    { "temperature": self.config.temperature }
        });

        let send = self.client.post(&url).json(&body).send();
        let response = tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), send)
            .await
            .map_err(|_| LlmError::Timeout)??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        log::debug!("chat: streaming reply from {url}");
        Ok(decode_stream(Box::pin(response.bytes_stream())))
    }
}

// ---------------------------------------------------------------------------
// MockChat (test only)
// ---------------------------------------------------------------------------

/// Replays a fixed list of stream items, or fails to start.
#[cfg(test)]
pub struct MockChat {
    items: Vec<Result<ChatChunk, LlmError>>,
    fail_to_start: bool,
    seen: std::sync::Mutex<Vec<Vec<ChatMessage>>>,
}

#[cfg(test)]
impl MockChat {
    /// One chunk per delta, then a normal end.
    pub fn deltas(deltas: &[&str]) -> Self {
        Self {
            items: deltas.iter().map(|d| Ok(ChatChunk::text(*d))).collect(),
            fail_to_start: false,
            seen: Default::default(),
        }
    }

    pub fn items(items: Vec<Result<ChatChunk, LlmError>>) -> Self {
        Self {
            items,
            fail_to_start: false,
            seen: Default::default(),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            items: Vec::new(),
            fail_to_start: true,
            seen: Default::default(),
        }
    }

    /// Message lists received so far, one per call.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl ChatBackend for MockChat {
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<DeltaStream, LlmError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        if self.fail_to_start {
            return Err(LlmError::Request("connection refused".into()));
        }
        Ok(Box::pin(futures::stream::iter(self.items.clone())))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
