//! Chat model access for the voice assistant.
//!
//! This module provides:
//! * [`ChatBackend`]: async trait for backends that stream a reply.
//! * [`OllamaChat`]: streams from Ollama's `/api/chat` (NDJSON).
//! * [`ChatHistory`]: rolling window of previous exchanges.
//! * [`ChatChunk`] / [`ToolCall`]: the incremental items of a reply.
//! * [`LlmError`]: error variants for chat operations.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use voice_assistant::config::AppConfig;
//! use voice_assistant::llm::{ChatBackend, ChatHistory, OllamaChat};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::default();
//!     let chat = OllamaChat::from_config(&config.llm);
//!     let history = ChatHistory::from_config(&config.llm);
//!
//!     let mut deltas = chat
//!         .stream_chat(&history.messages_with("今天天气怎么样？"))
//!         .await
//!         .unwrap();
//!     while let Some(Ok(chunk)) = deltas.next().await {
//!         print!("{}", chunk.content);
//!     }
//! }
//! ```

pub mod chat;
pub mod history;
pub mod ndjson;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use chat::{
    ChatBackend, ChatChunk, ChatMessage, DeltaStream, LlmError, OllamaChat, Role, ToolCall,
};
pub use history::ChatHistory;
pub use ndjson::NdjsonDecoder;

#[cfg(test)]
pub use chat::MockChat;
