//! Voice turn pipeline: streamed reply text → sentences → audio → output.
//!
//! This module wires the stages and exposes the events a front-end needs.
//!
//! # Architecture
//!
//! ```text
//! VoiceSession::run_turn(user_text)
//!        │
//!        ├─ ChatHistory::messages_with → ChatBackend::stream_chat   [Thinking]
//!        │
//!        └─ Pipeline::run(deltas)
//!              │
//!              ├─ tokio task:      TextStreamConsumer ─SentenceMessage─┐
//!              ├─ spawn_blocking:  SynthesisStage ◀────────────────────┘
//!              │                       │ AudioMessage (bounded)
//!              │                       │ SampleRateLatch (once)
//!              └─ spawn_blocking:  PlaybackStage ─▶ AudioOutput       [Speaking]
//!
//! TurnEvent (unbounded mpsc) ──▶ caller: Phase, Synthesizing, ReplyText, Complete
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voice_assistant::audio::CpalOutput;
//! use voice_assistant::config::AppConfig;
//! use voice_assistant::llm::OllamaChat;
//! use voice_assistant::pipeline::{TurnEvent, VoiceSession};
//! use voice_assistant::text::CancelToken;
//! use voice_assistant::tts::HttpSynthesizer;
//!
//! // The synthesizer owns a blocking HTTP client: build it outside the runtime.
//! let config = AppConfig::default();
//! let mut session = VoiceSession::new(
//!     &config,
//!     Arc::new(OllamaChat::from_config(&config.llm)),
//!     Arc::new(HttpSynthesizer::from_config(&config.tts).unwrap()),
//!     Arc::new(CpalOutput::new(None)),
//! );
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! rt.block_on(async {
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!     tokio::spawn(async move {
//!         while let Some(event) = rx.recv().await {
//!             if let TurnEvent::ReplyText(text) = event {
//!                 println!("{text}");
//!             }
//!         }
//!     });
//!
//!     session.run_turn("你好", &tx, CancelToken::never()).await.unwrap();
//! });
//! ```

pub mod playback;
pub mod runner;
pub mod session;
pub mod state;
pub mod synthesis;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use playback::{PlaybackReport, PlaybackStage};
pub use runner::{Pipeline, TurnError};
pub use session::VoiceSession;
pub use state::{TurnEvent, TurnPhase, TurnSummary};
pub use synthesis::{AudioMessage, SynthesisReport, SynthesisStage};
