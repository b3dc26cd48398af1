//! Streaming voice assistant.
//!
//! A chat model's reply is cut into sentences while it streams, each
//! sentence is synthesized as soon as it is complete, and the audio is
//! played in order through a bounded buffer.  See [`pipeline`] for the
//! stage layout.

pub mod audio;
pub mod config;
pub mod llm;
pub mod pipeline;
pub mod text;
pub mod tts;
