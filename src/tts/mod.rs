//! TTS (text-to-speech) module.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │               Synthesizer (trait)                    │
//! │                                                      │
//! │   ┌──────────────┐    ┌────────────────┐             │
//! │   │  TtsConfig   │───▶│ HttpSynthesizer│             │
//! │   │ - base_url   │    │ - POST speech  │             │
//! │   │ - voice      │    └───────┬────────┘             │
//! │   └──────────────┘            │ WAV bytes            │
//! │                               ▼                      │
//! │                     ┌──────────────────┐             │
//! │                     │  decode_wav()    │             │
//! │                     │  → mono Waveform │             │
//! │                     └──────────────────┘             │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use voice_assistant::config::TtsConfig;
//! use voice_assistant::tts::{HttpSynthesizer, Synthesizer};
//!
//! let synth = HttpSynthesizer::from_config(&TtsConfig::default()).unwrap();
//! let wave = synth.synthesize("你好。").unwrap();
//! println!("{} samples @ {} Hz", wave.samples.len(), wave.sample_rate);
//! ```

pub mod engine;
pub mod http;
pub mod wav;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use engine::{SynthError, Synthesizer, Waveform};
pub use http::HttpSynthesizer;
pub use wav::decode_wav;

#[cfg(test)]
pub use engine::MockSynthesizer;
