//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and handed to each
//! pipeline stage by value.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// LlmConfig
// ---------------------------------------------------------------------------

/// Settings for the streaming chat backend (Ollama `/api/chat`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the Ollama server, e.g. `http://localhost:11434`.
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Sampling temperature (0.0 – 1.0).
    pub temperature: f32,
    /// Seconds to wait for the response headers before the turn fails.
    pub timeout_secs: u64,
    /// Optional system message placed at the head of the history.
    pub system_prompt: Option<String>,
    /// Appended to every user message so the model answers in plain,
    /// speakable prose.
    pub speech_hint: Option<String>,
    /// Number of user/assistant exchanges kept in the rolling history.
    pub history_turns: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "qwen3:30b-a3b-instruct-2507".into(),
            temperature: 0.7,
            timeout_secs: 30,
            system_prompt: None,
            speech_hint: Some(
                "(Reply in plain sentences without special symbols or markdown so it can be read aloud.)"
                    .into(),
            ),
            history_turns: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// TtsConfig
// ---------------------------------------------------------------------------

/// Settings for the HTTP speech synthesizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Base URL of an OpenAI-compatible speech endpoint.
    pub base_url: String,
    /// API key, `None` for local servers.
    pub api_key: Option<String>,
    /// Synthesis model name.
    pub model: String,
    /// Voice identifier.
    pub voice: String,
    /// Speaking-rate multiplier.
    pub speed: f32,
    /// Per-sentence request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8880".into(),
            api_key: None,
            model: "kokoro".into(),
            voice: "zf_001".into(),
            speed: 1.0,
            timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// SegmenterConfig
// ---------------------------------------------------------------------------

/// Sentence segmentation limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Maximum sentence length in characters handed to the synthesizer.
    pub max_len: usize,
    /// How far (in characters) either side of the midpoint the bisection
    /// fallback looks for whitespace or punctuation.
    pub search_radius: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            max_len: 100,
            search_radius: 20,
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// Tuning for the synthesis → playback hand-off.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Duration of one audio frame pushed onto the audio channel.
    pub frame_ms: u32,
    /// Upper bound on synthesized-but-unplayed audio held in the audio
    /// channel, in seconds.
    pub max_buffered_secs: u32,
    /// Samples requested per device callback.
    pub playback_block: u32,
    /// How long the playback feeder waits for a new frame before looping.
    pub feed_timeout_ms: u64,
    /// Give up draining when the output device stops consuming for this long.
    pub stall_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_ms: 200,
            max_buffered_secs: 12,
            playback_block: 1024,
            feed_timeout_ms: 50,
            stall_timeout_ms: 3_000,
        }
    }
}

impl PipelineConfig {
    /// Capacity of the bounded audio channel in frames.
    ///
    /// ```
    /// use voice_assistant::config::PipelineConfig;
    ///
    /// assert_eq!(PipelineConfig::default().audio_channel_capacity(), 60);
    /// ```
    pub fn audio_channel_capacity(&self) -> usize {
        let frame_ms = self.frame_ms.max(1) as usize;
        (self.max_buffered_secs as usize * 1_000 / frame_ms).max(1)
    }

    /// Number of samples in one frame at `sample_rate`.
    pub fn frame_len(&self, sample_rate: u32) -> usize {
        (sample_rate as u64 * self.frame_ms as u64 / 1_000).max(1) as usize
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_millis(self.feed_timeout_ms.max(1))
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Output device selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name; `None` means the system default.
    pub output_device: Option<String>,
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voice_assistant::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Chat backend settings.
    pub llm: LlmConfig,
    /// Speech synthesizer settings.
    pub tts: TtsConfig,
    /// Sentence segmentation limits.
    pub segmenter: SegmenterConfig,
    /// Frame / buffering / playback tuning.
    pub pipeline: PipelineConfig,
    /// Output device selection.
    pub audio: AudioConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = AppConfig::default();
        original.save_to(&path).expect("save");

        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(original.llm.base_url, loaded.llm.base_url);
        assert_eq!(original.llm.model, loaded.llm.model);
        assert_eq!(original.llm.speech_hint, loaded.llm.speech_hint);
        assert_eq!(original.tts.voice, loaded.tts.voice);
        assert_eq!(original.segmenter, loaded.segmenter);
        assert_eq!(original.pipeline.frame_ms, loaded.pipeline.frame_ms);
        assert_eq!(
            original.pipeline.max_buffered_secs,
            loaded.pipeline.max_buffered_secs
        );
        assert_eq!(original.audio.output_device, loaded.audio.output_device);
    }

    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        assert_eq!(config.segmenter, SegmenterConfig::default());
        assert_eq!(config.llm.base_url, "http://localhost:11434");
    }

    /// A file that only sets a few keys keeps defaults for the rest.
    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[segmenter]\nmax_len = 40\n\n[tts]\nvoice = \"zm_010\"\n")
            .expect("write");

        let cfg = AppConfig::load_from(&path).expect("load");
        assert_eq!(cfg.segmenter.max_len, 40);
        assert_eq!(cfg.segmenter.search_radius, 20);
        assert_eq!(cfg.tts.voice, "zm_010");
        assert_eq!(cfg.tts.model, "kokoro");
        assert_eq!(cfg.pipeline.frame_ms, 200);
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.segmenter.max_len, 100);
        assert_eq!(cfg.segmenter.search_radius, 20);
        assert_eq!(cfg.pipeline.frame_ms, 200);
        assert_eq!(cfg.pipeline.playback_block, 1024);
        assert!(cfg.tts.api_key.is_none());
        assert!(cfg.audio.output_device.is_none());
    }

    #[test]
    fn frame_len_is_200ms_of_samples() {
        let p = PipelineConfig::default();
        assert_eq!(p.frame_len(24_000), 4_800);
        assert_eq!(p.frame_len(16_000), 3_200);
    }

    #[test]
    fn audio_channel_capacity_never_zero() {
        let p = PipelineConfig {
            max_buffered_secs: 0,
            ..PipelineConfig::default()
        };
        assert_eq!(p.audio_channel_capacity(), 1);

        let p = PipelineConfig {
            frame_ms: 0,
            max_buffered_secs: 1,
            ..PipelineConfig::default()
        };
        assert_eq!(p.audio_channel_capacity(), 1_000);
    }
}
