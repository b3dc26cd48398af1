//! OpenAI-compatible HTTP speech synthesizer.
//!
//! Posts each sentence to `{base_url}/v1/audio/speech` asking for WAV output
//! and decodes the reply with [`decode_wav`].  Works with hosted endpoints
//! (set `api_key`) and local servers such as Kokoro-FastAPI (leave it unset).

use std::time::Duration;

use serde::Serialize;

use crate::config::TtsConfig;
use crate::tts::engine::{SynthError, Synthesizer, Waveform};
use crate::tts::wav::decode_wav;

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'a str,
}

/// Blocking HTTP synthesizer.  Runs on the synthesis worker thread.
pub struct HttpSynthesizer {
    client: reqwest::blocking::Client,
    config: TtsConfig,
}

impl HttpSynthesizer {
    /// Build a synthesizer from application config.
    ///
    /// # Errors
    ///
    /// Fails only if the HTTP client cannot be constructed (TLS backend
    /// initialisation).
    pub fn from_config(config: &TtsConfig) -> Result<Self, SynthError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/audio/speech",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

impl Synthesizer for HttpSynthesizer {
    fn synthesize(&self, text: &str) -> Result<Waveform, SynthError> {
        let request = SpeechRequest {
            model: &self.config.model,
            input: text,
            voice: &self.config.voice,
            speed: self.config.speed,
            response_format: "wav",
        };

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(SynthError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes()?;
        let wave = decode_wav(&bytes)?;
        if !wave.is_playable() {
            return Err(SynthError::EmptyAudio);
        }

        log::debug!(
            "tts: {} chars → {:.2}s @ {} Hz",
            text.chars().count(),
            wave.duration_secs(),
            wave.sample_rate
        );
        Ok(wave)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_trims_trailing_slash() {
        let config = TtsConfig {
            base_url: "http://tts.local:8880/".into(),
            ..TtsConfig::default()
        };
        let synth = HttpSynthesizer::from_config(&config).unwrap();
        assert_eq!(synth.endpoint(), "http://tts.local:8880/v1/audio/speech");
    }

    #[test]
    fn request_serializes_wav_format() {
        let req = SpeechRequest {
            model: "kokoro",
            input: "你好。",
            voice: "zf_001",
            speed: 1.0,
            response_format: "wav",
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["response_format"], "wav");
        assert_eq!(json["input"], "你好。");
    }

    #[test]
    fn unreachable_server_is_request_error() {
        let config = TtsConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            ..TtsConfig::default()
        };
        let synth = HttpSynthesizer::from_config(&config).unwrap();
        let err = synth.synthesize("hello.").unwrap_err();
        assert!(matches!(err, SynthError::Request(_)), "got {err:?}");
    }
}
