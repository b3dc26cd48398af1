//! Core synthesizer trait and the waveform it produces.
//!
//! [`Synthesizer`] is the interface the synthesis stage calls once per
//! sentence.  It is blocking, object-safe and `Send + Sync` so the stage can
//! hold an `Arc<dyn Synthesizer>` on its own worker thread.
//!
//! [`MockSynthesizer`] (available under `#[cfg(test)]`) produces synthetic
//! audio without a server, and can be told to fail on particular sentences.

use thiserror::Error;

// ---------------------------------------------------------------------------
// SynthError
// ---------------------------------------------------------------------------

/// Errors from a single synthesis call.  None of them are fatal to a turn.
#[derive(Debug, Clone, Error)]
pub enum SynthError {
    /// HTTP transport or connection error.
    #[error("speech request failed: {0}")]
    Request(String),

    /// The speech endpoint answered with a non-success status.
    #[error("speech endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The returned audio could not be decoded.
    #[error("could not decode speech audio: {0}")]
    Decode(String),

    /// The synthesizer produced no samples or an invalid sample rate.
    #[error("synthesizer returned empty audio")]
    EmptyAudio,
}

impl From<reqwest::Error> for SynthError {
    fn from(e: reqwest::Error) -> Self {
        SynthError::Request(e.to_string())
    }
}

impl From<hound::Error> for SynthError {
    fn from(e: hound::Error) -> Self {
        SynthError::Decode(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Waveform
// ---------------------------------------------------------------------------

/// Mono `f32` PCM audio for one sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Usable for playback: at least one sample and a non-zero rate.
    pub fn is_playable(&self) -> bool {
        !self.samples.is_empty() && self.sample_rate > 0
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

// ---------------------------------------------------------------------------
// Synthesizer trait
// ---------------------------------------------------------------------------

/// Blocking text-to-speech interface.
///
/// # Contract
///
/// - `text` is one non-empty sentence.
/// - On success the waveform is mono; its rate is whatever the model uses.
pub trait Synthesizer: Send + Sync {
    fn synthesize(&self, text: &str) -> Result<Waveform, SynthError>;
}

// Compile-time assertion: Box<dyn Synthesizer> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn Synthesizer>) {}
};

// ---------------------------------------------------------------------------
// MockSynthesizer  (test-only)
// ---------------------------------------------------------------------------

/// Produces `samples_per_char` samples of a constant level per character.
///
/// Every call is recorded so tests can check what was synthesized and in
/// which order.
#[cfg(test)]
pub struct MockSynthesizer {
    sample_rate: u32,
    samples_per_char: usize,
    fail_on: Vec<String>,
    rates: Vec<u32>,
    delay: std::time::Duration,
    calls: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl MockSynthesizer {
    pub fn new(sample_rate: u32, samples_per_char: usize) -> Self {
        Self {
            sample_rate,
            samples_per_char,
            fail_on: Vec::new(),
            rates: Vec::new(),
            delay: std::time::Duration::ZERO,
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Fail whenever the sentence equals `text`.
    pub fn failing_on(mut self, text: impl Into<String>) -> Self {
        self.fail_on.push(text.into());
        self
    }

    /// Use `rates[i]` as the sample rate of the i-th call; later calls
    /// reuse the last entry.
    pub fn with_rates(mut self, rates: Vec<u32>) -> Self {
        self.rates = rates;
        self
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[cfg(test)]
impl Synthesizer for MockSynthesizer {
    fn synthesize(&self, text: &str) -> Result<Waveform, SynthError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(text.to_owned());
            calls.len() - 1
        };
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.fail_on.iter().any(|f| f == text) {
            return Err(SynthError::Request(format!("mock failure on {text:?}")));
        }

        let rate = match self.rates.as_slice() {
            [] => self.sample_rate,
            rates => rates[index.min(rates.len() - 1)],
        };
        let len = text.chars().count() * self.samples_per_char;
        Ok(Waveform::new(vec![0.25; len], rate))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_length_follows_char_count() {
        let synth = MockSynthesizer::new(24_000, 10);
        let wave = synth.synthesize("你好。").unwrap();
        assert_eq!(wave.samples.len(), 30);
        assert_eq!(wave.sample_rate, 24_000);
    }

    #[test]
    fn mock_fails_on_configured_sentence() {
        let synth = MockSynthesizer::new(24_000, 10).failing_on("B。");
        assert!(synth.synthesize("A。").is_ok());
        assert!(matches!(
            synth.synthesize("B。"),
            Err(SynthError::Request(_))
        ));
        assert_eq!(synth.calls(), ["A。", "B。"]);
    }

    #[test]
    fn mock_rate_sequence_repeats_last() {
        let synth = MockSynthesizer::new(24_000, 1).with_rates(vec![24_000, 22_050]);
        let rates: Vec<u32> = (0..3)
            .map(|_| synth.synthesize("x").unwrap().sample_rate)
            .collect();
        assert_eq!(rates, [24_000, 22_050, 22_050]);
    }

    #[test]
    fn waveform_playability() {
        assert!(Waveform::new(vec![0.0], 16_000).is_playable());
        assert!(!Waveform::new(vec![], 16_000).is_playable());
        assert!(!Waveform::new(vec![0.0], 0).is_playable());
    }

    #[test]
    fn waveform_duration() {
        let wave = Waveform::new(vec![0.0; 12_000], 24_000);
        assert!((wave.duration_secs() - 0.5).abs() < 1e-6);
        assert_eq!(Waveform::new(vec![0.0; 4], 0).duration_secs(), 0.0);
    }

    #[test]
    fn box_dyn_synthesizer_compiles() {
        let synth: Box<dyn Synthesizer> = Box::new(MockSynthesizer::new(16_000, 1));
        let _ = synth.synthesize("ok");
    }

    #[test]
    fn synth_error_display_includes_status() {
        let e = SynthError::Status {
            status: 503,
            body: "busy".into(),
        };
        assert!(e.to_string().contains("503"));
    }
}
