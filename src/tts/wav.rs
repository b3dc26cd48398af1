//! WAV decoding for synthesized speech.
//!
//! Speech servers return a complete WAV file per request.  [`decode_wav`]
//! accepts integer PCM of any width hound supports, as well as 32-bit float,
//! and always returns mono `f32` in `[-1.0, 1.0]`.

use std::io::Cursor;

use crate::audio::downmix_to_mono;
use crate::tts::engine::{SynthError, Waveform};

/// Decode an in-memory WAV file into a mono [`Waveform`].
pub fn decode_wav(bytes: &[u8]) -> Result<Waveform, SynthError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = int_scale(spec.bits_per_sample)?;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    Ok(Waveform::new(
        downmix_to_mono(&interleaved, spec.channels),
        spec.sample_rate,
    ))
}

/// Full-scale magnitude for signed integer samples of `bits` width.
fn int_scale(bits: u16) -> Result<f32, SynthError> {
    match bits {
        1..=32 => Ok((1u64 << (bits - 1)) as f32),
        _ => Err(SynthError::Decode(format!(
            "unsupported bits per sample: {bits}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
