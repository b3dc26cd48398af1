//! Sample-rate conversion and channel mixing.
//!
//! Playback runs at a single rate for a whole turn, so synthesized audio
//! that arrives at a different rate is converted with [`resample`] before it
//! is framed.  [`downmix_to_mono`] folds interleaved WAV channels into the
//! mono stream the pipeline carries.
//!
//! [`StreamResampler`] does the same conversion block by block for an output
//! device that only runs at its own mix rate.
//!
//! Both resamplers use linear interpolation; speech tolerates it well and it
//! needs no extra dependencies.

// ---------------------------------------------------------------------------
// downmix_to_mono
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging all channels.
///
/// * `channels == 1` returns the input unchanged.
/// * `channels == 0` returns an empty vector.
/// * A trailing partial frame is dropped.
///
/// # Example
///
/// ```rust
/// use voice_assistant::audio::downmix_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = downmix_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// resample
// ---------------------------------------------------------------------------

/// Resample mono `samples` from `from_rate` Hz to `to_rate` Hz.
///
/// Equal rates (or a zero rate on either side) return the input unchanged.
/// The output length is `ceil(samples.len() * to_rate / from_rate)`.
///
/// # Example
///
/// ```rust
/// use voice_assistant::audio::resample;
///
/// let hi = vec![0.5_f32; 480];
/// assert_eq!(resample(&hi, 48_000, 24_000).len(), 240);
/// ```
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }
    if samples.is_empty() {
        return Vec::new();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let last = samples.len() - 1;

    (0..output_len)
        .map(|i| {
            let src_pos = i as f64 / ratio;
            let idx = src_pos as usize;
            let frac = (src_pos - idx as f64) as f32;

            if idx < last {
                samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
            } else {
                samples[last]
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// StreamResampler
// ---------------------------------------------------------------------------

/// Linear resampler that keeps its phase across calls.
///
/// Each call asks [`source_len`](Self::source_len) how many input samples the
/// next `frames` outputs consume, fetches exactly that many, then calls
/// [`process`](Self::process).  Allocation-free, so it can run inside an
/// audio callback.
#[derive(Debug, Clone)]
pub struct StreamResampler {
    /// Input samples advanced per output sample.
    step: f64,
    /// Position between `prev` (0.0) and `cur` (1.0).
    pos: f64,
    prev: f32,
    cur: f32,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        let step = if from_rate == 0 || to_rate == 0 {
            1.0
        } else {
            from_rate as f64 / to_rate as f64
        };
        // Primed with silence: output lags the input by one sample.
        Self {
            step,
            pos: 1.0,
            prev: 0.0,
            cur: 0.0,
        }
    }

    /// Input samples consumed by the next `frames` outputs.
    pub fn source_len(&self, frames: usize) -> usize {
        if frames == 0 {
            return 0;
        }
        let mut pos = self.pos;
        let mut pulls = 0;
        for _ in 0..frames {
            while pos >= 1.0 {
                pos -= 1.0;
                pulls += 1;
            }
            pos += self.step;
        }
        pulls
    }

    /// Fill `out` from `source`, which must hold `source_len(out.len())`
    /// samples.  A short `source` holds its last sample.
    pub fn process(&mut self, source: &[f32], out: &mut [f32]) {
        let mut next = source.iter();
        for sample in out.iter_mut() {
            while self.pos >= 1.0 {
                self.pos -= 1.0;
                self.prev = self.cur;
                if let Some(&s) = next.next() {
                    self.cur = s;
                }
            }
            *sample = self.prev + (self.cur - self.prev) * self.pos as f32;
            self.pos += self.step;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_mono_is_identity() {
        let input = vec![0.1_f32, 0.2, 0.3];
        assert_eq!(downmix_to_mono(&input, 1), input);
    }

    #[test]
    fn downmix_two_channels_averages() {
        let out = downmix_to_mono(&[1.0, -1.0, 0.5, 0.5], 2);
        assert_eq!(out.len(), 2);
        assert!(out[0].abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn downmix_drops_partial_frame() {
        assert_eq!(downmix_to_mono(&[0.2, 0.4, 0.9], 2).len(), 1);
    }

    #[test]
    fn downmix_zero_channels_is_empty() {
        assert!(downmix_to_mono(&[1.0, 2.0], 0).is_empty());
    }

    #[test]
    fn same_rate_is_noop() {
        let input: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        assert_eq!(resample(&input, 24_000, 24_000), input);
    }

    #[test]
    fn empty_input_stays_empty() {
        assert!(resample(&[], 22_050, 24_000).is_empty());
    }

    #[test]
    fn downsample_halves_length() {
        assert_eq!(resample(&vec![0.0; 480], 48_000, 24_000).len(), 240);
    }

    #[test]
    fn upsample_doubles_length() {
        assert_eq!(resample(&vec![0.0; 80], 12_000, 24_000).len(), 160);
    }

    #[test]
    fn odd_ratio_length_within_one_sample() {
        let out = resample(&vec![0.0; 22_050], 22_050, 24_000);
        assert!(out.len().abs_diff(24_000) <= 1, "got {}", out.len());
    }

    #[test]
    fn constant_signal_keeps_amplitude() {
        let out = resample(&vec![0.5; 441], 44_100, 24_000);
        assert!(out.iter().all(|s| (s - 0.5).abs() < 1e-5));
    }

    #[test]
    fn ramp_is_interpolated_between_neighbours() {
        let out = resample(&[0.0, 1.0], 1, 2);
        assert_eq!(out.len(), 4);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert!((out[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn stream_resampler_consumes_at_rate_ratio() {
        let mut rs = StreamResampler::new(24_000, 48_000);
        let mut consumed = 0;
        let mut out = vec![0.0; 480];
        for _ in 0..100 {
            let need = rs.source_len(out.len());
            consumed += need;
            rs.process(&vec![0.25; need], &mut out);
        }
        // 48 000 outputs need 24 000 inputs, give or take the primed sample.
        assert!(consumed.abs_diff(24_000) <= 1, "consumed {consumed}");
    }

    #[test]
    fn stream_resampler_is_continuous_across_calls() {
        let ramp: Vec<f32> = (0..64).map(|i| i as f32).collect();
        let mut rs = StreamResampler::new(1, 2);
        let mut next = 0;
        let mut played = Vec::new();
        for chunk in [5usize, 7, 3, 11, 9] {
            let need = rs.source_len(chunk);
            let mut out = vec![0.0; chunk];
            rs.process(&ramp[next..next + need], &mut out);
            next += need;
            played.extend(out);
        }
        // Upsampling a ramp by two moves half a step per output, with no jumps.
        for pair in played.windows(2).skip(2) {
            assert!((pair[1] - pair[0] - 0.5).abs() < 1e-5, "{pair:?}");
        }
    }

    #[test]
    fn stream_resampler_keeps_constant_amplitude() {
        let mut rs = StreamResampler::new(22_050, 48_000);
        let mut out = vec![0.0; 256];
        let need = rs.source_len(out.len());
        rs.process(&vec![0.5; need], &mut out);
        // The first outputs fade in from the silent primed sample.
        assert!(out[3..].iter().all(|s| (s - 0.5).abs() < 1e-5));
    }

    #[test]
    fn stream_resampler_equal_rates_delays_one_sample() {
        let mut rs = StreamResampler::new(16_000, 16_000);
        assert_eq!(rs.source_len(4), 4);
        let mut out = [0.0; 4];
        rs.process(&[0.1, 0.2, 0.3, 0.4], &mut out);
        assert_eq!(out, [0.0, 0.1, 0.2, 0.3]);
        rs.process(&[0.5], &mut out[..1]);
        assert_eq!(out[0], 0.4);
    }
}
