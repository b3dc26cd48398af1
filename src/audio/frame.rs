//! Fixed-length audio frames carried on the audio channel.

/// A block of mono `f32` samples.
///
/// All frames of one turn share the turn's sample rate, so the rate is not
/// stored per frame.  Only the last frame of a sentence may be shorter than
/// the configured frame length.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    /// Index of the sentence this frame was synthesized from.
    pub sentence: usize,
}

impl AudioFrame {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Split `samples` into frames of `frame_len` samples; the trailing frame
/// holds the remainder.  A `frame_len` of zero is treated as one.
///
/// # Example
///
/// ```rust
/// use voice_assistant::audio::slice_frames;
///
/// let frames = slice_frames(&[0.0; 10], 4, 0);
/// let lens: Vec<usize> = frames.iter().map(|f| f.len()).collect();
/// assert_eq!(lens, [4, 4, 2]);
/// ```
pub fn slice_frames(samples: &[f32], frame_len: usize, sentence: usize) -> Vec<AudioFrame> {
    samples
        .chunks(frame_len.max(1))
        .map(|chunk| AudioFrame {
            samples: chunk.to_vec(),
            sentence,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_multiple_has_no_short_frame() {
        let frames = slice_frames(&[0.1; 8], 4, 2);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 4 && f.sentence == 2));
    }

    #[test]
    fn trailing_frame_is_shorter() {
        let frames = slice_frames(&[0.1; 9], 4, 0);
        assert_eq!(frames.last().map(AudioFrame::len), Some(1));
    }

    #[test]
    fn empty_waveform_gives_no_frames() {
        assert!(slice_frames(&[], 4, 0).is_empty());
    }

    #[test]
    fn order_is_preserved() {
        let samples: Vec<f32> = (0..7).map(|i| i as f32).collect();
        let flat: Vec<f32> = slice_frames(&samples, 3, 0)
            .into_iter()
            .flat_map(|f| f.samples)
            .collect();
        assert_eq!(flat, samples);
    }

    #[test]
    fn zero_frame_len_is_clamped() {
        assert_eq!(slice_frames(&[0.0; 3], 0, 0).len(), 3);
    }
}
