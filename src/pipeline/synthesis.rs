//! Synthesis stage: sentences in, audio frames out.
//!
//! Runs on a blocking thread.  Each sentence is synthesized in order; the
//! first successful waveform locks the turn's sample rate in the
//! [`SampleRateLatch`], and every waveform is sliced into frames and pushed
//! onto the bounded audio channel.  A full channel blocks this stage, which
//! is the only backpressure in the pipeline.
//!
//! A failed sentence is logged and skipped.  The stage stops when it sees
//! [`SentenceMessage::End`] (forwarded as [`AudioMessage::End`]) or when the
//! playback side has hung up.

use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::audio::{resample, slice_frames, AudioFrame, SampleRateLatch};
use crate::config::PipelineConfig;
use crate::pipeline::state::TurnEvent;
use crate::text::SentenceMessage;
use crate::tts::{SynthError, Synthesizer};

/// Item carried by the audio channel.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioMessage {
    Frame(AudioFrame),
    /// No more frames will follow.
    End,
}

/// What the synthesis stage did over the turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynthesisReport {
    pub synthesized: usize,
    pub skipped: usize,
    pub frames: usize,
    pub sample_rate: Option<u32>,
    /// Playback hung up before all audio was delivered.
    pub output_closed: bool,
}

/// Closes the latch when the stage ends, including by panic, so playback
/// never waits for a rate that will not come.
struct CloseOnDrop<'a>(&'a SampleRateLatch);

impl Drop for CloseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}

pub struct SynthesisStage {
    synth: Arc<dyn Synthesizer>,
    latch: Arc<SampleRateLatch>,
    config: PipelineConfig,
    events: UnboundedSender<TurnEvent>,
}

impl SynthesisStage {
    pub fn new(
        synth: Arc<dyn Synthesizer>,
        latch: Arc<SampleRateLatch>,
        config: PipelineConfig,
        events: UnboundedSender<TurnEvent>,
    ) -> Self {
        Self {
            synth,
            latch,
            config,
            events,
        }
    }

    /// Consume `sentences` until the end marker, pushing frames to `audio`.
    pub fn run(
        self,
        sentences: Receiver<SentenceMessage>,
        audio: SyncSender<AudioMessage>,
    ) -> SynthesisReport {
        let _close = CloseOnDrop(&self.latch);
        let mut report = SynthesisReport::default();
        let mut index = 0usize;

        log::debug!("synthesis: started");

        while let Ok(SentenceMessage::Sentence(sentence)) = sentences.recv() {
            let current = index;
            index += 1;
            let _ = self.events.send(TurnEvent::Synthesizing { index: current });

            let wave = match self.synth.synthesize(sentence.as_str()) {
                Ok(wave) if wave.is_playable() => wave,
                Ok(_) => {
                    log::warn!("synthesis: sentence {current} skipped: {}", SynthError::EmptyAudio);
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    log::warn!("synthesis: sentence {current} skipped: {e}");
                    report.skipped += 1;
                    continue;
                }
            };

            let rate = match self.latch.get() {
                Some(rate) => rate,
                None => {
                    self.latch.publish(wave.sample_rate);
                    log::info!("synthesis: sample rate locked at {} Hz", wave.sample_rate);
                    wave.sample_rate
                }
            };
            report.sample_rate = Some(rate);

            let samples = if wave.sample_rate == rate {
                wave.samples
            } else {
                log::warn!(
                    "synthesis: sentence {current} came back at {} Hz, resampling to {rate} Hz",
                    wave.sample_rate
                );
                resample(&wave.samples, wave.sample_rate, rate)
            };

            for frame in slice_frames(&samples, self.config.frame_len(rate), current) {
                if audio.send(AudioMessage::Frame(frame)).is_err() {
                    report.output_closed = true;
                    break;
                }
                report.frames += 1;
            }
            if report.output_closed {
                log::info!("synthesis: playback has stopped, discarding remaining sentences");
                break;
            }

            report.synthesized += 1;
            log::debug!("synthesis: sentence {current} → {} frames", report.frames);
        }

        if !report.output_closed {
            let _ = audio.send(AudioMessage::End);
        }

        log::info!(
            "synthesis: done ({} synthesized, {} skipped, {} frames)",
            report.synthesized,
            report.skipped,
            report.frames
        );
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::{Segmenter, Sentence};
    use crate::tts::MockSynthesizer;
    use std::sync::mpsc;
    use std::time::Duration;

    fn sentences(texts: &[&str]) -> Vec<Sentence> {
        let seg = Segmenter::new(100, 20);
        texts
            .iter()
            .flat_map(|t| seg.segment(t))
            .collect()
    }

    fn config(frame_ms: u32) -> PipelineConfig {
        PipelineConfig {
            frame_ms,
            ..PipelineConfig::default()
        }
    }

    fn stage(synth: Arc<MockSynthesizer>, latch: Arc<SampleRateLatch>) -> SynthesisStage {
        let (events, _rx) = tokio::sync::mpsc::unbounded_channel();
        SynthesisStage::new(synth, latch, config(100), events)
    }

    fn feed(items: Vec<Sentence>) -> Receiver<SentenceMessage> {
        let (tx, rx) = mpsc::channel();
        for s in items {
            tx.send(SentenceMessage::Sentence(s)).unwrap();
        }
        tx.send(SentenceMessage::End).unwrap();
        rx
    }

    fn collect(rx: Receiver<AudioMessage>) -> Vec<AudioMessage> {
        rx.try_iter().collect()
    }

    #[test]
    fn failed_sentence_is_isolated_and_order_kept() {
        // 1 kHz, 100 ms frames → 100 samples per frame; 50 samples per char.
        let synth = Arc::new(MockSynthesizer::new(1_000, 50).failing_on("B。"));
        let latch = Arc::new(SampleRateLatch::new());
        let (tx, rx) = mpsc::sync_channel(64);

        let report = stage(Arc::clone(&synth), Arc::clone(&latch))
            .run(feed(sentences(&["A。B。C。"])), tx);

        assert_eq!(synth.calls(), ["A。", "B。", "C。"]);
        assert_eq!(report.synthesized, 2);
        assert_eq!(report.skipped, 1);

        let msgs = collect(rx);
        let sentence_ids: Vec<usize> = msgs
            .iter()
            .filter_map(|m| match m {
                AudioMessage::Frame(f) => Some(f.sentence),
                AudioMessage::End => None,
            })
            .collect();
        // "A。" is 2 chars → 100 samples → one frame each for A and C.
        assert_eq!(sentence_ids, [0, 2]);
        assert_eq!(msgs.last(), Some(&AudioMessage::End));
        assert_eq!(msgs.iter().filter(|m| **m == AudioMessage::End).count(), 1);
    }

    #[test]
    fn first_success_locks_rate() {
        let synth = Arc::new(MockSynthesizer::new(24_000, 10).failing_on("一。"));
        let latch = Arc::new(SampleRateLatch::new());
        let (tx, _rx) = mpsc::sync_channel(64);

        let report = stage(synth, Arc::clone(&latch)).run(feed(sentences(&["一。二。"])), tx);
        assert_eq!(report.sample_rate, Some(24_000));
        assert_eq!(latch.get(), Some(24_000));
    }

    #[test]
    fn no_success_closes_latch_without_rate() {
        let synth = Arc::new(MockSynthesizer::new(24_000, 10).failing_on("坏。"));
        let latch = Arc::new(SampleRateLatch::new());
        let (tx, rx) = mpsc::sync_channel(4);

        let report = stage(synth, Arc::clone(&latch)).run(feed(sentences(&["坏。"])), tx);
        assert_eq!(report.sample_rate, None);
        assert_eq!(latch.wait_timeout(Duration::from_millis(10)), None);
        assert_eq!(collect(rx), [AudioMessage::End]);
    }

    #[test]
    fn empty_input_forwards_only_end() {
        let synth = Arc::new(MockSynthesizer::new(24_000, 10));
        let latch = Arc::new(SampleRateLatch::new());
        let (tx, rx) = mpsc::sync_channel(4);

        let report = stage(Arc::clone(&synth), latch).run(feed(Vec::new()), tx);
        assert_eq!(report, SynthesisReport::default());
        assert_eq!(synth.call_count(), 0);
        assert_eq!(collect(rx), [AudioMessage::End]);
    }

    #[test]
    fn empty_waveform_is_skipped() {
        let synth = Arc::new(MockSynthesizer::new(24_000, 0));
        let latch = Arc::new(SampleRateLatch::new());
        let (tx, rx) = mpsc::sync_channel(4);

        let report = stage(synth, latch).run(feed(sentences(&["静。"])), tx);
        assert_eq!(report.skipped, 1);
        assert_eq!(collect(rx), [AudioMessage::End]);
    }

    #[test]
    fn later_rate_is_resampled_to_locked_rate() {
        // 100 ms at 1 kHz → frames of 100 samples.
        let synth = Arc::new(MockSynthesizer::new(1_000, 100).with_rates(vec![1_000, 2_000]));
        let latch = Arc::new(SampleRateLatch::new());
        let (tx, rx) = mpsc::sync_channel(64);

        // Each sentence is 2 chars → 200 samples at its own rate.
        let report = stage(synth, Arc::clone(&latch)).run(feed(sentences(&["甲。乙。"])), tx);
        assert_eq!(latch.get(), Some(1_000));
        assert_eq!(report.sample_rate, Some(1_000));

        let second: usize = collect(rx)
            .into_iter()
            .filter_map(|m| match m {
                AudioMessage::Frame(f) if f.sentence == 1 => Some(f.len()),
                _ => None,
            })
            .sum();
        // 200 samples at 2 kHz become 100 samples at 1 kHz.
        assert_eq!(second, 100);
    }

    #[test]
    fn frames_are_sliced_with_short_tail() {
        let synth = Arc::new(MockSynthesizer::new(1_000, 30));
        let latch = Arc::new(SampleRateLatch::new());
        let (tx, rx) = mpsc::sync_channel(64);

        // 5 chars × 30 = 150 samples → frames of 100 + 50.
        stage(synth, latch).run(feed(sentences(&["abcd."])), tx);
        let lens: Vec<usize> = collect(rx)
            .into_iter()
            .filter_map(|m| match m {
                AudioMessage::Frame(f) => Some(f.len()),
                AudioMessage::End => None,
            })
            .collect();
        assert_eq!(lens, [100, 50]);
    }

    #[test]
    fn backpressure_bounds_in_flight_frames() {
        const CAPACITY: usize = 3;
        // One frame per sentence.
        let synth = Arc::new(MockSynthesizer::new(1_000, 10));
        let latch = Arc::new(SampleRateLatch::new());
        let (audio_tx, audio_rx) = mpsc::sync_channel(CAPACITY);
        let (sent_tx, sent_rx) = mpsc::channel();

        for s in sentences(&["一。二。三。四。五。六。七。八。"]) {
            sent_tx.send(SentenceMessage::Sentence(s)).unwrap();
        }
        sent_tx.send(SentenceMessage::End).unwrap();

        let worker = {
            let synth = Arc::clone(&synth);
            std::thread::spawn(move || stage(synth, latch).run(sent_rx, audio_tx))
        };

        // Nobody is consuming: the stage must stall once the channel is full.
        std::thread::sleep(Duration::from_millis(100));
        assert!(!worker.is_finished());
        assert!(
            synth.call_count() <= CAPACITY + 1,
            "synthesized {} sentences with capacity {CAPACITY}",
            synth.call_count()
        );

        // Draining lets it finish.
        let drained: Vec<AudioMessage> = audio_rx.iter().collect();
        let report = worker.join().unwrap();
        assert_eq!(report.frames, 8);
        assert_eq!(drained.len(), 9);
    }

    #[test]
    fn hung_up_playback_stops_stage() {
        let synth = Arc::new(MockSynthesizer::new(1_000, 10));
        let latch = Arc::new(SampleRateLatch::new());
        let (tx, rx) = mpsc::sync_channel(1);
        drop(rx);

        let report = stage(Arc::clone(&synth), latch).run(feed(sentences(&["一。二。三。"])), tx);
        assert!(report.output_closed);
        assert_eq!(synth.call_count(), 1);
        assert_eq!(report.synthesized, 0);
    }
}
