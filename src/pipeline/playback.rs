//! Playback stage: audio frames in, sound out.
//!
//! Runs on a blocking thread and acts as the non-real-time helper for the
//! output callback:
//!
//! 1. Wait on the [`SampleRateLatch`]; if it closes without a rate there is
//!    nothing to play.
//! 2. Open the [`AudioOutput`] at that rate with a [`Renderer`] over a fresh
//!    [`PlaybackBuffer`].
//! 3. Feed frames from the audio channel into the buffer, waiting at most
//!    `feed_timeout` at a time.  The callback never waits on this loop; when
//!    the buffer runs dry it plays silence.
//! 4. On [`AudioMessage::End`], wait for the buffer to drain, wait out the
//!    stream's [`play_out`] time, and close the output.
//!
//! If the output stops consuming for `stall_timeout`, the stage gives up,
//! drops the audio channel (which stops synthesis) and closes the output.
//!
//! [`Renderer`]: crate::audio::Renderer
//! [`play_out`]: crate::audio::OutputStream::play_out

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;

use crate::audio::{AudioOutput, OutputParams, PlaybackBuffer, PlaybackError, SampleRateLatch};
use crate::config::PipelineConfig;
use crate::pipeline::state::{TurnEvent, TurnPhase};
use crate::pipeline::synthesis::AudioMessage;

const DRAIN_POLL: Duration = Duration::from_millis(10);

/// What the playback stage did over the turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    pub sample_rate: Option<u32>,
    /// Frames received from the audio channel.
    pub frames: usize,
    /// Samples rendered to the output.
    pub samples: u64,
    pub underruns: usize,
    /// The output stopped consuming and playback was abandoned.
    pub stalled: bool,
}

// ---------------------------------------------------------------------------
// StallWatch
// ---------------------------------------------------------------------------

/// Detects an output that has stopped pulling samples.
struct StallWatch {
    last_rendered: u64,
    since: Instant,
    timeout: Duration,
}

impl StallWatch {
    fn new(rendered: u64, timeout: Duration) -> Self {
        Self {
            last_rendered: rendered,
            since: Instant::now(),
            timeout,
        }
    }

    /// Restart the clock, e.g. after new data was accepted.
    fn touch(&mut self, rendered: u64) {
        self.last_rendered = rendered;
        self.since = Instant::now();
    }

    /// `true` once `rendered` has not moved for the whole timeout.
    fn stalled(&mut self, rendered: u64) -> bool {
        if rendered != self.last_rendered {
            self.touch(rendered);
            return false;
        }
        self.since.elapsed() >= self.timeout
    }
}

// ---------------------------------------------------------------------------
// PlaybackStage
// ---------------------------------------------------------------------------

pub struct PlaybackStage {
    output: Arc<dyn AudioOutput>,
    latch: Arc<SampleRateLatch>,
    config: PipelineConfig,
    events: UnboundedSender<TurnEvent>,
}

impl PlaybackStage {
    pub fn new(
        output: Arc<dyn AudioOutput>,
        latch: Arc<SampleRateLatch>,
        config: PipelineConfig,
        events: UnboundedSender<TurnEvent>,
    ) -> Self {
        Self {
            output,
            latch,
            config,
            events,
        }
    }

    /// Play every frame from `audio` until the end marker.
    ///
    /// # Errors
    ///
    /// [`PlaybackError`] if the output cannot be opened.  `audio` is dropped
    /// on return, so synthesis stops pushing.
    pub fn run(self, audio: Receiver<AudioMessage>) -> Result<PlaybackReport, PlaybackError> {
        let mut report = PlaybackReport::default();

        let Some(rate) = self.latch.wait() else {
            log::info!("playback: no audio this turn");
            return Ok(report);
        };
        report.sample_rate = Some(rate);

        let block = self.config.playback_block.max(1) as usize;
        let shared = PlaybackBuffer::new(self.config.frame_len(rate).max(block) * 2);

        let params = OutputParams {
            sample_rate: rate,
            block_size: block,
        };
        let stream = match self.output.open(params, shared.renderer()) {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("playback: {e}");
                return Err(e);
            }
        };
        let _ = self.events.send(TurnEvent::Phase(TurnPhase::Speaking));
        log::debug!("playback: output open at {rate} Hz, block {block}");

        let mut watch = StallWatch::new(shared.rendered(), self.config.stall_timeout());
        report.stalled = !self.feed(&audio, &shared, &mut watch, &mut report.frames);
        drop(audio);
        shared.finish();

        if !report.stalled {
            watch.touch(shared.rendered());
            while !shared.is_drained() {
                if watch.stalled(shared.rendered()) {
                    report.stalled = true;
                    break;
                }
                thread::sleep(DRAIN_POLL);
            }
        }

        if report.stalled {
            log::warn!(
                "playback: output stopped consuming for {:?}, abandoning {} buffered samples",
                self.config.stall_timeout(),
                shared.buffered()
            );
        } else {
            let tail = stream.play_out();
            log::debug!("playback: drained, waiting {tail:?} for the device");
            thread::sleep(tail);
        }
        stream.close();

        report.samples = shared.rendered();
        report.underruns = shared.underruns();
        log::info!(
            "playback: done ({} frames, {:.2}s, {} underruns)",
            report.frames,
            report.samples as f64 / rate as f64,
            report.underruns
        );
        Ok(report)
    }

    /// Move frames into the buffer until the end marker.  Returns `false`
    /// if the output stalled first.
    fn feed(
        &self,
        audio: &Receiver<AudioMessage>,
        shared: &PlaybackBuffer,
        watch: &mut StallWatch,
        frames: &mut usize,
    ) -> bool {
        let feed_timeout = self.config.feed_timeout();
        let mut pending: Vec<f32> = Vec::new();
        let mut offset = 0usize;

        loop {
            if offset < pending.len() {
                let accepted = shared.push(&pending[offset..]);
                offset += accepted;
                if accepted > 0 {
                    watch.touch(shared.rendered());
                }
                if offset < pending.len() {
                    if watch.stalled(shared.rendered()) {
                        return false;
                    }
                    thread::sleep(feed_timeout);
                    continue;
                }
            }

            match audio.recv_timeout(feed_timeout) {
                Ok(AudioMessage::Frame(frame)) => {
                    *frames += 1;
                    pending = frame.samples;
                    offset = 0;
                }
                Ok(AudioMessage::End) => return true,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::debug!("playback: audio channel closed without end marker");
                    return true;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
