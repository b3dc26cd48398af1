//! Turn orchestrator: wires the three stages for one reply.
//!
//! [`Pipeline::run`] creates fresh channels for every turn and runs the
//! stages concurrently:
//!
//! ```text
//! DeltaStream ─▶ TextStreamConsumer   (tokio task)
//!                   │ SentenceMessage   std::mpsc::channel (unbounded)
//!                   ▼
//!                SynthesisStage       (spawn_blocking)
//!                   │ AudioMessage      std::mpsc::sync_channel (bounded)
//!                   ▼
//!                PlaybackStage        (spawn_blocking) ─▶ AudioOutput
//! ```
//!
//! The reply text is reported as soon as the consumer finishes, before the
//! audio has played.  Per-sentence synthesis failures and a stalled output
//! are folded into the summary as a partial turn; only a failed output (or a
//! crashed stage) fails the turn.

use std::sync::mpsc;
use std::sync::Arc;

use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::audio::{AudioOutput, PlaybackError, SampleRateLatch};
use crate::config::PipelineConfig;
use crate::llm::{ChatChunk, LlmError};
use crate::pipeline::playback::{PlaybackReport, PlaybackStage};
use crate::pipeline::state::{TurnEvent, TurnPhase, TurnSummary};
use crate::pipeline::synthesis::{AudioMessage, SynthesisReport, SynthesisStage};
use crate::text::{CancelToken, Segmenter, SentenceMessage, StreamReport, TextStreamConsumer};
use crate::tts::Synthesizer;

// ---------------------------------------------------------------------------
// TurnError
// ---------------------------------------------------------------------------

/// Errors that fail a whole turn.
#[derive(Debug, Error)]
pub enum TurnError {
    /// The chat stream could not be started.
    #[error("language model unavailable: {0}")]
    Upstream(#[from] LlmError),

    /// The audio output could not be opened.
    #[error("audio output failed: {0}")]
    Playback(#[from] PlaybackError),

    /// A pipeline stage panicked or was aborted.
    #[error("internal error: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The collaborators and tuning shared by every turn.
pub struct Pipeline {
    synth: Arc<dyn Synthesizer>,
    output: Arc<dyn AudioOutput>,
    segmenter: Segmenter,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        synth: Arc<dyn Synthesizer>,
        output: Arc<dyn AudioOutput>,
        segmenter: Segmenter,
        config: PipelineConfig,
    ) -> Self {
        Self {
            synth,
            output,
            segmenter,
            config,
        }
    }

    /// Speak one streamed reply.
    ///
    /// Sends `ReplyText` once the stream has ended and `Complete` once all
    /// audio has played (or the turn failed).
    pub async fn run<S>(
        &self,
        deltas: S,
        events: &UnboundedSender<TurnEvent>,
        cancel: CancelToken,
    ) -> Result<TurnSummary, TurnError>
    where
        S: Stream<Item = Result<ChatChunk, LlmError>> + Unpin + Send + 'static,
    {
        let (sentence_tx, sentence_rx) = mpsc::channel::<SentenceMessage>();
        let (audio_tx, audio_rx) =
            mpsc::sync_channel::<AudioMessage>(self.config.audio_channel_capacity());
        let latch = Arc::new(SampleRateLatch::new());

        // ── 1. Downstream stages first, so they are waiting on the channels ──
        let synthesis = SynthesisStage::new(
            Arc::clone(&self.synth),
            Arc::clone(&latch),
            self.config.clone(),
            events.clone(),
        );
        let synthesis = tokio::task::spawn_blocking(move || synthesis.run(sentence_rx, audio_tx));

        let playback = PlaybackStage::new(
            Arc::clone(&self.output),
            latch,
            self.config.clone(),
            events.clone(),
        );
        let playback = tokio::task::spawn_blocking(move || playback.run(audio_rx));

        // ── 2. Text stream consumer ─────────────────────────────────────────
        let consumer = TextStreamConsumer::new(self.segmenter, sentence_tx);
        let mut internal: Option<String> = None;
        let stream = match tokio::spawn(consumer.run(deltas, cancel)).await {
            Ok(report) => report,
            Err(e) => {
                // The consumer's Drop has already pushed the end marker.
                internal = Some(format!("text stream task: {e}"));
                StreamReport::default()
            }
        };

        // ── 3. Reply text is available before the audio finishes ────────────
        let _ = events.send(TurnEvent::ReplyText(stream.full_text.clone()));

        // ── 4. Wait for synthesis, then playback ────────────────────────────
        let synthesis = synthesis.await.unwrap_or_else(|e| {
            internal.get_or_insert(format!("synthesis task: {e}"));
            SynthesisReport::default()
        });

        let mut playback_error = None;
        let playback = match playback.await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                playback_error = Some(e);
                PlaybackReport::default()
            }
            Err(e) => {
                internal.get_or_insert(format!("playback task: {e}"));
                PlaybackReport::default()
            }
        };

        // ── 5. Summarise ────────────────────────────────────────────────────
        let error = match (playback_error, internal) {
            (Some(e), _) => Some(TurnError::Playback(e)),
            (None, Some(msg)) => Some(TurnError::Internal(msg)),
            (None, None) => None,
        };

        let summary = TurnSummary {
            reply: stream.full_text,
            sentences: stream.sentences,
            synthesized: synthesis.synthesized,
            skipped: synthesis.skipped,
            frames: playback.frames,
            underruns: playback.underruns,
            sample_rate: synthesis.sample_rate,
            tool_calls: stream.tool_calls,
            upstream_error: stream.upstream_error,
            cancelled: stream.cancelled,
            stalled: playback.stalled,
            failure: error.as_ref().map(|e| e.to_string()),
        };

        let phase = if error.is_some() {
            TurnPhase::Failed
        } else {
            TurnPhase::Done
        };
        let _ = events.send(TurnEvent::Phase(phase));
        let _ = events.send(TurnEvent::Complete(summary.clone()));

        match error {
            Some(e) => {
                log::error!("pipeline: turn failed: {e}");
                Err(e)
            }
            None if summary.is_partial() => {
                log::warn!(
                    "pipeline: turn partly played ({} of {} sentences synthesized, output stalled: {})",
                    summary.synthesized,
                    summary.sentences,
                    summary.stalled
                );
                Ok(summary)
            }
            None => {
                log::info!(
                    "pipeline: turn complete ({} sentences, {} skipped, {} frames)",
                    summary.sentences,
                    summary.skipped,
                    summary.frames
                );
                Ok(summary)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
