//! Turn phases and the events a turn reports to its caller.
//!
//! [`TurnPhase`] is the coarse state a front-end shows (spinner, speaker
//! icon, error badge).  [`TurnEvent`]s are sent over an unbounded tokio
//! channel while the turn runs; `ReplyText` and `Complete` are each sent
//! exactly once per turn.

use crate::llm::ToolCall;

// ---------------------------------------------------------------------------
// TurnPhase
// ---------------------------------------------------------------------------

/// Phases of one voice turn.
///
/// ```text
/// Thinking ──first audio opened──▶ Speaking ──drained──▶ Done
///     │                                │
///     └──────────turn-level error──────┴──────────────▶ Failed
/// Thinking ──reply without audio──────────────────────▶ Done
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    /// Waiting on the language model; no audio yet.
    #[default]
    Thinking,

    /// The output is open and audio is playing.
    Speaking,

    /// The turn finished; any audio has been played.
    Done,

    /// A turn-level error ended the turn.
    Failed,
}

impl TurnPhase {
    /// `true` until the turn has reached a terminal phase.
    ///
    /// ```
    /// use voice_assistant::pipeline::TurnPhase;
    ///
    /// assert!(TurnPhase::Thinking.is_busy());
    /// assert!(TurnPhase::Speaking.is_busy());
    /// assert!(!TurnPhase::Done.is_busy());
    /// assert!(!TurnPhase::Failed.is_busy());
    /// ```
    pub fn is_busy(&self) -> bool {
        matches!(self, TurnPhase::Thinking | TurnPhase::Speaking)
    }

    /// A short human-readable label suitable for a status line.
    pub fn label(&self) -> &'static str {
        match self {
            TurnPhase::Thinking => "Thinking",
            TurnPhase::Speaking => "Speaking",
            TurnPhase::Done => "Done",
            TurnPhase::Failed => "Error",
        }
    }
}

// ---------------------------------------------------------------------------
// TurnSummary
// ---------------------------------------------------------------------------

/// Final accounting for one turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnSummary {
    /// Full reply text as streamed by the model.
    pub reply: String,
    /// Sentences produced by segmentation.
    pub sentences: usize,
    /// Sentences that produced audio.
    pub synthesized: usize,
    /// Sentences dropped after a synthesis failure.
    pub skipped: usize,
    /// Audio frames handed to playback.
    pub frames: usize,
    /// Output requests padded with silence before the end.
    pub underruns: usize,
    /// Sample rate locked for the turn, if any audio was produced.
    pub sample_rate: Option<u32>,
    /// Tool-call signals seen in the stream, untouched.
    pub tool_calls: Vec<ToolCall>,
    /// Upstream error that ended the stream early.
    pub upstream_error: Option<String>,
    pub cancelled: bool,
    /// The output stopped consuming and the rest of the audio was dropped.
    pub stalled: bool,
    /// Turn-level failure, if the turn did not complete normally.
    pub failure: Option<String>,
}

impl TurnSummary {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// The turn finished but part of the reply was never heard: a sentence
    /// failed to synthesize or the output stalled.
    pub fn is_partial(&self) -> bool {
        self.is_success() && (self.stalled || self.skipped > 0)
    }
}

// ---------------------------------------------------------------------------
// TurnEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    Phase(TurnPhase),
    /// Synthesis of sentence `index` (0-based) has started.
    Synthesizing { index: usize },
    /// The full reply text, as soon as the model stream has ended.
    ReplyText(String),
    Complete(TurnSummary),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_phase_is_thinking() {
        assert_eq!(TurnPhase::default(), TurnPhase::Thinking);
    }

    #[test]
    fn labels() {
        assert_eq!(TurnPhase::Thinking.label(), "Thinking");
        assert_eq!(TurnPhase::Speaking.label(), "Speaking");
        assert_eq!(TurnPhase::Done.label(), "Done");
        assert_eq!(TurnPhase::Failed.label(), "Error");
    }

    #[test]
    fn terminal_phases_are_not_busy() {
        assert!(!TurnPhase::Done.is_busy());
        assert!(!TurnPhase::Failed.is_busy());
    }

    #[test]
    fn summary_success_tracks_failure() {
        let mut summary = TurnSummary::default();
        assert!(summary.is_success());
        summary.failure = Some("device unplugged".into());
        assert!(!summary.is_success());
    }

    #[test]
    fn lost_audio_makes_a_turn_partial() {
        let mut summary = TurnSummary::default();
        assert!(!summary.is_partial());

        summary.stalled = true;
        assert!(summary.is_success());
        assert!(summary.is_partial());

        summary.stalled = false;
        summary.skipped = 1;
        assert!(summary.is_partial());

        summary.failure = Some("device unplugged".into());
        assert!(!summary.is_partial());
    }

    #[test]
    fn turn_event_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<TurnEvent>();
    }
}
