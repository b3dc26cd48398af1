//! Text stream consumer: chat deltas in, sentences out.
//!
//! [`TextStreamConsumer`] accumulates streamed reply text in a working
//! buffer.  Whenever the buffer holds a sentence-terminal mark, everything up
//! to and including the rightmost one is segmented and pushed onto the
//! sentence channel; the rest stays buffered.  At stream end the remainder is
//! flushed and a single [`SentenceMessage::End`] is pushed.
//!
//! ```text
//! Accumulating ──delta──▶ Accumulating   (zero or more sentences emitted)
//!              ──end / error / cancel──▶ Done   (flush + End, exactly once)
//! ```
//!
//! Upstream failure is not a pipeline fault: it ends the stream, and the
//! downstream stages drain and terminate as usual.

use std::sync::mpsc::Sender;

use futures::{Stream, StreamExt};

use super::cancel::CancelToken;
use super::segment::{Segmenter, Sentence};
use crate::llm::{ChatChunk, LlmError, ToolCall};

/// Item carried by the sentence channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentenceMessage {
    Sentence(Sentence),
    /// No more sentences will follow.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsumerState {
    Accumulating,
    Done,
}

/// What the consumer saw over the whole stream.
#[derive(Debug, Clone, Default)]
pub struct StreamReport {
    /// Every content delta concatenated, for transcript display.
    pub full_text: String,
    /// Tool-call signals, forwarded untouched.
    pub tool_calls: Vec<ToolCall>,
    /// Sentences pushed onto the sentence channel.
    pub sentences: usize,
    /// Set when the upstream stream ended with an error.
    pub upstream_error: Option<String>,
    /// Set when the turn was cancelled before the stream ended.
    pub cancelled: bool,
}

/// Turns a stream of chat deltas into sentences on the sentence channel.
pub struct TextStreamConsumer {
    segmenter: Segmenter,
    tx: Sender<SentenceMessage>,
    buffer: String,
    report: StreamReport,
    state: ConsumerState,
    receiver_gone: bool,
}

impl TextStreamConsumer {
    pub fn new(segmenter: Segmenter, tx: Sender<SentenceMessage>) -> Self {
        Self {
            segmenter,
            tx,
            buffer: String::new(),
            report: StreamReport::default(),
            state: ConsumerState::Accumulating,
            receiver_gone: false,
        }
    }

    /// Drive the consumer until `deltas` ends, fails, or `cancel` fires.
    ///
    /// Always pushes [`SentenceMessage::End`] before returning.
    pub async fn run<S>(mut self, mut deltas: S, mut cancel: CancelToken) -> StreamReport
    where
        S: Stream<Item = Result<ChatChunk, LlmError>> + Unpin,
    {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::info!("text stream: turn cancelled, flushing buffered text");
                    self.report.cancelled = true;
                    break;
                }
                next = deltas.next() => match next {
                    Some(Ok(chunk)) => self.push_chunk(chunk),
                    Some(Err(e)) => {
                        log::warn!("text stream: upstream failed ({e}); treating as end of stream");
                        self.report.upstream_error = Some(e.to_string());
                        break;
                    }
                    None => break,
                },
            }
        }

        self.into_report()
    }

    /// Feed one chunk: tool-call signals are recorded, content is buffered.
    pub fn push_chunk(&mut self, chunk: ChatChunk) {
        if chunk.is_tool_call_signal() {
            log::debug!("text stream: {} tool call signal(s)", chunk.tool_calls.len());
            self.report.tool_calls.extend(chunk.tool_calls);
        }
        self.push_delta(&chunk.content);
    }

    /// Append a content delta and emit every sentence it completes.
    pub fn push_delta(&mut self, delta: &str) {
        if self.state == ConsumerState::Done || delta.is_empty() {
            return;
        }

        self.buffer.push_str(delta);
        self.report.full_text.push_str(delta);

        if let Some(at) = self.segmenter.commit_point(&self.buffer) {
            let committed: String = self.buffer.drain(..at).collect();
            self.emit(&committed);
        }
    }

    /// Flush the remainder and push the end marker.  Idempotent.
    pub fn finish(&mut self) {
        if self.state == ConsumerState::Done {
            return;
        }

        let rest = std::mem::take(&mut self.buffer);
        if !rest.trim().is_empty() {
            self.emit(&rest);
        }

        // The synthesis stage may already be gone; nothing left to tell it.
        let _ = self.tx.send(SentenceMessage::End);
        self.state = ConsumerState::Done;

        log::info!(
            "text stream: done ({} sentences, {} chars)",
            self.report.sentences,
            self.report.full_text.chars().count()
        );
    }

    pub fn is_done(&self) -> bool {
        self.state == ConsumerState::Done
    }

    /// Finish (if not already) and hand back the report.
    pub fn into_report(mut self) -> StreamReport {
        self.finish();
        std::mem::take(&mut self.report)
    }

    fn emit(&mut self, text: &str) {
        for sentence in self.segmenter.segment(text) {
            log::debug!("text stream: → synthesis: {sentence}");
            self.report.sentences += 1;

            if self.tx.send(SentenceMessage::Sentence(sentence)).is_err() && !self.receiver_gone {
                log::debug!("text stream: sentence channel closed, text is transcript-only");
                self.receiver_gone = true;
            }
        }
    }
}

impl Drop for TextStreamConsumer {
    /// A consumer dropped mid-stream (task aborted, panic unwinding) still
    /// terminates the sentence channel.
    fn drop(&mut self) {
        self.finish();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
