//! Per-session state: chat history plus the collaborators a turn needs.
//!
//! [`VoiceSession`] is the one object a front-end holds.  Every turn builds
//! the request from the session's own [`ChatHistory`], streams the reply
//! through the [`Pipeline`], and records the finished exchange.  Nothing is
//! shared through globals; two sessions never see each other's history.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::audio::AudioOutput;
use crate::config::AppConfig;
use crate::llm::{ChatBackend, ChatHistory};
use crate::pipeline::runner::{Pipeline, TurnError};
use crate::pipeline::state::{TurnEvent, TurnPhase, TurnSummary};
use crate::text::{CancelToken, Segmenter};
use crate::tts::Synthesizer;

pub struct VoiceSession {
    backend: Arc<dyn ChatBackend>,
    history: ChatHistory,
    pipeline: Pipeline,
    speech_hint: Option<String>,
}

impl VoiceSession {
    pub fn new(
        config: &AppConfig,
        backend: Arc<dyn ChatBackend>,
        synth: Arc<dyn Synthesizer>,
        output: Arc<dyn AudioOutput>,
    ) -> Self {
        let pipeline = Pipeline::new(
            synth,
            output,
            Segmenter::from_config(&config.segmenter),
            config.pipeline.clone(),
        );

        Self {
            backend,
            history: ChatHistory::from_config(&config.llm),
            pipeline,
            speech_hint: config
                .llm
                .speech_hint
                .clone()
                .filter(|h| !h.trim().is_empty()),
        }
    }

    /// Ask the model and speak its reply.
    ///
    /// # Errors
    ///
    /// [`TurnError::Upstream`] when the chat stream cannot be started (no
    /// stage runs in that case), or whatever [`Pipeline::run`] reports.
    pub async fn run_turn(
        &mut self,
        user_text: &str,
        events: &UnboundedSender<TurnEvent>,
        cancel: CancelToken,
    ) -> Result<TurnSummary, TurnError> {
        let _ = events.send(TurnEvent::Phase(TurnPhase::Thinking));

        let prompt = match &self.speech_hint {
            Some(hint) => format!("{user_text}{hint}"),
            None => user_text.to_owned(),
        };
        let messages = self.history.messages_with(&prompt);

        let deltas = match self.backend.stream_chat(&messages).await {
            Ok(deltas) => deltas,
            Err(e) => {
                log::error!("session: chat stream failed to start: {e}");
                let err = TurnError::Upstream(e);
                let summary = TurnSummary {
                    failure: Some(err.to_string()),
                    ..TurnSummary::default()
                };
                let _ = events.send(TurnEvent::Phase(TurnPhase::Failed));
                let _ = events.send(TurnEvent::Complete(summary));
                return Err(err);
            }
        };

        let result = self.pipeline.run(deltas, events, cancel).await;

        if let Ok(summary) = &result {
            if !summary.reply.trim().is_empty() {
                self.history.record_exchange(user_text, summary.reply.clone());
            }
        }

        result
    }

    /// Forget the conversation so far.
    pub fn reset_history(&mut self) {
        self.history.reset();
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::StreamingOutput;
    use crate::config::PipelineConfig;
    use crate::llm::{ChatChunk, LlmError, MockChat, Role};
    use crate::tts::MockSynthesizer;
    use tokio::sync::mpsc::unbounded_channel;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.system_prompt = Some("You are a helpful voice assistant.".into());
        config.llm.speech_hint = Some("（请用口语回答）".into());
        config.pipeline = PipelineConfig {
            frame_ms: 100,
            max_buffered_secs: 1,
            playback_block: 64,
            feed_timeout_ms: 5,
            stall_timeout_ms: 500,
        };
        config
    }

    fn session(chat: Arc<MockChat>) -> VoiceSession {
        let (output, _pcm) = StreamingOutput::new();
        VoiceSession::new(
            &config(),
            chat,
            Arc::new(MockSynthesizer::new(1_000, 10)),
            Arc::new(output),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn turn_records_exchange_and_appends_hint() {
        let chat = Arc::new(MockChat::deltas(&["今天", "晴天。"]));
        let mut s = session(Arc::clone(&chat));
        let (tx, _rx) = unbounded_channel();

        let summary = s.run_turn("天气如何", &tx, CancelToken::never()).await.unwrap();
        assert_eq!(summary.reply, "今天晴天。");
        assert_eq!(s.history_len(), 1);

        let sent = &chat.requests()[0];
        assert_eq!(sent[0].role, Role::System);
        assert_eq!(sent.last().unwrap().content, "天气如何（请用口语回答）");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_turn_carries_history_without_hint() {
        let chat = Arc::new(MockChat::deltas(&["好的。"]));
        let mut s = session(Arc::clone(&chat));
        let (tx, _rx) = unbounded_channel();

        s.run_turn("第一句", &tx, CancelToken::never()).await.unwrap();
        s.run_turn("第二句", &tx, CancelToken::never()).await.unwrap();

        let second = &chat.requests()[1];
        let contents: Vec<&str> = second.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            [
                "You are a helpful voice assistant.",
                "第一句",
                "好的。",
                "第二句（请用口语回答）"
            ]
        );
    }

    #[tokio::test]
    async fn unreachable_backend_fails_before_any_stage() {
        let chat = Arc::new(MockChat::unreachable());
        let mut s = session(chat);
        let (tx, mut rx) = unbounded_channel();

        let err = s.run_turn("hi", &tx, CancelToken::never()).await.unwrap_err();
        assert!(matches!(err, TurnError::Upstream(_)));
        assert_eq!(s.history_len(), 0);

        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        assert!(!events.iter().any(|e| matches!(e, TurnEvent::ReplyText(_))));
        assert!(events.contains(&TurnEvent::Phase(TurnPhase::Failed)));
        assert!(matches!(events.last(), Some(TurnEvent::Complete(summary)) if !summary.is_success()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reply_cut_short_upstream_is_still_recorded() {
        let chat = Arc::new(MockChat::items(vec![
            Ok(ChatChunk::text("先说结论。")),
            Ok(ChatChunk::text("然后")),
            Err(LlmError::Request("connection reset".into())),
        ]));
        let mut s = session(Arc::clone(&chat));
        let (tx, _rx) = unbounded_channel();

        let summary = s.run_turn("总结一下", &tx, CancelToken::never()).await.unwrap();
        assert_eq!(summary.reply, "先说结论。然后");
        assert!(summary.upstream_error.is_some());
        assert_eq!(summary.sentences, 2);
        assert_eq!(s.history_len(), 1);

        // The partial reply becomes context for the next turn.
        s.run_turn("继续", &tx, CancelToken::never()).await.unwrap();
        let second = &chat.requests()[1];
        assert!(second.iter().any(|m| m.content == "先说结论。然后"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_reply_is_not_recorded() {
        let chat = Arc::new(MockChat::deltas(&[]));
        let mut s = session(chat);
        let (tx, _rx) = unbounded_channel();

        let summary = s.run_turn("hi", &tx, CancelToken::never()).await.unwrap();
        assert_eq!(summary.sentences, 0);
        assert_eq!(s.history_len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reset_history_forgets_exchanges() {
        let chat = Arc::new(MockChat::deltas(&["嗯。"]));
        let mut s = session(chat);
        let (tx, _rx) = unbounded_channel();

        s.run_turn("hi", &tx, CancelToken::never()).await.unwrap();
        s.reset_history();
        assert_eq!(s.history_len(), 0);
    }
}
