//! Rolling conversation history sent with every chat request.
//!
//! [`ChatHistory`] keeps the last *N* user/assistant exchanges plus an
//! optional system prompt, and builds the full message list for the next
//! request.  Only completed exchanges are recorded; a turn whose reply was
//! empty leaves the history untouched.

use std::collections::VecDeque;

use crate::config::LlmConfig;
use crate::llm::chat::ChatMessage;

// ---------------------------------------------------------------------------
// ChatHistory
// ---------------------------------------------------------------------------

pub struct ChatHistory {
    system_prompt: Option<String>,
    exchanges: VecDeque<(String, String)>,
    max_exchanges: usize,
}

impl ChatHistory {
    pub fn new(system_prompt: Option<String>, max_exchanges: usize) -> Self {
        Self {
            system_prompt,
            exchanges: VecDeque::new(),
            max_exchanges,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(config.system_prompt.clone(), config.history_turns)
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Append a finished exchange, dropping the oldest beyond the window.
    pub fn record_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        if self.max_exchanges == 0 {
            return;
        }
        self.exchanges.push_back((user.into(), assistant.into()));
        while self.exchanges.len() > self.max_exchanges {
            self.exchanges.pop_front();
        }
    }

    pub fn reset(&mut self) {
        self.exchanges.clear();
    }

    // -----------------------------------------------------------------------
    // Query
    // -----------------------------------------------------------------------

    /// Message list for a request: system prompt, history, then `user`.
    pub fn messages_with(&self, user: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.exchanges.len() * 2 + 2);

        if let Some(prompt) = self.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            messages.push(ChatMessage::system(prompt));
        }
        for (u, a) in &self.exchanges {
            messages.push(ChatMessage::user(u.as_str()));
            messages.push(ChatMessage::assistant(a.as_str()));
        }
        messages.push(ChatMessage::user(user));
        messages
    }

    /// Number of exchanges currently held.
    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::chat::Role;

    #[test]
    fn starts_empty_with_only_user_message() {
        let history = ChatHistory::new(None, 3);
        assert!(history.is_empty());
        let msgs = history.messages_with("你好");
        assert_eq!(msgs, vec![ChatMessage::user("你好")]);
    }

    #[test]
    fn system_prompt_comes_first() {
        let history = ChatHistory::new(Some("You are terse.".into()), 3);
        let msgs = history.messages_with("hi");
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(msgs[1], ChatMessage::user("hi"));
    }

    #[test]
    fn blank_system_prompt_is_skipped() {
        let history = ChatHistory::new(Some("  ".into()), 3);
        assert_eq!(history.messages_with("hi").len(), 1);
    }

    #[test]
    fn exchanges_are_interleaved_in_order() {
        let mut history = ChatHistory::new(None, 3);
        history.record_exchange("q1", "a1");
        history.record_exchange("q2", "a2");

        let msgs = history.messages_with("q3");
        let contents: Vec<&str> = msgs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["q1", "a1", "q2", "a2", "q3"]);
        assert_eq!(msgs[1].role, Role::Assistant);
    }

    #[test]
    fn rolling_window_caps_exchanges() {
        let mut history = ChatHistory::new(None, 2);
        for i in 0..5 {
            history.record_exchange(format!("q{i}"), format!("a{i}"));
        }
        assert_eq!(history.len(), 2);

        let msgs = history.messages_with("next");
        assert!(!msgs.iter().any(|m| m.content == "q2"));
        assert!(msgs.iter().any(|m| m.content == "q3"));
        assert!(msgs.iter().any(|m| m.content == "a4"));
    }

    #[test]
    fn zero_window_keeps_nothing() {
        let mut history = ChatHistory::new(None, 0);
        history.record_exchange("q", "a");
        assert!(history.is_empty());
    }

    #[test]
    fn unbounded_window_allocates_lazily() {
        let mut history = ChatHistory::new(None, usize::MAX);
        assert!(history.is_empty());
        history.record_exchange("一", "二");
        assert_eq!(history.len(), 1);
        assert_eq!(history.messages_with("三").len(), 3);
    }

    #[test]
    fn reset_clears_exchanges() {
        let mut history = ChatHistory::from_config(&LlmConfig::default());
        history.record_exchange("q", "a");
        history.reset();
        assert!(history.is_empty());
    }
}
