//! Reading sessions: per-user-per-book chapter position and chat history.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cache::BookId;

/// Who spoke a chat turn. Serialized lowercase to match the chat-completions
/// wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in a session's conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

/// Mutable per-user-per-book state: where the reader is and what has been
/// said. Mutated by at most one chat turn at a time; the orchestrator
/// guards each session with a lock.
#[derive(Debug, Clone)]
pub struct ReadingSession {
    pub book_id: BookId,
    pub chapter_id: String,
    /// Reader's byte offset into the current chapter body, if tracked.
    pub position: Option<usize>,
    pub history: Vec<ChatTurn>,
    /// Caller-provided chapter summaries, keyed by chapter id. Generation
    /// is delegated to the LLM layer; this is just storage.
    pub summaries: HashMap<String, String>,
}

impl ReadingSession {
    pub fn new(book_id: BookId) -> Self {
        Self {
            book_id,
            chapter_id: "chapter-0".to_string(),
            position: None,
            history: Vec::new(),
            summaries: HashMap::new(),
        }
    }

    /// Move the reader. Changing chapters resets the in-chapter position
    /// unless the caller supplies one.
    pub fn navigate(&mut self, chapter_id: &str, position: Option<usize>) {
        if self.chapter_id != chapter_id {
            self.chapter_id = chapter_id.to_string();
            self.position = position;
        } else if position.is_some() {
            self.position = position;
        }
    }

    /// Append a completed user/assistant exchange, dropping the oldest
    /// turns beyond `max_turns`. Called only after the assistant reply
    /// fully arrived, so a failed turn never half-appends.
    pub fn record_exchange(&mut self, user_text: &str, assistant_text: &str, max_turns: usize) {
        self.history.push(ChatTurn {
            role: Role::User,
            text: user_text.to_string(),
        });
        self.history.push(ChatTurn {
            role: Role::Assistant,
            text: assistant_text.to_string(),
        });
        if self.history.len() > max_turns {
            let excess = self.history.len() - max_turns;
            self.history.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ReadingSession {
        ReadingSession::new(BookId::of_bytes(b"test"))
    }

    #[test]
    fn test_navigate_resets_position_on_chapter_change() {
        let mut s = session();
        s.position = Some(100);

        s.navigate("chapter-3", None);
        assert_eq!(s.chapter_id, "chapter-3");
        assert_eq!(s.position, None);

        s.navigate("chapter-3", Some(42));
        assert_eq!(s.position, Some(42));

        // Re-navigating the same chapter without a position keeps it
        s.navigate("chapter-3", None);
        assert_eq!(s.position, Some(42));
    }

    #[test]
    fn test_record_exchange_appends_in_order() {
        let mut s = session();
        s.record_exchange("hello", "hi there", 10);

        assert_eq!(s.history.len(), 2);
        assert_eq!(s.history[0].role, Role::User);
        assert_eq!(s.history[0].text, "hello");
        assert_eq!(s.history[1].role, Role::Assistant);
        assert_eq!(s.history[1].text, "hi there");
    }

    #[test]
    fn test_history_trimmed_to_max_turns() {
        let mut s = session();
        for i in 0..10 {
            s.record_exchange(&format!("q{i}"), &format!("a{i}"), 6);
        }

        assert_eq!(s.history.len(), 6);
        // Oldest turns dropped, newest kept
        assert_eq!(s.history[0].text, "q7");
        assert_eq!(s.history[5].text, "a9");
    }
}
