//! Chat Orchestrator: combines assembled context with conversation history
//! and delegates to the LLM provider.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::cache::{BookCache, BookId};
use crate::config::{ChatConfig, LlmConfig};
use crate::context::assemble;
use crate::error::{Error, Result};
use crate::session::{ChatTurn, ReadingSession};

/// One message on the LLM wire (chat-completions format).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

impl From<&ChatTurn> for ChatMessage {
    fn from(turn: &ChatTurn) -> Self {
        Self {
            role: turn.role.as_str().to_string(),
            content: turn.text.clone(),
        }
    }
}

/// Interface to the LLM provider.
///
/// Implementations own the wire format and authentication; the orchestrator
/// only supplies messages and bounds the call with a timeout.
pub trait LlmClient: Send + Sync {
    /// Send the full message list and return the assistant's reply.
    fn complete(&self, messages: Vec<ChatMessage>) -> impl Future<Output = Result<String>> + Send;
}

/// LLM client speaking the OpenAI-style chat-completions HTTP format.
pub struct HttpLlmClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: String,
}

impl HttpLlmClient {
    /// Build a client from config. The API key is read from the environment
    /// variable named by the config; a missing key just means requests go
    /// out unauthenticated (fine for local providers).
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
        })
    }
}

impl LlmClient for HttpLlmClient {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let request = CompletionRequest {
            model: &self.model,
            messages: &messages,
            stream: false,
        };

        let mut req = self.http.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?.error_for_status()?;
        let body: CompletionResponse = response.json().await?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| Error::Llm("response contained no choices".to_string()))
    }
}

/// Drives chat turns: per-session serialization, context assembly, the
/// timeout-bounded model call, and history bookkeeping.
///
/// A turn appends to history only after the assistant reply fully arrived;
/// a timed-out or failed call leaves the session exactly as it was.
pub struct ChatOrchestrator<C> {
    cache: Arc<BookCache>,
    client: C,
    config: ChatConfig,
    sessions: Mutex<HashMap<String, Arc<tokio::sync::Mutex<ReadingSession>>>>,
}

impl<C: LlmClient> ChatOrchestrator<C> {
    pub fn new(cache: Arc<BookCache>, client: C, config: ChatConfig) -> Self {
        Self {
            cache,
            client,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Create (or replace) a session bound to a cached book.
    pub fn open_session(&self, session_id: &str, book_id: BookId) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(
            session_id.to_string(),
            Arc::new(tokio::sync::Mutex::new(ReadingSession::new(book_id))),
        );
    }

    pub fn close_session(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(session_id).is_some()
    }

    fn session_handle(&self, session_id: &str) -> Result<Arc<tokio::sync::Mutex<ReadingSession>>> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    /// Clone a session's current state, for display layers (chapter
    /// position, conversation history).
    pub fn snapshot(&self, session_id: &str) -> Result<ReadingSession> {
        let handle = self.session_handle(session_id)?;
        let session = handle
            .try_lock()
            .map_err(|_| Error::SessionBusy(session_id.to_string()))?;
        Ok(session.clone())
    }

    /// Move a session's reader to a chapter (and optionally a position
    /// within it). Fails with [`Error::SessionBusy`] if a turn is in
    /// flight.
    pub fn navigate(&self, session_id: &str, chapter_id: &str, position: Option<usize>) -> Result<()> {
        let handle = self.session_handle(session_id)?;
        let mut session = handle
            .try_lock()
            .map_err(|_| Error::SessionBusy(session_id.to_string()))?;

        let ingested = self
            .cache
            .get(&session.book_id)
            .ok_or_else(|| Error::BookNotFound(session.book_id.to_string()))?;
        if ingested.book.chapter(chapter_id).is_none() {
            return Err(Error::ChapterNotFound(chapter_id.to_string()));
        }

        session.navigate(chapter_id, position);
        Ok(())
    }

    /// Store a chapter summary for later inclusion as prior-chapter
    /// context. Summary generation itself is the caller's concern.
    pub fn record_summary(&self, session_id: &str, chapter_id: &str, summary: &str) -> Result<()> {
        let handle = self.session_handle(session_id)?;
        let mut session = handle
            .try_lock()
            .map_err(|_| Error::SessionBusy(session_id.to_string()))?;
        session
            .summaries
            .insert(chapter_id.to_string(), summary.to_string());
        Ok(())
    }

    /// Run one chat turn against the given chapter.
    ///
    /// Serialized per session: a concurrent turn on the same session
    /// surfaces [`Error::SessionBusy`] rather than queueing behind a full
    /// LLM round trip.
    pub async fn send_turn(
        &self,
        session_id: &str,
        chapter_id: &str,
        user_message: &str,
    ) -> Result<String> {
        let handle = self.session_handle(session_id)?;
        let mut session = handle
            .try_lock()
            .map_err(|_| Error::SessionBusy(session_id.to_string()))?;

        let ingested = self
            .cache
            .get(&session.book_id)
            .ok_or_else(|| Error::BookNotFound(session.book_id.to_string()))?;
        let book = &ingested.book;

        let chapter = book
            .chapter(chapter_id)
            .ok_or_else(|| Error::ChapterNotFound(chapter_id.to_string()))?;
        session.navigate(chapter_id, None);

        // Summary of the immediately preceding chapter, if the session has
        // one recorded.
        let prior_summary = chapter
            .index
            .checked_sub(1)
            .map(|prev| format!("chapter-{prev}"))
            .and_then(|prev_id| session.summaries.get(&prev_id))
            .cloned();

        let context = assemble(
            book,
            chapter_id,
            self.config.token_budget,
            session.position,
            prior_summary.as_deref(),
        )?;
        debug!(
            session = session_id,
            chapter = chapter_id,
            tokens = context.tokens,
            truncated = context.truncated,
            "assembled chat context"
        );

        let mut messages = Vec::with_capacity(session.history.len() + 2);
        let mut preamble = String::from(
            "You are a reading companion. The reader is partway through a book; \
answer questions using the chapter text below and avoid spoilers from later chapters.\n",
        );
        if !book.metadata.title.is_empty() {
            preamble.push_str(&format!("\nBook: {}\n", book.metadata.title));
        }
        preamble.push_str(&format!("Chapter: {}\n", chapter.title));
        if let Some(summary) = &context.prior_summary {
            preamble.push_str(&format!("\nPreviously: {summary}\n"));
        }
        if context.truncated {
            preamble.push_str("\n[Chapter excerpt]\n");
        } else {
            preamble.push_str("\n[Chapter text]\n");
        }
        preamble.push_str(&context.text);
        messages.push(ChatMessage::system(preamble));
        messages.extend(session.history.iter().map(ChatMessage::from));
        messages.push(ChatMessage::user(user_message));

        let reply = match timeout(
            Duration::from_secs(self.config.llm.timeout_secs),
            self.client.complete(messages),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(Error::LlmTimeout(self.config.llm.timeout_secs)),
        };

        session.record_exchange(user_message, &reply, self.config.max_history_turns);
        info!(
            session = session_id,
            chapter = chapter_id,
            history_turns = session.history.len(),
            "chat turn completed"
        );
        Ok(reply)
    }
}
