//! # lectern
//!
//! EPUB ingestion and chapter-context chat core: upload an EPUB, navigate it
//! chapter by chapter, and chat with an LLM that is automatically given the
//! text of the chapter being read.
//!
//! ## Features
//!
//! - Parse EPUB 2/3 containers into a typed [`Book`] (manifest, spine, TOC,
//!   per-chapter plain text with stable ids)
//! - Lenient handling of real-world irregularities (duplicate manifest ids,
//!   dangling spine references, missing navigation documents, charset
//!   variance) with accumulated [`IngestWarning`]s
//! - Token-budgeted [`ChatContext`] assembly anchored at the reader's
//!   position
//! - Timeout-bounded chat orchestration over a pluggable [`LlmClient`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use lectern::ingest;
//!
//! let bytes = std::fs::read("book.epub")?;
//! let ingested = ingest(&bytes)?;
//! println!("Title: {}", ingested.book.metadata.title);
//! for chapter in &ingested.book.chapters {
//!     println!("{}  {}", chapter.id, chapter.title);
//! }
//! # Ok::<(), lectern::Error>(())
//! ```
//!
//! ## Chatting about a chapter
//!
//! ```no_run
//! use std::sync::Arc;
//! use lectern::{BookCache, ChatConfig, ChatOrchestrator, HttpLlmClient};
//!
//! # async fn run() -> lectern::Result<()> {
//! let cache = Arc::new(BookCache::new());
//! let bytes = std::fs::read("book.epub")?;
//! let (book_id, _ingested) = cache.get_or_ingest(bytes).await?;
//!
//! let config = ChatConfig::default();
//! let client = HttpLlmClient::from_config(&config.llm)?;
//! let chat = ChatOrchestrator::new(cache, client, config);
//!
//! chat.open_session("alice", book_id.clone());
//! let reply = chat
//!     .send_turn("alice", "chapter-0", "Who is the narrator?")
//!     .await?;
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```

pub mod book;
pub mod cache;
pub mod chat;
pub mod config;
pub mod context;
pub mod epub;
pub mod error;
pub mod session;
pub(crate) mod util;

pub use book::{
    Book, Chapter, IngestWarning, Ingested, ManifestItem, Metadata, Segment, SegmentKind,
    SpineEntry, TocEntry, TocTarget,
};
pub use cache::{BookCache, BookId};
pub use chat::{ChatMessage, ChatOrchestrator, HttpLlmClient, LlmClient};
pub use config::{ChatConfig, LlmConfig};
pub use context::{ChatContext, assemble, estimate_tokens};
pub use epub::ingest;
pub use error::{Error, Result};
pub use session::{ChatTurn, ReadingSession, Role};
