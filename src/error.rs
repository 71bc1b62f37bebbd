//! Error types for lectern operations.

use thiserror::Error;

/// Errors that can occur during ingestion, context assembly, or chat.
///
/// Archive-structure errors (`InvalidArchive`, `MissingContainerDescriptor`,
/// `MissingRootFile`) are fatal to ingestion: no partial book is produced.
/// Per-entity problems (duplicate ids, dangling references, undecodable
/// chapters) are not errors at all; they accumulate as
/// [`IngestWarning`](crate::IngestWarning)s on the ingested book.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    #[error("missing container descriptor (META-INF/container.xml)")]
    MissingContainerDescriptor,

    #[error("package document not found in archive: {0}")]
    MissingRootFile(String),

    #[error("invalid package document: {0}")]
    InvalidPackage(String),

    #[error("no book cached under id {0}")]
    BookNotFound(String),

    #[error("no chapter with id {0}")]
    ChapterNotFound(String),

    #[error("token budget {budget} cannot fit a single segment ({required} tokens required)")]
    BudgetTooSmall { budget: usize, required: usize },

    #[error("no session with id {0}")]
    SessionNotFound(String),

    #[error("session {0} has a turn in flight")]
    SessionBusy(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[cfg(feature = "cli")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("LLM call exceeded {0} second timeout")]
    LlmTimeout(u64),

    #[error("LLM provider error: {0}")]
    Llm(String),
}

pub type Result<T> = std::result::Result<T, Error>;
