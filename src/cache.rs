//! Book cache: explicit lifecycle plus per-book ingestion serialization.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::book::Ingested;
use crate::epub::ingest;
use crate::error::Result;

/// Opaque, content-addressed book identity: the SHA-256 of the archive
/// bytes. Identical uploads map to the same id, which is what makes
/// re-ingestion a cache hit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BookId(String);

impl BookId {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// In-memory cache of ingested books.
///
/// Completed books are immutable and shared as `Arc<Ingested>`. Ingestion
/// for a given book id is serialized: concurrent [`get_or_ingest`] calls
/// for the same bytes wait on the in-flight result instead of duplicating
/// work.
///
/// [`get_or_ingest`]: BookCache::get_or_ingest
#[derive(Default)]
pub struct BookCache {
    books: Mutex<HashMap<BookId, Arc<Ingested>>>,
    /// Per-book ingestion gates. A gate outlives eviction of its book so a
    /// re-upload still serializes against any straggling ingestion.
    gates: Mutex<HashMap<BookId, Arc<tokio::sync::Mutex<()>>>>,
}

impl BookCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an externally ingested book, replacing any previous entry.
    pub fn put(&self, id: BookId, ingested: Ingested) -> Arc<Ingested> {
        let entry = Arc::new(ingested);
        let mut books = self.books.lock().unwrap_or_else(PoisonError::into_inner);
        books.insert(id, entry.clone());
        entry
    }

    pub fn get(&self, id: &BookId) -> Option<Arc<Ingested>> {
        let books = self.books.lock().unwrap_or_else(PoisonError::into_inner);
        books.get(id).cloned()
    }

    pub fn evict(&self, id: &BookId) -> bool {
        let mut books = self.books.lock().unwrap_or_else(PoisonError::into_inner);
        books.remove(id).is_some()
    }

    pub fn ids(&self) -> Vec<BookId> {
        let books = self.books.lock().unwrap_or_else(PoisonError::into_inner);
        books.keys().cloned().collect()
    }

    /// Return the cached book for these bytes, ingesting it first if
    /// needed.
    ///
    /// At most one ingestion runs per book id; concurrent callers for a
    /// not-yet-ingested book wait on the winner's result. A failed
    /// ingestion caches nothing.
    pub async fn get_or_ingest(&self, bytes: Vec<u8>) -> Result<(BookId, Arc<Ingested>)> {
        let id = BookId::of_bytes(&bytes);

        if let Some(ready) = self.get(&id) {
            debug!(book = %id, "cache hit");
            return Ok((id, ready));
        }

        let gate = {
            let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
            gates
                .entry(id.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _ingesting = gate.lock().await;

        // The winner may have finished while we waited on the gate.
        if let Some(ready) = self.get(&id) {
            debug!(book = %id, "cache hit after waiting on in-flight ingestion");
            return Ok((id, ready));
        }

        info!(book = %id, bytes = bytes.len(), "ingesting book");
        let ingested = ingest(&bytes)?;
        let entry = self.put(id.clone(), ingested);
        Ok((id, entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_id_is_deterministic() {
        let a = BookId::of_bytes(b"same bytes");
        let b = BookId::of_bytes(b"same bytes");
        let c = BookId::of_bytes(b"other bytes");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_put_get_evict() {
        let cache = BookCache::new();
        let id = BookId::of_bytes(b"book");

        assert!(cache.get(&id).is_none());

        cache.put(id.clone(), Ingested::default());
        assert!(cache.get(&id).is_some());
        assert_eq!(cache.ids(), vec![id.clone()]);

        assert!(cache.evict(&id));
        assert!(cache.get(&id).is_none());
        assert!(!cache.evict(&id));
    }
}
