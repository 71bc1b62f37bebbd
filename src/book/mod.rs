use std::collections::HashMap;

use thiserror::Error;

/// A fully ingested book: package structure plus extracted chapters.
///
/// Built once per successful ingestion and immutable afterwards, so it is
/// safe to share behind an `Arc` across any number of concurrent readers.
#[derive(Debug, Clone, Default)]
pub struct Book {
    pub metadata: Metadata,
    /// Manifest id -> item. First declaration wins on duplicate ids.
    pub manifest: HashMap<String, ManifestItem>,
    /// Canonical reading sequence, in package document order.
    pub spine: Vec<SpineEntry>,
    /// Resolved table of contents. Every surviving entry targets a chapter
    /// that exists.
    pub toc: Vec<TocEntry>,
    /// Extracted chapters, one per linear spine entry, in spine order.
    pub chapters: Vec<Chapter>,
}

/// Book metadata extracted from the package document.
///
/// Missing values stay empty rather than failing ingestion.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub identifier: String,
    pub title: String,
    pub language: String,
    pub authors: Vec<String>,
}

/// A resource declared in the package manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    /// Path inside the archive, relative to the package document.
    pub href: String,
    pub media_type: String,
    /// Space-separated property tokens (e.g. "nav", "scripted").
    pub properties: Option<String>,
}

impl ManifestItem {
    /// Check for a property token (e.g. `nav`, `cover-image`).
    pub fn has_property(&self, name: &str) -> bool {
        self.properties
            .as_ref()
            .is_some_and(|props| props.split_ascii_whitespace().any(|p| p == name))
    }
}

/// An entry in the reading order (spine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineEntry {
    /// Manifest id of the referenced item.
    pub idref: String,
    /// Whether this entry is part of the primary reading order. Non-linear
    /// entries never become chapters.
    pub linear: bool,
}

/// A table of contents entry (hierarchical).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub label: String,
    pub target: TocTarget,
    pub children: Vec<TocEntry>,
}

/// Resolved target of a TOC entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocTarget {
    /// Manifest id of the target document.
    pub item_id: String,
    /// Chapter produced from that document.
    pub chapter_id: String,
    /// In-document fragment identifier, if the source href carried one.
    pub fragment: Option<String>,
}

impl TocEntry {
    pub fn new(label: impl Into<String>, target: TocTarget) -> Self {
        Self {
            label: label.into(),
            target,
            children: Vec::new(),
        }
    }

    /// Number of entries in this subtree, including self.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(TocEntry::count).sum::<usize>()
    }
}

/// Kind of an extracted text segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Paragraph,
    /// Heading with its level (1-6).
    Heading(u8),
}

/// A paragraph or heading inside a chapter body.
///
/// `start..end` are byte offsets into [`Chapter::body`]; segments are
/// non-overlapping and ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub start: usize,
    pub end: usize,
}

impl Segment {
    /// Slice this segment's text out of a chapter body.
    pub fn text<'a>(&self, body: &'a str) -> &'a str {
        &body[self.start..self.end]
    }
}

/// One linear spine entry reduced to plain text.
///
/// Ids are `chapter-<n>` where n is the entry's ordinal among linear spine
/// entries, so re-ingesting identical archive bytes yields identical ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub id: String,
    /// Ordinal among linear spine entries (the n in `chapter-<n>`).
    pub index: usize,
    /// Manifest id of the source document.
    pub item_id: String,
    pub title: String,
    pub body: String,
    pub segments: Vec<Segment>,
}

impl Chapter {
    /// Slice of `body` covering `segments[from..=to]`.
    pub fn segment_range(&self, from: usize, to: usize) -> &str {
        &self.body[self.segments[from].start..self.segments[to].end]
    }
}

/// A recoverable problem encountered during ingestion.
///
/// Warnings never abort ingestion; the offending entity is dropped (or
/// placeholder-substituted) and the book remains usable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestWarning {
    #[error("duplicate manifest id {id:?}: kept first declaration, discarded href {discarded_href:?}")]
    DuplicateManifestId { id: String, discarded_href: String },

    #[error("spine itemref {idref:?} does not match any manifest item; entry skipped")]
    DanglingSpineReference { idref: String },

    #[error("TOC entry {label:?} targets {href:?} which is not a linear spine document; entry dropped")]
    UnresolvableTocTarget { label: String, href: String },

    #[error("chapter {chapter_id} ({href:?}) could not be fully decoded; placeholder text substituted")]
    ChapterDecodeFailure { chapter_id: String, href: String },
}

/// Result of a successful ingestion: the book plus any recoverable issues
/// encountered along the way ("book loaded with N issues").
#[derive(Debug, Clone, Default)]
pub struct Ingested {
    pub book: Book,
    pub warnings: Vec<IngestWarning>,
}

impl Book {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a chapter by its stable id.
    pub fn chapter(&self, id: &str) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.id == id)
    }

    /// Chapter produced from the given manifest item, if any.
    pub fn chapter_for_item(&self, item_id: &str) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.item_id == item_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_property() {
        let item = ManifestItem {
            id: "nav".into(),
            href: "nav.xhtml".into(),
            media_type: "application/xhtml+xml".into(),
            properties: Some("nav scripted".into()),
        };
        assert!(item.has_property("nav"));
        assert!(item.has_property("scripted"));
        assert!(!item.has_property("cover-image"));

        let plain = ManifestItem {
            properties: None,
            ..item.clone()
        };
        assert!(!plain.has_property("nav"));
    }

    #[test]
    fn test_toc_entry_count() {
        let target = TocTarget {
            item_id: "ch1".into(),
            chapter_id: "chapter-0".into(),
            fragment: None,
        };
        let mut root = TocEntry::new("Part I", target.clone());
        root.children.push(TocEntry::new("Chapter 1", target.clone()));
        root.children.push(TocEntry::new("Chapter 2", target));
        assert_eq!(root.count(), 3);
    }

    #[test]
    fn test_segment_text() {
        let body = "Hello\n\nWorld";
        let seg = Segment {
            kind: SegmentKind::Paragraph,
            start: 7,
            end: 12,
        };
        assert_eq!(seg.text(body), "World");
    }
}
