//! Chapter Extractor: content documents -> plain text with segment structure.

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::book::{Segment, SegmentKind};
use crate::epub::package::{local_name, resolve_entity};
use crate::util::{decode_text, extract_xml_encoding, strip_bom};

/// A content document reduced to plain text.
pub struct ExtractedDoc {
    /// Plain-text body: segments joined by blank lines.
    pub body: String,
    /// Paragraph/heading segments with offsets into `body`.
    pub segments: Vec<Segment>,
    /// First heading text in the document, the title candidate.
    pub first_heading: Option<String>,
    /// True if decoding substituted replacement characters or markup
    /// parsing aborted early. The partial text is still usable.
    pub malformed: bool,
}

/// Elements whose entire content is dropped.
fn is_skipped_element(local: &[u8]) -> bool {
    matches!(local, b"script" | b"style" | b"head" | b"svg")
}

/// Elements that close the current segment.
fn is_block_element(local: &[u8]) -> bool {
    matches!(
        local,
        b"p" | b"div"
            | b"section"
            | b"article"
            | b"aside"
            | b"blockquote"
            | b"pre"
            | b"li"
            | b"dt"
            | b"dd"
            | b"td"
            | b"th"
            | b"tr"
            | b"caption"
            | b"figcaption"
            | b"figure"
            | b"hr"
            | b"br"
            | b"body"
    ) || heading_level(local).is_some()
}

fn heading_level(local: &[u8]) -> Option<u8> {
    match local {
        [b'h', digit @ b'1'..=b'6'] => Some(digit - b'0'),
        _ => None,
    }
}

struct TextBuilder {
    body: String,
    segments: Vec<Segment>,
    seg_start: usize,
    kind: SegmentKind,
    pending_space: bool,
    first_heading: Option<String>,
}

impl TextBuilder {
    fn new() -> Self {
        Self {
            body: String::new(),
            segments: Vec::new(),
            seg_start: 0,
            kind: SegmentKind::Paragraph,
            pending_space: false,
            first_heading: None,
        }
    }

    /// Append raw text, collapsing runs of whitespace to single spaces and
    /// dropping leading whitespace at segment starts.
    fn push_text(&mut self, raw: &str) {
        for ch in raw.chars() {
            if ch.is_whitespace() {
                self.pending_space = true;
            } else {
                if self.pending_space && self.body.len() > self.seg_start {
                    self.body.push(' ');
                }
                self.pending_space = false;
                self.body.push(ch);
            }
        }
    }

    /// Close the current segment if it has any text.
    fn flush(&mut self) {
        self.pending_space = false;
        if self.body.len() > self.seg_start {
            let segment = Segment {
                kind: self.kind,
                start: self.seg_start,
                end: self.body.len(),
            };
            if self.first_heading.is_none()
                && matches!(self.kind, SegmentKind::Heading(_))
            {
                self.first_heading = Some(self.body[segment.start..segment.end].to_string());
            }
            self.segments.push(segment);
            self.body.push_str("\n\n");
            self.seg_start = self.body.len();
        }
    }

    fn finish(mut self, malformed: bool) -> ExtractedDoc {
        self.flush();
        // Drop the separator after the final segment.
        if self.body.ends_with("\n\n") {
            self.body.truncate(self.body.len() - 2);
        }
        ExtractedDoc {
            body: self.body,
            segments: self.segments,
            first_heading: self.first_heading,
            malformed,
        }
    }
}

/// Reduce a content document to plain text.
///
/// Strips all markup, drops script/style/head subtrees, collapses
/// whitespace, and preserves paragraph and heading boundaries as segments.
/// Never fails: undecodable bytes become U+FFFD and a markup error keeps
/// whatever text was accumulated before it, with `malformed` set either way.
pub fn extract_document(bytes: &[u8]) -> ExtractedDoc {
    let hint = extract_xml_encoding(bytes);
    let (text, mut malformed) = decode_text(strip_bom(bytes), hint);

    let mut reader = Reader::from_str(&text);
    // Content documents from the wild are rarely well-formed XHTML.
    reader.config_mut().check_end_names = false;

    let mut builder = TextBuilder::new();
    let mut skip_depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());

                if skip_depth > 0 || is_skipped_element(local) {
                    skip_depth += 1;
                    continue;
                }

                if is_block_element(local) {
                    builder.flush();
                    if let Some(level) = heading_level(local) {
                        builder.kind = SegmentKind::Heading(level);
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if skip_depth == 0 && is_block_element(local) {
                    builder.flush();
                }
            }
            Ok(Event::End(e)) => {
                if skip_depth > 0 {
                    skip_depth -= 1;
                    continue;
                }

                let name = e.name();
                let local = local_name(name.as_ref());
                if is_block_element(local) {
                    builder.flush();
                    if heading_level(local).is_some() {
                        builder.kind = SegmentKind::Paragraph;
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if skip_depth == 0 {
                    builder.push_text(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::CData(e)) => {
                if skip_depth == 0 {
                    builder.push_text(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if skip_depth == 0 {
                    let entity = String::from_utf8_lossy(e.as_ref());
                    if let Some(resolved) = resolve_entity(&entity) {
                        builder.push_text(&resolved);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => {
                // Keep what we have; one broken document must not sink the
                // book.
                malformed = true;
                break;
            }
            _ => {}
        }
    }

    builder.finish(malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_paragraphs() {
        let html = b"<html><body><p>First paragraph.</p><p>Second paragraph.</p></body></html>";
        let doc = extract_document(html);

        assert_eq!(doc.body, "First paragraph.\n\nSecond paragraph.");
        assert_eq!(doc.segments.len(), 2);
        assert_eq!(doc.segments[0].text(&doc.body), "First paragraph.");
        assert_eq!(doc.segments[1].text(&doc.body), "Second paragraph.");
        assert!(doc.segments.iter().all(|s| s.kind == SegmentKind::Paragraph));
        assert!(!doc.malformed);
    }

    #[test]
    fn test_extract_heading_title_candidate() {
        let html = b"<html><body><h1>Chapter One</h1><p>It began.</p></body></html>";
        let doc = extract_document(html);

        assert_eq!(doc.first_heading.as_deref(), Some("Chapter One"));
        assert_eq!(doc.segments[0].kind, SegmentKind::Heading(1));
        assert_eq!(doc.segments[1].kind, SegmentKind::Paragraph);
        assert_eq!(doc.body, "Chapter One\n\nIt began.");
    }

    #[test]
    fn test_extract_skips_script_and_style() {
        let html = b"<html><head><title>skip me</title><style>p { color: red }</style></head>\
<body><p>Visible.</p><script>var x = 1;</script></body></html>";
        let doc = extract_document(html);

        assert_eq!(doc.body, "Visible.");
        assert_eq!(doc.segments.len(), 1);
    }

    #[test]
    fn test_extract_collapses_whitespace_and_inline_markup() {
        let html = b"<body><p>Some  <i>emphasized</i>\n   text  here.</p></body>";
        let doc = extract_document(html);

        assert_eq!(doc.body, "Some emphasized text here.");
    }

    #[test]
    fn test_extract_resolves_entities() {
        let html = b"<body><p>Don&apos;t &amp; won&#8217;t</p></body>";
        let doc = extract_document(html);

        assert_eq!(doc.body, "Don't & won\u{2019}t");
    }

    #[test]
    fn test_extract_br_breaks_segment() {
        let html = b"<body><p>line one<br/>line two</p></body>";
        let doc = extract_document(html);

        assert_eq!(doc.body, "line one\n\nline two");
        assert_eq!(doc.segments.len(), 2);
    }

    #[test]
    fn test_extract_latin1_document() {
        // ISO-8859-1 encoded "café" with a declared charset
        let mut html = Vec::new();
        html.extend_from_slice(b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>");
        html.extend_from_slice(b"<body><p>caf\xE9</p></body>");
        let doc = extract_document(&html);

        assert_eq!(doc.body, "caf\u{e9}");
        assert!(!doc.malformed);
    }

    #[test]
    fn test_extract_undecodable_bytes_marked_malformed() {
        // Declared UTF-8 but contains an invalid sequence; the fallback
        // decode still yields text and the document is flagged.
        let html = b"<?xml version=\"1.0\" encoding=\"utf-8\"?><body><p>ok \xFF\xFE</p></body>";
        let doc = extract_document(html);

        assert!(doc.malformed);
        assert!(doc.body.starts_with("ok"));
    }

    #[test]
    fn test_extract_empty_document() {
        let doc = extract_document(b"<html><body></body></html>");
        assert_eq!(doc.body, "");
        assert!(doc.segments.is_empty());
        assert_eq!(doc.first_heading, None);
    }

    #[test]
    fn test_extract_nested_blocks() {
        let html = b"<body><div><p>Inner one.</p><blockquote>Quoted.</blockquote></div></body>";
        let doc = extract_document(html);

        assert_eq!(doc.body, "Inner one.\n\nQuoted.");
        assert_eq!(doc.segments.len(), 2);
    }
}
