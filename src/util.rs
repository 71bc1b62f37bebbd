//! Byte and text helpers shared across the ingestion pipeline.

use std::borrow::Cow;

use memchr::memmem;
use percent_encoding::percent_decode_str;

/// Decode bytes to a string, handling various encodings.
///
/// 1. First tries UTF-8 (handles BOM automatically via encoding_rs)
/// 2. If malformed, tries the hint encoding (from `<?xml encoding="..."?>`)
/// 3. Falls back to Windows-1252 (common in old ebooks)
///
/// Undecodable sequences are replaced with U+FFFD rather than failing, so a
/// single bad document never aborts ingestion. The second tuple element
/// reports whether any replacement happened.
pub fn decode_text<'a>(bytes: &'a [u8], hint_encoding: Option<&str>) -> (Cow<'a, str>, bool) {
    let (result, _, malformed) = encoding_rs::UTF_8.decode(bytes);
    if !malformed {
        return (result, false);
    }

    if let Some(name) = hint_encoding
        && let Some(encoding) = encoding_rs::Encoding::for_label(name.as_bytes())
    {
        let (result, _, malformed) = encoding.decode(bytes);
        return (result, malformed);
    }

    // Windows-1252 is a superset of ISO-8859-1 and decodes every byte.
    let (result, _, malformed) = encoding_rs::WINDOWS_1252.decode(bytes);
    (result, malformed)
}

/// Extract the declared encoding from an XML declaration, if any.
///
/// Only the first 100 bytes are scanned; that is where a declaration lives.
pub fn extract_xml_encoding(bytes: &[u8]) -> Option<&str> {
    let prefix = &bytes[..bytes.len().min(100)];

    let xml_start = memmem::find(prefix, b"<?xml")?;
    let after_xml = &prefix[xml_start..];

    let enc_pos = memmem::find(after_xml, b"encoding=")?;
    let after_enc = &after_xml[enc_pos + 9..];

    let quote = *after_enc.first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }

    let value_end = after_enc[1..].iter().position(|&b| b == quote)? + 1;
    std::str::from_utf8(&after_enc[1..value_end]).ok()
}

/// Strip UTF-8 BOM if present.
pub fn strip_bom(data: &[u8]) -> &[u8] {
    if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &data[3..]
    } else {
        data
    }
}

/// Split an in-document fragment off an href (`"ch1.xhtml#s3"`).
pub fn split_fragment(href: &str) -> (&str, Option<&str>) {
    match href.split_once('#') {
        Some((path, frag)) if !frag.is_empty() => (path, Some(frag)),
        Some((path, _)) => (path, None),
        None => (href, None),
    }
}

/// Resolve an href relative to a directory inside the archive.
///
/// Percent-decodes the href and normalizes `.`/`..` segments so that hrefs
/// from the package document and from navigation documents (which live in
/// different directories) land on comparable archive paths.
pub fn resolve_href(base_dir: &str, href: &str) -> String {
    let decoded = percent_decode_str(href).decode_utf8_lossy();

    let mut parts: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Directory portion of an archive path ("OEBPS/content.opf" -> "OEBPS").
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text_utf8() {
        let (text, malformed) = decode_text("héllo".as_bytes(), None);
        assert_eq!(text, "héllo");
        assert!(!malformed);
    }

    #[test]
    fn test_decode_text_latin1_fallback() {
        // "café" in ISO-8859-1: é = 0xE9, invalid as UTF-8
        let bytes = [b'c', b'a', b'f', 0xE9];
        let (text, _) = decode_text(&bytes, None);
        assert_eq!(text, "café");
    }

    #[test]
    fn test_decode_text_with_hint() {
        let bytes = [b'c', b'a', b'f', 0xE9];
        let (text, malformed) = decode_text(&bytes, Some("iso-8859-1"));
        assert_eq!(text, "café");
        assert!(!malformed);
    }

    #[test]
    fn test_extract_xml_encoding() {
        assert_eq!(
            extract_xml_encoding(br#"<?xml version="1.0" encoding="ISO-8859-1"?><html/>"#),
            Some("ISO-8859-1")
        );
        assert_eq!(
            extract_xml_encoding(br#"<?xml version="1.0" encoding='utf-8'?>"#),
            Some("utf-8")
        );
        assert_eq!(extract_xml_encoding(br#"<?xml version="1.0"?>"#), None);
        assert_eq!(extract_xml_encoding(b"<html></html>"), None);
    }

    #[test]
    fn test_strip_bom() {
        let with_bom = &[0xEF, 0xBB, 0xBF, b'h', b'i'];
        assert_eq!(strip_bom(with_bom), b"hi");
        assert_eq!(strip_bom(b"hello"), b"hello");
        assert_eq!(strip_bom(b""), b"");
    }

    #[test]
    fn test_split_fragment() {
        assert_eq!(split_fragment("ch1.xhtml#s3"), ("ch1.xhtml", Some("s3")));
        assert_eq!(split_fragment("ch1.xhtml"), ("ch1.xhtml", None));
        assert_eq!(split_fragment("ch1.xhtml#"), ("ch1.xhtml", None));
    }

    #[test]
    fn test_resolve_href() {
        assert_eq!(resolve_href("OEBPS", "ch1.xhtml"), "OEBPS/ch1.xhtml");
        assert_eq!(resolve_href("", "ch1.xhtml"), "ch1.xhtml");
        assert_eq!(
            resolve_href("OEBPS/text", "../images/cover.jpg"),
            "OEBPS/images/cover.jpg"
        );
        assert_eq!(resolve_href("OEBPS", "./ch1.xhtml"), "OEBPS/ch1.xhtml");
        assert_eq!(
            resolve_href("OEBPS", "My%20Chapter.xhtml"),
            "OEBPS/My Chapter.xhtml"
        );
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("OEBPS/content.opf"), "OEBPS");
        assert_eq!(parent_dir("content.opf"), "");
        assert_eq!(parent_dir("a/b/c.opf"), "a/b");
    }
}
