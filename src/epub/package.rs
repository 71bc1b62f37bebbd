//! Package Parser: OPF package document -> metadata, manifest, spine.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::warn;

use crate::book::{IngestWarning, ManifestItem, Metadata, SpineEntry};
use crate::error::{Error, Result};

/// Parsed package document.
pub struct OpfData {
    pub metadata: Metadata,
    /// Manifest id -> item. First declaration wins on duplicate ids.
    pub manifest: HashMap<String, ManifestItem>,
    /// Spine entries whose idref resolved to a manifest item, in document
    /// order.
    pub spine: Vec<SpineEntry>,
    /// Value of `<spine toc="...">`: manifest id of the legacy NCX document.
    pub toc_id: Option<String>,
}

/// Parse an OPF package document.
///
/// Structural XML errors are fatal; duplicate manifest ids and dangling
/// spine references are recorded as warnings and the offending entity is
/// dropped, since both are common in books from the wild.
pub fn parse_opf(content: &str, warnings: &mut Vec<IngestWarning>) -> Result<OpfData> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut metadata = Metadata::default();
    let mut manifest: HashMap<String, ManifestItem> = HashMap::new();
    let mut spine_refs: Vec<(String, bool)> = Vec::new();
    let mut toc_id: Option<String> = None;

    let mut in_metadata = false;
    let mut current_element: Option<String> = None;
    let mut buf_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());

                match local {
                    b"metadata" => in_metadata = true,
                    b"title" | b"creator" | b"language" | b"identifier" => {
                        if in_metadata {
                            current_element = Some(String::from_utf8_lossy(local).to_string());
                            buf_text.clear();
                        }
                    }
                    b"spine" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"toc" {
                                toc_id = Some(String::from_utf8_lossy(&attr.value).into_owned());
                            }
                        }
                    }
                    b"item" => record_item(&e, &mut manifest, warnings),
                    b"itemref" => record_itemref(&e, &mut spine_refs),
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());

                match local {
                    b"item" => record_item(&e, &mut manifest, warnings),
                    b"itemref" => record_itemref(&e, &mut spine_refs),
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if current_element.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if current_element.is_some() {
                    let entity = String::from_utf8_lossy(e.as_ref());
                    if let Some(resolved) = resolve_entity(&entity) {
                        buf_text.push_str(&resolved);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());

                if local == b"metadata" {
                    in_metadata = false;
                }

                if let Some(ref elem) = current_element {
                    match elem.as_str() {
                        "title" => metadata.title = buf_text.clone(),
                        "creator" => metadata.authors.push(buf_text.clone()),
                        "language" => metadata.language = buf_text.clone(),
                        "identifier" if metadata.identifier.is_empty() => {
                            metadata.identifier = buf_text.clone()
                        }
                        _ => {}
                    }
                    current_element = None;
                    buf_text.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
    }

    // Resolve spine refs against the finished manifest. Orphaned idrefs are
    // skipped, not fatal.
    let mut spine = Vec::with_capacity(spine_refs.len());
    for (idref, linear) in spine_refs {
        if manifest.contains_key(&idref) {
            spine.push(SpineEntry { idref, linear });
        } else {
            warn!(idref = %idref, "spine itemref does not match any manifest item; skipping");
            warnings.push(IngestWarning::DanglingSpineReference { idref });
        }
    }

    Ok(OpfData {
        metadata,
        manifest,
        spine,
        toc_id,
    })
}

fn record_item(
    e: &BytesStart,
    manifest: &mut HashMap<String, ManifestItem>,
    warnings: &mut Vec<IngestWarning>,
) {
    let mut id = String::new();
    let mut href = String::new();
    let mut media_type = String::new();
    let mut properties: Option<String> = None;

    for attr in e.attributes().flatten() {
        let value = String::from_utf8_lossy(&attr.value).into_owned();
        match attr.key.as_ref() {
            b"id" => id = value,
            b"href" => href = value,
            b"media-type" => media_type = value,
            b"properties" => properties = Some(value),
            _ => {}
        }
    }

    if id.is_empty() {
        return;
    }

    if manifest.contains_key(&id) {
        // First declaration wins; the duplicate is recorded, not lost
        // silently.
        warn!(id = %id, discarded = %href, "duplicate manifest id; keeping first declaration");
        warnings.push(IngestWarning::DuplicateManifestId {
            id,
            discarded_href: href,
        });
        return;
    }

    manifest.insert(
        id.clone(),
        ManifestItem {
            id,
            href,
            media_type,
            properties,
        },
    );
}

fn record_itemref(e: &BytesStart, spine_refs: &mut Vec<(String, bool)>) {
    let mut idref: Option<String> = None;
    let mut linear = true;

    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"idref" => idref = Some(String::from_utf8_lossy(&attr.value).into_owned()),
            b"linear" => linear = !attr.value.eq_ignore_ascii_case(b"no"),
            _ => {}
        }
    }

    if let Some(idref) = idref {
        spine_refs.push((idref, linear));
    }
}

/// Extract local name from namespaced XML name (e.g., "dc:title" -> "title").
pub(crate) fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

/// Resolve XML entity references.
pub(crate) fn resolve_entity(entity: &str) -> Option<String> {
    match entity {
        "apos" => return Some("'".to_string()),
        "quot" => return Some("\"".to_string()),
        "lt" => return Some("<".to_string()),
        "gt" => return Some(">".to_string()),
        "amp" => return Some("&".to_string()),
        "nbsp" => return Some(" ".to_string()),
        _ => {}
    }

    if let Some(hex) = entity.strip_prefix("#x") {
        if let Ok(code) = u32::from_str_radix(hex, 16)
            && let Some(c) = char::from_u32(code)
        {
            return Some(c.to_string());
        }
    } else if let Some(dec) = entity.strip_prefix('#')
        && let Ok(code) = dec.parse::<u32>()
        && let Some(c) = char::from_u32(code)
    {
        return Some(c.to_string());
    }

    None
}
