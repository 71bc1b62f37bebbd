//! TOC Resolver: navigation document (EPUB3) or NCX (EPUB2) -> TocEntry tree.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::warn;

use crate::book::{Chapter, IngestWarning, TocEntry, TocTarget};
use crate::epub::package::{local_name, resolve_entity};
use crate::util::{parent_dir, resolve_href, split_fragment};

/// A TOC node as it appears in the navigation source, before target
/// resolution. Unlinked nodes (e.g. a part heading rendered as a span)
/// carry no href but may still have children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTocEntry {
    pub label: String,
    pub href: Option<String>,
    pub children: Vec<RawTocEntry>,
}

/// Parse an EPUB2 NCX document (`navMap`/`navPoint`) into raw TOC nodes.
pub fn parse_ncx(content: &str) -> Vec<RawTocEntry> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    struct NavPointState {
        children: Vec<RawTocEntry>,
        text: Option<String>,
        src: Option<String>,
    }

    let mut stack: Vec<NavPointState> = vec![NavPointState {
        children: Vec::new(),
        text: None,
        src: None,
    }];
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                match local {
                    b"navPoint" => {
                        stack.push(NavPointState {
                            children: Vec::new(),
                            text: None,
                            src: None,
                        });
                    }
                    b"text" => in_text = true,
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if local == b"content" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"src"
                            && let Some(state) = stack.last_mut()
                        {
                            state.src =
                                Some(String::from_utf8_lossy(&attr.value).into_owned());
                        }
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if in_text && let Some(state) = stack.last_mut() {
                    let raw = String::from_utf8_lossy(e.as_ref());
                    match &mut state.text {
                        Some(existing) => existing.push_str(&raw),
                        None => state.text = Some(raw.into_owned()),
                    }
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if in_text && let Some(state) = stack.last_mut() {
                    let entity = String::from_utf8_lossy(e.as_ref());
                    if let Some(resolved) = resolve_entity(&entity) {
                        match &mut state.text {
                            Some(existing) => existing.push_str(&resolved),
                            None => state.text = Some(resolved),
                        }
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                match local {
                    b"text" => in_text = false,
                    b"navPoint" => {
                        if let Some(state) = stack.pop() {
                            let entry = RawTocEntry {
                                label: state.text.unwrap_or_default(),
                                href: state.src,
                                children: state.children,
                            };
                            if let Some(parent) = stack.last_mut() {
                                parent.children.push(entry);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!("NCX parse aborted: {e}");
                break;
            }
            _ => {}
        }
    }

    stack.pop().map(|s| s.children).unwrap_or_default()
}

/// Parse an EPUB3 navigation document into raw TOC nodes.
///
/// Looks for `<nav epub:type="toc">` (or `role="doc-toc"`); if no nav is
/// marked as the TOC, the first nav element is used.
pub fn parse_nav(content: &str) -> Vec<RawTocEntry> {
    let strict = parse_nav_inner(content, true);
    if !strict.is_empty() {
        return strict;
    }
    parse_nav_inner(content, false)
}

fn parse_nav_inner(content: &str, require_toc_type: bool) -> Vec<RawTocEntry> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);
    reader.config_mut().check_end_names = false;

    struct LiState {
        label: String,
        href: Option<String>,
        children: Vec<RawTocEntry>,
    }

    let mut root: Vec<RawTocEntry> = Vec::new();
    let mut stack: Vec<LiState> = Vec::new();
    let mut in_toc_nav = false;
    let mut nav_done = false;
    // Depth of open label-bearing elements (a/span) inside the current li.
    let mut capture_label = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());

                match local {
                    b"nav" if !in_toc_nav && !nav_done => {
                        let mut nav_type: Option<String> = None;
                        for attr in e.attributes().flatten() {
                            let key = local_name(attr.key.as_ref());
                            if key == b"type" || key == b"role" {
                                nav_type =
                                    Some(String::from_utf8_lossy(&attr.value).into_owned());
                            }
                        }
                        in_toc_nav = match nav_type.as_deref() {
                            Some("toc") | Some("doc-toc") => true,
                            None => !require_toc_type,
                            Some(_) => false,
                        };
                    }
                    b"li" if in_toc_nav => {
                        stack.push(LiState {
                            label: String::new(),
                            href: None,
                            children: Vec::new(),
                        });
                    }
                    b"a" if in_toc_nav => {
                        if let Some(state) = stack.last_mut() {
                            for attr in e.attributes().flatten() {
                                if attr.key.as_ref() == b"href" {
                                    state.href =
                                        Some(String::from_utf8_lossy(&attr.value).into_owned());
                                }
                            }
                            capture_label += 1;
                        }
                    }
                    b"span" if in_toc_nav && !stack.is_empty() => {
                        capture_label += 1;
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if capture_label > 0 && let Some(state) = stack.last_mut() {
                    let raw = String::from_utf8_lossy(e.as_ref());
                    if !state.label.is_empty() && !state.label.ends_with(' ') {
                        state.label.push(' ');
                    }
                    state.label.push_str(raw.trim());
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if capture_label > 0 && let Some(state) = stack.last_mut() {
                    let entity = String::from_utf8_lossy(e.as_ref());
                    if let Some(resolved) = resolve_entity(&entity) {
                        state.label.push_str(&resolved);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());

                match local {
                    b"nav" if in_toc_nav => {
                        in_toc_nav = false;
                        nav_done = true;
                    }
                    b"a" | b"span" => capture_label = capture_label.saturating_sub(1),
                    b"li" if in_toc_nav => {
                        capture_label = 0;
                        if let Some(state) = stack.pop() {
                            let entry = RawTocEntry {
                                label: state.label.trim().to_string(),
                                href: state.href,
                                children: state.children,
                            };
                            // An li with neither link nor children is noise.
                            if entry.href.is_some() || !entry.children.is_empty() {
                                if let Some(parent) = stack.last_mut() {
                                    parent.children.push(entry);
                                } else {
                                    root.push(entry);
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!("navigation document parse aborted: {e}");
                break;
            }
            _ => {}
        }
    }

    root
}

/// Resolve raw TOC nodes against the extracted chapters.
///
/// Hrefs are resolved relative to the navigation source's directory and
/// matched to chapters by archive path. An entry whose target is not a
/// linear spine document is dropped with a warning; its children are
/// spliced into its place so siblings and descendants survive. Unlinked
/// nodes contribute their children directly.
pub fn resolve_toc(
    raw: Vec<RawTocEntry>,
    nav_dir: &str,
    path_to_chapter: &HashMap<String, (String, String)>,
    warnings: &mut Vec<IngestWarning>,
) -> Vec<TocEntry> {
    let mut resolved = Vec::with_capacity(raw.len());

    for entry in raw {
        let children = resolve_toc(entry.children, nav_dir, path_to_chapter, warnings);

        let Some(href) = entry.href else {
            resolved.extend(children);
            continue;
        };

        let (path, fragment) = split_fragment(&href);
        let abs_path = resolve_href(nav_dir, path);

        match path_to_chapter.get(&abs_path) {
            Some((item_id, chapter_id)) => {
                resolved.push(TocEntry {
                    label: entry.label,
                    target: TocTarget {
                        item_id: item_id.clone(),
                        chapter_id: chapter_id.clone(),
                        fragment: fragment.map(str::to_string),
                    },
                    children,
                });
            }
            None => {
                warn!(label = %entry.label, href = %href, "TOC target is not a linear spine document; dropping entry");
                warnings.push(IngestWarning::UnresolvableTocTarget {
                    label: entry.label,
                    href,
                });
                resolved.extend(children);
            }
        }
    }

    resolved
}

/// Synthesize a flat TOC: one entry per chapter, in spine order.
///
/// Used when the book has no usable navigation source, so chapter
/// navigation is always available.
pub fn synthesize_toc(chapters: &[Chapter]) -> Vec<TocEntry> {
    chapters
        .iter()
        .map(|chapter| TocEntry {
            label: chapter.title.clone(),
            target: TocTarget {
                item_id: chapter.item_id.clone(),
                chapter_id: chapter.id.clone(),
                fragment: None,
            },
            children: Vec::new(),
        })
        .collect()
}

/// Find the first non-empty TOC label whose target is the given manifest
/// item.
///
/// Depth-first, so a parent chapter entry wins over a sub-section entry.
pub fn label_for_item<'a>(entries: &'a [TocEntry], item_id: &str) -> Option<&'a str> {
    for entry in entries {
        if entry.target.item_id == item_id && !entry.label.is_empty() {
            return Some(&entry.label);
        }
        if let Some(label) = label_for_item(&entry.children, item_id) {
            return Some(label);
        }
    }
    None
}
