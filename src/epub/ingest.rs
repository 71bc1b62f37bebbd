//! Whole-book ingestion: archive bytes in, structured book out.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::book::{Book, Chapter, IngestWarning, Ingested};
use crate::epub::container::Container;
use crate::epub::extract::extract_document;
use crate::epub::package::parse_opf;
use crate::epub::toc::{label_for_item, parse_nav, parse_ncx, resolve_toc, synthesize_toc};
use crate::error::{Error, Result};
use crate::util::{parent_dir, resolve_href};

/// Ingest an EPUB archive into a [`Book`].
///
/// Runs the whole pipeline in one pass: container descriptor, package
/// document, chapter extraction for every linear spine entry, and TOC
/// resolution. Fatal archive-structure errors abort with no partial book;
/// recoverable per-entity problems are accumulated as warnings on the
/// result.
///
/// Ingestion is idempotent: identical archive bytes yield identical chapter
/// ids and bodies.
pub fn ingest(bytes: &[u8]) -> Result<Ingested> {
    let mut warnings: Vec<IngestWarning> = Vec::new();

    let mut container = Container::open(bytes.to_vec())?;
    let rootfile = container.rootfile_path()?;
    let opf_dir = parent_dir(&rootfile).to_string();

    let opf_text = match container.read_text(&rootfile) {
        Ok(text) => text,
        Err(Error::Zip(zip::result::ZipError::FileNotFound)) => {
            return Err(Error::MissingRootFile(rootfile));
        }
        Err(e) => return Err(e),
    };
    let opf = parse_opf(&opf_text, &mut warnings)?;
    debug!(
        manifest_items = opf.manifest.len(),
        spine_entries = opf.spine.len(),
        "parsed package document"
    );

    // Extract a chapter for every linear spine entry, in spine order.
    // Chapter ids are dense ordinals over linear entries only.
    let mut chapters: Vec<Chapter> = Vec::new();
    for entry in &opf.spine {
        if !entry.linear {
            continue;
        }
        let item = &opf.manifest[&entry.idref];
        let index = chapters.len();
        let id = format!("chapter-{index}");
        let path = resolve_href(&opf_dir, &item.href);

        let (body, segments, first_heading, malformed) = match container.read_bytes(&path) {
            Ok(doc_bytes) => {
                let doc = extract_document(&doc_bytes);
                (doc.body, doc.segments, doc.first_heading, doc.malformed)
            }
            Err(_) => {
                // Declared but absent content document: keep the chapter
                // slot so ids stay dense, with an empty body.
                (String::new(), Vec::new(), None, true)
            }
        };

        if malformed {
            warnings.push(IngestWarning::ChapterDecodeFailure {
                chapter_id: id.clone(),
                href: item.href.clone(),
            });
        }

        debug!(chapter = %id, chars = body.len(), segments = segments.len(), "extracted chapter");
        chapters.push(Chapter {
            id,
            index,
            item_id: entry.idref.clone(),
            title: first_heading.unwrap_or_else(|| "Untitled".to_string()),
            body,
            segments,
        });
    }

    // Map archive paths of chapter documents to (manifest id, chapter id)
    // for TOC target resolution.
    let path_to_chapter: HashMap<String, (String, String)> = chapters
        .iter()
        .map(|chapter| {
            let href = &opf.manifest[&chapter.item_id].href;
            (
                resolve_href(&opf_dir, href),
                (chapter.item_id.clone(), chapter.id.clone()),
            )
        })
        .collect();

    // Navigation source priority: EPUB3 nav document, then EPUB2 NCX, then
    // a synthesized flat list so navigation is always available.
    let mut raw_toc = None;
    if let Some(item) = opf.manifest.values().find(|i| i.has_property("nav")) {
        let path = resolve_href(&opf_dir, &item.href);
        if let Ok(text) = container.read_text(&path) {
            raw_toc = Some((parse_nav(&text), parent_dir(&path).to_string()));
        }
    }
    if raw_toc.is_none()
        && let Some(toc_id) = &opf.toc_id
        && let Some(item) = opf.manifest.get(toc_id)
    {
        let path = resolve_href(&opf_dir, &item.href);
        if let Ok(text) = container.read_text(&path) {
            raw_toc = Some((parse_ncx(&text), parent_dir(&path).to_string()));
        }
    }

    let toc = match raw_toc {
        Some((raw, nav_dir)) if !raw.is_empty() => {
            let resolved = resolve_toc(raw, &nav_dir, &path_to_chapter, &mut warnings);
            if resolved.is_empty() {
                synthesize_toc(&chapters)
            } else {
                resolved
            }
        }
        _ => synthesize_toc(&chapters),
    };

    // Title resolution: TOC label, else the first heading (already in
    // place), else "Untitled".
    let labels: Vec<Option<String>> = chapters
        .iter()
        .map(|c| label_for_item(&toc, &c.item_id).map(str::to_string))
        .collect();
    for (chapter, label) in chapters.iter_mut().zip(labels) {
        if let Some(label) = label {
            chapter.title = label;
        }
    }

    info!(
        title = %opf.metadata.title,
        chapters = chapters.len(),
        toc_entries = toc.iter().map(|e| e.count()).sum::<usize>(),
        warnings = warnings.len(),
        "ingested book"
    );

    Ok(Ingested {
        book: Book {
            metadata: opf.metadata,
            manifest: opf.manifest,
            spine: opf.spine,
            toc,
            chapters,
        },
        warnings,
    })
}
