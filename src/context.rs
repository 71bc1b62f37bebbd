//! Context Assembler: token-budgeted chapter text for a chat turn.

use crate::book::Book;
use crate::error::{Error, Result};

/// Estimate the token count of a text.
///
/// Uses the ~4-characters-per-token heuristic common for English prose.
/// The assembler and its budget guarantees are defined against this
/// estimator; swapping in a real tokenizer only means changing this
/// function.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// The text block to inject into one chat turn. Ephemeral: built fresh per
/// turn, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatContext {
    pub chapter_id: String,
    /// The chapter text slice actually included.
    pub text: String,
    /// True if the chapter did not fit the budget in full.
    pub truncated: bool,
    /// Summary of the immediately preceding chapter, if the caller supplied
    /// one and it fit the leftover budget.
    pub prior_summary: Option<String>,
    /// Estimated token count of everything included.
    pub tokens: usize,
}

/// Build the chapter context for a chat turn.
///
/// Pure function of the cached book plus its arguments. Selection works on
/// whole segments: the segment containing `position` (start of chapter when
/// no position is tracked) is the anchor, then the slice grows forward and
/// finally backward while the budget holds, so the kept text is the text
/// nearest the reader. Truncation never splits a segment and always sets
/// the `truncated` flag.
///
/// Fails with [`Error::BudgetTooSmall`] when not even the anchor segment
/// fits, and [`Error::ChapterNotFound`] for an unknown chapter id.
pub fn assemble(
    book: &Book,
    chapter_id: &str,
    token_budget: usize,
    position: Option<usize>,
    prior_summary: Option<&str>,
) -> Result<ChatContext> {
    let chapter = book
        .chapter(chapter_id)
        .ok_or_else(|| Error::ChapterNotFound(chapter_id.to_string()))?;

    if chapter.segments.is_empty() {
        // Image-only or unreadable chapter: nothing to include.
        return Ok(ChatContext {
            chapter_id: chapter.id.clone(),
            text: String::new(),
            truncated: false,
            prior_summary: None,
            tokens: 0,
        });
    }

    // Character count per segment, so slice token estimates are O(1).
    // Segments are joined by two-character separators in the body.
    let seg_chars: Vec<usize> = chapter
        .segments
        .iter()
        .map(|s| s.text(&chapter.body).chars().count())
        .collect();
    let slice_tokens = |lo: usize, hi: usize| -> usize {
        let chars: usize = seg_chars[lo..=hi].iter().sum::<usize>() + 2 * (hi - lo);
        chars.div_ceil(4)
    };

    let anchor = match position {
        Some(pos) => chapter
            .segments
            .iter()
            .rposition(|s| s.start <= pos)
            .unwrap_or(0),
        None => 0,
    };

    let required = slice_tokens(anchor, anchor);
    if required > token_budget {
        return Err(Error::BudgetTooSmall {
            budget: token_budget,
            required,
        });
    }

    let mut lo = anchor;
    let mut hi = anchor;
    while hi + 1 < chapter.segments.len() && slice_tokens(lo, hi + 1) <= token_budget {
        hi += 1;
    }
    while lo > 0 && slice_tokens(lo - 1, hi) <= token_budget {
        lo -= 1;
    }

    let text = chapter.segment_range(lo, hi).to_string();
    let mut tokens = slice_tokens(lo, hi);
    let truncated = lo > 0 || hi + 1 < chapter.segments.len();

    // Spend leftover budget on the previous chapter's summary, if the
    // caller has one and this is not the first chapter.
    let mut included_summary = None;
    if let Some(summary) = prior_summary
        && chapter.index > 0
        && !summary.is_empty()
    {
        let summary_tokens = estimate_tokens(summary);
        if tokens + summary_tokens <= token_budget {
            included_summary = Some(summary.to_string());
            tokens += summary_tokens;
        }
    }

    Ok(ChatContext {
        chapter_id: chapter.id.clone(),
        text,
        truncated,
        prior_summary: included_summary,
        tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::{Chapter, Segment, SegmentKind};
    use proptest::prelude::*;

    /// Build a chapter whose body is the given paragraphs joined by blank
    /// lines, with matching segments.
    fn chapter_from_paragraphs(index: usize, paragraphs: &[&str]) -> Chapter {
        let mut body = String::new();
        let mut segments = Vec::new();
        for (i, para) in paragraphs.iter().enumerate() {
            if i > 0 {
                body.push_str("\n\n");
            }
            let start = body.len();
            body.push_str(para);
            segments.push(Segment {
                kind: SegmentKind::Paragraph,
                start,
                end: body.len(),
            });
        }
        Chapter {
            id: format!("chapter-{index}"),
            index,
            item_id: format!("item{index}"),
            title: format!("Chapter {index}"),
            body,
            segments,
        }
    }

    fn book_with(chapters: Vec<Chapter>) -> Book {
        Book {
            chapters,
            ..Book::default()
        }
    }

    #[test]
    fn test_whole_chapter_fits() {
        let book = book_with(vec![chapter_from_paragraphs(0, &["Short one.", "Short two."])]);
        let ctx = assemble(&book, "chapter-0", 1000, None, None).unwrap();

        assert_eq!(ctx.text, "Short one.\n\nShort two.");
        assert!(!ctx.truncated);
        assert_eq!(ctx.tokens, estimate_tokens(&ctx.text));
    }

    #[test]
    fn test_truncates_from_start_without_position() {
        // 100 paragraphs of 400 chars: ~10k tokens total.
        let para = "x".repeat(400);
        let paras: Vec<&str> = (0..100).map(|_| para.as_str()).collect();
        let book = book_with(vec![chapter_from_paragraphs(0, &paras)]);

        let ctx = assemble(&book, "chapter-0", 500, None, None).unwrap();

        assert!(ctx.truncated);
        assert!(ctx.tokens <= 500);
        // Keeps from the start when no position is tracked
        assert!(ctx.text.starts_with(&para));
        assert_eq!(ctx.text, &book.chapters[0].body[..ctx.text.len()]);
    }

    #[test]
    fn test_truncation_anchors_at_reader_position() {
        // Distinct paragraph prefixes so the slice can be located uniquely.
        let paras: Vec<String> = (0..100)
            .map(|i| format!("{:03} {}", i, "y".repeat(396)))
            .collect();
        let paras: Vec<&str> = paras.iter().map(String::as_str).collect();
        let book = book_with(vec![chapter_from_paragraphs(0, &paras)]);
        let chapter = &book.chapters[0];

        // Reader is at paragraph 50
        let pos = chapter.segments[50].start;
        let ctx = assemble(&book, "chapter-0", 500, Some(pos), None).unwrap();

        assert!(ctx.truncated);
        assert!(ctx.tokens <= 500);
        // The included slice must contain the reader's paragraph
        let slice_start = chapter.body.find(&ctx.text).unwrap();
        assert!(slice_start <= pos);
        assert!(pos < slice_start + ctx.text.len());
        // And it must not start at the chapter beginning
        assert!(slice_start > 0);
    }

    #[test]
    fn test_budget_too_small() {
        let book = book_with(vec![chapter_from_paragraphs(0, &["A paragraph that is comfortably longer than one token."])]);

        match assemble(&book, "chapter-0", 2, None, None) {
            Err(Error::BudgetTooSmall { budget, required }) => {
                assert_eq!(budget, 2);
                assert!(required > 2);
            }
            other => panic!("expected BudgetTooSmall, got {other:?}"),
        }
    }

    #[test]
    fn test_chapter_not_found() {
        let book = book_with(vec![chapter_from_paragraphs(0, &["Text."])]);
        assert!(matches!(
            assemble(&book, "chapter-9", 100, None, None),
            Err(Error::ChapterNotFound(_))
        ));
    }

    #[test]
    fn test_prior_summary_included_when_budget_remains() {
        let book = book_with(vec![
            chapter_from_paragraphs(0, &["First chapter."]),
            chapter_from_paragraphs(1, &["Second chapter."]),
        ]);

        let ctx = assemble(&book, "chapter-1", 1000, None, Some("Earlier, things happened.")).unwrap();

        assert_eq!(ctx.prior_summary.as_deref(), Some("Earlier, things happened."));
        assert!(ctx.tokens <= 1000);
        assert_eq!(
            ctx.tokens,
            estimate_tokens(&ctx.text) + estimate_tokens("Earlier, things happened.")
        );
    }

    #[test]
    fn test_prior_summary_skipped_when_budget_exhausted() {
        let para = "z".repeat(400);
        let book = book_with(vec![
            chapter_from_paragraphs(0, &["First."]),
            chapter_from_paragraphs(1, &[para.as_str()]),
        ]);

        // Budget fits the paragraph (100 tokens) with almost nothing left
        let ctx = assemble(&book, "chapter-1", 101, None, Some(&"s".repeat(200))).unwrap();

        assert_eq!(ctx.prior_summary, None);
        assert!(ctx.tokens <= 101);
    }

    #[test]
    fn test_no_summary_for_first_chapter() {
        let book = book_with(vec![chapter_from_paragraphs(0, &["Only chapter."])]);
        let ctx = assemble(&book, "chapter-0", 1000, None, Some("stale summary")).unwrap();
        assert_eq!(ctx.prior_summary, None);
    }

    #[test]
    fn test_empty_chapter_yields_empty_context() {
        let book = book_with(vec![Chapter {
            id: "chapter-0".into(),
            index: 0,
            item_id: "item0".into(),
            title: "Untitled".into(),
            body: String::new(),
            segments: vec![],
        }]);

        let ctx = assemble(&book, "chapter-0", 10, None, None).unwrap();
        assert_eq!(ctx.text, "");
        assert_eq!(ctx.tokens, 0);
        assert!(!ctx.truncated);
    }

    proptest! {
        /// For any budget, assembly either fails with BudgetTooSmall or
        /// respects the budget.
        #[test]
        fn prop_budget_respected(budget in 0usize..2000) {
            let para = "w".repeat(120);
            let paras: Vec<&str> = (0..40).map(|_| para.as_str()).collect();
            let book = book_with(vec![chapter_from_paragraphs(0, &paras)]);

            match assemble(&book, "chapter-0", budget, None, None) {
                Ok(ctx) => prop_assert!(ctx.tokens <= budget),
                Err(Error::BudgetTooSmall { required, .. }) => {
                    prop_assert!(required > budget)
                }
                Err(e) => prop_assert!(false, "unexpected error: {e}"),
            }
        }

        /// The anchor paragraph is always inside the included slice.
        #[test]
        fn prop_anchor_included(seg in 0usize..40, budget in 31usize..2000) {
            let paras: Vec<String> = (0..40)
                .map(|i| format!("{:03} {}", i, "v".repeat(116)))
                .collect();
            let paras: Vec<&str> = paras.iter().map(String::as_str).collect();
            let book = book_with(vec![chapter_from_paragraphs(0, &paras)]);
            let pos = book.chapters[0].segments[seg].start;

            if let Ok(ctx) = assemble(&book, "chapter-0", budget, Some(pos), None) {
                let start = book.chapters[0].body.find(&ctx.text).unwrap();
                prop_assert!(start <= pos && pos < start + ctx.text.len());
            }
        }
    }
}
