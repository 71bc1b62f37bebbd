//! lectern - EPUB ingestion inspector

use std::process::ExitCode;

use clap::Parser;
use serde_json::json;

use lectern::{TocEntry, estimate_tokens, ingest};

#[derive(Parser)]
#[command(name = "lectern")]
#[command(version, about = "EPUB ingestion inspector", long_about = None)]
#[command(after_help = "EXAMPLES:
    lectern book.epub                    Show metadata and ingestion warnings
    lectern --chapters book.epub         List chapters with token counts
    lectern --toc book.epub              Print the resolved table of contents
    lectern --dump chapter-0 book.epub   Print a chapter's plain text")]
struct Cli {
    /// Input EPUB file
    #[arg(value_name = "INPUT")]
    input: String,

    /// List chapters (id, tokens, title)
    #[arg(short, long)]
    chapters: bool,

    /// Print the table of contents tree
    #[arg(short, long)]
    toc: bool,

    /// Print the plain text of one chapter
    #[arg(short, long, value_name = "CHAPTER_ID")]
    dump: Option<String>,

    /// Emit JSON instead of plain text
    #[arg(short, long)]
    json: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> lectern::Result<()> {
    let bytes = std::fs::read(&cli.input)?;
    let ingested = ingest(&bytes)?;
    let book = &ingested.book;

    if let Some(chapter_id) = &cli.dump {
        let chapter = book
            .chapter(chapter_id)
            .ok_or_else(|| lectern::Error::ChapterNotFound(chapter_id.clone()))?;
        println!("{}", chapter.body);
        return Ok(());
    }

    if cli.chapters {
        if cli.json {
            let chapters: Vec<_> = book
                .chapters
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "title": c.title,
                        "tokens": estimate_tokens(&c.body),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&chapters)?);
        } else {
            for chapter in &book.chapters {
                println!(
                    "{:<12} {:>7}  {}",
                    chapter.id,
                    estimate_tokens(&chapter.body),
                    chapter.title
                );
            }
        }
        return Ok(());
    }

    if cli.toc {
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&toc_json(&book.toc))?);
        } else {
            print_toc(&book.toc, 0);
        }
        return Ok(());
    }

    if cli.json {
        let info = json!({
            "title": book.metadata.title,
            "authors": book.metadata.authors,
            "language": book.metadata.language,
            "identifier": book.metadata.identifier,
            "chapters": book.chapters.len(),
            "warnings": ingested.warnings.iter().map(|w| w.to_string()).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Title:      {}", book.metadata.title);
    if !book.metadata.authors.is_empty() {
        println!("Authors:    {}", book.metadata.authors.join(", "));
    }
    if !book.metadata.language.is_empty() {
        println!("Language:   {}", book.metadata.language);
    }
    if !book.metadata.identifier.is_empty() {
        println!("Identifier: {}", book.metadata.identifier);
    }
    println!("Chapters:   {}", book.chapters.len());

    if !ingested.warnings.is_empty() {
        println!("\nLoaded with {} issue(s):", ingested.warnings.len());
        for warning in &ingested.warnings {
            println!("  - {warning}");
        }
    }

    Ok(())
}

fn toc_json(entries: &[TocEntry]) -> Vec<serde_json::Value> {
    entries
        .iter()
        .map(|entry| {
            json!({
                "label": entry.label,
                "chapter": entry.target.chapter_id,
                "fragment": entry.target.fragment,
                "children": toc_json(&entry.children),
            })
        })
        .collect()
}

fn print_toc(entries: &[TocEntry], depth: usize) {
    for entry in entries {
        let label = if entry.label.is_empty() {
            "(untitled)"
        } else {
            &entry.label
        };
        println!(
            "{}{}  [{}]",
            "  ".repeat(depth),
            label,
            entry.target.chapter_id
        );
        print_toc(&entry.children, depth + 1);
    }
}
