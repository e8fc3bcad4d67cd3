//! Word Rendering
//!
//! Converts a report's markdown into a `.docx` with fixed typography:
//!
//! | Element     | Size    | Font | Notes                          |
//! |-------------|---------|------|--------------------------------|
//! | `#`         | 18 pt   | 黑体 | bold                           |
//! | `##`        | 16 pt   | 黑体 | bold                           |
//! | `###`       | 14 pt   | 黑体 | bold                           |
//! | body        | 12 pt   | 宋体 | 2-character first-line indent  |
//! | table cells | 10.5 pt | 宋体 | header row bold                |
//!
//! Inline `**bold**` spans become bold runs. A `---` line becomes an empty
//! paragraph and a `>` quote is rendered as body text.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use docx_rs::{
    Docx, Paragraph, Run, RunFonts, SpecialIndentType, Style, StyleType, Table, TableCell,
    TableRow,
};
use regex::Regex;
use tracing::{debug, warn};

use crate::types::{ReportError, Result};

static BOLD_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\*\*[^*]+\*\*)").expect("Invalid bold span regex"));

static TABLE_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-:]+$").expect("Invalid table separator regex"));

static NUMBERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+[.、)]\s*").expect("Invalid numbered item regex"));

const HEADING_FONT: &str = "黑体";
const BODY_FONT: &str = "宋体";

/// Half-point sizes
mod size {
    pub const H1: usize = 36;
    pub const H2: usize = 32;
    pub const H3: usize = 28;
    pub const BODY: usize = 24;
    pub const TABLE: usize = 21;
}

/// First-line indent of body paragraphs, in twips (24 pt)
const FIRST_LINE_INDENT: i32 = 480;
/// Left indent of list items, in twips
const LIST_INDENT: i32 = 420;

// =============================================================================
// Markdown Blocks
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Block {
    Heading(u8, String),
    Paragraph(String),
    Bullet(String),
    Numbered(String),
    Table(Vec<Vec<String>>),
    Rule,
}

fn split_row(line: &str) -> Vec<String> {
    line.trim()
        .trim_start_matches('|')
        .trim_end_matches('|')
        .split('|')
        .map(|c| c.trim().to_string())
        .collect()
}

fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty()
        && cells
            .iter()
            .all(|c| !c.is_empty() && TABLE_SEPARATOR.is_match(c))
}

fn parse_blocks(markdown: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut table: Vec<Vec<String>> = Vec::new();

    for line in markdown.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('|') {
            let cells = split_row(trimmed);
            if !is_separator_row(&cells) {
                table.push(cells);
            }
            continue;
        }
        if !table.is_empty() {
            blocks.push(Block::Table(std::mem::take(&mut table)));
        }
        if trimmed.is_empty() {
            continue;
        }

        let block = if trimmed == "---" {
            Block::Rule
        } else if let Some(text) = trimmed.strip_prefix("### ") {
            Block::Heading(3, text.trim().to_string())
        } else if let Some(text) = trimmed.strip_prefix("## ") {
            Block::Heading(2, text.trim().to_string())
        } else if let Some(text) = trimmed.strip_prefix("# ") {
            Block::Heading(1, text.trim().to_string())
        } else if let Some(text) = trimmed.strip_prefix('>') {
            Block::Paragraph(text.trim().to_string())
        } else if trimmed.starts_with("#### ") {
            Block::Heading(3, trimmed.trim_start_matches('#').trim().to_string())
        } else if let Some(text) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
        {
            Block::Bullet(text.trim().to_string())
        } else if NUMBERED_ITEM.is_match(trimmed) {
            Block::Numbered(trimmed.to_string())
        } else {
            Block::Paragraph(trimmed.to_string())
        };
        blocks.push(block);
    }
    if !table.is_empty() {
        blocks.push(Block::Table(table));
    }
    blocks
}

// =============================================================================
// Runs
// =============================================================================

fn run(text: &str, size: usize, font: &str) -> Run {
    Run::new()
        .add_text(text)
        .size(size)
        .fonts(RunFonts::new().east_asia(font).ascii(font).hi_ansi(font))
}

/// Split on `**bold**` spans, keeping their order
fn inline_runs(text: &str, size: usize, font: &str, all_bold: bool) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut last = 0;
    for m in BOLD_SPAN.find_iter(text) {
        if m.start() > last {
            let plain = run(&text[last..m.start()], size, font);
            runs.push(if all_bold { plain.bold() } else { plain });
        }
        let inner = m.as_str().trim_matches('*');
        runs.push(run(inner, size, font).bold());
        last = m.end();
    }
    if last < text.len() {
        let plain = run(&text[last..], size, font);
        runs.push(if all_bold { plain.bold() } else { plain });
    }
    runs
}

fn paragraph_with(runs: Vec<Run>) -> Paragraph {
    runs.into_iter().fold(Paragraph::new(), |p, r| p.add_run(r))
}

/// Paragraph style ids for `#`, `##`, `###`; readers map them back to levels
const HEADING_STYLES: [(&str, &str); 3] = [
    ("Heading1", "heading 1"),
    ("Heading2", "heading 2"),
    ("Heading3", "heading 3"),
];

fn heading(level: u8, text: &str) -> Paragraph {
    let (size, index) = match level {
        1 => (size::H1, 0),
        2 => (size::H2, 1),
        _ => (size::H3, 2),
    };
    let text = text.replace("**", "");
    Paragraph::new()
        .style(HEADING_STYLES[index].0)
        .add_run(run(&text, size, HEADING_FONT).bold())
}

fn table(rows: &[Vec<String>]) -> Table {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let rows = rows
        .iter()
        .enumerate()
        .map(|(i, cells)| {
            let cells = (0..width)
                .map(|c| {
                    let text = cells.get(c).map(String::as_str).unwrap_or("");
                    TableCell::new().add_paragraph(paragraph_with(inline_runs(
                        text,
                        size::TABLE,
                        BODY_FONT,
                        i == 0,
                    )))
                })
                .collect();
            TableRow::new(cells)
        })
        .collect();
    Table::new(rows)
}

// =============================================================================
// Rendering
// =============================================================================

/// Build the `.docx` bytes for a markdown report
pub fn render_docx(markdown: &str) -> Result<Vec<u8>> {
    let mut docx = HEADING_STYLES.iter().fold(Docx::new(), |docx, (id, name)| {
        docx.add_style(Style::new(*id, StyleType::Paragraph).name(*name))
    });
    for block in parse_blocks(markdown) {
        docx = match block {
            Block::Heading(level, text) => docx.add_paragraph(heading(level, &text)),
            Block::Paragraph(text) => docx.add_paragraph(
                paragraph_with(inline_runs(&text, size::BODY, BODY_FONT, false)).indent(
                    None,
                    Some(SpecialIndentType::FirstLine(FIRST_LINE_INDENT)),
                    None,
                    None,
                ),
            ),
            Block::Bullet(text) => docx.add_paragraph(
                paragraph_with(inline_runs(&format!("• {}", text), size::BODY, BODY_FONT, false))
                    .indent(Some(LIST_INDENT), None, None, None),
            ),
            Block::Numbered(text) => docx.add_paragraph(
                paragraph_with(inline_runs(&text, size::BODY, BODY_FONT, false))
                    .indent(Some(LIST_INDENT), None, None, None),
            ),
            Block::Table(rows) => docx.add_table(table(&rows)).add_paragraph(Paragraph::new()),
            Block::Rule => docx.add_paragraph(Paragraph::new()),
        };
    }

    let mut buffer = Cursor::new(Vec::new());
    docx.build()
        .pack(&mut buffer)
        .map_err(|e| ReportError::Render(e.to_string()))?;
    Ok(buffer.into_inner())
}

/// Path used when the target is locked by another program
fn fallback_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{}_new.docx", stem))
}

/// Render `markdown` and write it to `path`. If the file is locked, the
/// document is written next to it with a `_new` suffix instead; the path
/// actually written is returned.
pub async fn write_docx(markdown: &str, path: &Path) -> Result<PathBuf> {
    let bytes = render_docx(markdown)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::write(path, &bytes).await {
        Ok(()) => {
            debug!(path = %path.display(), bytes = bytes.len(), "Word document written");
            Ok(path.to_path_buf())
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            let alt = fallback_path(path);
            warn!(
                path = %path.display(),
                fallback = %alt.display(),
                "Word document is locked, writing a copy instead"
            );
            tokio::fs::write(&alt, &bytes).await?;
            Ok(alt)
        }
        Err(e) => Err(e.into()),
    }
}
