//! Word document reader.
//!
//! Reads `word/document.xml` straight from the package and walks it as a
//! stream: paragraphs keep their style id, table rows are flattened to
//! `a | b | c`. Used both to pull corpus text out of `.docx` sources and to
//! recover report markdown from a rendered report.

use std::io::{Cursor, Read};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::types::{ReportError, Result};

const DOCUMENT_PART: &str = "word/document.xml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocxBlock {
    Paragraph { style: Option<String>, text: String },
    TableRow(Vec<String>),
}

fn xml_error(e: impl std::fmt::Display) -> ReportError {
    ReportError::extract(DOCUMENT_PART, e.to_string())
}

fn document_xml(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(xml_error)?;
    let mut part = archive.by_name(DOCUMENT_PART).map_err(xml_error)?;
    let mut xml = String::new();
    part.read_to_string(&mut xml)?;
    Ok(xml)
}

fn style_value(e: &BytesStart<'_>) -> Option<String> {
    e.try_get_attribute("w:val")
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Paragraphs and table rows in document order
pub fn read_blocks(bytes: &[u8]) -> Result<Vec<DocxBlock>> {
    let xml = document_xml(bytes)?;
    let mut reader = Reader::from_str(&xml);

    let mut blocks = Vec::new();
    let mut table_depth = 0usize;
    let mut in_text = false;
    let mut style: Option<String> = None;
    let mut paragraph = String::new();
    let mut cell = String::new();
    let mut row: Vec<String> = Vec::new();

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => match e.name().as_ref() {
                b"w:tbl" => table_depth += 1,
                b"w:p" => {
                    style = None;
                    paragraph.clear();
                }
                b"w:t" => in_text = true,
                b"w:pStyle" => style = style_value(&e),
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:pStyle" => style = style_value(&e),
                b"w:tab" => paragraph.push('\t'),
                b"w:br" => paragraph.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => {
                paragraph.push_str(&t.unescape().map_err(xml_error)?);
            }
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" if table_depth > 0 => {
                    let text = paragraph.trim();
                    if !text.is_empty() {
                        if !cell.is_empty() {
                            cell.push(' ');
                        }
                        cell.push_str(text);
                    }
                    paragraph.clear();
                }
                b"w:p" => {
                    blocks.push(DocxBlock::Paragraph {
                        style: style.take(),
                        text: paragraph.trim().to_string(),
                    });
                    paragraph.clear();
                }
                b"w:tc" => row.push(std::mem::take(&mut cell)),
                b"w:tr" => blocks.push(DocxBlock::TableRow(std::mem::take(&mut row))),
                b"w:tbl" => table_depth = table_depth.saturating_sub(1),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(blocks)
}

/// Corpus text: non-empty paragraphs and table rows, blank-line separated
pub fn extract_text(bytes: &[u8]) -> Result<String> {
    let parts: Vec<String> = read_blocks(bytes)?
        .into_iter()
        .filter_map(|block| match block {
            DocxBlock::Paragraph { text, .. } => (!text.is_empty()).then_some(text),
            DocxBlock::TableRow(cells) => {
                let cells: Vec<String> = cells.into_iter().filter(|c| !c.trim().is_empty()).collect();
                (!cells.is_empty()).then(|| cells.join(" | "))
            }
        })
        .collect();
    Ok(parts.join("\n\n"))
}

/// Markdown heading prefix for a paragraph style id
fn heading_prefix(style: &str) -> Option<&'static str> {
    let normalized: String = style
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    match normalized.as_str() {
        "title" | "heading1" => Some("# "),
        "heading2" => Some("## "),
        "heading3" => Some("### "),
        _ => None,
    }
}

/// Report markdown: heading styles become `#` levels, rows become `|` lines
pub fn to_markdown(bytes: &[u8]) -> Result<String> {
    let lines: Vec<String> = read_blocks(bytes)?
        .into_iter()
        .map(|block| match block {
            DocxBlock::Paragraph { text, .. } if text.is_empty() => String::new(),
            DocxBlock::Paragraph { style, text } => {
                match style.as_deref().and_then(heading_prefix) {
                    Some(prefix) => format!("{}{}", prefix, text),
                    None => text,
                }
            }
            DocxBlock::TableRow(cells) => format!("| {} |", cells.join(" | ")),
        })
        .collect();
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::render_docx;

    #[test]
    fn test_rendered_report_reads_back() {
        let md = "# 报告\n\n---\n\n## 一、现状\n\n正文段落。\n\n| 指标 | 数值 |\n|---|---|\n| 营收 | 10 |\n\n### 1.1 细节\n\n更多内容。";
        let bytes = render_docx(md).unwrap();

        let markdown = to_markdown(&bytes).unwrap();
        assert!(markdown.contains("# 报告"));
        assert!(markdown.contains("## 一、现状"));
        assert!(markdown.contains("### 1.1 细节"));
        assert!(markdown.contains("| 营收 | 10 |"));

        let text = extract_text(&bytes).unwrap();
        assert!(text.contains("正文段落。"));
        assert!(text.contains("指标 | 数值"));
        assert!(!text.contains('#'));
    }

    #[test]
    fn test_heading_styles() {
        assert_eq!(heading_prefix("Heading1"), Some("# "));
        assert_eq!(heading_prefix("heading 2"), Some("## "));
        assert_eq!(heading_prefix("Title"), Some("# "));
        assert_eq!(heading_prefix("Normal"), None);
    }

    #[test]
    fn test_not_a_docx() {
        assert!(read_blocks(b"plain text").is_err());
    }
}
