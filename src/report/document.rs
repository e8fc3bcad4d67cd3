//! Report Document Model
//!
//! A report is a free-form header (title, summary, keywords) followed by an
//! ordered list of chapters. Every stage after assembly works chapter by
//! chapter, so the markdown is re-split here each time a stage loads it.
//!
//! A line opens a chapter when it is a `#` or `##` heading whose text starts
//! with an ordinal marker: `一、`, `第三章`, `2.` / `2、` / `2 ` (but not `2.1`),
//! or a Roman numeral like `IV.`. Section headings such as `## 1.1 现状`
//! therefore stay inside their chapter.

use std::sync::LazyLock;

use regex::Regex;

static ORDINAL_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[一二三四五六七八九十百零〇]+[、．.]|第[一二三四五六七八九十百零〇\d]+[章部篇节]|\d{1,2}(?:[、．]|\.(?:[^\d]|$)|\s)|[IVXLC]+[.．、])",
    )
    .expect("Invalid ordinal heading regex")
});

/// Title used for a report whose chapters could not be located
const UNTITLED_BODY: &str = "正文";

/// Whether `title` starts with a chapter ordinal
pub fn is_ordinal_title(title: &str) -> bool {
    ORDINAL_TITLE.is_match(title.trim_start_matches('*').trim())
}

/// Parse a markdown heading line into `(level, text)`
pub fn parse_heading(line: &str) -> Option<(u8, &str)> {
    let trimmed = line.trim();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    let text = rest.trim();
    (!text.is_empty()).then_some((hashes as u8, text))
}

/// Heading text with emphasis markers removed
fn clean_title(text: &str) -> String {
    text.trim_matches('*').trim().to_string()
}

/// `(level, title)` when `line` opens a chapter
fn chapter_heading(line: &str) -> Option<(u8, String)> {
    let (level, text) = parse_heading(line)?;
    let title = clean_title(text);
    (level <= 2 && is_ordinal_title(&title)).then_some((level, title))
}

/// Chinese ordinal for `n` (1-based), e.g. 3 → 三, 12 → 十二, 21 → 二十一
pub fn chinese_ordinal(n: usize) -> String {
    const DIGITS: [&str; 10] = ["零", "一", "二", "三", "四", "五", "六", "七", "八", "九"];
    match n {
        0 => DIGITS[0].to_string(),
        1..=9 => DIGITS[n].to_string(),
        10 => "十".to_string(),
        11..=19 => format!("十{}", DIGITS[n - 10]),
        20..=99 => {
            let tail = if n % 10 == 0 { "" } else { DIGITS[n % 10] };
            format!("{}十{}", DIGITS[n / 10], tail)
        }
        _ => n.to_string(),
    }
}

// =============================================================================
// Chapter
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub title: String,
    /// Heading level; 0 for a body that had no chapter heading at all
    pub level: u8,
    /// Markdown below the heading line
    pub body: String,
}

impl Chapter {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            level: 2,
            body: body.into(),
        }
    }

    pub fn to_markdown(&self) -> String {
        if self.level == 0 {
            return self.body.trim().to_string();
        }
        let hashes = "#".repeat(self.level as usize);
        let body = self.body.trim();
        if body.is_empty() {
            format!("{} {}", hashes, self.title)
        } else {
            format!("{} {}\n\n{}", hashes, self.title, body)
        }
    }

    /// Replace the body with a model rewrite of this chapter.
    ///
    /// Rewrites usually repeat the chapter heading, sometimes reworded; a
    /// leading `#`/`##` line is dropped so the chapter keeps its own title
    /// and position in the document.
    pub fn with_rewrite(&self, output: &str) -> Chapter {
        let trimmed = output.trim();
        let (first, rest) = trimmed.split_once('\n').unwrap_or((trimmed, ""));
        let leading_heading = matches!(parse_heading(first), Some((level, _)) if level <= 2);
        let body = if self.level > 0 && leading_heading {
            rest.trim()
        } else {
            trimmed
        };
        Chapter {
            title: self.title.clone(),
            level: self.level,
            body: body.to_string(),
        }
    }

    pub fn char_len(&self) -> usize {
        self.body.chars().count()
    }
}

// =============================================================================
// Document
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub header: String,
    pub chapters: Vec<Chapter>,
}

impl Document {
    pub fn new(header: impl Into<String>, chapters: Vec<Chapter>) -> Self {
        Self {
            header: header.into(),
            chapters,
        }
    }

    /// Split markdown into header and chapters
    pub fn parse(markdown: &str) -> Self {
        let text = markdown.replace("\r\n", "\n");
        let mut header = Vec::new();
        let mut chapters: Vec<Chapter> = Vec::new();
        let mut body: Vec<&str> = Vec::new();

        for line in text.lines() {
            if let Some((level, title)) = chapter_heading(line) {
                if let Some(last) = chapters.last_mut() {
                    last.body = body.join("\n").trim().to_string();
                }
                body.clear();
                chapters.push(Chapter {
                    title,
                    level,
                    body: String::new(),
                });
            } else if chapters.is_empty() {
                header.push(line);
            } else {
                body.push(line);
            }
        }
        if let Some(last) = chapters.last_mut() {
            last.body = body.join("\n").trim().to_string();
        }

        if chapters.is_empty() {
            return Self::parse_unstructured(&text);
        }
        Self {
            header: header.join("\n").trim().to_string(),
            chapters,
        }
    }

    /// No ordinal headings: everything after the header rule is one chapter
    fn parse_unstructured(text: &str) -> Self {
        let lines: Vec<&str> = text.lines().collect();
        let (header, rest) = match lines.iter().position(|l| l.trim() == "---") {
            Some(rule) => (lines[..=rule].join("\n"), lines[rule + 1..].join("\n")),
            None => (String::new(), text.to_string()),
        };
        let rest = rest.trim().to_string();
        if rest.is_empty() {
            return Self {
                header: header.trim().to_string(),
                chapters: Vec::new(),
            };
        }
        let title = rest
            .lines()
            .find_map(parse_heading)
            .map(|(_, t)| clean_title(t))
            .unwrap_or_else(|| UNTITLED_BODY.to_string());
        Self {
            header: header.trim().to_string(),
            chapters: vec![Chapter {
                title,
                level: 0,
                body: rest,
            }],
        }
    }

    /// Report header block: title, quoted summary, keywords, rule
    pub fn header_block(title: &str, summary: &str, keywords: &[String]) -> String {
        format!(
            "# {}\n\n> {}\n\n**关键词**：{}\n\n---",
            title,
            summary,
            keywords.join(", ")
        )
    }

    pub fn render(&self) -> String {
        let chapters: Vec<String> = self.chapters.iter().map(Chapter::to_markdown).collect();
        let header = self.header.trim();
        let body = chapters.join("\n\n");
        match (header.is_empty(), body.is_empty()) {
            (true, _) => format!("{}\n", body),
            (false, true) => format!("{}\n", header),
            (false, false) => format!("{}\n\n{}\n", header, body),
        }
    }

    pub fn char_len(&self) -> usize {
        self.render().chars().count()
    }
}
