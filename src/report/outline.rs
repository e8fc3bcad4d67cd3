//! Outline Planner
//!
//! One completion call proposes the report structure: title, summary, five
//! keywords, and at most seven chapters of at most three heading levels.
//! Model output is parsed through three tiers and planning never fails on
//! malformed output:
//!
//! 1. **Parsed**: the response is valid JSON as-is
//! 2. **Repaired**: fences stripped, trailing commas dropped, or a truncated
//!    chapter array cut back to its last complete entry and closed
//! 3. **Fallback**: `title`/`summary`/`keywords` pulled out by pattern when
//!    present, with a fixed four-chapter skeleton
//!
//! Only a configuration failure (such as a missing credential) is returned
//! as an error; every other backend failure degrades to the fallback tier.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use super::document::{Document, chinese_ordinal, is_ordinal_title};
use super::prompts;
use crate::ai::{CompletionRequest, Gateway, JsonRepairer, RepairKind};
use crate::config::PipelineConfig;
use crate::constants::{TRUNCATION_NOTICE, draft};
use crate::types::{Result, json_string, json_string_array, json_string_or, truncate_with_notice};

/// Title used when the model supplies none
pub const DEFAULT_TITLE: &str = "深度调查报告";

const MAX_KEYWORDS: usize = 5;

static TITLE_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""title"\s*:\s*"([^"]*)""#).expect("Invalid title field regex")
});
static SUMMARY_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""summary"\s*:\s*"([^"]*)""#).expect("Invalid summary field regex")
});
static KEYWORDS_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)"keywords"\s*:\s*\[(.*?)\]"#).expect("Invalid keywords field regex")
});
static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)""#).expect("Invalid quoted string regex"));

// =============================================================================
// Outline Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineSection {
    pub title: String,
    #[serde(rename = "level3", default)]
    pub subsections: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineChapter {
    #[serde(rename = "level1")]
    pub label: String,
    #[serde(rename = "level2", default)]
    pub sections: Vec<OutlineSection>,
}

impl OutlineChapter {
    pub fn section_titles(&self) -> Vec<String> {
        self.sections.iter().map(|s| s.title.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outline {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(rename = "outline", default)]
    pub chapters: Vec<OutlineChapter>,
}

/// How much of the model's output survived parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseTier {
    Parsed,
    Repaired,
    Fallback,
}

impl ParseTier {
    pub fn is_degraded(&self) -> bool {
        !matches!(self, Self::Parsed)
    }
}

impl std::fmt::Display for ParseTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Parsed => "parsed",
            Self::Repaired => "repaired",
            Self::Fallback => "fallback",
        };
        write!(f, "{}", s)
    }
}

/// Outline plus how it was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOutline {
    pub outline: Outline,
    pub tier: ParseTier,
}

/// Persisted `{base}_meta.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineMeta {
    #[serde(flatten)]
    pub outline: Outline,
    pub parse_tier: ParseTier,
    /// SHA-256 of the corpus text the outline was planned from
    pub corpus_sha256: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl OutlineMeta {
    pub fn new(planned: &PlannedOutline, corpus: &str) -> Self {
        Self {
            outline: planned.outline.clone(),
            parse_tier: planned.tier,
            corpus_sha256: format!("{:x}", Sha256::digest(corpus.as_bytes())),
            created_at: chrono::Utc::now(),
        }
    }
}

impl Outline {
    /// Generic four-chapter structure used when nothing usable was returned
    pub fn skeleton() -> Vec<OutlineChapter> {
        [
            ("一、概述与背景", "1.1 主要内容"),
            ("二、核心分析", "2.1 要点"),
            ("三、案例与数据", "3.1 案例"),
            ("四、结论与建议", "4.1 结论"),
        ]
        .into_iter()
        .map(|(label, section)| OutlineChapter {
            label: label.to_string(),
            sections: vec![OutlineSection {
                title: section.to_string(),
                subsections: Vec::new(),
            }],
        })
        .collect()
    }

    /// Tolerant conversion from model JSON.
    ///
    /// Accepts an object with an `outline` (or `chapters`) array, or a bare
    /// array of chapters. Sections may be objects or plain strings; anything
    /// nested deeper than the third level is dropped.
    pub fn from_value(value: &Value) -> Self {
        let chapters_value = match value {
            Value::Array(_) => Some(value),
            _ => value.get("outline").or_else(|| value.get("chapters")),
        };
        let chapters = chapters_value
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(chapter_from_value).collect())
            .unwrap_or_default();

        Self {
            title: json_string_or(value, "title", DEFAULT_TITLE),
            summary: json_string(value, "summary").unwrap_or_default(),
            keywords: json_string_array(value, "keywords"),
            chapters,
        }
    }

    /// Clamp to `max_chapters` (never above seven), cap keywords, and give
    /// every chapter an ordinal label so later stages can find it again
    pub fn normalize(&mut self, max_chapters: usize) {
        let max_chapters = max_chapters.min(draft::MAX_CHAPTERS);
        if self.chapters.len() > max_chapters {
            warn!(
                planned = self.chapters.len(),
                kept = max_chapters,
                "Outline exceeds chapter limit, truncating"
            );
            self.chapters.truncate(max_chapters);
        }
        self.keywords.truncate(MAX_KEYWORDS);
        for (i, chapter) in self.chapters.iter_mut().enumerate() {
            if !is_ordinal_title(&chapter.label) {
                chapter.label = format!("{}、{}", chinese_ordinal(i + 1), chapter.label);
            }
        }
    }

    /// Header block of the assembled report
    pub fn header(&self) -> String {
        Document::header_block(&self.title, &self.summary, &self.keywords)
    }
}

fn chapter_from_value(value: &Value) -> Option<OutlineChapter> {
    let label = match value {
        Value::String(s) => s.trim().to_string(),
        _ => json_string(value, "level1")
            .or_else(|| json_string(value, "title"))
            .unwrap_or_default(),
    };
    if label.is_empty() {
        return None;
    }
    let sections = value
        .get("level2")
        .or_else(|| value.get("sections"))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(section_from_value).collect())
        .unwrap_or_default();
    Some(OutlineChapter { label, sections })
}

fn section_from_value(value: &Value) -> Option<OutlineSection> {
    let (title, subsections) = match value {
        Value::String(s) => (s.trim().to_string(), Vec::new()),
        _ => (
            json_string(value, "title").unwrap_or_default(),
            value
                .get("level3")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| match v {
                            Value::String(s) => Some(s.trim().to_string()),
                            _ => json_string(v, "title"),
                        })
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        ),
    };
    (!title.is_empty()).then_some(OutlineSection { title, subsections })
}

// =============================================================================
// Planner
// =============================================================================

pub struct OutlinePlanner<'a> {
    gateway: &'a Gateway,
    config: &'a PipelineConfig,
}

impl<'a> OutlinePlanner<'a> {
    pub fn new(gateway: &'a Gateway, config: &'a PipelineConfig) -> Self {
        Self { gateway, config }
    }

    #[instrument(skip_all, fields(corpus_chars = corpus.chars().count()))]
    pub async fn plan(&self, corpus: &str) -> Result<PlannedOutline> {
        let window = truncate_with_notice(corpus, self.config.outline_window, TRUNCATION_NOTICE);
        let request = CompletionRequest::prompt(
            prompts::WRITER_SYSTEM,
            prompts::outline_prompt(&window, self.config.max_chapters),
        )
        .settings(self.config.outline);

        let planned = match self.gateway.complete("outline", request).await {
            Ok(response) => Self::parse_response(&response, self.config.max_chapters),
            Err(e) if e.is_configuration() => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "Outline call failed, using fallback skeleton");
                Self::parse_response("", self.config.max_chapters)
            }
        };

        if planned.tier.is_degraded() {
            warn!(tier = %planned.tier, "Outline parsed in degraded tier");
        }
        info!(
            chapters = planned.outline.chapters.len(),
            tier = %planned.tier,
            "Outline planned: {}",
            planned.outline.title
        );
        Ok(planned)
    }

    /// Turn raw model output into an outline, degrading as needed
    pub fn parse_response(raw: &str, max_chapters: usize) -> PlannedOutline {
        let (mut outline, mut tier) = match JsonRepairer::new().parse(raw) {
            Some((value, kind)) => {
                let tier = match kind {
                    RepairKind::Clean => ParseTier::Parsed,
                    _ => ParseTier::Repaired,
                };
                (Outline::from_value(&value), tier)
            }
            None => (Self::scrape_fields(raw), ParseTier::Fallback),
        };

        if outline.chapters.is_empty() {
            outline.chapters = Outline::skeleton();
            tier = ParseTier::Fallback;
        }
        outline.normalize(max_chapters);
        PlannedOutline { outline, tier }
    }

    /// Pattern-extract header fields from unparseable output
    fn scrape_fields(raw: &str) -> Outline {
        let capture = |re: &Regex| {
            re.captures(raw)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
        };
        let keywords = KEYWORDS_FIELD
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| {
                QUOTED
                    .captures_iter(m.as_str())
                    .filter_map(|c| c.get(1).map(|k| k.as_str().to_string()))
                    .take(MAX_KEYWORDS)
                    .collect()
            })
            .unwrap_or_default();

        Outline {
            title: capture(&TITLE_FIELD)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            summary: capture(&SUMMARY_FIELD).unwrap_or_default(),
            keywords,
            chapters: Vec::new(),
        }
    }
}
