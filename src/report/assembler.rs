//! Chapter Assembler
//!
//! Fills each outline chapter with corpus text. The completion backend has a
//! bounded context, so a chapter is assembled in one of three ways depending
//! on which axis is the binding constraint:
//!
//! | Condition                      | Plan          | Calls            |
//! |--------------------------------|---------------|------------------|
//! | `L <= C` and `S <= threshold`  | `Whole`       | 1                |
//! | `S > threshold`                | `PerSection`  | `S`              |
//! | otherwise                      | `Sequential`  | `ceil(L / C)`    |
//!
//! Per-section windows overlap and slide with the section index, a stand-in
//! for retrieval of the relevant corpus part. Sequential windows tile the
//! corpus without overlap.
//!
//! Each assembled chapter then gets one framing call that adds an opening and
//! a closing paragraph tying it to its neighbours.

use tracing::{debug, info, instrument, warn};

use super::document::{Chapter, Document, is_ordinal_title, parse_heading};
use super::outline::{Outline, OutlineChapter};
use super::prompts;
use crate::ai::{CompletionRequest, Gateway};
use crate::config::PipelineConfig;
use crate::constants::TRUNCATION_NOTICE;
use crate::types::{CompletionError, Result, char_len, char_slice, truncate_with_notice};

// =============================================================================
// Chunk Planning
// =============================================================================

/// Corpus character range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
}

impl Window {
    pub fn width(&self) -> usize {
        self.end - self.start
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkPlan {
    /// One call over the whole corpus
    Whole,
    /// One call per section, each with its own sliding window
    PerSection(Vec<Window>),
    /// One call per non-overlapping chunk
    Sequential(Vec<Window>),
}

impl ChunkPlan {
    pub fn call_count(&self) -> usize {
        match self {
            Self::Whole => 1,
            Self::PerSection(windows) | Self::Sequential(windows) => windows.len(),
        }
    }
}

/// Decide how a chapter with `sections` sections is assembled from a corpus
/// of `corpus_len` characters
pub fn plan_chunks(
    corpus_len: usize,
    sections: usize,
    chunk_size: usize,
    overlap: usize,
    section_threshold: usize,
) -> ChunkPlan {
    let chunk_size = chunk_size.max(1);
    if corpus_len <= chunk_size && sections <= section_threshold {
        return ChunkPlan::Whole;
    }

    if sections > section_threshold {
        let stride = chunk_size.saturating_sub(overlap).max(1);
        let last_start = corpus_len.saturating_sub(chunk_size);
        let windows = (0..sections)
            .map(|j| {
                let start = (j * stride).min(last_start);
                Window {
                    start,
                    end: (start + chunk_size).min(corpus_len),
                }
            })
            .collect();
        return ChunkPlan::PerSection(windows);
    }

    let windows = (0..corpus_len.div_ceil(chunk_size))
        .map(|k| Window {
            start: k * chunk_size,
            end: ((k + 1) * chunk_size).min(corpus_len),
        })
        .collect();
    ChunkPlan::Sequential(windows)
}

// =============================================================================
// Assembler
// =============================================================================

pub struct ChapterAssembler<'a> {
    gateway: &'a Gateway,
    config: &'a PipelineConfig,
}

impl<'a> ChapterAssembler<'a> {
    pub fn new(gateway: &'a Gateway, config: &'a PipelineConfig) -> Self {
        Self { gateway, config }
    }

    /// Assemble and frame every chapter of `outline` into the draft report
    #[instrument(skip_all, fields(chapters = outline.chapters.len()))]
    pub async fn assemble_report(&self, corpus: &str, outline: &Outline) -> Result<Document> {
        let total = outline.chapters.len();
        let mut chapters = Vec::with_capacity(total);
        for (i, chapter) in outline.chapters.iter().enumerate() {
            info!("Assembler: chapter {}/{} {}", i + 1, total, chapter.label);
            let body = self.assemble(corpus, chapter).await?;
            chapters.push(Chapter::new(&chapter.label, strip_chapter_heading(&body)));
        }

        if self.config.chapter_framing {
            for i in 0..chapters.len() {
                let prev = i.checked_sub(1).map(|p| chapters[p].title.clone());
                let next = chapters.get(i + 1).map(|n| n.title.clone());
                let framed = self
                    .frame(&chapters[i], prev.as_deref(), next.as_deref())
                    .await?;
                chapters[i] = framed;
            }
        }

        Ok(Document::new(outline.header(), chapters))
    }

    /// Assemble one chapter body.
    ///
    /// A failed or empty partial contributes nothing; the chapter fails only
    /// when every call failed, or at once on a configuration error.
    #[instrument(skip_all, fields(chapter = %chapter.label))]
    pub async fn assemble(&self, corpus: &str, chapter: &OutlineChapter) -> Result<String> {
        let cfg = self.config;
        let plan = plan_chunks(
            char_len(corpus),
            chapter.sections.len(),
            cfg.chunk_size,
            cfg.chunk_overlap,
            cfg.section_threshold,
        );
        debug!(calls = plan.call_count(), plan = ?plan_kind(&plan), "Chunk plan");

        let sections = chapter.section_titles();
        let calls: Vec<(Vec<String>, String, String)> = match &plan {
            ChunkPlan::Whole => vec![(sections, String::new(), corpus.to_string())],
            ChunkPlan::PerSection(windows) => windows
                .iter()
                .zip(&chapter.sections)
                .map(|(w, section)| {
                    let mut window = char_slice(corpus, w.start, w.end);
                    if window.trim().is_empty() {
                        window = char_slice(corpus, 0, cfg.chunk_size);
                    }
                    (
                        vec![section.title.clone()],
                        prompts::section_hint(&section.title, w.start),
                        window.to_string(),
                    )
                })
                .collect(),
            ChunkPlan::Sequential(windows) => windows
                .iter()
                .enumerate()
                .map(|(k, w)| {
                    (
                        sections.clone(),
                        prompts::chunk_hint(k + 1, w.start, w.end),
                        char_slice(corpus, w.start, w.end).to_string(),
                    )
                })
                .collect(),
        };

        let total = calls.len();
        let mut parts = Vec::new();
        let mut last_error: Option<CompletionError> = None;
        for (i, (sections, hint, window)) in calls.into_iter().enumerate() {
            let request = CompletionRequest::prompt(
                prompts::WRITER_SYSTEM,
                prompts::assemble_prompt(&chapter.label, &sections, &hint, &window),
            )
            .settings(cfg.assemble);

            match self.gateway.complete("assemble", request).await {
                Ok(part) if !part.trim().is_empty() => {
                    debug!(part = i + 1, total, chars = char_len(&part), "Partial assembled");
                    parts.push(part.trim().to_string());
                }
                Ok(_) => debug!(part = i + 1, total, "Empty partial dropped"),
                Err(e) if e.is_configuration() => return Err(e.into()),
                Err(e) => {
                    warn!(part = i + 1, total, error = %e, "Assembly call failed, skipping partial");
                    last_error = Some(e);
                }
            }
        }

        if parts.is_empty()
            && let Some(e) = last_error
        {
            return Err(e.into());
        }
        Ok(parts.join("\n\n"))
    }

    /// Add an opening and a closing paragraph; a failed call keeps the
    /// unframed chapter
    async fn frame(&self, chapter: &Chapter, prev: Option<&str>, next: Option<&str>) -> Result<Chapter> {
        let body = truncate_with_notice(&chapter.body, self.config.framing_window, TRUNCATION_NOTICE);
        let request = CompletionRequest::prompt(
            prompts::WRITER_SYSTEM,
            prompts::framing_prompt(&chapter.title, &body, prev, next),
        )
        .settings(self.config.assemble);

        match self.gateway.complete("framing", request).await {
            Ok(text) if !text.trim().is_empty() => Ok(chapter.with_rewrite(&text)),
            Ok(_) => Ok(chapter.clone()),
            Err(e) if e.is_configuration() => Err(e.into()),
            Err(e) => {
                warn!(chapter = %chapter.title, error = %e, "Framing failed, keeping unframed body");
                Ok(chapter.clone())
            }
        }
    }
}

fn plan_kind(plan: &ChunkPlan) -> &'static str {
    match plan {
        ChunkPlan::Whole => "whole",
        ChunkPlan::PerSection(_) => "per-section",
        ChunkPlan::Sequential(_) => "sequential",
    }
}

/// Drop a leading chapter-level heading the model may have emitted; the
/// chapter heading is always written from the outline label
fn strip_chapter_heading(body: &str) -> String {
    let trimmed = body.trim();
    let (first, rest) = trimmed.split_once('\n').unwrap_or((trimmed, ""));
    match parse_heading(first) {
        Some((level, title)) if level <= 2 && is_ordinal_title(title) => rest.trim().to_string(),
        _ => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ErrorCategory;
    use crate::ai::provider::testing::ScriptedBackend;
    use crate::config::{BackendKind, Config};
    use crate::report::outline::OutlineSection;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn chapter(sections: usize) -> OutlineChapter {
        OutlineChapter {
            label: "一、测试章".to_string(),
            sections: (1..=sections)
                .map(|i| OutlineSection {
                    title: format!("1.{} 小节", i),
                    subsections: Vec::new(),
                })
                .collect(),
        }
    }

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            chunk_size: 100,
            chunk_overlap: 50,
            section_threshold: 4,
            chapter_framing: false,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_plan_whole() {
        assert_eq!(plan_chunks(100, 4, 100, 50, 4), ChunkPlan::Whole);
        assert_eq!(plan_chunks(0, 0, 100, 50, 4), ChunkPlan::Whole);
    }

    #[test]
    fn test_plan_per_section_windows() {
        let plan = plan_chunks(300, 6, 100, 50, 4);
        let ChunkPlan::PerSection(windows) = plan else {
            panic!("expected per-section plan");
        };
        let starts: Vec<usize> = windows.iter().map(|w| w.start).collect();
        assert_eq!(starts, vec![0, 50, 100, 150, 200, 200]);
        assert!(windows.iter().all(|w| w.width() == 100));
    }

    #[test]
    fn test_plan_per_section_short_corpus() {
        let ChunkPlan::PerSection(windows) = plan_chunks(40, 5, 100, 50, 4) else {
            panic!("expected per-section plan");
        };
        assert!(windows.iter().all(|w| *w == Window { start: 0, end: 40 }));
    }

    #[test]
    fn test_plan_sequential() {
        let ChunkPlan::Sequential(windows) = plan_chunks(250, 2, 100, 50, 4) else {
            panic!("expected sequential plan");
        };
        assert_eq!(
            windows,
            vec![
                Window { start: 0, end: 100 },
                Window { start: 100, end: 200 },
                Window { start: 200, end: 250 },
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_call_count(len in 0usize..2_000, sections in 0usize..12, chunk in 1usize..500) {
            let overlap = chunk / 2;
            let plan = plan_chunks(len, sections, chunk, overlap, 4);
            let expected = if sections > 4 {
                sections
            } else if len <= chunk {
                1
            } else {
                len.div_ceil(chunk)
            };
            prop_assert_eq!(plan.call_count(), expected);

            if let ChunkPlan::PerSection(windows) | ChunkPlan::Sequential(windows) = &plan {
                for w in windows {
                    prop_assert!(w.width() <= chunk);
                    prop_assert!(w.end <= len);
                }
            }
            if let ChunkPlan::Sequential(windows) = &plan {
                prop_assert_eq!(windows.iter().map(Window::width).sum::<usize>(), len);
            }
        }
    }

    fn gateway_with(backend: Arc<ScriptedBackend>) -> Gateway {
        Gateway::new(&Config::default(), "t").with_backend(BackendKind::Kimi, backend)
    }

    #[tokio::test]
    async fn test_per_section_calls_and_hints() {
        let backend = Arc::new(ScriptedBackend::fixed("段落"));
        let gateway = gateway_with(backend.clone());
        let config = small_config();
        let corpus = "字".repeat(300);

        let body = ChapterAssembler::new(&gateway, &config)
            .assemble(&corpus, &chapter(6))
            .await
            .unwrap();

        let calls = backend.calls();
        assert_eq!(calls.len(), 6);
        assert!(calls[1].last_user_text().contains("当前仅装配二级目录「1.2 小节」"));
        assert!(calls[1].last_user_text().contains("全文第 50 字起"));
        assert_eq!(body, vec!["段落"; 6].join("\n\n"));
    }

    #[tokio::test]
    async fn test_sequential_drops_failed_and_empty_parts() {
        let backend = Arc::new(ScriptedBackend::new(|req| {
            let prompt = req.last_user_text();
            if prompt.contains("此为语料第 1 段") {
                Ok("第一段".to_string())
            } else if prompt.contains("此为语料第 2 段") {
                Ok("   ".to_string())
            } else {
                Err(CompletionError::new(ErrorCategory::Network, "reset"))
            }
        }));
        let gateway = gateway_with(backend.clone());
        let config = small_config();

        let body = ChapterAssembler::new(&gateway, &config)
            .assemble(&"字".repeat(250), &chapter(2))
            .await
            .unwrap();
        assert_eq!(backend.call_count(), 3);
        assert_eq!(body, "第一段");
    }

    #[tokio::test]
    async fn test_all_parts_failing_propagates() {
        let gateway = gateway_with(Arc::new(ScriptedBackend::failing(ErrorCategory::Unavailable)));
        let config = small_config();
        let err = ChapterAssembler::new(&gateway, &config)
            .assemble("短语料", &chapter(1))
            .await
            .unwrap_err();
        assert_eq!(err.completion_category(), Some(ErrorCategory::Unavailable));
    }

    #[tokio::test]
    async fn test_report_header_and_framing() {
        let backend = Arc::new(ScriptedBackend::new(|req| {
            let prompt = req.last_user_text();
            if prompt.contains("承上启下") {
                assert!(prompt.contains("【下一章主题】二、第二章") || prompt.contains("【上一章主题】一、第一章"));
                Ok("## 章标题\n\n开篇。\n\n正文。\n\n小结。".to_string())
            } else {
                Ok("## 一、模型自带标题\n\n正文。".to_string())
            }
        }));
        let gateway = gateway_with(backend.clone());
        let config = PipelineConfig {
            chapter_framing: true,
            ..small_config()
        };
        let outline = Outline {
            title: "标题".to_string(),
            summary: "摘要".to_string(),
            keywords: vec!["甲".to_string()],
            chapters: vec![
                OutlineChapter { label: "一、第一章".to_string(), sections: Vec::new() },
                OutlineChapter { label: "二、第二章".to_string(), sections: Vec::new() },
            ],
        };

        let doc = ChapterAssembler::new(&gateway, &config)
            .assemble_report("语料", &outline)
            .await
            .unwrap();

        assert_eq!(backend.call_count(), 4);
        assert_eq!(doc.header, "# 标题\n\n> 摘要\n\n**关键词**：甲\n\n---");
        let rendered = doc.render();
        assert!(rendered.contains("## 一、第一章\n\n开篇。\n\n正文。\n\n小结。"));
        assert!(rendered.contains("## 二、第二章"));
        assert_eq!(Document::parse(&rendered).chapters.len(), 2);
    }

    #[test]
    fn test_strip_chapter_heading_keeps_sections() {
        assert_eq!(strip_chapter_heading("## 一、标题\n\n正文"), "正文");
        assert_eq!(strip_chapter_heading("## 1.1 小节\n\n正文"), "## 1.1 小节\n\n正文");
        assert_eq!(strip_chapter_heading("正文"), "正文");
    }
}
