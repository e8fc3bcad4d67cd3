//! Chapter Reviser
//!
//! Rewrites the draft chapter by chapter against the combined critique and
//! the exclusion list. Each chapter sees the corpus slice proportional to its
//! position and must stay above a length floor derived from corpus size.

use tracing::{info, instrument, warn};

use super::critique::ExclusionList;
use super::document::Document;
use super::prompts::{self, RevisePrompt};
use crate::ai::{CompletionRequest, Gateway};
use crate::config::PipelineConfig;
use crate::types::{Result, char_len, char_slice, truncate_chars};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthFloor {
    pub total: usize,
    pub per_chapter: usize,
}

/// `total = max(min_total, floor(ratio * L))`, split evenly with a
/// per-chapter minimum
pub fn length_floor(
    corpus_len: usize,
    chapters: usize,
    min_total: usize,
    ratio: f64,
    min_chapter: usize,
) -> LengthFloor {
    let scaled = (corpus_len as f64 * ratio).floor() as usize;
    let total = min_total.max(scaled);
    LengthFloor {
        total,
        per_chapter: min_chapter.max(total / chapters.max(1)),
    }
}

/// Corpus characters `[i*L/n, (i+1)*L/n)` for chapter `i` of `n`
pub fn corpus_slice(corpus: &str, index: usize, chapters: usize) -> &str {
    let len = char_len(corpus);
    let n = chapters.max(1);
    char_slice(corpus, index * len / n, (index + 1) * len / n)
}

pub struct ChapterReviser<'a> {
    gateway: &'a Gateway,
    config: &'a PipelineConfig,
}

impl<'a> ChapterReviser<'a> {
    pub fn new(gateway: &'a Gateway, config: &'a PipelineConfig) -> Self {
        Self { gateway, config }
    }

    pub fn floor_for(&self, corpus: &str, chapters: usize) -> LengthFloor {
        length_floor(
            char_len(corpus),
            chapters,
            self.config.floor_min_total,
            self.config.floor_corpus_ratio,
            self.config.floor_min_chapter,
        )
    }

    /// Produce report v2 from report v1
    #[instrument(skip_all)]
    pub async fn revise(
        &self,
        report: &str,
        critique: &str,
        exclusions: &ExclusionList,
        corpus: &str,
    ) -> Result<Document> {
        let doc = Document::parse(report);
        let total = doc.chapters.len();
        let floor = self.floor_for(corpus, total);
        let critique = truncate_chars(critique, self.config.critique_context);
        info!(
            chapters = total,
            floor_total = floor.total,
            exclusions = exclusions.items.len(),
            "Revising report"
        );

        let mut revised = Vec::with_capacity(total);
        for (i, chapter) in doc.chapters.iter().enumerate() {
            info!(
                "Reviser: chapter {}/{} (floor {} chars)",
                i + 1,
                total,
                floor.per_chapter
            );
            let prompt = RevisePrompt {
                chapter_markdown: &chapter.to_markdown(),
                index: i + 1,
                total,
                floor: floor.per_chapter,
                critique,
                exclusions: exclusions.prompt_text(),
                corpus_slice: corpus_slice(corpus, i, total),
            }
            .render();
            let request =
                CompletionRequest::prompt(prompts::REVISER_SYSTEM, prompt).settings(self.config.revise);

            match self.gateway.complete("revise", request).await {
                Ok(text) if !text.trim().is_empty() => {
                    let rewritten = chapter.with_rewrite(&text);
                    if rewritten.char_len() < floor.per_chapter {
                        warn!(
                            chapter = i + 1,
                            chars = rewritten.char_len(),
                            floor = floor.per_chapter,
                            "Revised chapter is below the length floor"
                        );
                    }
                    revised.push(rewritten);
                }
                Ok(_) => {
                    warn!(chapter = i + 1, "Empty revision, keeping original chapter");
                    revised.push(chapter.clone());
                }
                Err(e) if e.is_configuration() => return Err(e.into()),
                Err(e) => {
                    warn!(chapter = i + 1, error = %e, "Revision failed, keeping original chapter");
                    revised.push(chapter.clone());
                }
            }
        }

        Ok(Document::new(doc.header, revised))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ErrorCategory;
    use crate::ai::provider::testing::ScriptedBackend;
    use crate::config::{BackendKind, Config};
    use crate::report::critique::ExclusionItem;
    use regex::Regex;
    use std::sync::Arc;

    fn gateway_with(backend: Arc<ScriptedBackend>) -> Gateway {
        Gateway::new(&Config::default(), "t").with_backend(BackendKind::Kimi, backend)
    }

    fn four_chapters() -> String {
        "# 报告\n\n> 摘要\n\n---\n\n## 一、甲\n\n甲正文\n\n## 二、乙\n\n乙正文\n\n## 三、丙\n\n丙正文\n\n## 四、丁\n\n丁正文\n"
            .to_string()
    }

    #[test]
    fn test_floor_arithmetic() {
        assert_eq!(
            length_floor(20_000, 4, 16_000, 0.6, 2_000),
            LengthFloor { total: 16_000, per_chapter: 4_000 }
        );
        assert_eq!(
            length_floor(100_000, 5, 16_000, 0.6, 2_000),
            LengthFloor { total: 60_000, per_chapter: 12_000 }
        );
        assert_eq!(length_floor(0, 10, 16_000, 0.6, 2_000).per_chapter, 2_000);
        assert_eq!(length_floor(0, 0, 16_000, 0.6, 2_000).per_chapter, 16_000);
    }

    #[test]
    fn test_corpus_slices_tile() {
        let corpus = "一二三四五六七八九十";
        let slices: Vec<&str> = (0..3).map(|i| corpus_slice(corpus, i, 3)).collect();
        assert_eq!(slices, vec!["一二三", "四五六", "七八九十"]);
    }

    #[tokio::test]
    async fn test_chapters_padded_to_floor() {
        let floor_re = Regex::new(r"本章正文不少于 (\d+) 字").unwrap();
        let backend = Arc::new(ScriptedBackend::new(move |req| {
            let prompt = req.last_user_text();
            let n: usize = floor_re.captures(prompt).unwrap()[1].parse().unwrap();
            Ok(format!("## 章\n\n{}", "字".repeat(n)))
        }));
        let gateway = gateway_with(backend.clone());
        let config = PipelineConfig::default();
        let corpus = "语".repeat(20_000);

        let doc = ChapterReviser::new(&gateway, &config)
            .revise(&four_chapters(), "意见", &ExclusionList::default(), &corpus)
            .await
            .unwrap();

        assert_eq!(backend.call_count(), 4);
        assert_eq!(doc.chapters.len(), 4);
        for chapter in &doc.chapters {
            assert!(chapter.char_len() >= 4_000);
        }
        assert_eq!(doc.chapters[2].title, "三、丙");
        assert!(doc.header.starts_with("# 报告"));
        assert!(backend.calls()[0].last_user_text().contains("【排除清单】\n无\n"));
    }

    #[tokio::test]
    async fn test_exclusions_removed() {
        let block = |text: &str, open: &str, close: &str| -> String {
            let start = text.find(open).unwrap() + open.len();
            let end = text.find(close).unwrap();
            text[start..end].to_string()
        };
        let backend = Arc::new(ScriptedBackend::new(move |req| {
            let prompt = req.last_user_text();
            let mut chapter = block(prompt, "【待修订章节】\n", "\n【/待修订章节】");
            let exclusions = block(prompt, "【排除清单】\n", "\n【/排除清单】");
            let quoted = Regex::new(r"「([^」]+)」").unwrap();
            for cap in quoted.captures_iter(&exclusions) {
                chapter = chapter.replace(&cap[1], "");
            }
            Ok(chapter)
        }));
        let gateway = gateway_with(backend);
        let config = PipelineConfig::default();
        let report = "# 报告\n\n---\n\n## 一、现状\n\n市场稳定。编造的数据占比九成。结论可靠。\n";
        let exclusions = ExclusionList {
            text: "- 位置：一 | 原文：「编造的数据占比九成。」 | 原因：无来源".to_string(),
            items: vec![ExclusionItem {
                location_hint: "一".to_string(),
                quoted_text: "编造的数据占比九成。".to_string(),
                reason: "无来源".to_string(),
            }],
        };

        let doc = ChapterReviser::new(&gateway, &config)
            .revise(report, "", &exclusions, "语料")
            .await
            .unwrap();
        let rendered = doc.render();
        assert!(!rendered.contains("编造的数据占比九成"));
        assert!(rendered.contains("## 一、现状\n\n市场稳定。结论可靠。"));
    }

    #[tokio::test]
    async fn test_failed_chapter_kept() {
        let backend = Arc::new(ScriptedBackend::new(|req| {
            if req.last_user_text().contains("第 2/4 章") {
                Err(crate::types::CompletionError::new(ErrorCategory::Network, "reset"))
            } else {
                Ok("## x\n\n新正文".to_string())
            }
        }));
        let gateway = gateway_with(backend);
        let config = PipelineConfig::default();
        let doc = ChapterReviser::new(&gateway, &config)
            .revise(&four_chapters(), "", &ExclusionList::default(), "")
            .await
            .unwrap();
        assert_eq!(doc.chapters[0].body, "新正文");
        assert_eq!(doc.chapters[1].body, "乙正文");
    }

    #[tokio::test]
    async fn test_missing_credential_is_fatal() {
        let gateway = Gateway::new(&Config::default(), "t");
        let config = PipelineConfig::default();
        let err = ChapterReviser::new(&gateway, &config)
            .revise(&four_chapters(), "", &ExclusionList::default(), "")
            .await
            .unwrap_err();
        assert_eq!(err.completion_category(), Some(ErrorCategory::MissingCredential));
    }
}
