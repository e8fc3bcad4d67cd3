//! Citation Annotator
//!
//! Sends report v3 chapter by chapter to the retrieval backend, which marks
//! verifiable claims with `[n]` and returns the matching sources. Markers
//! are local to each chapter's answer, so they are renumbered into one
//! report-wide sequence and the sources are collected into a single
//! References section.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{info, instrument, warn};

use super::document::{Chapter, Document};
use super::prompts;
use crate::ai::{Citation, CompletionRequest, Gateway, Message};
use crate::config::PipelineConfig;
use crate::constants::TRUNCATION_NOTICE;
use crate::types::{Result, char_len, skip_chars, truncate_chars};

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("Invalid citation marker regex"));

static REFERENCES_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^#{1,6}\s*(?:References|参考文献|参考资料)\s*$")
        .expect("Invalid references heading regex")
});

/// Version suffix of a report v3 title line, optionally followed by the
/// style annotation
static V3_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(#[^#\n].*?)(?:(报告)\s*3\.0(?:\s*最终版)?|\s*3\.0\s*最终版)((?:（[^）\n]*）)*)[ \t]*$")
        .expect("Invalid version suffix regex")
});

// =============================================================================
// Renumbering
// =============================================================================

/// Collapse sources sharing a URL. Returns the unique list and, for every
/// input source, its 1-based position in that list. Sources without a URL
/// are kept as their own entries so marker positions stay aligned.
pub fn dedup_citations(citations: &[Citation]) -> (Vec<Citation>, Vec<usize>) {
    let mut unique: Vec<Citation> = Vec::new();
    let mut by_url: HashMap<String, usize> = HashMap::new();
    let mut map = Vec::with_capacity(citations.len());

    for citation in citations {
        let url = citation.url.trim();
        if !url.is_empty()
            && let Some(&pos) = by_url.get(url)
        {
            map.push(pos);
            continue;
        }
        unique.push(Citation {
            url: url.to_string(),
            title: citation.title.trim().to_string(),
        });
        let pos = unique.len();
        if !url.is_empty() {
            by_url.insert(url.to_string(), pos);
        }
        map.push(pos);
    }
    (unique, map)
}

/// Rewrite local `[n]` markers to `[offset + map[n]]`; markers with no
/// matching source are removed
pub fn renumber_markers(text: &str, map: &[usize], offset: usize) -> String {
    MARKER
        .replace_all(text, |caps: &regex::Captures| {
            match caps[1].parse::<usize>() {
                Ok(n) if (1..=map.len()).contains(&n) => format!("[{}]", offset + map[n - 1]),
                _ => String::new(),
            }
        })
        .into_owned()
}

/// Remove every `[n]` marker
fn strip_markers(text: &str) -> String {
    MARKER.replace_all(text, "").into_owned()
}

/// Drop a References section the model appended despite instructions
fn strip_references(text: &str) -> &str {
    match REFERENCES_HEADING.find(text) {
        Some(m) => text[..m.start()].trim_end(),
        None => text,
    }
}

/// `---` rule, heading and one `[i] title. url` line per source
pub fn format_references(references: &[Citation]) -> String {
    let lines: Vec<String> = references
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let title = if c.title.is_empty() { &c.url } else { &c.title };
            format!("[{}] {}. {}", i + 1, title, c.url).trim_end().to_string()
        })
        .collect();
    format!("---\n\n## References\n\n{}", lines.join("\n"))
}

/// Mark the title line as the cited version
pub fn annotate_header(header: &str) -> String {
    V3_SUFFIX
        .replacen(header, 1, |caps: &regex::Captures| {
            let version = if caps.get(2).is_some() {
                "报告 4.0（含引用）"
            } else {
                " 4.0（含引用）"
            };
            format!("{}{}{}", &caps[1], version, &caps[3])
        })
        .into_owned()
}

// =============================================================================
// Annotator
// =============================================================================

#[derive(Debug, Clone)]
pub struct AnnotatedReport {
    pub document: Document,
    pub references: Vec<Citation>,
    /// Sources contributed by each chapter, in order
    pub chapter_counts: Vec<usize>,
}

impl AnnotatedReport {
    pub fn render(&self) -> String {
        let body = self.document.render();
        if self.references.is_empty() {
            return body;
        }
        format!("{}\n\n{}\n", body.trim_end(), format_references(&self.references))
    }
}

pub struct CitationAnnotator<'a> {
    gateway: &'a Gateway,
    config: &'a PipelineConfig,
}

impl<'a> CitationAnnotator<'a> {
    pub fn new(gateway: &'a Gateway, config: &'a PipelineConfig) -> Self {
        Self { gateway, config }
    }

    /// Produce report v4 from report v3
    #[instrument(skip_all)]
    pub async fn annotate(&self, report: &str) -> Result<AnnotatedReport> {
        let doc = Document::parse(report);
        let total = doc.chapters.len();
        let pause = Duration::from_millis(self.config.citation_pause_ms);

        let mut chapters = Vec::with_capacity(total);
        let mut references: Vec<Citation> = Vec::new();
        let mut chapter_counts = Vec::with_capacity(total);

        for (i, chapter) in doc.chapters.iter().enumerate() {
            info!("Citations: chapter {}/{} {}", i + 1, total, chapter.title);
            let (annotated, sources) = self.annotate_chapter(chapter, references.len()).await?;
            info!(chapter = i + 1, sources = sources.len(), "Chapter annotated");
            chapter_counts.push(sources.len());
            references.extend(sources);
            chapters.push(annotated);

            if i + 1 < total && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
        info!(sources = references.len(), "Citation pass complete");

        Ok(AnnotatedReport {
            document: Document::new(annotate_header(&doc.header), chapters),
            references,
            chapter_counts,
        })
    }

    async fn annotate_chapter(&self, chapter: &Chapter, offset: usize) -> Result<(Chapter, Vec<Citation>)> {
        let window = self.config.citation_chapter_window;
        let truncated = char_len(&chapter.body) > window;
        let mut body = truncate_chars(&chapter.body, window).to_string();
        if truncated {
            body.push_str(TRUNCATION_NOTICE);
        }

        let request = CompletionRequest::new(vec![Message::user(prompts::citation_prompt(
            &chapter.title,
            &body,
        ))])
        .settings(self.config.citation)
        .backend(self.gateway.retrieval_backend());

        let (text, citations) = match self.gateway.complete_with_citations("citations", request).await {
            Ok(answer) => answer,
            Err(e) if e.is_configuration() => return Err(e.into()),
            Err(e) => {
                warn!(chapter = %chapter.title, error = %e, "Citation call failed, chapter left unannotated");
                return Ok((chapter.clone(), Vec::new()));
            }
        };
        if text.trim().is_empty() {
            warn!(chapter = %chapter.title, "Empty citation response, chapter left unannotated");
            return Ok((chapter.clone(), Vec::new()));
        }

        let (sources, map) = dedup_citations(&citations);
        let mut annotated = renumber_markers(strip_references(&text), &map, offset);
        if truncated {
            // The backend only saw the window; carry the rest over unannotated,
            // without markers that would collide with the report-wide numbering
            let annotated_head = annotated.trim_end().trim_end_matches(TRUNCATION_NOTICE.trim());
            annotated = format!(
                "{}{}",
                annotated_head.trim_end(),
                strip_markers(skip_chars(&chapter.body, window))
            );
        }
        Ok((chapter.with_rewrite(&annotated), sources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ErrorCategory;
    use crate::ai::provider::testing::ScriptedBackend;
    use crate::config::{BackendKind, Config};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn cite(url: &str) -> Citation {
        Citation {
            url: url.to_string(),
            title: format!("T{}", url),
        }
    }

    #[test]
    fn test_dedup_by_url() {
        let (unique, map) = dedup_citations(&[cite("a"), cite("b"), cite("a"), cite(""), cite("")]);
        assert_eq!(unique.len(), 4);
        assert_eq!(map, vec![1, 2, 1, 3, 4]);
    }

    #[test]
    fn test_renumber_and_strip() {
        let out = renumber_markers("甲[1]乙[2]丙[3]丁[0]", &[1, 2], 5);
        assert_eq!(out, "甲[6]乙[7]丙丁");
    }

    #[test]
    fn test_header_versions() {
        assert_eq!(
            annotate_header("# 深度调查报告 3.0 最终版（学术综述）"),
            "# 深度调查报告 4.0（含引用）（学术综述）"
        );
        assert_eq!(annotate_header("# 标题 3.0 最终版"), "# 标题 4.0（含引用）");
        assert_eq!(annotate_header("# 无版本"), "# 无版本");
        assert_eq!(
            annotate_header("# 区块链3.0 最终版研究\n\n---"),
            "# 区块链3.0 最终版研究\n\n---"
        );
        assert_eq!(
            annotate_header("# 区块链2.0研究 3.0 最终版（学术综述）\n\n> 3.0 最终版摘要"),
            "# 区块链2.0研究 4.0（含引用）（学术综述）\n\n> 3.0 最终版摘要"
        );
    }

    #[test]
    fn test_strip_model_references() {
        assert_eq!(strip_references("正文[1]\n\n## 参考文献\n[1] x"), "正文[1]");
        assert_eq!(strip_references("正文"), "正文");
    }

    proptest! {
        #[test]
        fn prop_markers_in_range(
            sources in 0usize..6,
            offset in 0usize..40,
            markers in proptest::collection::vec(0usize..10, 0..12),
        ) {
            let citations: Vec<Citation> = (0..sources).map(|i| cite(&format!("u{}", i % 3))).collect();
            let (unique, map) = dedup_citations(&citations);
            let text: String = markers.iter().map(|n| format!("句[{}]", n)).collect();
            let out = renumber_markers(&text, &map, offset);
            for cap in MARKER.captures_iter(&out) {
                let m: usize = cap[1].parse().unwrap();
                prop_assert!(m > offset && m <= offset + unique.len());
            }
            let kept = markers.iter().filter(|n| (1..=sources).contains(*n)).count();
            prop_assert_eq!(MARKER.find_iter(&out).count(), kept);
        }
    }

    const REPORT: &str = "# 深度调查报告 3.0 最终版\n\n---\n\n## 一、甲\n\n甲正文\n\n## 二、乙\n\n乙正文\n\n## 三、丙\n\n丙正文\n";

    fn annotator_gateway(backend: Arc<ScriptedBackend>) -> Gateway {
        Gateway::new(&Config::default(), "t").with_backend(BackendKind::Perplexity, backend)
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            citation_pause_ms: 0,
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_report_wide_numbering() {
        let backend = Arc::new(ScriptedBackend::new(|_| Ok(String::new())).with_citations(|req| {
            let prompt = req.last_user_text();
            if prompt.contains("甲正文") {
                Ok(("## 一、甲\n\n甲正文[1][2]".to_string(), vec![cite("a"), cite("b")]))
            } else if prompt.contains("乙正文") {
                Ok(("乙正文[1]\n\n## References\n[1] a".to_string(), vec![cite("c")]))
            } else {
                Ok(("丙正文[1][2]".to_string(), vec![cite("d"), cite("d")]))
            }
        }));
        let gateway = annotator_gateway(backend);
        let config = config();

        let report = CitationAnnotator::new(&gateway, &config)
            .annotate(REPORT)
            .await
            .unwrap();
        assert_eq!(report.chapter_counts, vec![2, 1, 1]);
        assert_eq!(report.references.len(), report.chapter_counts.iter().sum::<usize>());

        let text = report.render();
        assert!(text.starts_with("# 深度调查报告 4.0（含引用）"));
        assert!(text.contains("甲正文[1][2]"));
        assert!(text.contains("乙正文[3]\n"));
        assert!(text.contains("丙正文[4][4]"));
        assert!(text.ends_with("## References\n\n[1] Ta. a\n[2] Tb. b\n[3] Tc. c\n[4] Td. d\n"));
        assert_eq!(text.matches("## References").count(), 1);
    }

    #[tokio::test]
    async fn test_failed_chapter_passes_through() {
        let backend = Arc::new(ScriptedBackend::new(|_| Ok(String::new())).with_citations(|req| {
            if req.last_user_text().contains("乙正文") {
                Err(crate::types::CompletionError::new(ErrorCategory::Unavailable, "down"))
            } else {
                Ok(("正文[1]".to_string(), vec![cite("x")]))
            }
        }));
        let gateway = annotator_gateway(backend);
        let config = config();

        let report = CitationAnnotator::new(&gateway, &config)
            .annotate(REPORT)
            .await
            .unwrap();
        assert_eq!(report.chapter_counts, vec![1, 0, 1]);
        assert_eq!(report.document.chapters[1].body, "乙正文");
        assert_eq!(report.document.chapters[2].body, "正文[2]");
    }

    #[tokio::test]
    async fn test_no_sources_no_references_section() {
        let gateway = annotator_gateway(Arc::new(ScriptedBackend::fixed("无需引用的正文")));
        let config = config();
        let report = CitationAnnotator::new(&gateway, &config)
            .annotate(REPORT)
            .await
            .unwrap();
        assert!(!report.render().contains("References"));
    }

    #[tokio::test]
    async fn test_long_chapter_tail_preserved() {
        let backend = Arc::new(ScriptedBackend::new(|req| {
            let prompt = req.last_user_text();
            assert!(prompt.contains("[已截断]"));
            Ok("甲甲甲[1]\n\n[已截断]".to_string())
        }));
        let gateway = annotator_gateway(backend);
        let config = PipelineConfig {
            citation_chapter_window: 3,
            ..config()
        };
        let report = CitationAnnotator::new(&gateway, &config)
            .annotate("## 一、长章\n\n甲甲甲乙乙乙")
            .await
            .unwrap();
        assert_eq!(report.document.chapters[0].body, "甲甲甲乙乙乙");
    }

    #[tokio::test]
    async fn test_long_chapter_tail_markers_removed() {
        let backend = Arc::new(ScriptedBackend::new(|_| Ok(String::new())).with_citations(|_| {
            Ok(("甲甲甲[1]\n\n[已截断]".to_string(), vec![cite("x")]))
        }));
        let gateway = annotator_gateway(backend);
        let config = PipelineConfig {
            citation_chapter_window: 3,
            ..config()
        };
        let report = CitationAnnotator::new(&gateway, &config)
            .annotate("## 一、长章\n\n甲甲甲乙[1]乙[7]")
            .await
            .unwrap();
        assert_eq!(report.references.len(), 1);
        assert_eq!(report.document.chapters[0].body, "甲甲甲[1]乙乙");
    }
}
