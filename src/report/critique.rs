//! Critique Panel
//!
//! Five independent lenses review the draft. Each lens is one completion
//! call over the same report window; the retrieval lens runs on the
//! retrieval backend and may cite sources.
//!
//! The retrieval lens also emits the hallucination list. It is extracted
//! into an [`ExclusionList`] that the reviser must delete from the report.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::artifacts::ArtifactStore;
use super::prompts;
use crate::ai::{Citation, CompletionRequest, Gateway};
use crate::config::PipelineConfig;
use crate::constants::review::NO_FABRICATION;
use crate::types::{Result, truncate_chars};

/// Combined critique artifact name
pub const COMBINED_NAME: &str = "专家意见汇总";
/// Exclusion list artifact name
pub const EXCLUSIONS_NAME: &str = "排除清单";
/// Structured exclusion list artifact name
pub const EXCLUSIONS_JSON_NAME: &str = "exclusions";

const COMBINED_HEADER: &str = "# 深度调查报告 1.0 — 专家评审意见汇总\n\n";

// =============================================================================
// Lenses
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lens {
    FactLogic,
    StructureDepth,
    Feasibility,
    RetrievalCheck,
    StyleVoice,
}

impl Lens {
    pub const ALL: [Lens; 5] = [
        Self::FactLogic,
        Self::StructureDepth,
        Self::Feasibility,
        Self::RetrievalCheck,
        Self::StyleVoice,
    ];

    /// Artifact and section name
    pub fn name(&self) -> &'static str {
        match self {
            Self::FactLogic => "专家1_事实与逻辑",
            Self::StructureDepth => "专家2_结构与深度",
            Self::Feasibility => "专家3_可行性与合规",
            Self::RetrievalCheck => "专家4_检索核查",
            Self::StyleVoice => "专家5_文风与表达",
        }
    }

    pub fn system(&self) -> &'static str {
        match self {
            Self::FactLogic => prompts::LENS_FACT_LOGIC,
            Self::StructureDepth => prompts::LENS_STRUCTURE_DEPTH,
            Self::Feasibility => prompts::LENS_FEASIBILITY,
            Self::RetrievalCheck => prompts::LENS_RETRIEVAL_CHECK,
            Self::StyleVoice => prompts::LENS_STYLE_VOICE,
        }
    }

    pub fn uses_retrieval(&self) -> bool {
        matches!(self, Self::RetrievalCheck)
    }
}

#[derive(Debug, Clone)]
pub struct LensOpinion {
    pub lens: Lens,
    pub text: String,
    pub citations: Vec<Citation>,
    /// Retrieval backend failed and the default backend answered instead
    pub fell_back: bool,
}

impl LensOpinion {
    /// Opinion text followed by its cited sources, if any
    pub fn full_text(&self) -> String {
        if self.citations.is_empty() {
            return self.text.clone();
        }
        let sources: Vec<String> = self
            .citations
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{}] {}. {}", i + 1, c.title, c.url))
            .collect();
        format!("{}\n\n参考来源：\n{}", self.text.trim_end(), sources.join("\n"))
    }
}

// =============================================================================
// Exclusion List
// =============================================================================

const EXCLUSION_MARKERS: &[&str] = &[
    "【幻觉清单】",
    "【排除清单】",
    "### 幻觉清单",
    "## 幻觉清单",
    "## 排除清单",
    "幻觉清单：",
    "排除清单：",
];

const SECTION_MARKERS: &[&str] = &["【核查意见】", "【修改意见】", "【其他意见】", "## 核查意见"];

static NOTHING_FOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"未发现[^。\n]{0,8}(?:编造|幻觉|虚构|捏造)|(?:无|没有)(?:明显)?(?:编造|幻觉|虚构)内容")
        .expect("Invalid nothing-found regex")
});

static QUOTED_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"「([^」]+)」").expect("Invalid quoted span regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionItem {
    #[serde(default)]
    pub location_hint: String,
    pub quoted_text: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionList {
    /// Extracted list text, the no-fabrication sentinel, or empty
    pub text: String,
    #[serde(default)]
    pub items: Vec<ExclusionItem>,
}

impl ExclusionList {
    /// Extract the hallucination list from a retrieval-lens opinion
    pub fn extract(opinion: &str) -> Self {
        let Some((start, marker)) = first_marker(opinion, EXCLUSION_MARKERS) else {
            let text = if NOTHING_FOUND.is_match(opinion) {
                NO_FABRICATION.to_string()
            } else {
                String::new()
            };
            return Self { text, items: Vec::new() };
        };

        let rest = &opinion[start + marker.len()..];
        let end = first_marker(rest, &[EXCLUSION_MARKERS, SECTION_MARKERS].concat())
            .map(|(pos, _)| pos)
            .unwrap_or(rest.len());
        Self::from_text(&rest[..end])
    }

    /// Build from list content: one entry per line
    pub fn from_text(content: &str) -> Self {
        let content = content.trim();
        let items = parse_items(content);
        if items.is_empty() && (content.is_empty() || NOTHING_FOUND.is_match(content)) {
            return Self {
                text: NO_FABRICATION.to_string(),
                items,
            };
        }
        Self {
            text: content.to_string(),
            items,
        }
    }

    /// Whether anything must be removed
    pub fn is_effective(&self) -> bool {
        let text = self.text.trim();
        !text.is_empty() && text != NO_FABRICATION
    }

    /// Text placed in the reviser prompt
    pub fn prompt_text(&self) -> &str {
        if self.is_effective() { self.text.trim() } else { "无" }
    }

    /// Markdown artifact body
    pub fn to_markdown(&self) -> String {
        if self.text.trim().is_empty() {
            NO_FABRICATION.to_string()
        } else {
            self.text.trim().to_string()
        }
    }
}

/// Earliest occurrence of any marker; the longest marker wins a tie
fn first_marker<'m>(text: &str, markers: &[&'m str]) -> Option<(usize, &'m str)> {
    markers
        .iter()
        .filter_map(|m| text.find(*m).map(|pos| (pos, *m)))
        .min_by(|a, b| a.0.cmp(&b.0).then(b.1.len().cmp(&a.1.len())))
}

fn parse_items(content: &str) -> Vec<ExclusionItem> {
    let mut items = Vec::new();
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if (line.contains('|') || line.contains('｜'))
            && let Some(item) = parse_pipe_line(line)
        {
            items.push(item);
            continue;
        }
        for cap in QUOTED_SPAN.captures_iter(line) {
            let quoted = cap[1].trim();
            if !quoted.is_empty() {
                items.push(ExclusionItem {
                    location_hint: String::new(),
                    quoted_text: quoted.to_string(),
                    reason: String::new(),
                });
            }
        }
    }
    items
}

/// `- 位置：… | 原文：「…」 | 原因：…`
fn parse_pipe_line(line: &str) -> Option<ExclusionItem> {
    let mut item = ExclusionItem {
        location_hint: String::new(),
        quoted_text: String::new(),
        reason: String::new(),
    };
    for field in line.split(['|', '｜']) {
        let field = field.trim().trim_start_matches(['-', '*', '•']).trim();
        let Some((key, value)) = field.split_once('：').or_else(|| field.split_once(':')) else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "位置" => item.location_hint = value.to_string(),
            "原文" => item.quoted_text = strip_quotes(value).to_string(),
            "原因" => item.reason = value.to_string(),
            _ => {}
        }
    }
    (!item.quoted_text.is_empty()).then_some(item)
}

fn strip_quotes(s: &str) -> &str {
    s.trim()
        .trim_start_matches(['「', '“', '"', '\''])
        .trim_end_matches(['」', '”', '"', '\''])
        .trim()
}

// =============================================================================
// Panel
// =============================================================================

#[derive(Debug, Clone)]
pub struct CritiqueOutcome {
    pub opinions: Vec<LensOpinion>,
    pub exclusions: ExclusionList,
}

impl CritiqueOutcome {
    /// All opinions under one header, one section per lens
    pub fn combined(&self) -> String {
        let mut out = COMBINED_HEADER.to_string();
        for opinion in &self.opinions {
            out.push_str(&format!(
                "## {}\n\n{}\n\n---\n\n",
                opinion.lens.name(),
                opinion.full_text().trim()
            ));
        }
        out
    }

    /// Write per-lens files, the combined file and the exclusion list
    pub async fn persist(&self, store: &ArtifactStore, base: &str) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for opinion in &self.opinions {
            let name = opinion.lens.name();
            let body = format!("# {} 评审意见\n\n{}", name, opinion.full_text().trim());
            written.push(store.write(&store.expert_path(base, name, "md"), &body).await?);
        }
        written.push(
            store
                .write(&store.expert_path(base, COMBINED_NAME, "md"), &self.combined())
                .await?,
        );
        written.push(
            store
                .write(
                    &store.expert_path(base, EXCLUSIONS_NAME, "md"),
                    &self.exclusions.to_markdown(),
                )
                .await?,
        );
        written.push(
            store
                .write_json(&store.expert_path(base, EXCLUSIONS_JSON_NAME, "json"), &self.exclusions)
                .await?,
        );
        Ok(written)
    }
}

pub struct CritiquePanel<'a> {
    gateway: &'a Gateway,
    config: &'a PipelineConfig,
}

impl<'a> CritiquePanel<'a> {
    pub fn new(gateway: &'a Gateway, config: &'a PipelineConfig) -> Self {
        Self { gateway, config }
    }

    #[instrument(skip_all)]
    pub async fn review(&self, report: &str) -> Result<CritiqueOutcome> {
        let window = truncate_chars(report, self.config.critique_window);
        let prompt = prompts::critique_prompt(window);

        let mut opinions = Vec::with_capacity(Lens::ALL.len());
        for (i, lens) in Lens::ALL.iter().enumerate() {
            info!("Critique: lens {}/{} {}", i + 1, Lens::ALL.len(), lens.name());
            opinions.push(self.ask(*lens, &prompt).await?);
        }

        let exclusions = opinions
            .iter()
            .find(|o| o.lens.uses_retrieval())
            .map(|o| ExclusionList::extract(&o.text))
            .unwrap_or_default();
        info!(
            items = exclusions.items.len(),
            effective = exclusions.is_effective(),
            "Exclusion list extracted"
        );

        Ok(CritiqueOutcome { opinions, exclusions })
    }

    async fn ask(&self, lens: Lens, prompt: &str) -> Result<LensOpinion> {
        let request = CompletionRequest::prompt(lens.system(), prompt).settings(self.config.critique);

        if !lens.uses_retrieval() {
            let text = self.gateway.complete("critique", request).await?;
            return Ok(LensOpinion {
                lens,
                text,
                citations: Vec::new(),
                fell_back: false,
            });
        }

        let retrieval = request.clone().backend(self.gateway.retrieval_backend());
        match self.gateway.complete_with_citations("critique", retrieval).await {
            Ok((text, citations)) => Ok(LensOpinion {
                lens,
                text,
                citations,
                fell_back: false,
            }),
            Err(e) => {
                warn!(
                    lens = lens.name(),
                    error = %e,
                    "Retrieval backend failed, asking the default backend"
                );
                let fallback = request.backend(self.gateway.default_backend());
                let text = self.gateway.complete("critique", fallback).await?;
                Ok(LensOpinion {
                    lens,
                    text,
                    citations: Vec::new(),
                    fell_back: true,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ErrorCategory;
    use crate::ai::provider::testing::ScriptedBackend;
    use crate::config::{BackendKind, Config};
    use crate::report::artifacts::read_required;
    use std::sync::Arc;
    use tempfile::TempDir;

    const RETRIEVAL_OPINION: &str = "【核查意见】\n- 数据需核实\n\n【幻觉清单】\n\
- 位置：第二章 | 原文：「某公司2023年营收100亿」 | 原因：对话中无此数据\n\
- 位置：第三章 | 原文：“专家张三指出” | 原因：人物无来源\n";

    #[test]
    fn test_extract_pipe_items() {
        let list = ExclusionList::extract(RETRIEVAL_OPINION);
        assert!(list.is_effective());
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.items[0].location_hint, "第二章");
        assert_eq!(list.items[0].quoted_text, "某公司2023年营收100亿");
        assert_eq!(list.items[1].quoted_text, "专家张三指出");
        assert!(!list.text.contains("核查意见"));
    }

    #[test]
    fn test_extract_stops_at_next_section() {
        let text = "## 幻觉清单\n- 「编造的句子」\n\n【其他意见】\n无";
        let list = ExclusionList::extract(text);
        assert_eq!(list.text, "- 「编造的句子」");
        assert_eq!(list.items[0].quoted_text, "编造的句子");
    }

    #[test]
    fn test_nothing_found_sentinel() {
        for text in [
            "【核查意见】\n均已核实\n\n【幻觉清单】\n未发现编造内容",
            "【幻觉清单】\n",
            "核查完毕，未发现明显的编造或幻觉。",
            "报告中没有幻觉内容。",
        ] {
            let list = ExclusionList::extract(text);
            assert_eq!(list.text, NO_FABRICATION, "{text}");
            assert!(!list.is_effective());
            assert_eq!(list.prompt_text(), "无");
        }
    }

    #[test]
    fn test_no_marker_no_sentinel_is_empty() {
        let list = ExclusionList::extract("数据大致可靠。");
        assert!(list.text.is_empty());
        assert!(!list.is_effective());
        assert_eq!(list.to_markdown(), NO_FABRICATION);
    }

    fn panel_gateway(retrieval: Arc<ScriptedBackend>, default: Arc<ScriptedBackend>) -> Gateway {
        Gateway::new(&Config::default(), "t")
            .with_backend(BackendKind::Kimi, default)
            .with_backend(BackendKind::Perplexity, retrieval)
    }

    #[tokio::test]
    async fn test_panel_writes_all_artifacts() {
        let retrieval = Arc::new(ScriptedBackend::new(|_| Ok(String::new())).with_citations(|_| {
            Ok((
                RETRIEVAL_OPINION.to_string(),
                vec![Citation {
                    url: "https://example.org/a".to_string(),
                    title: "来源A".to_string(),
                }],
            ))
        }));
        let default = Arc::new(ScriptedBackend::fixed("- 建议补充论据"));
        let gateway = panel_gateway(retrieval.clone(), default.clone());
        let config = PipelineConfig::default();

        let outcome = CritiquePanel::new(&gateway, &config)
            .review("# 报告\n\n正文")
            .await
            .unwrap();
        assert_eq!(default.call_count(), 4);
        assert_eq!(retrieval.call_count(), 1);
        assert_eq!(outcome.exclusions.items.len(), 2);

        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let written = outcome.persist(&store, "chat").await.unwrap();
        assert_eq!(written.len(), 8);

        let combined = read_required(&store.expert_path("chat", COMBINED_NAME, "md"))
            .await
            .unwrap();
        assert!(combined.starts_with(COMBINED_HEADER));
        for lens in Lens::ALL {
            assert!(combined.contains(&format!("## {}", lens.name())));
        }
        assert!(combined.contains("[1] 来源A. https://example.org/a"));

        let lens_file = read_required(&store.expert_path("chat", "专家2_结构与深度", "md"))
            .await
            .unwrap();
        assert_eq!(lens_file, "# 专家2_结构与深度 评审意见\n\n- 建议补充论据");

        let json = read_required(&store.expert_path("chat", EXCLUSIONS_JSON_NAME, "json"))
            .await
            .unwrap();
        let parsed: ExclusionList = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, outcome.exclusions);
    }

    #[tokio::test]
    async fn test_retrieval_failure_falls_back_to_default() {
        let retrieval = Arc::new(ScriptedBackend::failing(ErrorCategory::Unavailable));
        let default = Arc::new(ScriptedBackend::fixed("【幻觉清单】\n未发现编造内容"));
        let gateway = panel_gateway(retrieval.clone(), default.clone());
        let config = PipelineConfig::default();

        let outcome = CritiquePanel::new(&gateway, &config)
            .review("报告")
            .await
            .unwrap();
        let lens4 = &outcome.opinions[3];
        assert!(lens4.fell_back);
        assert_eq!(default.call_count(), 5);
        assert_eq!(outcome.exclusions.text, NO_FABRICATION);
    }

    #[tokio::test]
    async fn test_other_lens_failure_propagates() {
        let retrieval = Arc::new(ScriptedBackend::fixed("ok"));
        let default = Arc::new(ScriptedBackend::failing(ErrorCategory::Network));
        let gateway = panel_gateway(retrieval, default);
        let config = PipelineConfig::default();
        let err = CritiquePanel::new(&gateway, &config)
            .review("报告")
            .await
            .unwrap_err();
        assert_eq!(err.completion_category(), Some(ErrorCategory::Network));
    }
}
