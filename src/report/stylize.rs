//! Style Transformer
//!
//! Rewrites each chapter of report v2 into flowing prose in one of three
//! document presets, optionally gated against the corpus so that content
//! with no corpus support is dropped.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, instrument, warn};

use super::document::Document;
use super::prompts;
use super::reviser::corpus_slice;
use crate::ai::{CompletionRequest, Gateway};
use crate::config::PipelineConfig;
use crate::constants::TRUNCATION_NOTICE;
use crate::types::{Result, char_len, truncate_chars, truncate_with_notice};

/// Version suffix of a report v2 title line
static V2_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(#\s.*?)(?:\s+2\.0(?:\s*（补充完整版）)?|\s*（补充完整版）)\s*$")
        .expect("Invalid version suffix regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StylePreset {
    /// Business model design report
    #[default]
    A,
    /// Feasibility study
    B,
    /// Academic review
    C,
}

impl StylePreset {
    pub fn name(&self) -> &'static str {
        match self {
            Self::A => "商业模式设计报告",
            Self::B => "可行性研究报告",
            Self::C => "学术综述",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::A => {
                "本报告为**商业模式设计报告**。要求：
- 面向投资人、合作方、产品团队，突出商业逻辑与落地路径
- 语言简洁、决策导向，多用「可」「需」「将」等行动型表述
- 强调价值主张、收入来源、关键资源与成本结构
- 保留全部参数、表格与数据，用段落自然串联"
            }
            Self::B => {
                "本报告为**可行性研究报告**。要求：
- 面向立项评审、决策层，突出可行性、风险与建议
- 语言严谨、论证充分，多用「经评估」「建议」「需注意」等
- 强调技术可行性、经济可行性、合规边界与实施路径
- 保留全部参数、表格与数据，用段落自然串联"
            }
            Self::C => {
                "本报告为**学术综述**。要求：
- 面向学术发表或行业研究，突出系统性、综述性与引用价值
- 语言规范、逻辑严密，多用「研究表明」「现有文献」「综上所述」等
- 强调概念界定、理论框架、研究进展与展望
- 保留全部参数、表格与数据，用段落自然串联"
            }
        }
    }
}

impl fmt::Display for StylePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        };
        write!(f, "{}", letter)
    }
}

impl FromStr for StylePreset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            other => Err(format!("unknown style '{}', expected A, B or C", other)),
        }
    }
}

/// Mark the title line as the final version and annotate the style name.
/// A trailing `2.0` or `（补充完整版）` is replaced; a title without one gets
/// the version appended. Only the first `# ` line is touched.
pub fn stylize_header(header: &str, preset: StylePreset) -> String {
    let Some(first) = header.lines().next() else {
        return String::new();
    };
    if !first.starts_with("# ") {
        return header.to_string();
    }
    let title = match V2_SUFFIX.captures(first) {
        Some(caps) => caps[1].trim_end().to_string(),
        None => first.trim_end().to_string(),
    };
    format!("{} 3.0 最终版（{}）{}", title, preset.name(), &header[first.len()..])
}

pub struct StyleTransformer<'a> {
    gateway: &'a Gateway,
    config: &'a PipelineConfig,
}

impl<'a> StyleTransformer<'a> {
    pub fn new(gateway: &'a Gateway, config: &'a PipelineConfig) -> Self {
        Self { gateway, config }
    }

    /// Produce report v3 from report v2; an empty corpus disables the gate
    #[instrument(skip_all, fields(style = %preset))]
    pub async fn transform(&self, report: &str, preset: StylePreset, corpus: &str) -> Result<Document> {
        let doc = Document::parse(report);
        let corpus = truncate_chars(corpus, self.config.style_corpus_max);
        let gated = !corpus.trim().is_empty();
        if !gated {
            warn!("No corpus available, style rewrite runs without the hallucination gate");
        }
        let total = doc.chapters.len();
        info!(chapters = total, style = preset.name(), gated, "Style rewrite");

        let mut chapters = Vec::with_capacity(total);
        for (i, chapter) in doc.chapters.iter().enumerate() {
            info!("Stylize: chapter {}/{} {}", i + 1, total, chapter.title);
            let body = truncate_with_notice(&chapter.body, self.config.style_chapter_window, TRUNCATION_NOTICE);
            let slice = gated.then(|| {
                truncate_with_notice(
                    corpus_slice(corpus, i, total),
                    self.config.style_corpus_slice,
                    TRUNCATION_NOTICE,
                )
            });
            let request = CompletionRequest::prompt(
                prompts::style_system(gated),
                prompts::style_prompt(&chapter.title, &body, preset.description(), slice.as_deref()),
            )
            .settings(self.config.style);

            let text = self.gateway.complete("stylize", request).await?;
            if text.trim().is_empty() {
                warn!(chapter = i + 1, "Empty style rewrite, keeping chapter");
                chapters.push(chapter.clone());
            } else {
                let rewritten = chapter.with_rewrite(&text);
                info!(chapter = i + 1, chars = char_len(&rewritten.body), "Chapter rewritten");
                chapters.push(rewritten);
            }
        }

        Ok(Document::new(stylize_header(&doc.header, preset), chapters))
    }
}
