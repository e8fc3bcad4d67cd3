//! Draft reconciliation: gap-fill against the corpus, then deduplicate.
//!
//! Both passes see the whole report at once, so each works on a bounded
//! window. A report larger than the window is cut at the last chapter
//! heading inside it; the unseen tail is appended unchanged after the
//! rewritten head.

use tracing::{info, instrument, warn};

use super::prompts;
use crate::ai::{CompletionRequest, Gateway};
use crate::config::PipelineConfig;
use crate::types::{Result, char_len, truncate_chars};

pub struct Reconciler<'a> {
    gateway: &'a Gateway,
    config: &'a PipelineConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(gateway: &'a Gateway, config: &'a PipelineConfig) -> Self {
        Self { gateway, config }
    }

    /// Gap-fill then dedup; the result is report v1
    #[instrument(skip_all)]
    pub async fn reconcile(&self, corpus: &str, report: &str) -> Result<String> {
        let filled = self.gap_fill(corpus, report).await?;
        self.dedup(&filled).await
    }

    /// Add corpus content the draft is missing, keeping its structure
    pub async fn gap_fill(&self, corpus: &str, report: &str) -> Result<String> {
        let (head, tail) = split_window("gapfill", report, self.config.gapfill_report_window);
        let prompt = prompts::gapfill_prompt(
            truncate_chars(corpus, self.config.gapfill_corpus_window),
            head,
        );
        info!(chars = char_len(report), "Gap-fill pass");
        self.call("gapfill", prompt, report, tail).await
    }

    /// Merge repeated statements, cases and data
    pub async fn dedup(&self, report: &str) -> Result<String> {
        let (head, tail) = split_window("dedup", report, self.config.dedup_window);
        let prompt = prompts::dedup_prompt(head);
        info!(chars = char_len(report), "Dedup pass");
        self.call("dedup", prompt, report, tail).await
    }

    async fn call(
        &self,
        stage: &str,
        prompt: String,
        previous: &str,
        tail: &str,
    ) -> Result<String> {
        let request = CompletionRequest::prompt(prompts::WRITER_SYSTEM, prompt)
            .settings(self.config.cleanup);
        let text = self.gateway.complete(stage, request).await?;
        if text.trim().is_empty() {
            warn!(stage, "Empty response, keeping previous report");
            return Ok(previous.to_string());
        }
        let tail = tail.trim();
        if tail.is_empty() {
            Ok(text.trim().to_string())
        } else {
            Ok(format!("{}\n\n{}", text.trim(), tail))
        }
    }
}

/// Split a report into the part a pass rewrites and the tail kept verbatim.
///
/// The head ends before the last heading line that starts inside the window,
/// so whole chapters move to the tail; without such a heading the cut falls
/// on the window boundary.
fn split_window<'r>(stage: &str, report: &'r str, window: usize) -> (&'r str, &'r str) {
    let len = char_len(report);
    if len <= window {
        return (report, "");
    }
    let head = truncate_chars(report, window);
    let cut = match head.rfind("\n#") {
        Some(idx) if idx > 0 => idx + 1,
        _ => head.len(),
    };
    warn!(
        stage,
        report_chars = len,
        window,
        kept_chars = char_len(&report[cut..]),
        "Report exceeds the pass window; the tail is kept unchanged"
    );
    (&report[..cut], &report[cut..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ErrorCategory;
    use crate::ai::provider::testing::ScriptedBackend;
    use crate::config::{BackendKind, Config};
    use std::sync::Arc;

    fn gateway_with(backend: Arc<ScriptedBackend>) -> Gateway {
        Gateway::new(&Config::default(), "t").with_backend(BackendKind::Kimi, backend)
    }

    #[tokio::test]
    async fn test_gapfill_then_dedup() {
        let backend = Arc::new(ScriptedBackend::new(|req| {
            let prompt = req.last_user_text();
            if prompt.contains("完成补充任务") {
                Ok("# 报告\n\n补充后".to_string())
            } else {
                assert!(prompt.contains("补充后"));
                Ok("# 报告\n\n去重后".to_string())
            }
        }));
        let gateway = gateway_with(backend.clone());
        let config = PipelineConfig::default();

        let v1 = Reconciler::new(&gateway, &config)
            .reconcile("语料", "# 报告\n\n初稿")
            .await
            .unwrap();
        assert_eq!(v1, "# 报告\n\n去重后");
        assert_eq!(backend.call_count(), 2);
        let settings = backend.calls()[0].max_tokens;
        assert_eq!(settings, config.cleanup.max_tokens);
    }

    #[tokio::test]
    async fn test_empty_response_keeps_report() {
        let gateway = gateway_with(Arc::new(ScriptedBackend::fixed("  ")));
        let config = PipelineConfig::default();
        let out = Reconciler::new(&gateway, &config)
            .dedup("# 原报告")
            .await
            .unwrap();
        assert_eq!(out, "# 原报告");
    }

    #[tokio::test]
    async fn test_report_window_applied() {
        let backend = Arc::new(ScriptedBackend::fixed("ok"));
        let gateway = gateway_with(backend.clone());
        let config = PipelineConfig {
            dedup_window: 10,
            ..PipelineConfig::default()
        };
        let report = format!("{}{}", "甲".repeat(10), "乙".repeat(10));
        Reconciler::new(&gateway, &config).dedup(&report).await.unwrap();
        let prompt = backend.calls()[0].last_user_text().to_string();
        assert!(prompt.contains(&"甲".repeat(10)));
        assert!(!prompt.contains('乙'));
    }

    #[tokio::test]
    async fn test_chapters_past_window_are_kept() {
        let backend = Arc::new(ScriptedBackend::new(|req| {
            let prompt = req.last_user_text();
            assert!(!prompt.contains("丙正文"));
            if prompt.contains("完成补充任务") {
                Ok("## 一、甲\n\n甲补充\n\n## 二、乙\n\n乙补充".to_string())
            } else {
                Ok("## 一、甲\n\n甲去重\n\n## 二、乙\n\n乙去重".to_string())
            }
        }));
        let gateway = gateway_with(backend.clone());
        let config = PipelineConfig {
            gapfill_report_window: 30,
            dedup_window: 30,
            ..PipelineConfig::default()
        };
        let report = "## 一、甲\n\n甲正文\n\n## 二、乙\n\n乙正文\n\n## 三、丙\n\n丙正文";
        assert!(char_len(report) > 30);

        let v1 = Reconciler::new(&gateway, &config)
            .reconcile("语料", report)
            .await
            .unwrap();
        assert_eq!(
            v1,
            "## 一、甲\n\n甲去重\n\n## 二、乙\n\n乙去重\n\n## 三、丙\n\n丙正文"
        );
        assert_eq!(backend.call_count(), 2);
    }

    #[test]
    fn test_split_window_without_heading_cuts_at_boundary() {
        let report = format!("{}{}", "甲".repeat(10), "乙".repeat(5));
        let (head, tail) = split_window("dedup", &report, 10);
        assert_eq!(head, "甲".repeat(10));
        assert_eq!(tail, "乙".repeat(5));
        assert_eq!(split_window("dedup", "短", 10), ("短", ""));
    }

    #[tokio::test]
    async fn test_failure_propagates() {
        let gateway = gateway_with(Arc::new(ScriptedBackend::failing(ErrorCategory::RateLimit)));
        let config = PipelineConfig::default();
        let err = Reconciler::new(&gateway, &config)
            .reconcile("语料", "报告")
            .await
            .unwrap_err();
        assert_eq!(err.completion_category(), Some(ErrorCategory::RateLimit));
    }
}
