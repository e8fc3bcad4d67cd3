//! Directory merge: every supported file in a folder becomes one corpus.
//!
//! Files are imported one by one, bannered with their name, concatenated in
//! name order and handed to a single reorganization call that removes
//! repeats and orders the material. Text beyond the call window is appended
//! untouched.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::{info, instrument, warn};

use super::importer::FileImporter;
use crate::ai::{CompletionRequest, Gateway};
use crate::constants::ingest::{MERGE_EXTENSIONS, MERGE_MAX_TOKENS};
use crate::report::prompts::{MERGE_SYSTEM, merge_prompt};
use crate::types::{ReportError, Result, char_len, skip_chars, truncate_chars};

const OVERFLOW_NOTICE: &str = "\n\n[以下为超出 API 单次处理上限的原文，未参与去重排序]\n\n";

fn is_mergeable(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| MERGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Supported files under `dir`, sorted by file name. Only the top level is
/// scanned unless `recursive` is set.
pub fn collect_files(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ReportError::missing(dir));
    }
    let mut builder = WalkBuilder::new(dir);
    builder
        .hidden(true)
        .git_ignore(false)
        .follow_links(false);
    if !recursive {
        builder.max_depth(Some(1));
    }

    let mut files: Vec<PathBuf> = builder
        .build()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && is_mergeable(p))
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()).then_with(|| a.cmp(b)));
    Ok(files)
}

/// Banner each `(name, content)` part and join them
pub fn combine(parts: &[(String, String)]) -> String {
    parts
        .iter()
        .map(|(name, content)| format!("--- 来自文件: {} ---\n\n{}", name, content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct CorpusMerger<'a> {
    gateway: &'a Gateway,
    window: usize,
}

impl<'a> CorpusMerger<'a> {
    pub fn new(gateway: &'a Gateway, window: usize) -> Self {
        Self { gateway, window }
    }

    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub async fn merge(&self, dir: &Path, recursive: bool) -> Result<String> {
        let files = collect_files(dir, recursive)?;
        let importer = FileImporter::new(self.gateway);

        let mut parts = Vec::new();
        for path in &files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match importer.import(path).await {
                Ok(text) if !text.trim().is_empty() => parts.push((name, text)),
                Ok(_) => warn!(file = %name, "Skipping empty file"),
                Err(e) => warn!(file = %name, error = %e, "Skipping unreadable file"),
            }
        }

        if parts.is_empty() {
            return Err(ReportError::UnsupportedSource(format!(
                "no readable files in {}",
                dir.display()
            )));
        }
        info!(files = parts.len(), "Merging corpus files");

        let combined = combine(&parts);
        self.reorganize(&combined).await
    }

    /// One reorganization call over the first `window` chars; the rest is
    /// appended after a notice
    pub async fn reorganize(&self, combined: &str) -> Result<String> {
        let total = char_len(combined);
        let truncated = total > self.window;
        let head = truncate_chars(combined, self.window);

        let request = CompletionRequest::prompt(
            MERGE_SYSTEM,
            merge_prompt(head, total, truncated.then_some(self.window)),
        )
        .max_tokens(MERGE_MAX_TOKENS)
        .temperature(0.3);

        let reorganized = match self.gateway.complete("merge", request).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!("Merge reorganization returned nothing, keeping combined text");
                head.to_string()
            }
            Err(e) if e.is_configuration() => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "Merge reorganization failed, keeping combined text");
                head.to_string()
            }
        };

        if !truncated {
            return Ok(reorganized);
        }
        info!(total, window = self.window, "Appending text beyond the merge window");
        Ok(format!(
            "{}{}{}",
            reorganized,
            OVERFLOW_NOTICE,
            skip_chars(combined, self.window)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::testing::ScriptedBackend;
    use crate::config::{BackendKind, Config};
    use crate::types::ErrorCategory;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn gateway(backend: Arc<ScriptedBackend>) -> Gateway {
        Gateway::new(&Config::default(), "t").with_backend(BackendKind::Kimi, backend)
    }

    async fn corpus_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("b.md"), "第二份").await.unwrap();
        tokio::fs::write(dir.path().join("a.txt"), "第一份").await.unwrap();
        tokio::fs::write(dir.path().join("skip.rs"), "fn main() {}").await.unwrap();
        tokio::fs::create_dir(dir.path().join("nested")).await.unwrap();
        tokio::fs::write(dir.path().join("nested/c.md"), "第三份").await.unwrap();
        dir
    }

    #[tokio::test]
    async fn test_collect_files_sorted_and_filtered() {
        let dir = corpus_dir().await;
        let names = |files: Vec<PathBuf>| -> Vec<String> {
            files
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect()
        };
        assert_eq!(names(collect_files(dir.path(), false).unwrap()), vec!["a.txt", "b.md"]);
        assert_eq!(
            names(collect_files(dir.path(), true).unwrap()),
            vec!["a.txt", "b.md", "c.md"]
        );
    }

    #[test]
    fn test_combine_banners() {
        let parts = vec![
            ("a.txt".to_string(), "一".to_string()),
            ("b.md".to_string(), "二".to_string()),
        ];
        assert_eq!(
            combine(&parts),
            "--- 来自文件: a.txt ---\n\n一\n\n--- 来自文件: b.md ---\n\n二"
        );
    }

    #[tokio::test]
    async fn test_merge_sends_banners_in_order() {
        let dir = corpus_dir().await;
        let backend = Arc::new(ScriptedBackend::fixed("整理后的语料"));
        let gateway = gateway(backend.clone());

        let merged = CorpusMerger::new(&gateway, 100_000)
            .merge(dir.path(), false)
            .await
            .unwrap();
        assert_eq!(merged, "整理后的语料");

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        let prompt = calls[0].last_user_text();
        let first = prompt.find("--- 来自文件: a.txt ---").unwrap();
        let second = prompt.find("--- 来自文件: b.md ---").unwrap();
        assert!(first < second);
        assert!(!prompt.contains("c.md"));
        assert_eq!(calls[0].max_tokens, MERGE_MAX_TOKENS);
    }

    #[tokio::test]
    async fn test_overflow_appended_verbatim() {
        let backend = Arc::new(ScriptedBackend::fixed("头部"));
        let gateway = gateway(backend.clone());
        let combined = format!("{}{}", "甲".repeat(10), "乙".repeat(5));

        let merged = CorpusMerger::new(&gateway, 10).reorganize(&combined).await.unwrap();
        assert_eq!(merged, format!("头部{}{}", OVERFLOW_NOTICE, "乙".repeat(5)));
        assert!(!backend.calls()[0].last_user_text().contains('乙'));
    }

    #[tokio::test]
    async fn test_failed_reorganization_keeps_combined() {
        let gateway = gateway(Arc::new(ScriptedBackend::failing(ErrorCategory::Transient)));
        let merged = CorpusMerger::new(&gateway, 100).reorganize("原文").await.unwrap();
        assert_eq!(merged, "原文");
    }

    #[tokio::test]
    async fn test_empty_directory_is_error() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(Arc::new(ScriptedBackend::fixed("")));
        let err = CorpusMerger::new(&gateway, 100)
            .merge(dir.path(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::UnsupportedSource(_)));
    }
}
