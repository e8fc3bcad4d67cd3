//! Report Pipeline
//!
//! Stage chain from a raw corpus to the annotated report:
//!
//! ```text
//! raw/{name}.txt
//!   → outline + assemble + gap-fill/dedup  → {base}_report_v1.md
//!   → 5-lens critique                      → experts/{base}_*.md
//!   → chapter revision                     → {base}_report_v2.md
//!   → style rewrite                        → {base}_report_v3.md
//!   → citation annotation                  → {base}_report_v4.md
//! ```
//!
//! Each stage reads the previous stage's artifact from disk, so any stage
//! can be re-run on its own. Missing inputs fail before any backend call.

pub mod artifacts;
pub mod assembler;
pub mod citations;
pub mod critique;
pub mod document;
pub mod outline;
pub mod prompts;
pub mod reconcile;
pub mod reviser;
pub mod stylize;

use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

pub use artifacts::{ArtifactStore, ReportVersion, base_name, read_optional, read_required};
pub use assembler::{ChapterAssembler, ChunkPlan, plan_chunks};
pub use citations::{AnnotatedReport, CitationAnnotator};
pub use critique::{CritiqueOutcome, CritiquePanel, ExclusionList, Lens};
pub use document::{Chapter, Document};
pub use outline::{Outline, OutlineMeta, OutlinePlanner, ParseTier, PlannedOutline};
pub use reconcile::Reconciler;
pub use reviser::ChapterReviser;
pub use stylize::{StylePreset, StyleTransformer};

use crate::ai::SharedGateway;
use crate::config::Config;
use crate::constants::TRUNCATION_NOTICE;
use crate::ingest::{IngestOutcome, Normalizer};
use crate::render::write_docx;
use crate::types::{Result, char_len, truncate_with_notice};

/// Artifacts written by one report stage
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub version: ReportVersion,
    pub markdown: PathBuf,
    pub docx: Option<PathBuf>,
    pub chars: usize,
}

/// Everything a full run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub ingest: IngestOutcome,
    pub critique: Vec<PathBuf>,
    pub stages: Vec<StageOutput>,
}

pub struct ReportPipeline {
    config: Config,
    gateway: SharedGateway,
    store: ArtifactStore,
}

impl ReportPipeline {
    pub fn new(config: Config, gateway: SharedGateway, store: ArtifactStore) -> Self {
        Self {
            config,
            gateway,
            store,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn gateway(&self) -> &SharedGateway {
        &self.gateway
    }

    /// Read the corpus, capped at the raw load limit
    pub async fn load_corpus(&self, path: &Path) -> Result<String> {
        let raw = read_required(path).await?;
        let limit = self.config.pipeline.raw_max_chars;
        if char_len(&raw) > limit {
            warn!(chars = char_len(&raw), limit, "Corpus exceeds load limit, truncating");
        }
        Ok(truncate_with_notice(&raw, limit, TRUNCATION_NOTICE))
    }

    async fn save_stage(&self, base: &str, version: ReportVersion, markdown: &str) -> Result<StageOutput> {
        let path = self.store.report_path(base, version);
        self.store.write(&path, markdown).await?;
        let docx = if self.config.output.render_docx {
            Some(write_docx(markdown, &self.store.docx_path(base, version)).await?)
        } else {
            None
        };
        info!(version = version.tag(), path = %path.display(), "Report saved");
        Ok(StageOutput {
            version,
            markdown: path,
            docx,
            chars: char_len(markdown),
        })
    }

    // =========================================================================
    // Stages
    // =========================================================================

    /// Ingest a URL or file into `raw/{name}.txt`
    pub async fn ingest(&self, input: &str, name: Option<&str>) -> Result<IngestOutcome> {
        Normalizer::new(&self.gateway, &self.config.ingest, &self.store)
            .ingest(input, name)
            .await
    }

    /// Merge every supported file of `dir` into `raw/{name}.txt`
    pub async fn merge(&self, dir: &Path, name: Option<&str>, recursive: bool) -> Result<IngestOutcome> {
        Normalizer::new(&self.gateway, &self.config.ingest, &self.store)
            .merge(dir, name, recursive)
            .await
    }

    /// Outline only, persisted as `{base}_meta.json`
    pub async fn plan_outline(&self, corpus: &str, base: &str) -> Result<PlannedOutline> {
        let planned = OutlinePlanner::new(&self.gateway, &self.config.pipeline)
            .plan(corpus)
            .await?;
        self.store
            .write_json(&self.store.meta_path(base), &OutlineMeta::new(&planned, corpus))
            .await?;
        Ok(planned)
    }

    /// Outline, assemble and reconcile a corpus into report v1
    #[instrument(skip_all, fields(raw = %raw.display()))]
    pub async fn run_draft(&self, raw: &Path, base: Option<&str>) -> Result<StageOutput> {
        let base = base.map(str::to_string).unwrap_or_else(|| base_name(raw));
        let corpus = self.load_corpus(raw).await?;

        info!("Phase 1: Planning outline");
        let planned = self.plan_outline(&corpus, &base).await?;

        info!("Phase 2: Assembling {} chapters", planned.outline.chapters.len());
        let document = ChapterAssembler::new(&self.gateway, &self.config.pipeline)
            .assemble_report(&corpus, &planned.outline)
            .await?;

        info!("Phase 3: Gap-fill and dedup");
        let report = Reconciler::new(&self.gateway, &self.config.pipeline)
            .reconcile(&corpus, &document.render())
            .await?;

        self.save_stage(&base, ReportVersion::V1, &report).await
    }

    /// Five-lens review of report v1; returns the files written
    #[instrument(skip_all, fields(report = %report.display()))]
    pub async fn run_critique(&self, report: &Path, base: Option<&str>) -> Result<Vec<PathBuf>> {
        let base = base.map(str::to_string).unwrap_or_else(|| base_name(report));
        let text = read_required(report).await?;

        info!("Phase 4: Expert critique");
        let outcome = CritiquePanel::new(&self.gateway, &self.config.pipeline)
            .review(&text)
            .await?;
        let written = outcome.persist(&self.store, &base).await?;
        info!(files = written.len(), "Critique saved");
        Ok(written)
    }

    async fn load_exclusions(&self, base: &str) -> Result<ExclusionList> {
        let json_path = self.store.expert_path(base, critique::EXCLUSIONS_JSON_NAME, "json");
        if let Some(json) = read_optional(&json_path).await? {
            return Ok(serde_json::from_str(&json)?);
        }
        let md_path = self.store.expert_path(base, critique::EXCLUSIONS_NAME, "md");
        Ok(read_optional(&md_path)
            .await?
            .map(|text| ExclusionList::from_text(&text))
            .unwrap_or_default())
    }

    /// Revise report v1 against the critique into report v2
    #[instrument(skip_all, fields(report = %report.display()))]
    pub async fn run_revise(&self, report: &Path, raw: Option<&Path>, base: Option<&str>) -> Result<StageOutput> {
        let base = base.map(str::to_string).unwrap_or_else(|| base_name(report));
        let text = read_required(report).await?;
        let critique = read_required(&self.store.expert_path(&base, critique::COMBINED_NAME, "md")).await?;
        let exclusions = self.load_exclusions(&base).await?;

        let raw_path = raw
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.store.raw_path(&base));
        let corpus = match raw {
            Some(path) => self.load_corpus(path).await?,
            None if raw_path.exists() => self.load_corpus(&raw_path).await?,
            None => {
                warn!(path = %raw_path.display(), "No corpus found, length floor uses minimums only");
                String::new()
            }
        };

        info!("Phase 5: Revising chapters");
        let revised = ChapterReviser::new(&self.gateway, &self.config.pipeline)
            .revise(&text, &critique, &exclusions, &corpus)
            .await?;
        self.save_stage(&base, ReportVersion::V2, &revised.render()).await
    }

    /// Rewrite report v2 in a preset style into report v3
    #[instrument(skip_all, fields(report = %report.display(), style = %preset))]
    pub async fn run_stylize(
        &self,
        report: &Path,
        preset: StylePreset,
        raw: &Path,
        base: Option<&str>,
    ) -> Result<StageOutput> {
        let base = base.map(str::to_string).unwrap_or_else(|| base_name(report));
        let text = read_required(report).await?;
        let corpus = read_required(raw).await?;

        info!("Phase 6: Style rewrite ({})", preset.name());
        let styled = StyleTransformer::new(&self.gateway, &self.config.pipeline)
            .transform(&text, preset, &corpus)
            .await?;
        self.save_stage(&base, ReportVersion::V3, &styled.render()).await
    }

    /// Annotate report v3 (markdown or docx) with citations into report v4
    #[instrument(skip_all, fields(report = %report.display()))]
    pub async fn run_annotate(&self, report: &Path, base: Option<&str>) -> Result<(StageOutput, AnnotatedReport)> {
        let base = base.map(str::to_string).unwrap_or_else(|| base_name(report));
        let is_docx = report
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("docx"));
        let text = if is_docx {
            let bytes = match tokio::fs::read(report).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(crate::types::ReportError::missing(report));
                }
                Err(e) => return Err(e.into()),
            };
            crate::ingest::docx::to_markdown(&bytes)?
        } else {
            read_required(report).await?
        };

        info!("Phase 7: Citation annotation");
        let annotated = CitationAnnotator::new(&self.gateway, &self.config.pipeline)
            .annotate(&text)
            .await?;
        info!(sources = annotated.references.len(), "Citations collected");
        let output = self.save_stage(&base, ReportVersion::V4, &annotated.render()).await?;
        Ok((output, annotated))
    }

    /// Every stage in sequence, from ingest through `through`
    pub async fn run_all(
        &self,
        input: &str,
        name: Option<&str>,
        preset: StylePreset,
        through: ReportVersion,
    ) -> Result<RunSummary> {
        let ingest = self.ingest(input, name).await?;
        self.run_stages(ingest, preset, through).await
    }

    /// Merge a directory of transcripts, then every stage through `through`
    pub async fn run_batch(
        &self,
        dir: &Path,
        name: Option<&str>,
        recursive: bool,
        preset: StylePreset,
        through: ReportVersion,
    ) -> Result<RunSummary> {
        let ingest = self.merge(dir, name, recursive).await?;
        self.run_stages(ingest, preset, through).await
    }

    async fn run_stages(
        &self,
        ingest: IngestOutcome,
        preset: StylePreset,
        through: ReportVersion,
    ) -> Result<RunSummary> {
        let base = ingest.name.clone();
        let raw = ingest.path.clone();

        let mut stages = vec![self.run_draft(&raw, Some(&base)).await?];
        let critique = self.run_critique(&stages[0].markdown, Some(&base)).await?;

        if through >= ReportVersion::V2 {
            let v1 = stages[0].markdown.clone();
            stages.push(self.run_revise(&v1, Some(&raw), Some(&base)).await?);
        }
        if through >= ReportVersion::V3 {
            let v2 = stages[1].markdown.clone();
            stages.push(self.run_stylize(&v2, preset, &raw, Some(&base)).await?);
        }
        if through >= ReportVersion::V4 {
            let v3 = stages[2].markdown.clone();
            let (output, _) = self.run_annotate(&v3, Some(&base)).await?;
            stages.push(output);
        }

        info!("Run complete:\n{}", self.gateway.metrics().summary().display());
        Ok(RunSummary {
            ingest,
            critique,
            stages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::Gateway;
    use crate::ai::provider::testing::ScriptedBackend;
    use crate::config::BackendKind;
    use crate::types::ReportError;
    use std::sync::Arc;
    use tempfile::TempDir;

    const CHAPTER: &str = "## 一、总览\n\n这是一段经过整理的正文内容。";

    fn pipeline(dir: &TempDir, backend: Arc<ScriptedBackend>) -> ReportPipeline {
        let mut config = Config::default();
        config.output.render_docx = false;
        config.pipeline.citation_pause_ms = 0;
        let gateway = Gateway::new(&config, "test")
            .with_backend(BackendKind::Kimi, backend.clone())
            .with_backend(BackendKind::Perplexity, backend);
        ReportPipeline::new(config, Arc::new(gateway), ArtifactStore::new(dir.path()))
    }

    #[tokio::test]
    async fn test_load_corpus_caps_length() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = pipeline(&dir, Arc::new(ScriptedBackend::fixed("")));
        pipeline.config.pipeline.raw_max_chars = 5;
        let path = dir.path().join("raw.txt");
        tokio::fs::write(&path, "一二三四五六七").await.unwrap();

        let corpus = pipeline.load_corpus(&path).await.unwrap();
        assert_eq!(corpus, format!("一二三四五{}", TRUNCATION_NOTICE));
    }

    #[tokio::test]
    async fn test_revise_requires_critique_before_calls() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::fixed(CHAPTER));
        let pipeline = pipeline(&dir, backend.clone());
        let v1 = pipeline.store().report_path("demo", ReportVersion::V1);
        pipeline.store().write(&v1, CHAPTER).await.unwrap();

        let err = pipeline.run_revise(&v1, None, None).await.unwrap_err();
        assert!(matches!(err, ReportError::MissingArtifact { .. }));
        assert!(err.to_string().contains("专家意见汇总"));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_exclusions_fall_back_to_markdown() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir, Arc::new(ScriptedBackend::fixed("")));
        let store = pipeline.store();

        assert!(!pipeline.load_exclusions("demo").await.unwrap().is_effective());

        store
            .write(
                &store.expert_path("demo", critique::EXCLUSIONS_NAME, "md"),
                "- 第二章 | “年增长 300%” | 语料无此数据",
            )
            .await
            .unwrap();
        let exclusions = pipeline.load_exclusions("demo").await.unwrap();
        assert!(exclusions.is_effective());
    }

    #[tokio::test]
    async fn test_full_run_writes_every_version() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("chat.md");
        tokio::fs::write(&source, "用户：如何设计商业模式？\n\n助手：先明确价值主张。")
            .await
            .unwrap();

        let backend = Arc::new(ScriptedBackend::fixed(CHAPTER));
        let pipeline = pipeline(&dir, backend.clone());
        let summary = pipeline
            .run_all(source.to_str().unwrap(), None, StylePreset::A, ReportVersion::V4)
            .await
            .unwrap();

        assert_eq!(summary.ingest.name, "chat");
        let versions: Vec<ReportVersion> = summary.stages.iter().map(|s| s.version).collect();
        assert_eq!(versions, ReportVersion::ALL.to_vec());
        for stage in &summary.stages {
            assert!(stage.markdown.exists(), "{}", stage.markdown.display());
            assert!(stage.docx.is_none());
        }
        assert_eq!(summary.critique.len(), 8);
        assert!(pipeline.store().meta_path("chat").exists());
        assert!(backend.call_count() > 10);
    }

    #[tokio::test]
    async fn test_run_stops_after_requested_version() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("notes.txt");
        tokio::fs::write(&source, "语料内容").await.unwrap();

        let pipeline = pipeline(&dir, Arc::new(ScriptedBackend::fixed(CHAPTER)));
        let summary = pipeline
            .run_all(source.to_str().unwrap(), Some("short"), StylePreset::B, ReportVersion::V2)
            .await
            .unwrap();
        assert_eq!(summary.stages.len(), 2);
        assert!(!pipeline.store().report_path("short", ReportVersion::V3).exists());
    }

    #[tokio::test]
    async fn test_batch_merges_directory_then_runs_through_v3() {
        let dir = TempDir::new().unwrap();
        let chats = dir.path().join("chats");
        std::fs::create_dir_all(&chats).unwrap();
        std::fs::write(chats.join("a.md"), "用户：定价怎么做？").unwrap();
        std::fs::write(chats.join("b.txt"), "助手：从成本出发。").unwrap();

        let backend = Arc::new(ScriptedBackend::fixed(CHAPTER));
        let pipeline = pipeline(&dir, backend.clone());
        let summary = pipeline
            .run_batch(&chats, None, false, StylePreset::C, ReportVersion::V3)
            .await
            .unwrap();

        assert_eq!(summary.ingest.name, "chats");
        assert!(pipeline.store().raw_path("chats").exists());
        let versions: Vec<ReportVersion> = summary.stages.iter().map(|s| s.version).collect();
        assert_eq!(
            versions,
            vec![ReportVersion::V1, ReportVersion::V2, ReportVersion::V3]
        );
        assert!(!pipeline.store().report_path("chats", ReportVersion::V4).exists());
        assert!(backend.calls()[0].last_user_text().contains("来自文件: a.md"));
    }

    #[tokio::test]
    async fn test_annotate_reads_docx() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = pipeline(&dir, Arc::new(ScriptedBackend::fixed("")));
        pipeline.config.output.render_docx = true;

        let v3 = dir.path().join("demo_report_v3.docx");
        write_docx("# 报告 3.0 最终版\n\n---\n\n## 一、总览\n\n正文。", &v3)
            .await
            .unwrap();

        let (output, annotated) = pipeline.run_annotate(&v3, None).await.unwrap();
        assert_eq!(output.markdown, pipeline.store().report_path("demo", ReportVersion::V4));
        assert!(output.docx.is_some_and(|p| p.exists()));
        assert_eq!(annotated.document.chapters.len(), 1);
        let markdown = tokio::fs::read_to_string(&output.markdown).await.unwrap();
        assert!(markdown.contains("4.0（含引用）"));
        assert!(markdown.contains("正文。"));
    }
}
