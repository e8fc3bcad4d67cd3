//! Source Normalizer
//!
//! Turns a share-page URL, a local export or a whole folder of material into
//! one plain-text corpus under `raw/{name}.txt`. Everything downstream reads
//! only that file.

pub mod crawler;
pub mod docx;
pub mod importer;
pub mod merge;
pub mod source;

use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

pub use crawler::Crawler;
pub use importer::FileImporter;
pub use merge::CorpusMerger;
pub use source::{SourceKind, derive_slug, detect_source};

use crate::ai::Gateway;
use crate::config::IngestConfig;
use crate::constants::ingest::DEFAULT_NAME;
use crate::report::ArtifactStore;
use crate::types::{ReportError, Result, char_len};

/// Collected text shorter than `min_bytes` bytes likely missed part of the
/// conversation
pub fn is_possibly_incomplete(text: &str, min_bytes: usize) -> bool {
    text.len() < min_bytes
}

/// What an ingest wrote
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub path: PathBuf,
    pub name: String,
    pub source: SourceKind,
    pub bytes: usize,
    pub chars: usize,
    pub possibly_incomplete: bool,
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
}

pub struct Normalizer<'a> {
    gateway: &'a Gateway,
    config: &'a IngestConfig,
    store: &'a ArtifactStore,
}

impl<'a> Normalizer<'a> {
    pub fn new(gateway: &'a Gateway, config: &'a IngestConfig, store: &'a ArtifactStore) -> Self {
        Self {
            gateway,
            config,
            store,
        }
    }

    /// Ingest a URL or a local file, whichever `input` is
    #[instrument(skip_all, fields(input = %input))]
    pub async fn ingest(&self, input: &str, name: Option<&str>) -> Result<IngestOutcome> {
        let kind = detect_source(input);
        if !kind.is_url() {
            return self.import(Path::new(input.trim()), name).await;
        }

        let url = input.trim();
        url::Url::parse(url).map_err(|e| ReportError::UnsupportedSource(format!("{}: {}", url, e)))?;
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| derive_slug(url, kind));

        let text = Crawler::new(self.config)?.crawl(url, kind).await?;
        self.save(&name, kind, &text).await
    }

    /// Import a local file
    pub async fn import(&self, path: &Path, name: Option<&str>) -> Result<IngestOutcome> {
        let name = name
            .map(str::to_string)
            .or_else(|| file_stem(path))
            .unwrap_or_else(|| DEFAULT_NAME.to_string());
        let text = FileImporter::new(self.gateway).import(path).await?;
        self.save(&name, SourceKind::File, &text).await
    }

    /// Merge every supported file of `dir` into one corpus
    pub async fn merge(&self, dir: &Path, name: Option<&str>, recursive: bool) -> Result<IngestOutcome> {
        let name = name
            .map(str::to_string)
            .or_else(|| {
                dir.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .filter(|n| !n.is_empty())
            })
            .unwrap_or_else(|| "merged".to_string());
        let recursive = recursive || self.config.merge_recursive;
        let text = CorpusMerger::new(self.gateway, self.config.merge_window)
            .merge(dir, recursive)
            .await?;
        self.save(&name, SourceKind::File, &text).await
    }

    async fn save(&self, name: &str, source: SourceKind, text: &str) -> Result<IngestOutcome> {
        if text.trim().is_empty() {
            return Err(ReportError::UnsupportedSource(format!(
                "no text could be extracted for '{}'",
                name
            )));
        }
        let path = self.store.raw_path(name);
        self.store.write(&path, text).await?;

        let possibly_incomplete =
            source.is_url() && is_possibly_incomplete(text, self.config.min_content_bytes);
        if possibly_incomplete {
            warn!(
                bytes = text.len(),
                min = self.config.min_content_bytes,
                "Collected content is short and may be incomplete"
            );
        }
        info!(path = %path.display(), chars = char_len(text), "Corpus saved");

        Ok(IngestOutcome {
            path,
            name: name.to_string(),
            source,
            bytes: text.len(),
            chars: char_len(text),
            possibly_incomplete,
        })
    }
}
