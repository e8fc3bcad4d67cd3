//! Configuration Types
//!
//! All configuration structures with sensible defaults. Backend credentials
//! are never part of the serialized configuration: they are read from the
//! environment once at startup into [`Credentials`].

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use crate::constants::{draft, finish, gateway, ingest, review};
use crate::types::{ReportError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Completion backend settings
    pub llm: LlmConfig,

    /// Artifact layout
    pub output: OutputConfig,

    /// Source normalization settings
    pub ingest: IngestConfig,

    /// Stage windows, budgets and temperatures
    pub pipeline: PipelineConfig,

    /// Backend credentials loaded from the environment
    #[serde(skip)]
    pub credentials: Credentials,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            llm: LlmConfig::default(),
            output: OutputConfig::default(),
            ingest: IngestConfig::default(),
            pipeline: PipelineConfig::default(),
            credentials: Credentials::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub fn validate(&self) -> Result<()> {
        if self.llm.connect_timeout_secs == 0 || self.llm.read_timeout_secs == 0 {
            return Err(ReportError::Config(
                "llm timeouts must be greater than 0".to_string(),
            ));
        }

        let p = &self.pipeline;
        for (name, value) in [
            ("pipeline.chunk_size", p.chunk_size),
            ("pipeline.raw_max_chars", p.raw_max_chars),
            ("pipeline.outline_window", p.outline_window),
            ("pipeline.max_chapters", p.max_chapters),
        ] {
            if value == 0 {
                return Err(ReportError::Config(format!("{} must be greater than 0", name)));
            }
        }

        if p.max_chapters > draft::MAX_CHAPTERS {
            return Err(ReportError::Config(format!(
                "pipeline.max_chapters ({}) must not exceed {}",
                p.max_chapters,
                draft::MAX_CHAPTERS
            )));
        }

        if p.chunk_overlap >= p.chunk_size {
            return Err(ReportError::Config(format!(
                "pipeline.chunk_overlap ({}) must be smaller than pipeline.chunk_size ({})",
                p.chunk_overlap, p.chunk_size
            )));
        }

        if !(0.0..=1.0).contains(&p.floor_corpus_ratio) {
            return Err(ReportError::Config(format!(
                "pipeline.floor_corpus_ratio must be between 0.0 and 1.0, got {}",
                p.floor_corpus_ratio
            )));
        }

        for t in [
            p.outline.temperature,
            p.assemble.temperature,
            p.cleanup.temperature,
            p.critique.temperature,
            p.revise.temperature,
            p.style.temperature,
            p.citation.temperature,
        ] {
            if !(0.0..=2.0).contains(&t) {
                return Err(ReportError::Config(format!(
                    "temperature must be between 0.0 and 2.0, got {}",
                    t
                )));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Backends
// =============================================================================

/// Completion backends the gateway can route to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Kimi,
    #[serde(rename = "openai")]
    OpenAi,
    Grok,
    Perplexity,
    Claude,
    Gemini,
}

impl BackendKind {
    pub const ALL: [BackendKind; 6] = [
        Self::Kimi,
        Self::OpenAi,
        Self::Grok,
        Self::Perplexity,
        Self::Claude,
        Self::Gemini,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kimi => "kimi",
            Self::OpenAi => "openai",
            Self::Grok => "grok",
            Self::Perplexity => "perplexity",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
        }
    }

    /// Environment variable holding the credential
    pub fn credential_var(&self) -> &'static str {
        match self {
            Self::Kimi => "KIMI_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Grok => "GROK_API_KEY",
            Self::Perplexity => "PERPLEXITY_API_KEY",
            Self::Claude => "ANTHROPIC_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Kimi => "https://api.moonshot.cn/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Grok => "https://api.x.ai/v1",
            Self::Perplexity => "https://api.perplexity.ai",
            Self::Claude => "https://api.anthropic.com/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Kimi => "kimi-k2-turbo-preview",
            Self::OpenAi => "gpt-4o",
            Self::Grok => "grok-3",
            Self::Perplexity => "sonar-pro",
            Self::Claude => "claude-sonnet-4-20250514",
            Self::Gemini => "gemini-2.0-flash",
        }
    }

    /// Model used for image extraction when none is configured
    pub fn default_vision_model(&self) -> &'static str {
        match self {
            Self::Kimi => "moonshot-v1-8k-vision-preview",
            other => other.default_model(),
        }
    }

    /// Whether the backend speaks the OpenAI chat-completions wire format
    pub fn is_openai_compatible(&self) -> bool {
        matches!(self, Self::Kimi | Self::OpenAi | Self::Grok | Self::Perplexity)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "kimi" | "moonshot" => Ok(Self::Kimi),
            "openai" | "gpt" => Ok(Self::OpenAi),
            "grok" | "xai" => Ok(Self::Grok),
            "perplexity" | "pplx" => Ok(Self::Perplexity),
            "claude" | "anthropic" => Ok(Self::Claude),
            "gemini" | "google" => Ok(Self::Gemini),
            _ => Err(format!(
                "Unknown backend: {}. Supported: kimi, openai, grok, perplexity, claude, gemini",
                s
            )),
        }
    }
}

/// Per-backend overrides; unset fields use the backend defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub vision_model: Option<String>,
}

// =============================================================================
// LLM Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Backend used when a request does not name one
    pub provider: BackendKind,

    /// Retrieval-augmented backend used for fact-checking and citations
    pub retrieval_provider: BackendKind,

    /// Backend used to read images during ingest
    pub vision_provider: BackendKind,

    pub connect_timeout_secs: u64,

    pub read_timeout_secs: u64,

    /// Overrides keyed by backend name (`kimi`, `openai`, ...)
    pub backends: BTreeMap<String, BackendSettings>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: BackendKind::Kimi,
            retrieval_provider: BackendKind::Perplexity,
            vision_provider: BackendKind::Kimi,
            connect_timeout_secs: gateway::CONNECT_TIMEOUT_SECS,
            read_timeout_secs: gateway::READ_TIMEOUT_SECS,
            backends: BTreeMap::new(),
        }
    }
}

impl LlmConfig {
    pub fn settings(&self, kind: BackendKind) -> BackendSettings {
        self.backends
            .get(kind.as_str())
            .cloned()
            .unwrap_or_default()
    }

    pub fn base_url(&self, kind: BackendKind) -> String {
        self.settings(kind)
            .base_url
            .unwrap_or_else(|| kind.default_base_url().to_string())
    }

    pub fn model(&self, kind: BackendKind) -> String {
        self.settings(kind)
            .model
            .unwrap_or_else(|| kind.default_model().to_string())
    }

    pub fn vision_model(&self, kind: BackendKind) -> String {
        self.settings(kind)
            .vision_model
            .unwrap_or_else(|| kind.default_vision_model().to_string())
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Backend credentials, read once at startup
///
/// Values are held as [`SecretString`] and never printed.
#[derive(Clone, Default)]
pub struct Credentials {
    keys: HashMap<BackendKind, SecretString>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut configured: Vec<&str> = self.keys.keys().map(|k| k.as_str()).collect();
        configured.sort_unstable();
        f.debug_struct("Credentials")
            .field("configured", &configured)
            .finish()
    }
}

impl Credentials {
    /// Read every backend's credential variable from the process environment
    pub fn from_env() -> Self {
        let mut creds = Self::default();
        for kind in BackendKind::ALL {
            if let Ok(value) = std::env::var(kind.credential_var())
                && !value.trim().is_empty()
            {
                creds.insert(kind, value.trim().to_string());
            }
        }
        creds
    }

    pub fn insert(&mut self, kind: BackendKind, key: impl Into<String>) {
        self.keys.insert(kind, SecretString::from(key.into()));
    }

    pub fn get(&self, kind: BackendKind) -> Option<&SecretString> {
        self.keys.get(&kind)
    }

    pub fn has(&self, kind: BackendKind) -> bool {
        self.keys.contains_key(&kind)
    }
}

// =============================================================================
// Output Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root directory for raw corpora, reports and critiques
    pub root: PathBuf,

    /// Give every `run` invocation its own directory under `runs/`
    pub isolate_runs: bool,

    /// Export a Word document next to each report
    pub render_docx: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("output"),
            isolate_runs: false,
            render_docx: true,
        }
    }
}

// =============================================================================
// Ingest Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub min_content_bytes: usize,
    pub crawl_max_retries: usize,
    pub crawl_retry_wait_secs: u64,
    pub fetch_timeout_secs: u64,
    pub user_agent: String,
    pub merge_window: usize,
    /// Descend into subdirectories when merging a directory
    pub merge_recursive: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            min_content_bytes: ingest::MIN_CONTENT_BYTES,
            crawl_max_retries: ingest::CRAWL_MAX_RETRIES,
            crawl_retry_wait_secs: ingest::CRAWL_RETRY_WAIT_SECS,
            fetch_timeout_secs: ingest::FETCH_TIMEOUT_SECS,
            user_agent: ingest::USER_AGENT.to_string(),
            merge_window: ingest::MERGE_WINDOW,
            merge_recursive: false,
        }
    }
}

// =============================================================================
// Pipeline Configuration
// =============================================================================

/// Output budget and temperature of one kind of completion call
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CallSettings {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            max_tokens: 16_384,
            temperature: 0.4,
        }
    }
}

impl CallSettings {
    pub const fn new(max_tokens: u32, temperature: f32) -> Self {
        Self {
            max_tokens,
            temperature,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub raw_max_chars: usize,
    pub outline_window: usize,
    pub max_chapters: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub section_threshold: usize,
    /// Run the introduction/transition pass after assembling each chapter
    pub chapter_framing: bool,
    pub framing_window: usize,
    pub gapfill_corpus_window: usize,
    pub gapfill_report_window: usize,
    pub dedup_window: usize,
    pub critique_window: usize,
    pub critique_context: usize,
    pub floor_min_total: usize,
    pub floor_corpus_ratio: f64,
    pub floor_min_chapter: usize,
    pub style_corpus_max: usize,
    pub style_corpus_slice: usize,
    pub style_chapter_window: usize,
    pub citation_chapter_window: usize,
    pub citation_pause_ms: u64,

    pub outline: CallSettings,
    pub assemble: CallSettings,
    pub cleanup: CallSettings,
    pub critique: CallSettings,
    pub revise: CallSettings,
    pub style: CallSettings,
    pub citation: CallSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            raw_max_chars: draft::RAW_MAX_CHARS,
            outline_window: draft::OUTLINE_WINDOW,
            max_chapters: draft::MAX_CHAPTERS,
            chunk_size: draft::CHUNK_SIZE,
            chunk_overlap: draft::CHUNK_OVERLAP,
            section_threshold: draft::SECTION_THRESHOLD,
            chapter_framing: true,
            framing_window: draft::FRAMING_WINDOW,
            gapfill_corpus_window: draft::GAPFILL_CORPUS_WINDOW,
            gapfill_report_window: draft::GAPFILL_REPORT_WINDOW,
            dedup_window: draft::DEDUP_WINDOW,
            critique_window: review::CRITIQUE_WINDOW,
            critique_context: review::CRITIQUE_CONTEXT,
            floor_min_total: review::FLOOR_MIN_TOTAL,
            floor_corpus_ratio: review::FLOOR_CORPUS_RATIO,
            floor_min_chapter: review::FLOOR_MIN_CHAPTER,
            style_corpus_max: finish::STYLE_CORPUS_MAX,
            style_corpus_slice: finish::STYLE_CORPUS_SLICE,
            style_chapter_window: finish::STYLE_CHAPTER_WINDOW,
            citation_chapter_window: finish::CITATION_CHAPTER_WINDOW,
            citation_pause_ms: finish::CITATION_PAUSE_MS,
            outline: CallSettings::new(8_192, 0.3),
            assemble: CallSettings::new(16_384, 0.4),
            cleanup: CallSettings::new(32_768, 0.3),
            critique: CallSettings::new(4_096, 0.4),
            revise: CallSettings::new(16_384, 0.4),
            style: CallSettings::new(16_384, 0.4),
            citation: CallSettings::new(8_192, 0.2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("Kimi".parse::<BackendKind>().unwrap(), BackendKind::Kimi);
        assert_eq!("anthropic".parse::<BackendKind>().unwrap(), BackendKind::Claude);
        assert!("llama".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::OpenAi.to_string(), "openai");
    }

    #[test]
    fn test_backend_defaults_and_overrides() {
        let mut llm = LlmConfig::default();
        assert_eq!(llm.base_url(BackendKind::Kimi), "https://api.moonshot.cn/v1");
        assert_eq!(
            llm.vision_model(BackendKind::Kimi),
            "moonshot-v1-8k-vision-preview"
        );

        llm.backends.insert(
            "kimi".to_string(),
            BackendSettings {
                model: Some("moonshot-v1-128k".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(llm.model(BackendKind::Kimi), "moonshot-v1-128k");
        assert_eq!(llm.base_url(BackendKind::Kimi), "https://api.moonshot.cn/v1");
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let mut config = Config::default();
        config.pipeline.chunk_overlap = config.pipeline.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_too_many_chapters() {
        let mut config = Config::default();
        config.pipeline.max_chapters = 10;
        assert!(config.validate().is_err());
        config.pipeline.max_chapters = 7;
        config.validate().unwrap();
    }

    #[test]
    fn test_credentials_debug_redacts() {
        let mut creds = Credentials::default();
        creds.insert(BackendKind::Kimi, "sk-very-secret");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("kimi"));
        assert!(!rendered.contains("sk-very-secret"));
        assert!(creds.has(BackendKind::Kimi));
        assert!(!creds.has(BackendKind::Gemini));
    }
}
