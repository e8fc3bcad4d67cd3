//! Global Constants
//!
//! Centralized tuning values. Most of them seed the defaults in
//! [`crate::config`] and can be overridden there.

/// Completion gateway
pub mod gateway {
    /// Connect timeout for backend HTTP calls (seconds)
    pub const CONNECT_TIMEOUT_SECS: u64 = 60;

    /// Read timeout for backend HTTP calls (seconds)
    pub const READ_TIMEOUT_SECS: u64 = 180;

    /// Anthropic API version header
    pub const ANTHROPIC_VERSION: &str = "2023-06-01";

    /// Vision extraction output budget
    pub const VISION_MAX_TOKENS: u32 = 8192;
}

/// Source normalization
pub mod ingest {
    /// Byte length under which collected content is flagged as possibly incomplete
    pub const MIN_CONTENT_BYTES: usize = 1000;

    /// Attempts to re-collect a short page before keeping what was found
    pub const CRAWL_MAX_RETRIES: usize = 5;

    /// Wait between re-collection attempts (seconds)
    pub const CRAWL_RETRY_WAIT_SECS: u64 = 15;

    /// Page fetch timeout (seconds)
    pub const FETCH_TIMEOUT_SECS: u64 = 60;

    /// Browser-like user agent for share pages
    pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

    /// Characters of a merged corpus sent to the reorganization call
    pub const MERGE_WINDOW: usize = 100_000;

    /// Output budget for the merge reorganization call
    pub const MERGE_MAX_TOKENS: u32 = 32_768;

    /// Fallback corpus name when no slug can be derived
    pub const DEFAULT_NAME: &str = "conversation";

    /// Extensions accepted by the directory merge
    pub const MERGE_EXTENSIONS: &[&str] = &[
        "txt", "md", "json", "html", "htm", "docx", "pdf", "png", "jpg", "jpeg", "gif", "webp",
        "bmp",
    ];
}

/// Outline planning and chapter assembly
pub mod draft {
    /// Maximum characters of raw corpus loaded for drafting
    pub const RAW_MAX_CHARS: usize = 130_000;

    /// Corpus window shown to the outline planner
    pub const OUTLINE_WINDOW: usize = 80_000;

    /// Chapters kept from a planned outline
    pub const MAX_CHAPTERS: usize = 7;

    /// Corpus chunk width for chapter assembly
    pub const CHUNK_SIZE: usize = 50_000;

    /// Overlap between per-section windows
    pub const CHUNK_OVERLAP: usize = CHUNK_SIZE / 2;

    /// A chapter with more sections than this is assembled section by section
    pub const SECTION_THRESHOLD: usize = 4;

    /// Chapter body window shown to the framing call
    pub const FRAMING_WINDOW: usize = 25_000;

    /// Corpus window for the gap-fill pass
    pub const GAPFILL_CORPUS_WINDOW: usize = 70_000;

    /// Report window for the gap-fill pass
    pub const GAPFILL_REPORT_WINDOW: usize = 90_000;

    /// Report window for the dedup pass
    pub const DEDUP_WINDOW: usize = 100_000;
}

/// Critique panel and revision
pub mod review {
    /// Draft prefix shown to each critique lens
    pub const CRITIQUE_WINDOW: usize = 60_000;

    /// Combined critique text shown to the reviser per chapter
    pub const CRITIQUE_CONTEXT: usize = 30_000;

    /// Absolute minimum for the whole-report length floor
    pub const FLOOR_MIN_TOTAL: usize = 16_000;

    /// Fraction of the corpus length the revised report should keep
    pub const FLOOR_CORPUS_RATIO: f64 = 0.6;

    /// Minimum per-chapter length floor
    pub const FLOOR_MIN_CHAPTER: usize = 2_000;

    /// Emitted in place of an exclusion list when nothing was flagged
    pub const NO_FABRICATION: &str = "未发现编造内容";
}

/// Style rewrite and citation annotation
pub mod finish {
    /// Corpus cap for the style rewrite
    pub const STYLE_CORPUS_MAX: usize = 100_000;

    /// Corpus slice shown per chapter during the style rewrite
    pub const STYLE_CORPUS_SLICE: usize = 40_000;

    /// Chapter body window for the style rewrite
    pub const STYLE_CHAPTER_WINDOW: usize = 18_000;

    /// Chapter window sent to the citation backend
    pub const CITATION_CHAPTER_WINDOW: usize = 12_000;

    /// Pause between citation calls (milliseconds)
    pub const CITATION_PAUSE_MS: u64 = 1_500;
}

/// Notice appended wherever text was cut to fit a window
pub const TRUNCATION_NOTICE: &str = "\n\n[已截断]";
