//! reportweave - AI Chat Transcripts to Research Reports
//!
//! Ingests AI-chat transcripts (share pages, exports, documents, images) and
//! drives a staged completion pipeline that drafts, reviews, revises,
//! restyles and cites a long-form report, exporting each version to Word.
//!
//! ## Core Features
//!
//! - **Source Normalizer**: share-page crawl, file import, directory merge
//! - **Tiered Outline Parsing**: JSON repair with heading and skeleton fallbacks
//! - **Chunked Assembly**: whole, per-section or sliding-window chapter drafting
//! - **Expert Critique**: five lenses, one backed by a retrieval model
//! - **Hallucination Control**: exclusion list enforced during revision
//! - **Citations**: per-chapter sources renumbered into one reference list
//!
//! ## Quick Start
//!
//! ```ignore
//! use reportweave::{ArtifactStore, Config, Gateway, ReportPipeline};
//!
//! let config = ConfigLoader::load()?;
//! let gateway = Arc::new(Gateway::new(&config, "demo"));
//! let pipeline = ReportPipeline::new(config, gateway, ArtifactStore::new("output"));
//! let v1 = pipeline.run_draft(Path::new("output/raw/chat.txt"), None).await?;
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: completion backends, gateway, metrics, JSON repair
//! - [`ingest`]: source detection, crawling, import, merge
//! - [`report`]: document model, stages, artifacts
//! - [`render`]: markdown to `.docx`
//! - [`config`]: layered configuration

pub mod ai;
pub mod cli;
pub mod config;
pub mod constants;
pub mod ingest;
pub mod render;
pub mod report;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{BackendKind, Config, ConfigLoader};

// Error Types
pub use types::{CompletionError, ErrorCategory, ReportError, Result, RunId};

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use ingest::{IngestOutcome, Normalizer, SourceKind, detect_source};
pub use report::{
    ArtifactStore, Document, ReportPipeline, ReportVersion, RunSummary, StageOutput, StylePreset,
};

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{CompletionBackend, Gateway, MetricsCollector, SharedGateway, SharedMetrics};

pub use render::{render_docx, write_docx};
