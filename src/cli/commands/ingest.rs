//! Ingest Commands
//!
//! Usage:
//!   reportweave ingest <url-or-file> [-o name]
//!   reportweave import <file> [-o name]
//!   reportweave merge <dir> [-o name] [--recursive]

use std::path::Path;

use crate::cli::CommandContext;
use crate::cli::ui::Output;
use crate::ingest::{Normalizer, SourceKind, detect_source};
use crate::types::{ReportError, Result};

/// Ingest a share-page URL or a local file
pub async fn ingest(ctx: &CommandContext, input: &str, name: Option<&str>) -> Result<()> {
    let outcome = ctx.pipeline().ingest(input, name).await?;
    Output::new().ingested(&outcome);
    Ok(())
}

/// Import a local file; URLs are rejected
pub async fn import(ctx: &CommandContext, file: &Path, name: Option<&str>) -> Result<()> {
    let input = file.to_string_lossy();
    if detect_source(&input) != SourceKind::File {
        return Err(ReportError::UnsupportedSource(format!(
            "'{}' is a URL; use `ingest` for share pages",
            input
        )));
    }
    let gateway = ctx.pipeline().gateway();
    let outcome = Normalizer::new(gateway, &ctx.config.ingest, ctx.store())
        .import(file, name)
        .await?;
    Output::new().ingested(&outcome);
    Ok(())
}

/// Merge every supported file of a directory into one corpus
pub async fn merge(ctx: &CommandContext, dir: &Path, name: Option<&str>, recursive: bool) -> Result<()> {
    let output = Output::new();
    output.info(&format!("Merging files in {}", dir.display()));
    let outcome = ctx.pipeline().merge(dir, name, recursive).await?;
    output.ingested(&outcome);
    Ok(())
}
