//! Report Commands
//!
//! One handler per pipeline stage plus the composite `run`:
//!
//!   reportweave outline  <raw> [-o base]
//!   reportweave critique <report_v1> [-o base]
//!   reportweave revise   <report_v1> [-r raw] [-o base]
//!   reportweave stylize  <report_v2> -s <A|B|C> -r <raw> [-o base]
//!   reportweave annotate <report_v3.md|docx> [-o base]
//!   reportweave render   <markdown> [-o out.docx]
//!   reportweave run      <url-or-file> [-o name] [-s A|B|C] [--through v2|v3|v4]
//!   reportweave batch    <dir> [-o name] [--recursive] [-s A|B|C] [--through v2|v3|v4]

use std::path::{Path, PathBuf};

use crate::cli::CommandContext;
use crate::cli::ui::Output;
use crate::render::write_docx;
use crate::report::{ReportVersion, RunSummary, StylePreset, read_required};
use crate::types::Result;

fn finish(ctx: &CommandContext, output: &Output) {
    output.section("Completion usage");
    println!("{}", ctx.metrics_report());
}

pub async fn outline(ctx: &CommandContext, raw: &Path, base: Option<&str>) -> Result<()> {
    let output = Output::new();
    let stage = ctx.pipeline().run_draft(raw, base).await?;
    output.stage(&stage);
    finish(ctx, &output);
    Ok(())
}

pub async fn critique(ctx: &CommandContext, report: &Path, base: Option<&str>) -> Result<()> {
    let output = Output::new();
    let written = ctx.pipeline().run_critique(report, base).await?;
    output.success(&format!("Expert opinions saved ({} files)", written.len()));
    for path in &written {
        println!("  {}", path.display());
    }
    finish(ctx, &output);
    Ok(())
}

pub async fn revise(ctx: &CommandContext, report: &Path, raw: Option<&Path>, base: Option<&str>) -> Result<()> {
    let output = Output::new();
    let stage = ctx.pipeline().run_revise(report, raw, base).await?;
    output.stage(&stage);
    finish(ctx, &output);
    Ok(())
}

pub async fn stylize(
    ctx: &CommandContext,
    report: &Path,
    preset: StylePreset,
    raw: &Path,
    base: Option<&str>,
) -> Result<()> {
    let output = Output::new();
    output.info(&format!("Style {}: {}", preset, preset.name()));
    let stage = ctx.pipeline().run_stylize(report, preset, raw, base).await?;
    output.stage(&stage);
    finish(ctx, &output);
    Ok(())
}

pub async fn annotate(ctx: &CommandContext, report: &Path, base: Option<&str>) -> Result<()> {
    let output = Output::new();
    let (stage, annotated) = ctx.pipeline().run_annotate(report, base).await?;
    output.stage(&stage);
    let cited = annotated.chapter_counts.iter().filter(|c| **c > 0).count();
    output.info(&format!(
        "{} sources across {} of {} chapters",
        annotated.references.len(),
        cited,
        annotated.chapter_counts.len()
    ));
    finish(ctx, &output);
    Ok(())
}

/// Render a markdown file to `.docx`; defaults to the same path with a
/// `.docx` extension
pub async fn render(markdown: &Path, out: Option<PathBuf>) -> Result<()> {
    let text = read_required(markdown).await?;
    let target = out.unwrap_or_else(|| markdown.with_extension("docx"));
    let written = write_docx(&text, &target).await?;
    Output::new().success(&format!("Word document saved: {}", written.display()));
    Ok(())
}

pub async fn run(
    ctx: &CommandContext,
    input: &str,
    name: Option<&str>,
    preset: StylePreset,
    through: ReportVersion,
) -> Result<()> {
    let output = Output::new();
    output.header(&format!("reportweave: {} → {}", input, through.tag()));
    if let Some(id) = &ctx.run_id {
        output.info(&format!("Run id: {}", id));
    }

    let summary = ctx.pipeline().run_all(input, name, preset, through).await?;
    report_summary(ctx, &output, &summary);
    Ok(())
}

pub async fn batch(
    ctx: &CommandContext,
    dir: &Path,
    name: Option<&str>,
    recursive: bool,
    preset: StylePreset,
    through: ReportVersion,
) -> Result<()> {
    let output = Output::new();
    output.header(&format!("reportweave batch: {} → {}", dir.display(), through.tag()));
    if let Some(id) = &ctx.run_id {
        output.info(&format!("Run id: {}", id));
    }

    let summary = ctx
        .pipeline()
        .run_batch(dir, name, recursive, preset, through)
        .await?;
    report_summary(ctx, &output, &summary);
    Ok(())
}

fn report_summary(ctx: &CommandContext, output: &Output, summary: &RunSummary) {
    output.ingested(&summary.ingest);
    output.success(&format!("Expert opinions saved ({} files)", summary.critique.len()));
    for stage in &summary.stages {
        output.stage(stage);
    }
    finish(ctx, output);
}
