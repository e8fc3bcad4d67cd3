use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reportweave::cli::commands;
use reportweave::cli::{CommandContext, GlobalOptions};
use reportweave::config::BackendKind;
use reportweave::report::{ReportVersion, StylePreset};

/// Parse backend name from string
fn parse_provider(s: &str) -> Result<BackendKind, String> {
    s.parse()
}

/// Parse style preset from string
fn parse_style(s: &str) -> Result<StylePreset, String> {
    s.parse()
}

/// Parse the last report version of a composite run
fn parse_through(s: &str) -> Result<ReportVersion, String> {
    match s.trim().to_lowercase().as_str() {
        "v2" | "2" => Ok(ReportVersion::V2),
        "v3" | "3" => Ok(ReportVersion::V3),
        "v4" | "4" => Ok(ReportVersion::V4),
        _ => Err(format!("Invalid version '{}'. Valid values: v2, v3, v4", s)),
    }
}

#[derive(Parser)]
#[command(name = "reportweave")]
#[command(
    version,
    about = "Turn AI chat transcripts into reviewed, styled and cited research reports"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short, global = true, help = "Config file (skips global/project lookup)")]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,

    #[arg(long, global = true, value_parser = parse_provider, help = "Default backend: kimi, openai, grok, perplexity, claude, gemini")]
    provider: Option<BackendKind>,

    #[arg(long, global = true, help = "Write artifacts under output/runs/<id>")]
    run_id: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a share-page URL or a local file into raw/<name>.txt
    Ingest {
        input: String,
        #[arg(short = 'o', long, help = "Corpus name")]
        name: Option<String>,
    },

    /// Import a local file (txt, md, json, html, docx, pdf, images)
    Import {
        file: PathBuf,
        #[arg(short = 'o', long, help = "Corpus name")]
        name: Option<String>,
    },

    /// Merge every supported file of a directory into one corpus
    Merge {
        dir: PathBuf,
        #[arg(short = 'o', long, help = "Corpus name")]
        name: Option<String>,
        #[arg(long, help = "Include subdirectories")]
        recursive: bool,
    },

    /// Outline, assemble and reconcile a corpus into report v1
    Outline {
        raw: PathBuf,
        #[arg(short = 'o', long, help = "Output basename")]
        base: Option<String>,
    },

    /// Five-lens expert review of report v1
    Critique {
        report: PathBuf,
        #[arg(short = 'o', long, help = "Output basename")]
        base: Option<String>,
    },

    /// Revise report v1 against the critique into report v2
    Revise {
        report: PathBuf,
        #[arg(short = 'r', long, help = "Corpus file (defaults to raw/<base>.txt)")]
        raw: Option<PathBuf>,
        #[arg(short = 'o', long, help = "Output basename")]
        base: Option<String>,
    },

    /// Rewrite report v2 in a preset style into report v3
    Stylize {
        report: PathBuf,
        #[arg(short = 's', long, value_parser = parse_style, default_value = "A", help = "Style: A, B or C")]
        style: StylePreset,
        #[arg(short = 'r', long, help = "Corpus file")]
        raw: PathBuf,
        #[arg(short = 'o', long, help = "Output basename")]
        base: Option<String>,
    },

    /// Annotate report v3 (.md or .docx) with citations into report v4
    Annotate {
        report: PathBuf,
        #[arg(short = 'o', long, help = "Output basename")]
        base: Option<String>,
    },

    /// Render a markdown file to .docx
    Render {
        markdown: PathBuf,
        #[arg(short = 'o', long, help = "Output path")]
        out: Option<PathBuf>,
    },

    /// Run every stage from ingest on
    Run {
        input: String,
        #[arg(short = 'o', long, help = "Corpus name")]
        name: Option<String>,
        #[arg(short = 's', long, value_parser = parse_style, default_value = "A", help = "Style: A, B or C")]
        style: StylePreset,
        #[arg(long, value_parser = parse_through, default_value = "v4", help = "Last version: v2, v3, v4")]
        through: ReportVersion,
    },

    /// Merge a directory of transcripts, then run every stage
    Batch {
        dir: PathBuf,
        #[arg(short = 'o', long, help = "Corpus name")]
        name: Option<String>,
        #[arg(long, help = "Include subdirectories")]
        recursive: bool,
        #[arg(short = 's', long, value_parser = parse_style, default_value = "A", help = "Style: A, B or C")]
        style: StylePreset,
        #[arg(long, value_parser = parse_through, default_value = "v3", help = "Last version: v2, v3, v4")]
        through: ReportVersion,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show {
        #[arg(
            short = 'f',
            long,
            default_value = "toml",
            help = "Output format: toml, json"
        )]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Write a starter configuration
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mreportweave encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Call default hook for backtrace (if RUST_BACKTRACE=1)
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let options = GlobalOptions {
        config: cli.config,
        provider: cli.provider,
        run_id: cli.run_id,
    };

    let command = match cli.command {
        Commands::Config { action } => {
            match action {
                ConfigAction::Show { format } => commands::config::show(options.config.as_deref(), &format)?,
                ConfigAction::Path => commands::config::path()?,
                ConfigAction::Init { global, force } => commands::config::init(global, force)?,
            }
            return Ok(());
        }
        Commands::Render { markdown, out } => {
            let rt = Runtime::new()?;
            rt.block_on(commands::report::render(&markdown, out))?;
            return Ok(());
        }
        other => other,
    };

    let ctx = CommandContext::load(&options)?;
    let rt = Runtime::new()?;
    rt.block_on(async {
        match command {
            Commands::Ingest { input, name } => {
                commands::ingest::ingest(&ctx, &input, name.as_deref()).await
            }
            Commands::Import { file, name } => {
                commands::ingest::import(&ctx, &file, name.as_deref()).await
            }
            Commands::Merge {
                dir,
                name,
                recursive,
            } => commands::ingest::merge(&ctx, &dir, name.as_deref(), recursive).await,
            Commands::Outline { raw, base } => {
                commands::report::outline(&ctx, &raw, base.as_deref()).await
            }
            Commands::Critique { report, base } => {
                commands::report::critique(&ctx, &report, base.as_deref()).await
            }
            Commands::Revise { report, raw, base } => {
                commands::report::revise(&ctx, &report, raw.as_deref(), base.as_deref()).await
            }
            Commands::Stylize {
                report,
                style,
                raw,
                base,
            } => commands::report::stylize(&ctx, &report, style, &raw, base.as_deref()).await,
            Commands::Annotate { report, base } => {
                commands::report::annotate(&ctx, &report, base.as_deref()).await
            }
            Commands::Run {
                input,
                name,
                style,
                through,
            } => commands::report::run(&ctx, &input, name.as_deref(), style, through).await,
            Commands::Batch {
                dir,
                name,
                recursive,
                style,
                through,
            } => {
                commands::report::batch(&ctx, &dir, name.as_deref(), recursive, style, through)
                    .await
            }
            Commands::Config { .. } | Commands::Render { .. } => Ok(()),
        }
    })?;

    Ok(())
}
