//! The commission-extract binary: extract or estimate a statement PDF.

use anyhow::Context;
use clap::{Parser, Subcommand};
use commission_core::extraction::ProgressEvent;
use commission_core::source::{PageSource, PdfPageSource};
use commission_core::{estimate_document, ExtractOptions};
use commission_extract::config::{ProviderKind, Settings};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract tables and metadata; prints the report as JSON
    Extract {
        /// Statement PDF
        pdf: PathBuf,
        /// claude or openai (overrides the config file)
        #[arg(long)]
        provider: Option<ProviderKind>,
        /// Carrier name for prompt selection
        #[arg(long)]
        carrier: Option<String>,
        /// Only process the first N pages
        #[arg(long)]
        max_pages: Option<usize>,
        /// Try the cheaper model first
        #[arg(long)]
        prefer_mini: bool,
        /// Force this many pages per call
        #[arg(long)]
        chunk_size: Option<usize>,
        /// TOML settings file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Give up after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,
        /// Only scan the first page for statement metadata
        #[arg(long)]
        metadata_only: bool,
    },
    /// Print the token estimate and chunk plan without calling a provider
    Estimate {
        /// Statement PDF
        pdf: PathBuf,
        /// claude or openai limits (overrides the config file)
        #[arg(long)]
        provider: Option<ProviderKind>,
        /// Force this many pages per call
        #[arg(long)]
        chunk_size: Option<usize>,
        /// TOML settings file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct EstimateOutput {
    pdf: PathBuf,
    provider: ProviderKind,
    total_pages: usize,
    estimate: commission_core::estimator::TokenEstimate,
    plan: commission_core::planner::ExtractionPlan,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Extract {
            pdf,
            provider,
            carrier,
            max_pages,
            prefer_mini,
            chunk_size,
            config,
            deadline_secs,
            metadata_only,
        } => {
            let settings = Settings::load(config.as_deref(), provider)?;
            let mut options = ExtractOptions {
                max_pages,
                prefer_mini_model: prefer_mini,
                forced_chunk_size: chunk_size,
                carrier,
                deadline: deadline_secs.map(Duration::from_secs),
            };
            if options.max_pages.is_none() && metadata_only {
                options.max_pages = Some(1);
            }
            run_extract(&pdf, &settings, &options, metadata_only).await
        }
        Commands::Estimate {
            pdf,
            provider,
            chunk_size,
            config,
        } => {
            let settings = Settings::load(config.as_deref(), provider)?;
            run_estimate(pdf, &settings, chunk_size).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run_extract(
    pdf: &Path,
    settings: &Settings,
    options: &ExtractOptions,
    metadata_only: bool,
) -> anyhow::Result<ExitCode> {
    let source = PdfPageSource::open(pdf)
        .await
        .with_context(|| format!("failed to open {}", pdf.display()))?;

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let extractor = commission_extract::build_extractor(settings)?.with_progress(tx);
    let progress = tokio::spawn(log_progress(rx));

    let exit = if metadata_only {
        let metadata = extractor.extract_metadata(&source, options).await?;
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        ExitCode::SUCCESS
    } else {
        let report = extractor.extract_source(&source, options).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        if report.success {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(2)
        }
    };

    // Dropping the extractor closes the progress channel.
    drop(extractor);
    progress.await.context("progress task panicked")?;
    Ok(exit)
}

async fn log_progress(mut rx: UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = rx.recv().await {
        tracing::info!(
            event = "progress",
            stage = ?event.stage,
            percent = event.percent,
            message = %event.message,
            "progress"
        );
    }
}

async fn run_estimate(pdf: PathBuf, settings: &Settings, chunk_size: Option<usize>) -> anyhow::Result<()> {
    let source = PdfPageSource::open(&pdf)
        .await
        .with_context(|| format!("failed to open {}", pdf.display()))?;
    let total_pages = source.page_count();
    let (estimate, plan) = estimate_document(&settings.extraction, total_pages, chunk_size)?;
    let output = EstimateOutput {
        pdf,
        provider: settings.provider,
        total_pages,
        estimate,
        plan,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
