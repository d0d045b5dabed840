//! PDF Extraction Orchestrator - Entry point
//!
//! Runs every worker over every page of the PDFs in an input folder and
//! writes one merged artifact per unit.

use clap::Parser;
use pdf_extract_orchestrator::{LifecycleConfig, OutputGranularity, Pipeline, RunConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Folder containing the input PDFs
    #[arg(short, long, default_value = "input_data")]
    input: PathBuf,

    /// Folder receiving the extraction artifacts
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Folder containing worker descriptor files
    #[arg(short, long, default_value = "workers")]
    workers: PathBuf,

    /// File name pattern selecting worker descriptors
    #[arg(long, default_value = "*.json")]
    pattern: String,

    /// Maximum number of worker tasks running at once
    #[arg(long, default_value_t = 8)]
    max_in_flight: usize,

    /// Timeout in seconds for workers that do not declare one
    #[arg(long, default_value_t = 120)]
    timeout: u64,

    /// Artifact grouping
    #[arg(long, value_enum, default_value_t = OutputGranularity::Page)]
    granularity: OutputGranularity,

    /// Descend into subfolders of the input folder
    #[arg(short, long)]
    recursive: bool,

    /// Do not enable or disable remote processors
    #[arg(long)]
    skip_lifecycle: bool,

    /// Service API enabled before the processors; empty to skip
    #[arg(long, default_value = "documentai.googleapis.com")]
    service_name: String,

    /// Bearer token for the remote APIs
    #[arg(long, env = "PDF_EXTRACT_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> RunConfig {
        let service_name = Some(self.service_name).filter(|s| !s.trim().is_empty());
        RunConfig {
            input_dir: self.input,
            output_dir: self.output,
            workers_dir: self.workers,
            worker_pattern: self.pattern,
            max_in_flight: self.max_in_flight,
            default_worker_timeout: Duration::from_secs(self.timeout),
            granularity: self.granularity,
            recursive: self.recursive,
            lifecycle: LifecycleConfig {
                enabled: !self.skip_lifecycle,
                service_name,
                access_token: self.access_token,
                ..LifecycleConfig::default()
            },
            ..RunConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "pdf_extract_orchestrator=debug"
    } else {
        "pdf_extract_orchestrator=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let pipeline = match Pipeline::new(args.into_config()) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!(kind = e.kind(), "{}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    match pipeline.run().await {
        Ok(summary) => ExitCode::from(summary.exit_code()),
        Err(e) => {
            tracing::error!(kind = e.kind(), "Run failed: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
