//! catalog-i18n driver: start, stop, poll, or run a translation job to completion.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use catalog_i18n::translate::deepseek::DeepSeekClient;
use catalog_i18n::{JobStatus, Pipeline, ProgressSnapshot, Settings, StopOutcome};

#[derive(Parser)]
#[command(name = "catalog-i18n")]
#[command(version)]
#[command(about = "Resumable multi-language translation of a product catalog")]
struct Cli {
    /// Settings file
    #[arg(short, long, default_value = "catalog-i18n.json", global = true)]
    settings: PathBuf,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Begin or resume a translation job
    Start {
        /// Discard staged progress and re-translate every field
        #[arg(short, long)]
        force: bool,
    },
    /// Ask the running job to stop after its current batch
    Stop,
    /// Run one batch (if the job is running) and print progress
    Status,
    /// Poll until the job completes, stops or fails
    Run {
        /// Start the job first
        #[arg(long)]
        start: bool,

        /// With --start: re-translate everything
        #[arg(short, long)]
        force: bool,

        /// Pause between polls
        #[arg(long, default_value = "1500")]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);
    let _ = dotenvy::dotenv();

    let settings = Settings::load(&cli.settings)
        .with_context(|| format!("loading settings from {}", cli.settings.display()))?;
    let translator = DeepSeekClient::new(&settings.translator, settings.api_key())
        .context("building translation client")?;
    let pipeline = Pipeline::from_settings(&settings, translator).context("opening job state")?;

    match cli.command {
        Commands::Start { force } => {
            let report = pipeline.start(force)?;
            print_json(&serde_json::json!({
                "total_products": report.total_products,
                "force_retranslate": report.force_retranslate,
                "resumed": report.resumed,
                "backup": report.backup_path,
            }))?;
        }
        Commands::Stop => match pipeline.stop()? {
            StopOutcome::Stopped => print_json(&serde_json::json!({ "ok": true }))?,
            StopOutcome::NoActiveProcess => {
                print_json(&serde_json::json!({ "ok": false, "message": "no active process" }))?
            }
        },
        Commands::Status => {
            let snapshot = pipeline.status().await?;
            print_json(&snapshot)?;
        }
        Commands::Run {
            start,
            force,
            interval_ms,
        } => {
            if start {
                let report = pipeline.start(force)?;
                info!(total_products = report.total_products, resumed = report.resumed, "job started");
            }
            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c.cancel();
                }
            });
            let last = drive(&pipeline, Duration::from_millis(interval_ms), &cancel).await?;
            print_json(&last)?;
        }
    }
    Ok(())
}

/// Poll until a terminal status. Ctrl-C stops the job at the batch boundary.
async fn drive(
    pipeline: &Pipeline<DeepSeekClient>,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<ProgressSnapshot> {
    loop {
        let snapshot = pipeline.status().await?;
        for entry in &snapshot.log {
            info!(level = ?entry.level, "{}", entry.message);
        }
        info!(
            status = %snapshot.status,
            percent = snapshot.percent,
            language = snapshot.current_language.as_deref().unwrap_or("-"),
            api_calls = snapshot.api_calls,
            "progress"
        );
        if snapshot.status.is_terminal() || snapshot.status == JobStatus::Idle {
            return Ok(snapshot);
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => {
                warn!("interrupted, stopping job");
                pipeline.stop()?;
                return Ok(pipeline.status().await?);
            }
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("catalog_i18n=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
