mod api;
mod auth;
mod error;
mod wiring;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use slipscan_config::{log_report, Config, ValidationReport};
use slipscan_core::{ReceiptJob, ReceiptParser};
use slipscan_logging::init_logger;
use slipscan_scheduler::Outcome;
use slipscan_storage::{detect_mime_type, is_image, receipt_blob_key, sniff_image_mime};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use api::AppState;

#[derive(Parser)]
#[command(name = "slipscan")]
#[command(about = "Slipscan: receipt photos in, spreadsheet rows out")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API (and the local queue worker when enabled)
    Serve {
        /// Port to bind the HTTP server to
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one receipt image through the full pipeline
    Process {
        path: PathBuf,
        #[arg(long)]
        voice_note: Option<String>,
    },
    /// Extract receipt data from an image and print it, without storing anything
    Parse { path: PathBuf },
    /// Query a running server's health endpoint
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, report) = slipscan_config::load()?;
    init_logger(&config.log_level, config.log_dir.as_deref());
    log_report(&report);

    match cli.command {
        Commands::Serve { port } => {
            let config = Config {
                port: port.unwrap_or(config.port),
                ..config
            };
            ensure_valid(&report)?;
            run_server(config).await?;
        }
        Commands::Process { path, voice_note } => {
            ensure_valid(&report)?;
            process_file(&config, &path, voice_note).await?;
        }
        Commands::Parse { path } => {
            let parser = wiring::build_parser(&config, &reqwest::Client::new())?;
            let (data, mime) = read_image(&path).await?;
            let receipt = parser.parse(&data, &mime).await?;
            println!("{}", serde_json::to_string_pretty(&receipt)?);
        }
        Commands::Status => {
            let client = reqwest::Client::new();
            match client
                .get(format!("http://localhost:{}/api/health", config.port))
                .timeout(Duration::from_secs(5))
                .send()
                .await
            {
                Ok(resp) => {
                    let body: serde_json::Value = resp.json().await?;
                    println!("{}", serde_json::to_string_pretty(&body)?);
                }
                Err(_) => {
                    println!("Slipscan is not running on port {}", config.port);
                }
            }
        }
    }

    Ok(())
}

fn ensure_valid(report: &ValidationReport) -> Result<()> {
    if !report.is_valid() {
        bail!("configuration has {} error(s), see log above", report.errors.len());
    }
    Ok(())
}

async fn read_image(path: &Path) -> Result<(Bytes, String)> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    let mime = sniff_image_mime(&data)
        .unwrap_or_else(|| detect_mime_type(path))
        .to_string();
    if !is_image(&mime) {
        bail!("{} does not look like an image", path.display());
    }
    Ok((Bytes::from(data), mime))
}

async fn process_file(config: &Config, path: &Path, voice_note: Option<String>) -> Result<()> {
    let components = wiring::build_components(config).await?;
    let (data, mime) = read_image(path).await?;

    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("receipt.jpg");
    let stored = components
        .blobs
        .put(&receipt_blob_key(filename), data, &mime)
        .await?;
    let job = ReceiptJob::new(&stored.url)
        .with_blob(&stored.key, &mime)
        .with_voice_note(voice_note);

    match components.worker.process(&job).await? {
        Outcome::Processed(receipt) => println!("{}", serde_json::to_string_pretty(&receipt)?),
        Outcome::AlreadyDone => println!("Job {} was already processed", job.id),
        Outcome::InProgress => println!("Job {} is being processed elsewhere", job.id),
    }
    Ok(())
}

async fn run_server(config: Config) -> Result<()> {
    info!(
        port = config.port,
        bind = %config.bind_address,
        db = %config.db_path,
        dispatch = %config.dispatch.mode,
        "Starting Slipscan"
    );
    info!(config = %config.redacted(), "Effective configuration");

    let components = wiring::build_components(&config).await?;
    let (dispatcher, queue_handle) = components.dispatcher(&config)?;

    let app_state = Arc::new(AppState {
        blobs: components.blobs.clone(),
        dispatcher,
        worker: components.worker.clone(),
        jobs: components.jobs.clone(),
        api_key: config.api_secret_key.clone(),
        worker_secret: config.dispatch.worker_shared_secret.clone(),
    });

    let app = api::build_router(app_state, components.media_dir.clone(), config.max_upload_bytes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("bind {}", config.listen_addr()))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    // The router owned the only dispatcher; dropping it closes the queue.
    drop(components);
    if let Some(handle) = queue_handle {
        if tokio::time::timeout(Duration::from_secs(30), handle).await.is_err() {
            warn!("Local queue did not drain within 30s");
        }
    }
    Ok(())
}
