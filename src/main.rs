//! Body measurement API - photo to body measurements and uniform sizes
//!
//! Accepts a photo over HTTP, runs an external pose estimator on it, converts
//! the landmarks to centimeter measurements and recommends a uniform size.
//!
//! Module structure:
//! - `domain/` - Core value types (Landmarks, Measurements, Sizes)
//! - `io/` - External interfaces (HTTP API, pose estimator, image decode)
//! - `services/` - Business logic (Calibration, Measurement, Sizing)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use body_measure::infra::{Config, Metrics};
use body_measure::io::{AppState, HttpPoseEstimator};
use body_measure::services::MeasurementConverter;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Body measurement API server
#[derive(Parser, Debug)]
#[command(name = "body-measure", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the pose estimator URL
    #[arg(long)]
    estimator_url: Option<String>,

    /// Emit logs as JSON lines instead of human-readable text
    #[arg(long)]
    log_json: bool,
}

/// Initialize structured logging with configurable level via RUST_LOG env var
/// Default: INFO, use RUST_LOG=debug for estimator responses
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!(version = %env!("CARGO_PKG_VERSION"), git_hash = %env!("GIT_HASH"), "body-measure starting");

    let config_path = Config::resolve_config_path(args.config.as_deref());
    let mut config = Config::load_from_path(&config_path);
    if let Some(port) = args.port {
        config = config.with_port(port);
    }
    if let Some(url) = args.estimator_url {
        config = config.with_estimator_url(url);
    }

    let options = config.estimator_options();
    info!(
        config_file = %config.config_file(),
        bind_address = %config.bind_address(),
        port = %config.port(),
        service_name = %config.service_name(),
        max_upload_bytes = %config.max_upload_bytes(),
        estimator_url = %config.estimator_url(),
        estimator_timeout_ms = %config.estimator_timeout_ms(),
        model_complexity = %options.model_complexity,
        min_detection_confidence = %options.min_detection_confidence,
        metrics_interval_secs = %config.metrics_interval_secs(),
        "config_loaded"
    );

    let timeout = Duration::from_millis(config.estimator_timeout_ms());
    let estimator = HttpPoseEstimator::new(config.estimator_url(), timeout)
        .context("Failed to build pose estimator client")?;
    let converter =
        MeasurementConverter::new(Arc::new(estimator), options, *config.calibration(), timeout);

    let metrics = Arc::new(Metrics::new());
    let state = Arc::new(AppState::from_config(&config, converter, metrics.clone()));

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start metrics reporter (if interval > 0)
    let metrics_interval = config.metrics_interval_secs();
    if metrics_interval > 0 {
        let mut reporter_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
            // First tick fires immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => metrics.report().log(),
                    _ = reporter_shutdown.changed() => break,
                }
            }
        });
    }

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    let addr = config.listen_addr()?;
    body_measure::io::start_server(addr, state, shutdown_rx).await?;

    info!("body-measure shutdown complete");
    Ok(())
}
