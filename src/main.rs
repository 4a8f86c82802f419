//! BRT arrivals - line detection and arrival prediction service
//!
//! Identifies the route line of a BRT vehicle from a photo of its sign and
//! keeps a time-decaying queue of predicted arrivals per stop.
//!
//! Module structure:
//! - `domain/` - Core business types (LineRegistry, ArrivalEvent, vision types)
//! - `io/` - External interfaces (HTTP API, inference sidecars, store, egress)
//! - `services/` - Business logic (pipeline stages, ArrivalQueue)
//! - `infra/` - Infrastructure (Config, Metrics, AppContext)

use brt_arrivals::infra::{AppContext, Config};
use brt_arrivals::io::{create_egress_channel, start_api_server};
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// BRT arrivals - vehicle line detection and arrival predictions
#[derive(Parser, Debug)]
#[command(name = "brt-arrivals", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-stage pipeline visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "brt-arrivals starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        bind = %config.bind_address(),
        port = %config.server_port(),
        detector_url = %config.detector_url(),
        recognizer_url = %config.recognizer_url().unwrap_or("none"),
        inference_timeout_ms = %config.inference_timeout_ms(),
        max_concurrent_inferences = %config.max_concurrent_inferences(),
        registry_file = %config.registry_file().unwrap_or("builtin"),
        egress_enabled = %config.egress_enabled(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Arrival log writer (if enabled)
    let egress_sender = if config.egress_enabled() {
        let (sender, writer) = create_egress_channel(1000, config.egress_file());
        let writer_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            writer.run(writer_shutdown).await;
        });
        Some(sender)
    } else {
        None
    };

    // Registry failure is fatal here
    let ctx = Arc::new(AppContext::from_config(config, egress_sender)?);

    // Metrics reporter
    let reporter_ctx = ctx.clone();
    let metrics_interval = ctx.config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            let summary = reporter_ctx.metrics.report(reporter_ctx.queue.en_route_count());
            summary.log();
        }
    });

    // Retention sweep between records, so an idle queue still drains
    let sweeper_ctx = ctx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let horizon = sweeper_ctx.queue.settings().retention;
            sweeper_ctx.queue.retention_sweep(Utc::now(), horizon);
        }
    });

    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    if let Err(e) = start_api_server(ctx, shutdown_rx).await {
        error!(error = %e, "api_server_error");
        return Err(e);
    }

    // Give the egress writer a moment to drain
    tokio::time::sleep(Duration::from_millis(100)).await;

    info!("brt-arrivals shutdown complete");
    Ok(())
}
