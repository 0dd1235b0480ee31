//! Ferroprof Binary Entry Point
//!
//! Runs the collector against its own process, driven by a YAML
//! configuration file and CLI overrides. Core functionality is provided by
//! the `ferroprof` library crate.

use std::time::Duration;

use clap::Parser;
use ferroprof::{AppConfig, Profiler, ProfilerHandle, config::OutputMode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(target_os = "linux")]
use tikv_jemallocator::Jemalloc;
#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// jemalloc options read at startup: sample one allocation per 512 KiB so
/// heap profiles can be captured.
#[cfg(target_os = "linux")]
#[allow(non_upper_case_globals)]
#[unsafe(export_name = "_rjem_malloc_conf")]
pub static malloc_conf: &[u8] = b"prof:true,prof_active:true,lg_prof_sample:19\0";

/// Ferroprof - Continuous Runtime Profile Collector
#[derive(Parser, Debug)]
#[command(name = "ferroprof", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "FERROPROF_CONFIG")]
    config: Option<String>,

    /// Service name (overrides config file)
    #[arg(long, env = "FERROPROF_SERVICE")]
    service: Option<String>,

    /// Collection interval, e.g. "30s" (overrides config file)
    #[arg(long, env = "FERROPROF_INTERVAL", value_parser = ferroprof::config::parse_duration)]
    interval: Option<Duration>,

    /// Push to this agent URL instead of writing files (overrides config file)
    #[arg(long, env = "FERROPROF_TARGET_URL")]
    target_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ferroprof=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Ferroprof - Continuous Runtime Profile Collector");

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            AppConfig::load(path)?
        }
        None => {
            let service = cli
                .service
                .clone()
                .ok_or("either --config or --service is required")?;
            AppConfig::new(service)
        }
    };

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(service) = cli.service {
        config.service = service;
    }
    if let Some(interval) = cli.interval {
        config.interval = interval;
    }
    if let Some(url) = cli.target_url {
        config.output.mode = OutputMode::Network;
        config.output.target_url = url;
    }
    config.validate()?;

    let settings = config.to_settings();
    tracing::info!(
        "Service: {}, interval: {:?}, profiles: {:?}, output: {}",
        settings.service(),
        settings.interval(),
        settings.capture_order(),
        settings.output(),
    );

    let handle = Profiler::new(settings)?.start()?;

    tracing::info!("Press Ctrl+C to shutdown");
    shutdown_signal().await;

    stop(handle).await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn stop(handle: ProfilerHandle) {
    tracing::info!("Shutting down profiler...");
    match handle.shutdown().await {
        Ok(stats) => tracing::info!(
            rounds = stats.rounds_completed,
            dispatched = stats.dispatched,
            dispatch_failures = stats.dispatch_failures,
            dropped = stats.dropped_on_full,
            "Final pipeline stats"
        ),
        Err(e) => tracing::error!("Failed to shutdown profiler: {}", e),
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
