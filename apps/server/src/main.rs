//! Cliparino Server - standalone headless daemon for Cliparino.
//!
//! This binary runs the Twitch-to-OBS clip playback control plane without a
//! GUI: it watches the broadcaster's chat, plays requested clips in the OBS
//! browser source, and keeps both connections healthy until it receives a
//! shutdown signal.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cliparino_core::{bootstrap_services, StaticTokenProvider};
use tokio::signal;

use crate::config::ServerConfig;

/// Cliparino Server - headless Twitch clip playback daemon for OBS.
#[derive(Parser, Debug)]
#[command(name = "cliparino-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "CLIPARINO_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Broadcaster channel login (overrides config file).
    #[arg(short = 'b', long, env = "CLIPARINO_BROADCASTER")]
    broadcaster: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Cliparino Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(broadcaster) = args.broadcaster {
        config.core.twitch.broadcaster_login = broadcaster;
    }

    if config.twitch_token.is_empty() {
        anyhow::bail!(
            "No Twitch token configured. Set CLIPARINO_TWITCH_TOKEN or the \
             twitch_token config key."
        );
    }

    log::info!(
        "Configuration: broadcaster={}, obs={}:{}",
        config.core.twitch.broadcaster_login,
        config.core.obs.host,
        config.core.obs.port
    );

    // Bootstrap services; resolves the broadcaster id up front so bad
    // credentials fail loudly at startup.
    let tokens = Arc::new(StaticTokenProvider::new(config.twitch_token.clone()));
    let services = bootstrap_services(&config.core, tokens)
        .await
        .context("Failed to bootstrap services")?;

    log::info!(
        "Services bootstrapped for broadcaster id {}",
        services.broadcaster_id
    );

    // Start the supervisors (playback engine, OBS supervisor, event intake,
    // approval sweeper).
    services.start_background_tasks();

    log::info!("Background tasks started");

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown
    services.shutdown().await;

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
