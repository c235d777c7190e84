//! Voice Player (minstrel-vp) - Main entry point
//!
//! Per-guild audio playback service: HTTP/SSE control surface in front of
//! the session registry, transcoding through an external subprocess into a
//! real-time frame sink.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use minstrel_common::events::EventBus;
use minstrel_vp::api;
use minstrel_vp::config::{Settings, SettingsOverrides};
use minstrel_vp::playback::pipeline::TranscodingPipeline;
use minstrel_vp::playback::registry::SessionRegistry;
use minstrel_vp::playback::sink::DiscardSinkFactory;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for minstrel-vp
#[derive(Parser, Debug)]
#[command(name = "minstrel-vp")]
#[command(about = "Voice playback service for Minstrel")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "MINSTREL_VP_PORT")]
    port: Option<u16>,

    /// Root folder containing media files
    #[arg(short, long, env = "MINSTREL_MEDIA_ROOT")]
    media_root: Option<PathBuf>,

    /// Path to TOML configuration file
    #[arg(short, long, env = "MINSTREL_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "minstrel_vp=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse command-line arguments
    let args = Args::parse();

    let settings = Settings::load(
        args.config.as_deref(),
        SettingsOverrides {
            port: args.port,
            media_root: args.media_root,
        },
    )
    .await
    .context("Failed to load configuration")?;
    let settings = Arc::new(settings);

    info!("Starting Minstrel Voice Player on port {}", settings.port);
    if let Some(root) = &settings.media_root {
        info!("Media root: {}", root.display());
    }
    info!(
        "Output profile: {:?} ({} byte watermark)",
        settings.playback.profile,
        settings.playback.watermark_bytes()
    );

    // Wire up the playback engine
    let bus = EventBus::new(1000);
    let opener = Arc::new(TranscodingPipeline::new(Arc::clone(&settings)));
    let sinks = Arc::new(DiscardSinkFactory::new(settings.playback.profile));
    let registry = SessionRegistry::new(Arc::clone(&settings), opener, sinks, bus.clone());
    info!("Session registry initialized");

    // Build the application router
    let ctx = api::AppContext {
        registry,
        bus,
        settings: Arc::clone(&settings),
    };
    let app = api::create_router(ctx);

    // Create socket address
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    info!("Starting HTTP server on {}", addr);

    // Create and run the server
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
