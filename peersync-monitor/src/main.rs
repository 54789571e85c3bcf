//! peersync monitor
//!
//! Runs the sync engine against in-process loopback transports and serves
//! its state over HTTP, for checking a settings file without touching real
//! rooms:
//! 1. Resolves which channels the config makes eligible and desired
//! 2. Drives the orchestrator and logs every status transition
//!
//! Usage:
//!   peersync-monitor --config peersync.json --http-port 4002

use std::{path::PathBuf, sync::Arc, time::Duration};
use anyhow::{Context, Result};
use clap::Parser;
use peersync_monitor::{build_router, log_status_changes, AppState, MonitorConfig};
use peersync_sync::transport::loopback::LoopbackTransport;
use peersync_sync::{
    spawn_orchestrator, EnablementQuery, MemorySettings, OrchestratorConfig, SettingsSource,
    TransportAdapter,
};
use peersync_types::ChannelMap;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "peersync-monitor")]
#[command(about = "Local status monitor for the peersync engine")]
struct Args {
    /// Path to the JSON config file
    #[arg(short, long, default_value = "peersync.json")]
    config: PathBuf,

    /// HTTP API port for the status endpoints
    #[arg(long, default_value = "4002")]
    http_port: u16,

    /// Delay before a loopback transport reports Connected, in milliseconds
    #[arg(long, default_value = "250")]
    connect_delay_ms: u64,

    /// Re-read the config file every N seconds (0 disables)
    #[arg(long, default_value = "0")]
    reload_secs: u64,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("peersync monitor starting...");
    let config = MonitorConfig::load(&args.config)?;

    let delay = Duration::from_millis(args.connect_delay_ms);
    let adapters = ChannelMap::from_fn(|kind| {
        Arc::new(LoopbackTransport::new(kind).with_auto_connect(delay)) as Arc<dyn TransportAdapter>
    });
    let orchestrator = spawn_orchestrator(OrchestratorConfig::default(), adapters)
        .context("Failed to start sync orchestrator")?;
    info!("Client ID: {}", orchestrator.client_id());

    let initial = config.settings_snapshot();
    let settings = Arc::new(MemorySettings::new(initial.system_enable, initial.settings));
    let query = EnablementQuery::new(
        orchestrator.clone(),
        settings.clone() as Arc<dyn SettingsSource>,
    );
    tokio::spawn(log_status_changes(orchestrator.subscribe()));

    if let Ok(enabled) = query.evaluate(config.identity.clone()).await {
        info!("Sync enabled: {}", enabled);
    }

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.http_port))
        .await
        .with_context(|| format!("Failed to bind HTTP port {}", args.http_port))?;
    let app = build_router(AppState::new(&query));
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server failed: {}", e);
        }
    });
    info!("HTTP status endpoint listening on port {}", args.http_port);

    println!("\n========================================");
    println!("  peersync monitor running");
    println!("========================================");
    println!("  Config:    {}", args.config.display());
    println!("  HTTP Port: {}", args.http_port);
    println!("\n  Status:");
    println!("  http://127.0.0.1:{}/api/v1/sync/status", args.http_port);
    println!("========================================\n");

    if args.reload_secs > 0 {
        tokio::spawn(reload_loop(
            args.config.clone(),
            Duration::from_secs(args.reload_secs),
            config,
            settings,
            query.clone(),
        ));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutting down");
    orchestrator
        .shutdown()
        .await
        .context("Failed to stop sync orchestrator")?;
    Ok(())
}

/// Applies config file edits to the settings store and re-evaluates.
async fn reload_loop(
    path: PathBuf,
    period: Duration,
    mut current: MonitorConfig,
    settings: Arc<MemorySettings>,
    query: EnablementQuery,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let next = match MonitorConfig::load(&path) {
            Ok(next) => next,
            Err(e) => {
                warn!("Keeping previous config: {:#}", e);
                continue;
            }
        };
        if next == current {
            continue;
        }

        info!("Config file changed, re-evaluating sync");
        settings.set_system_enable(next.system_enable());
        settings.replace(next.sync.clone());
        if let Ok(enabled) = query.refresh(next.identity.clone()).await {
            info!("Sync enabled: {}", enabled);
        }
        current = next;
    }
}
