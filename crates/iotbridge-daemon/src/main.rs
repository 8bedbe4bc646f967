//! IoT Bridge Daemon - Main entry point
//!
//! Serves the device REST API and runs protocol listeners.

mod api;
mod config;
mod invoke;
mod scan;
mod server;
mod state;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "iotbridge")]
#[command(about = "Bridge IoT devices to a uniform capability API")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "iotbridge.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// In-memory store and simulated drivers only
    #[arg(long, env = "IOTBRIDGE_DEMO")]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("IoT Bridge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }
    if args.demo {
        info!("Demo mode: in-memory store, simulated drivers");
        config = config.into_demo();
    }

    info!(
        store = ?config.store.backend,
        mqtt = config.mqtt.enabled,
        drivers = config.drivers.len(),
        "Configuration loaded"
    );

    let state = state::AppState::new(config.clone()).await?;
    server::run(state, &config.daemon.bind).await
}
