//! magnetar daemon
//!
//! Supervises download sessions and serves the local IPC interface used by
//! the `magnetar` CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mg_core::config;
use mg_core::instance;
use mg_orchestrator::daemon::{self, DaemonOptions};

#[derive(Parser)]
#[command(name = "mg-orchestrator")]
#[command(about = "magnetar download-session daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "MAGNETAR_CONFIG")]
    config: Option<PathBuf>,

    /// IPC port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// PID file used as the single-instance lock
    #[arg(long, env = "MAGNETAR_PID_FILE")]
    pid_file: Option<PathBuf>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Advance transfers in the in-memory engine at this many bytes/s
    #[arg(long)]
    simulate_rate: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("magnetar daemon starting...");

    let options = DaemonOptions {
        config_path: args.config.unwrap_or_else(config::default_config_path),
        pid_path: args.pid_file.unwrap_or_else(instance::default_pid_path),
        port: args.port,
        simulate_rate: args.simulate_rate,
    };

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();
    daemon::cancel_on_signal(cancel.clone());

    daemon::run(options, cancel).await
}
