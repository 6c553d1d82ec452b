//! magnetar CLI
//!
//! Single binary for all magnetar operations:
//! - Daemon (supervises download sessions, serves local IPC)
//! - Management commands (add, list, pause, resume, remove, etc.)

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use magnetar::commands::{self, StatusFilter};
use magnetar::ipc::{is_not_running, DaemonClient};
use magnetar::output::{print_error, print_info, print_success, print_warning};
use mg_core::config::{self, AppConfig};
use mg_core::instance;
use mg_orchestrator::daemon::{self, DaemonOptions};

#[derive(Parser)]
#[command(name = "magnetar")]
#[command(author, version, about = "Durable download sessions from magnet links, URLs and files")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "MAGNETAR_CONFIG")]
    config: Option<PathBuf>,

    /// Daemon IPC port (overrides config)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    /// Alias: start
    #[command(alias = "start")]
    Serve {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,
        /// PID file used as the single-instance lock
        #[arg(long, env = "MAGNETAR_PID_FILE")]
        pid_file: Option<PathBuf>,
        /// Advance transfers in the in-memory engine at this many bytes/s
        #[arg(long)]
        simulate_rate: Option<u64>,
    },

    /// Stop the daemon
    Stop,

    /// Start downloading magnet links, http(s) URLs or local files
    Add {
        /// Sources to add
        #[arg(required = true)]
        sources: Vec<String>,
        /// Download directory (overrides config)
        #[arg(short = 'o', long = "output")]
        path: Option<PathBuf>,
        /// Add without starting the transfer
        #[arg(long)]
        paused: bool,
    },

    /// Show a source's name and files without downloading
    Inspect {
        /// Magnet link, URL or local file
        source: String,
    },

    /// List a session's files with per-file progress
    Files {
        /// Session id or unique id prefix
        id: String,
    },

    /// List a session's trackers
    Trackers {
        /// Session id or unique id prefix
        id: String,
        /// Announce to this tracker too (http, https, udp, ws or wss)
        #[arg(long, value_name = "URL")]
        add: Option<String>,
    },

    /// Pause sessions
    Pause {
        /// Session ids or unique id prefixes
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Resume paused sessions
    Resume {
        /// Session ids or unique id prefixes
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Remove sessions
    /// Alias: rm
    #[command(alias = "rm")]
    Remove {
        /// Session ids or unique id prefixes
        #[arg(required = true)]
        ids: Vec<String>,
        /// Also delete downloaded files
        #[arg(long)]
        delete_files: bool,
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// List download sessions
    /// Alias: ls
    #[command(alias = "ls")]
    List {
        /// Only show sessions with this status
        #[arg(short, long, value_enum)]
        status: Option<StatusFilter>,
        /// Show sizes, ratio and destination
        #[arg(short, long)]
        long: bool,
    },

    /// Show daemon status
    Status,

    /// Stream session events
    Watch {
        /// Also print throttled totals
        #[arg(short, long)]
        summary: bool,
    },

    /// Remove every session and forget saved state
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get specific config value
    Get { key: String },
    /// Set config value
    Set { key: String, value: String },
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    // The daemon logs at info by default
    let log_level = match (&cli.command, cli.verbose, cli.quiet) {
        (Some(Commands::Serve { .. }), 0, false) => "info",
        _ => log_level,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);

    // Handle no command - show quick status
    let command = match cli.command {
        Some(cmd) => cmd,
        None => {
            show_quick_status(&ipc_address(&config_path, cli.port)).await;
            return Ok(());
        }
    };

    // Create IPC client for management commands
    let mut client = DaemonClient::with_address(ipc_address(&config_path, cli.port));

    let result = match command {
        Commands::Serve {
            foreground,
            pid_file,
            simulate_rate,
        } => {
            let options = DaemonOptions {
                config_path: config_path.clone(),
                pid_path: pid_file.unwrap_or_else(instance::default_pid_path),
                port: cli.port,
                simulate_rate,
            };
            return run_daemon(foreground, options, cli.config.is_some()).await;
        }

        Commands::Stop => {
            print_info("Stopping daemon...");
            match client.shutdown().await {
                Ok(()) => print_success("Daemon stopped"),
                Err(e) if is_not_running(&e) => print_warning("Daemon is not running"),
                Err(e) => print_error(&format!("Failed to stop daemon: {}", e)),
            }
            return Ok(());
        }

        Commands::Add {
            sources,
            path,
            paused,
        } => commands::add_command(&mut client, &sources, path, paused).await,

        Commands::Inspect { source } => commands::inspect_command(&mut client, &source).await,

        Commands::Files { id } => commands::files_command(&mut client, &id).await,

        Commands::Trackers { id, add } => {
            commands::trackers_command(&mut client, &id, add.as_deref()).await
        }

        Commands::Pause { ids } => commands::pause_command(&mut client, &ids).await,

        Commands::Resume { ids } => commands::resume_command(&mut client, &ids).await,

        Commands::Remove {
            ids,
            delete_files,
            force,
        } => commands::remove_command(&mut client, &ids, delete_files, force).await,

        Commands::List { status, long } => {
            commands::list_command(&mut client, status, long).await
        }

        Commands::Status => commands::status_command(&mut client).await,

        Commands::Watch { summary } => commands::watch_command(&mut client, summary).await,

        Commands::Reset { yes } => commands::reset_command(&mut client, yes).await,

        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(&mut client, &config_path).await,
            ConfigAction::Get { key } => {
                commands::config_get(&mut client, &config_path, &key).await
            }
            ConfigAction::Set { key, value } => {
                commands::config_set(&mut client, &config_path, &key, &value).await
            }
            ConfigAction::Path => {
                commands::config_path(&config_path);
                Ok(())
            }
        },
    };

    if let Err(e) = &result {
        if is_not_running(e) {
            print_error("Daemon is not running");
            print_info("Start it with: magnetar serve");
            std::process::exit(1);
        }
    }

    result
}

/// Resolve the daemon address from `--port` or the config file
fn ipc_address(config_path: &std::path::Path, port: Option<u16>) -> String {
    match port {
        Some(port) => format!("127.0.0.1:{}", port),
        None => config::load_config::<AppConfig>(config_path)
            .unwrap_or_default()
            .ipc_address(),
    }
}

// ============================================================================
// Daemon
// ============================================================================

async fn run_daemon(foreground: bool, options: DaemonOptions, explicit_config: bool) -> Result<()> {
    if !foreground {
        if let Some(pid) = instance::running_pid(&options.pid_path) {
            print_warning(&format!("Daemon is already running (PID: {})", pid));
            return Ok(());
        }

        // Daemonize by re-spawning ourselves
        let exe = std::env::current_exe()?;
        let mut cmd = std::process::Command::new(exe);
        cmd.arg("serve")
            .arg("--foreground")
            .arg("--pid-file")
            .arg(&options.pid_path);
        if explicit_config {
            cmd.arg("--config").arg(&options.config_path);
        }
        if let Some(port) = options.port {
            cmd.arg("--port").arg(port.to_string());
        }
        if let Some(rate) = options.simulate_rate {
            cmd.arg("--simulate-rate").arg(rate.to_string());
        }

        let child = cmd
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;

        print_success(&format!("Daemon started (PID: {})", child.id()));
        return Ok(());
    }

    // Foreground mode - run the daemon directly
    tracing::info!("magnetar daemon starting...");

    let cancel = CancellationToken::new();
    daemon::cancel_on_signal(cancel.clone());

    daemon::run(options, cancel).await
}

// ============================================================================
// Management Commands
// ============================================================================

async fn show_quick_status(address: &str) {
    println!();
    println!("  \x1b[1;34mmagnetar\x1b[0m - Durable download sessions");
    println!();

    let mut client = DaemonClient::with_address(address.to_string());

    match client.ping().await {
        Ok(true) => {
            println!("  Daemon: \x1b[32m●\x1b[0m Running ({})", address);

            if let Ok(status) = client.status().await {
                println!("  Sessions: {}", status.session_count);
                println!("  Active: {}", status.active_count);
            }
        }
        _ => {
            println!("  Daemon: \x1b[31m●\x1b[0m Not running");
        }
    }

    println!();
    println!("  Commands:");
    println!("    magnetar serve           Start the daemon");
    println!("    magnetar add <source>    Download a magnet link, URL or file");
    println!("    magnetar list            List download sessions");
    println!("    magnetar watch           Stream session events");
    println!();
}
