//! Output formatting utilities for the CLI
//!
//! This module provides functions for formatting daemon data as
//! human-readable terminal output: session tables, status and metadata
//! displays, byte and rate units, and colored status messages.

use tabled::{settings::Style, Table, Tabled};

use mg_core::ipc::{AggregateStats, DaemonStatus, SessionSummary};
use mg_core::types::{ContentMetadata, FileEntry};

/// Format a list of sessions as an ASCII table
///
/// Creates a formatted table with the short id, name, status, progress,
/// transfer rates and peers of each session. The long form adds sizes,
/// ratio and destination.
///
/// # Arguments
/// * `sessions` - Slice of session summaries to display
/// * `long` - If true, includes size, ratio and destination columns
///
/// # Returns
/// A formatted string suitable for terminal output, or "No sessions"
/// if the list is empty.
pub fn format_sessions(sessions: &[SessionSummary], long: bool) -> String {
    if sessions.is_empty() {
        return "No sessions".to_string();
    }

    #[derive(Tabled)]
    struct SessionRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "PROGRESS")]
        progress: String,
        #[tabled(rename = "DOWN")]
        down: String,
        #[tabled(rename = "UP")]
        up: String,
        #[tabled(rename = "PEERS")]
        peers: u32,
        #[tabled(rename = "ETA")]
        eta: String,
    }

    #[derive(Tabled)]
    struct SessionRowLong {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "PROGRESS")]
        progress: String,
        #[tabled(rename = "SIZE")]
        size: String,
        #[tabled(rename = "RATIO")]
        ratio: String,
        #[tabled(rename = "FILES")]
        files: usize,
        #[tabled(rename = "DESTINATION")]
        destination: String,
    }

    if long {
        let rows: Vec<SessionRowLong> = sessions
            .iter()
            .map(|s| SessionRowLong {
                id: s.id.short().to_string(),
                name: truncate(&s.name, 32),
                status: s.status.to_string(),
                progress: format_progress(s.progress),
                size: if s.is_metadata_loaded {
                    format!(
                        "{} / {}",
                        format_bytes(s.downloaded),
                        format_bytes(s.total_size)
                    )
                } else {
                    "-".to_string()
                },
                ratio: format!("{:.2}", s.ratio),
                files: s.num_files,
                destination: s.destination.display().to_string(),
            })
            .collect();

        return Table::new(rows).with(Style::rounded()).to_string();
    }

    let rows: Vec<SessionRow> = sessions
        .iter()
        .map(|s| SessionRow {
            id: s.id.short().to_string(),
            name: truncate(&s.name, 40),
            status: s.status.to_string(),
            progress: format_progress(s.progress),
            down: format_speed(s.download_speed),
            up: format_speed(s.upload_speed),
            peers: s.num_peers,
            eta: s
                .time_remaining_ms
                .map(|ms| format_duration(ms / 1000))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// One-line engine-wide totals shown under the session table
pub fn format_stats(stats: &AggregateStats) -> String {
    format!(
        "{} sessions ({} active, {} completed)  ↓ {}  ↑ {}",
        stats.session_count,
        stats.active_count,
        stats.completed_count,
        format_speed(stats.download_speed),
        format_speed(stats.upload_speed)
    )
}

/// Format daemon status as a human-readable string
///
/// Displays the daemon's running state, version, uptime, session counts and
/// ingestion sources.
pub fn format_status(status: &DaemonStatus) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "Daemon Status: {}\n",
        if status.running { "Running" } else { "Stopped" }
    ));
    output.push_str(&format!("Version: {}\n", status.version));
    output.push_str(&format!("Uptime: {}\n", format_duration(status.uptime_secs)));
    output.push_str(&format!("Address: {}\n", status.ipc_address));
    output.push_str(&format!("State Directory: {}\n", status.state_dir.display()));
    output.push_str(&format!("Sessions: {}\n", status.session_count));
    output.push_str(&format!("Active Sessions: {}\n", status.active_count));
    output.push_str(&format!(
        "Watched Folder: {}\n",
        status
            .watching
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string())
    ));
    output.push_str(&format!("Feeds: {}\n", status.feed_count));

    output
}

/// Format inspected metadata: name, id, total size and the file list
pub fn format_metadata(metadata: &ContentMetadata) -> String {
    #[derive(Tabled)]
    struct FileRow {
        #[tabled(rename = "#")]
        index: usize,
        #[tabled(rename = "FILE")]
        name: String,
        #[tabled(rename = "SIZE")]
        size: String,
    }

    let mut output = String::new();
    output.push_str(&format!("Name: {}\n", metadata.name));
    output.push_str(&format!("ID: {}\n", metadata.id));
    output.push_str(&format!("Size: {}\n", format_bytes(metadata.total_size)));
    output.push_str(&format!("Files: {}\n", metadata.files.len()));

    if !metadata.files.is_empty() {
        let rows: Vec<FileRow> = metadata
            .files
            .iter()
            .map(|f| FileRow {
                index: f.index,
                name: truncate(&f.name, 60),
                size: format_bytes(f.size),
            })
            .collect();
        output.push('\n');
        output.push_str(&Table::new(rows).with(Style::rounded()).to_string());
        output.push('\n');
    }

    output
}

/// Format a session's files with per-file progress
pub fn format_files(files: &[FileEntry]) -> String {
    if files.is_empty() {
        return "No files yet (metadata not resolved)".to_string();
    }

    #[derive(Tabled)]
    struct FileRow {
        #[tabled(rename = "#")]
        index: usize,
        #[tabled(rename = "FILE")]
        name: String,
        #[tabled(rename = "SIZE")]
        size: String,
        #[tabled(rename = "PROGRESS")]
        progress: String,
    }

    let rows: Vec<FileRow> = files
        .iter()
        .map(|f| FileRow {
            index: f.index,
            name: truncate(&f.name, 60),
            size: format_bytes(f.size),
            progress: format_progress(f.progress),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format a byte count with binary units
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Format a transfer rate in bytes per second
pub fn format_speed(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

fn format_progress(progress: f64) -> String {
    format!("{:.1}%", (progress * 100.0).clamp(0.0, 100.0))
}

/// Format duration in human-readable form
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let remaining_secs = secs % 60;
        format!("{}m {}s", mins, remaining_secs)
    } else if secs < 86400 {
        let hours = secs / 3600;
        let remaining_mins = (secs % 3600) / 60;
        format!("{}h {}m", hours, remaining_mins)
    } else {
        let days = secs / 86400;
        let remaining_hours = (secs % 86400) / 3600;
        format!("{}d {}h", days, remaining_hours)
    }
}

/// Truncate a string with ellipsis if too long
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
///
/// Outputs to stdout with green coloring for positive feedback to the user.
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr with red coloring for error feedback to the user.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow with a warning symbol prefix
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan with an info symbol prefix
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
