//! Watch command implementation
//!
//! Streams session events and summary refreshes until the daemon hangs up or
//! the user presses Ctrl+C.

use anyhow::Result;

use crate::ipc::{DaemonClient, IpcEvent, SessionEvent};
use crate::output::{format_stats, print_error, print_info, print_success, print_warning};

/// Execute the watch command
pub async fn watch_command(client: &mut DaemonClient, show_summary: bool) -> Result<()> {
    client.watch().await?;
    print_info("Watching for session events (Ctrl+C to stop)");

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = client.next_event() => event?,
        };

        match event {
            Some(IpcEvent::Session(event)) => print_event(&event),
            Some(IpcEvent::Summary(summary)) => {
                if show_summary {
                    println!("{}", format_stats(&summary.stats));
                }
            }
            None => {
                print_warning("Daemon closed the connection");
                break;
            }
        }
    }

    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Added { id } => print_info(&format!("Added {}", id.short())),
        SessionEvent::Removed { id } => print_info(&format!("Removed {}", id.short())),
        SessionEvent::Paused { id } => print_info(&format!("Paused {}", id.short())),
        SessionEvent::Resumed { id } => print_info(&format!("Resumed {}", id.short())),
        SessionEvent::MetadataResolved { id } => {
            print_info(&format!("Metadata resolved for {}", id.short()))
        }
        SessionEvent::Completed { id } => print_success(&format!("Completed {}", id.short())),
        SessionEvent::Error { id, message } => match id {
            Some(id) => print_error(&format!("{}: {}", id.short(), message)),
            None => print_error(message),
        },
        SessionEvent::Restored { restored, failed } => print_info(&format!(
            "Restored {} session(s), {} failed",
            restored, failed
        )),
    }
}
