//! Session command implementations

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;

use mg_core::types::StartOutcome;

use crate::ipc::DaemonClient;
use crate::output::{
    format_files, format_metadata, print_error, print_info, print_success, print_warning,
};

/// Make a local file source absolute; the daemon may run from another directory
fn normalize_source(source: &str) -> String {
    let path = Path::new(source);
    if path.is_file() {
        if let Ok(absolute) = path.canonicalize() {
            return absolute.display().to_string();
        }
    }
    source.to_string()
}

/// Execute the add command
pub async fn add_command(
    client: &mut DaemonClient,
    sources: &[String],
    path: Option<PathBuf>,
    paused: bool,
) -> Result<()> {
    let path = match path {
        Some(p) if p.is_relative() => Some(std::env::current_dir()?.join(p)),
        other => other,
    };

    client.connect().await?;
    let mut failed = 0;

    for source in sources {
        let source = normalize_source(source);
        match client.start(&source, path.clone(), paused).await {
            Ok(StartOutcome::Started { id }) => {
                let state = if paused { " (paused)" } else { "" };
                print_success(&format!("Started {}{}", id.short(), state));
            }
            Ok(StartOutcome::Duplicate) => {
                print_warning(&format!("Already downloading: {}", source));
            }
            Err(e) => {
                print_error(&format!("Failed to add {}: {}", source, e));
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("Failed to add {} source(s)", failed);
    }

    Ok(())
}

/// Execute the inspect command
pub async fn inspect_command(client: &mut DaemonClient, source: &str) -> Result<()> {
    let source = normalize_source(source);
    print_info("Resolving metadata...");
    let metadata = client.inspect(&source).await?;
    print!("{}", format_metadata(&metadata));
    Ok(())
}

/// Execute the files command
pub async fn files_command(client: &mut DaemonClient, input: &str) -> Result<()> {
    let id = client.resolve_id(input).await?;
    let files = client.files(&id).await?;
    println!("{}", format_files(&files));
    Ok(())
}

/// Execute the trackers command: list, or add one first
pub async fn trackers_command(
    client: &mut DaemonClient,
    input: &str,
    add: Option<&str>,
) -> Result<()> {
    let id = client.resolve_id(input).await?;

    if let Some(url) = add {
        client.add_tracker(&id, url).await?;
        print_success(&format!("Added tracker {} to {}", url.trim(), id.short()));
    }

    let trackers = client.trackers(&id).await?;
    if trackers.is_empty() {
        print_info("No trackers");
    }
    for tracker in trackers {
        println!("{}", tracker);
    }
    Ok(())
}

/// Execute the pause command
pub async fn pause_command(client: &mut DaemonClient, ids: &[String]) -> Result<()> {
    client.connect().await?;
    let mut failed = 0;

    for input in ids {
        let result = match client.resolve_id(input).await {
            Ok(id) => client.pause(&id).await.map(|()| id),
            Err(e) => Err(e),
        };
        match result {
            Ok(id) => print_success(&format!("Paused {}", id.short())),
            Err(e) => {
                print_error(&format!("Failed to pause {}: {}", input, e));
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("Failed to pause {} session(s)", failed);
    }
    Ok(())
}

/// Execute the resume command
pub async fn resume_command(client: &mut DaemonClient, ids: &[String]) -> Result<()> {
    client.connect().await?;
    let mut failed = 0;

    for input in ids {
        let result = match client.resolve_id(input).await {
            Ok(id) => client.resume(&id).await.map(|()| id),
            Err(e) => Err(e),
        };
        match result {
            Ok(id) => print_success(&format!("Resumed {}", id.short())),
            Err(e) => {
                print_error(&format!("Failed to resume {}: {}", input, e));
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("Failed to resume {} session(s)", failed);
    }
    Ok(())
}

/// Execute the remove command
pub async fn remove_command(
    client: &mut DaemonClient,
    ids: &[String],
    delete_files: bool,
    force: bool,
) -> Result<()> {
    client.connect().await?;

    if delete_files && !force {
        print_warning(&format!(
            "About to remove {} session(s) and delete their files. Use --force to skip confirmation.",
            ids.len()
        ));
        if !confirm()? {
            print_warning("Aborted");
            return Ok(());
        }
    }

    let mut errors = Vec::new();

    for input in ids {
        let result = match client.resolve_id(input).await {
            Ok(id) => client.remove(&id, delete_files).await.map(|()| id),
            Err(e) => Err(e),
        };
        match result {
            Ok(id) => print_success(&format!("Removed {}", id.short())),
            Err(e) => {
                print_error(&format!("Failed to remove {}: {}", input, e));
                errors.push(input.clone());
            }
        }
    }

    if !errors.is_empty() {
        anyhow::bail!("Failed to remove {} session(s)", errors.len());
    }

    Ok(())
}

/// Execute the reset command
pub async fn reset_command(client: &mut DaemonClient, yes: bool) -> Result<()> {
    if !yes {
        print_warning("This removes every session and forgets all saved state.");
        if !confirm()? {
            print_warning("Aborted");
            return Ok(());
        }
    }

    client.reset().await?;
    print_success("All sessions removed");
    Ok(())
}

fn confirm() -> Result<bool> {
    print!("Continue? [y/N] ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case("y"))
}
