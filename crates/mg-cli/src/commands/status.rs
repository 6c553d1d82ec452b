//! Status command implementation

use anyhow::Result;

use crate::ipc::DaemonClient;
use crate::output::format_status;

/// Execute the status command
pub async fn status_command(client: &mut DaemonClient) -> Result<()> {
    let status = client.status().await?;
    print!("{}", format_status(&status));
    Ok(())
}
