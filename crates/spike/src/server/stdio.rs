//! stdio transport: one long-lived MCP server on the process's stdin/stdout.
//! stdout carries JSON-RPC frames only; diagnostics go to stderr.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tracing::{debug, info};

use super::SharedFleet;

pub async fn serve_stdio(fleet: SharedFleet) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = tokio::io::BufReader::new(stdin).lines();

    info!("serving MCP on stdio");
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            () = super::shutdown_signal() => {
                info!("shutting down");
                break;
            }
        };
        let Some(line) = line else {
            debug!("stdin closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            debug!("skipping invalid JSON line");
            continue;
        };
        let Some(response) = super::handle_message(&fleet, &message).await else {
            continue;
        };

        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    fleet.lock().await.close_all().await;
    Ok(())
}
