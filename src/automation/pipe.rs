//! Named message pipe transport (`clop-automation`). POSIX platforms back
//! it with a Unix domain socket via `tokio::net::UnixListener`, the closest
//! portable analogue to the `Win32` named pipe `clop-automation` the spec
//! names; each connection is newline-framed UTF-8 JSON, same envelope as
//! the HTTP transport. Grounded on `coordinator::Coordinator::start`'s
//! accept-loop-spawns-per-connection-task shape.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{handle_intent, AutomationContext, RequestEnvelope, ResponseEnvelope};

const PIPE_NAME: &str = "clop-automation";
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);

#[cfg(unix)]
pub async fn serve(ctx: Arc<AutomationContext>, cancellation: CancellationToken) -> std::io::Result<()> {
    use tokio::net::UnixListener;

    let socket_path = std::env::temp_dir().join(format!("{PIPE_NAME}.sock"));
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)?;
    info!(path = %socket_path.display(), "automation pipe listening");

    loop {
        tokio::select! {
            _ = cancellation.cancelled() => {
                let _ = std::fs::remove_file(&socket_path);
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, _addr) = accepted?;
                let ctx = ctx.clone();
                let cancellation = cancellation.clone();
                tokio::spawn(async move {
                    handle_connection(stream, ctx, cancellation).await;
                });
            }
        }
    }
}

#[cfg(not(unix))]
pub async fn serve(_ctx: Arc<AutomationContext>, cancellation: CancellationToken) -> std::io::Result<()> {
    warn!("named-pipe automation transport is not implemented on this platform; loopback HTTP remains available");
    cancellation.cancelled().await;
    Ok(())
}

#[cfg(unix)]
async fn handle_connection(stream: tokio::net::UnixStream, ctx: Arc<AutomationContext>, cancellation: CancellationToken) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = tokio::select! {
            _ = cancellation.cancelled() => return,
            line = tokio::time::timeout(INACTIVITY_TIMEOUT, lines.next_line()) => line,
        };

        let line = match line {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => return,
            Ok(Err(e)) => {
                warn!(error = %e, "automation pipe read error");
                return;
            }
            Err(_) => {
                debug!("automation pipe connection idle for 30s, closing");
                return;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RequestEnvelope>(&line) {
            Ok(envelope) => {
                let keep_alive = envelope.keep_alive;
                let response = handle_intent(&ctx, envelope).await;
                if !keep_alive {
                    if let Err(e) = write_response(&mut write_half, &response).await {
                        warn!(error = %e, "failed to write automation pipe response");
                    }
                    return;
                }
                response
            }
            Err(e) => ResponseEnvelope {
                status: "failed".to_string(),
                message: Some(format!("malformed envelope: {e}")),
                data: None,
            },
        };

        if let Err(e) = write_response(&mut write_half, &response).await {
            warn!(error = %e, "failed to write automation pipe response");
            return;
        }
    }
}

#[cfg(unix)]
async fn write_response(
    write_half: &mut tokio::net::unix::OwnedWriteHalf,
    response: &ResponseEnvelope,
) -> std::io::Result<()> {
    let mut serialised = serde_json::to_string(response).unwrap_or_else(|_| "{\"status\":\"failed\"}".to_string());
    serialised.push('\n');
    write_half.write_all(serialised.as_bytes()).await
}
