//! Drives the named-pipe automation transport end-to-end over its real
//! Unix domain socket: connect, send a newline-framed JSON envelope, read
//! the response. Grounded on the teacher's own mock-tool integration test
//! shape (spin up the real component, talk to it like a client would).

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use clop_core::automation::{self, AutomationContext};
use clop_core::coordinator::Coordinator;
use clop_core::optimiser::OptimiserRegistry;
use clop_core::settings::SettingsStore;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn ping_and_status_round_trip_over_the_socket() {
    let settings = SettingsStore::in_memory();
    let registry = Arc::new(OptimiserRegistry::new());
    let coordinator = Coordinator::start(settings.clone(), registry, 1);
    let ctx = AutomationContext::new(coordinator, settings);

    let cancellation = CancellationToken::new();
    let server_cancellation = cancellation.clone();
    let server = tokio::spawn(async move {
        let _ = automation::pipe::serve(ctx, server_cancellation).await;
    });

    // The listener binds asynchronously; give it a moment to come up.
    let socket_path = std::env::temp_dir().join("clop-automation.sock");
    let mut stream = connect_with_retry(&socket_path).await;

    stream
        .write_all(b"{\"intent\":\"ping\",\"keepAlive\":true}\n")
        .await
        .unwrap();
    let mut reader = BufReader::new(&mut stream);
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    let response: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(response["status"], "ok");
    assert_eq!(response["data"]["pong"], true);

    stream
        .write_all(b"{\"intent\":\"shortcuts.list\"}\n")
        .await
        .unwrap();
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    let response: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    assert!(response["data"]["shortcuts"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v == "optimise"));

    cancellation.cancel();
    let _ = server.await;
}

async fn connect_with_retry(path: &std::path::Path) -> UnixStream {
    for _ in 0..50 {
        if let Ok(stream) = UnixStream::connect(path).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("automation pipe never came up at {path:?}");
}
