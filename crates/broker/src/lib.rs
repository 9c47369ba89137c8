// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! goofydeck-ha: local broker daemon bridging one Home Assistant
//! WebSocket session to line-oriented clients on a filesystem socket.
//!
//! Two long-lived tasks do the work: the router owns all client-facing
//! state, the supervisor owns the upstream connection. They exchange
//! [`events::UpstreamRequest`] / [`events::UpstreamEvent`] over
//! channels; each local connection gets a thin framing task of its own.

pub mod broker;
pub mod config;
pub mod error;
pub mod events;
pub mod upstream;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;

/// Run the daemon until SIGINT/SIGTERM.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    spawn_signal_watcher(shutdown.clone());
    run_with_shutdown(config, shutdown).await
}

/// Run the daemon with an externally supplied shutdown token.
pub async fn run_with_shutdown(config: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = broker::bind(&config.socket)?;
    info!(socket = %config.socket.display(), "goofydeck-ha listening");

    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (op_tx, op_rx) = mpsc::unbounded_channel();

    let supervisor = tokio::spawn(upstream::supervisor::run(
        config.reconnect_delay(),
        request_rx,
        event_tx,
        shutdown.clone(),
    ));
    let router = tokio::spawn(broker::router::run(request_tx, op_rx, event_rx, shutdown.clone()));

    broker::accept_loop(listener, op_tx, shutdown).await;

    let _ = tokio::join!(supervisor, router);
    let _ = std::fs::remove_file(&config.socket);
    info!("shutdown complete");
    Ok(())
}

/// First SIGINT/SIGTERM cancels; a second one force-exits.
fn spawn_signal_watcher(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = recv_or_pending(&mut sigterm) => info!("received SIGTERM"),
            _ = recv_or_pending(&mut sigint) => info!("received SIGINT"),
        }
        shutdown.cancel();

        tokio::select! {
            _ = recv_or_pending(&mut sigterm) => info!("received SIGTERM again, forcing exit"),
            _ = recv_or_pending(&mut sigint) => info!("received SIGINT again, forcing exit"),
        }
        std::process::exit(130);
    });
}

async fn recv_or_pending(signal: &mut Option<tokio::signal::unix::Signal>) {
    match signal {
        Some(signal) => {
            signal.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}
