// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local broker: filesystem-socket service for line-oriented clients.

pub mod client;
pub mod command;
pub mod router;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broker::router::Op;

/// Bind the listen socket, replacing any stale file at the path.
pub fn bind(path: &Path) -> anyhow::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("removing stale socket {}", path.display()))?;
    }
    UnixListener::bind(path).with_context(|| format!("binding {}", path.display()))
}

/// Accept clients until shutdown, spawning one connection task each.
pub async fn accept_loop(
    listener: UnixListener,
    ops: mpsc::UnboundedSender<Op>,
    cancel: CancellationToken,
) {
    static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(client::serve(stream, id, ops.clone(), cancel.clone()));
                }
                Err(e) => {
                    tracing::warn!(err = %e, "accept failed");
                }
            },
        }
    }
}
