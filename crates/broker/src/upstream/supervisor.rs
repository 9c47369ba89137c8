// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnect supervision for the upstream session.
//!
//! The endpoint URL and bearer credential come from the process
//! environment and are re-read before every attempt, so the daemon
//! can start before the upstream is configured and pick the settings
//! up later.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::events::{UpstreamEvent, UpstreamRequest};
use crate::upstream::connect::Endpoint;
use crate::upstream::session;

/// Environment variable naming the upstream endpoint URL.
pub const URL_VAR: &str = "GOOFYDECK_HA_URL";
/// Environment variable holding the bearer credential.
pub const TOKEN_VAR: &str = "GOOFYDECK_HA_TOKEN";

/// Run sessions until shutdown, sleeping `delay` between attempts.
///
/// Every failed or ended attempt emits `Disconnected`; the broker side
/// deduplicates, so repeated failures cost nothing downstream.
pub async fn run(
    delay: Duration,
    mut requests: mpsc::UnboundedReceiver<UpstreamRequest>,
    events: mpsc::UnboundedSender<UpstreamEvent>,
    cancel: CancellationToken,
) {
    while !cancel.is_cancelled() {
        match settings_from_env() {
            None => {
                tracing::debug!("upstream url or token not configured");
                let _ = events.send(UpstreamEvent::Disconnected);
            }
            Some((url, token)) => match Endpoint::parse(&url) {
                Err(e) => {
                    tracing::warn!(err = %e, "bad upstream url");
                    let _ = events.send(UpstreamEvent::Disconnected);
                }
                Ok(endpoint) => {
                    match session::run(&endpoint, &token, &mut requests, &events, &cancel).await {
                        Ok(()) => {}
                        Err(e) => tracing::warn!(err = %e, "upstream session ended"),
                    }
                    let _ = events.send(UpstreamEvent::Disconnected);
                }
            },
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Read `(url, token)` from the environment; empty counts as unset.
fn settings_from_env() -> Option<(String, String)> {
    let url = std::env::var(URL_VAR).ok().filter(|v| !v.is_empty())?;
    let token = std::env::var(TOKEN_VAR).ok().filter(|v| !v.is_empty())?;
    Some((url, token))
}
