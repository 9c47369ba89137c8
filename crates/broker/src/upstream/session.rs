// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One upstream session: auth handshake, event subscription, and the
//! steady-state request/response loop.

use std::time::Duration;

use anyhow::{bail, Context};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::events::{UpstreamEvent, UpstreamRequest};
use crate::upstream::connect::{self, Endpoint, WsStream};
use crate::upstream::msg::{self, Incoming, Outgoing};

/// Correlation id reserved for the state_changed subscription.
pub const SUBSCRIPTION_ID: u64 = 1;

/// Deadline for the TCP/TLS/upgrade/auth sequence.
const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(10);

/// Connect and run one session until it fails, the broker goes away,
/// or shutdown is requested.
///
/// Emits `Connected` once the subscription is in place. The caller
/// owns the `Disconnected` emission so connect failures and
/// mid-session drops surface the same way.
pub async fn run(
    endpoint: &Endpoint,
    token: &str,
    requests: &mut mpsc::UnboundedReceiver<UpstreamRequest>,
    events: &mpsc::UnboundedSender<UpstreamEvent>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let handshake = tokio::time::timeout(HANDSHAKE_DEADLINE, async {
        let mut ws = connect::dial(endpoint).await?;
        authenticate(&mut ws, token).await?;
        anyhow::Ok(ws)
    });
    // Shutdown must not wait out a slow or silent upstream mid-handshake.
    let mut ws = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        result = handshake => result.context("handshake deadline expired")??,
    };

    tracing::info!(host = %endpoint.host, port = endpoint.port, "upstream session ready");
    let _ = events.send(UpstreamEvent::Connected);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws.close(None).await;
                return Ok(());
            }

            request = requests.recv() => {
                // A closed request queue means the broker is shutting down.
                let Some(request) = request else { return Ok(()) };
                let id = request.id();
                if let Err(e) = send_request(&mut ws, &request).await {
                    // The reply will never arrive; fail the in-flight
                    // request before surfacing the disconnect.
                    let _ = events.send(UpstreamEvent::Result { id, success: false, payload: None });
                    return Err(e);
                }
            }

            frame = ws.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = classify_frame(text.as_str()) {
                            let _ = events.send(event);
                        }
                    }
                    // tungstenite answers pings itself; binary frames
                    // are not part of the protocol.
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | None => bail!("upstream closed the connection"),
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }
}

/// Drive `auth_required` → `auth` → `auth_ok`, then subscribe to
/// state_changed events under the reserved id.
async fn authenticate(ws: &mut WsStream, token: &str) -> anyhow::Result<()> {
    match next_message(ws).await? {
        Incoming::AuthRequired => {}
        other => bail!("expected auth_required, got {other:?}"),
    }

    send(ws, &Outgoing::Auth { access_token: token }).await?;

    match next_message(ws).await? {
        Incoming::AuthOk => {}
        Incoming::AuthInvalid(message) => {
            bail!("upstream rejected credentials: {}", message.as_deref().unwrap_or("no reason given"))
        }
        other => bail!("expected auth_ok, got {other:?}"),
    }

    send(ws, &Outgoing::SubscribeEvents { id: SUBSCRIPTION_ID, event_type: "state_changed" }).await
}

/// Read frames until a JSON text message arrives.
async fn next_message(ws: &mut WsStream) -> anyhow::Result<Incoming> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(msg::parse_incoming(text.as_str())?),
            Some(Ok(Message::Close(_))) | None => bail!("upstream closed during handshake"),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

/// Serialize and send one protocol message.
async fn send(ws: &mut WsStream, msg: &Outgoing<'_>) -> anyhow::Result<()> {
    let text = serde_json::to_string(msg)?;
    ws.send(Message::Text(text.into())).await?;
    Ok(())
}

async fn send_request(ws: &mut WsStream, request: &UpstreamRequest) -> anyhow::Result<()> {
    let msg = match request {
        UpstreamRequest::CallService { id, domain, service, data } => Outgoing::CallService {
            id: *id,
            domain: domain.as_str(),
            service: service.as_str(),
            service_data: data.as_ref(),
        },
        UpstreamRequest::GetStates { id } => Outgoing::GetStates { id: *id },
    };
    send(ws, &msg).await
}

/// Classify one steady-state text frame into an [`UpstreamEvent`].
///
/// Malformed JSON is logged and dropped; the stream keeps running.
fn classify_frame(text: &str) -> Option<UpstreamEvent> {
    let incoming = match msg::parse_incoming(text) {
        Ok(incoming) => incoming,
        Err(e) => {
            tracing::warn!(err = %e, "dropping malformed upstream frame");
            return None;
        }
    };
    match incoming {
        Incoming::Result(result) => Some(UpstreamEvent::Result {
            id: result.id,
            success: result.success,
            payload: result.result.map(|raw| raw.get().to_owned()),
        }),
        Incoming::Event(event) => {
            if event.id != Some(SUBSCRIPTION_ID) {
                return None;
            }
            let data = event.event?.data?;
            let entity_id = data.entity_id?;
            let new_state = data.new_state?;
            Some(UpstreamEvent::State { entity_id, new_state: new_state.get().to_owned() })
        }
        _ => None,
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
