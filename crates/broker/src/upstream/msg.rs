// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON wire shapes of the upstream WebSocket protocol.
//!
//! Outgoing messages are internally tagged (`{"type":"auth",...}`).
//! Incoming frames are parsed in two passes, a cheap tag probe and
//! then the concrete struct for that type, so `RawValue` payloads
//! keep the server's exact JSON text for relaying.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Messages sent to the upstream bus.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outgoing<'a> {
    Auth { access_token: &'a str },
    SubscribeEvents { id: u64, event_type: &'a str },
    CallService { id: u64, domain: &'a str, service: &'a str, service_data: &'a RawValue },
    GetStates { id: u64 },
}

/// Tag probe: just the `type` field of an incoming frame.
#[derive(Debug, Deserialize)]
struct Tag<'a> {
    #[serde(rename = "type")]
    kind: Option<&'a str>,
}

/// `{"type":"result",...}` body.
#[derive(Debug, Deserialize)]
pub struct ResultMsg {
    pub id: u64,
    /// A result without a `success` field counts as failed.
    #[serde(default)]
    pub success: bool,
    pub result: Option<Box<RawValue>>,
}

/// `{"type":"event",...}` body. Fields the broker does not route on
/// are left to serde's ignore-unknown default.
#[derive(Debug, Deserialize)]
pub struct EventMsg {
    pub id: Option<u64>,
    pub event: Option<EventEnvelope>,
}

#[derive(Debug, Deserialize)]
pub struct EventEnvelope {
    pub data: Option<EventData>,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub entity_id: Option<String>,
    pub new_state: Option<Box<RawValue>>,
}

#[derive(Debug, Deserialize)]
struct AuthInvalidMsg {
    message: Option<String>,
}

/// One classified incoming frame.
#[derive(Debug)]
pub enum Incoming {
    AuthRequired,
    AuthOk,
    AuthInvalid(Option<String>),
    Result(ResultMsg),
    Event(EventMsg),
    /// Well-formed JSON with a missing or unhandled `type`.
    Other,
}

/// Parse one incoming text frame.
///
/// `Err` only for malformed JSON; unknown message types classify as
/// [`Incoming::Other`] so callers can drop them without tearing the
/// session down.
pub fn parse_incoming(text: &str) -> serde_json::Result<Incoming> {
    let tag: Tag<'_> = serde_json::from_str(text)?;
    Ok(match tag.kind {
        Some("auth_required") => Incoming::AuthRequired,
        Some("auth_ok") => Incoming::AuthOk,
        Some("auth_invalid") => {
            let body: AuthInvalidMsg = serde_json::from_str(text)?;
            Incoming::AuthInvalid(body.message)
        }
        Some("result") => Incoming::Result(serde_json::from_str(text)?),
        Some("event") => Incoming::Event(serde_json::from_str(text)?),
        _ => Incoming::Other,
    })
}

#[cfg(test)]
#[path = "msg_tests.rs"]
mod tests;
