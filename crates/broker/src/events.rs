// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-task message types bridging the broker reactor and the
//! upstream session.
//!
//! Both directions carry owned data. JSON payloads travel as the
//! exact text received or validated, so they can be relayed
//! byte-for-byte.

use serde_json::value::RawValue;

/// Requests flowing broker → upstream session.
#[derive(Debug)]
pub enum UpstreamRequest {
    /// Invoke a service on the upstream bus.
    CallService { id: u64, domain: String, service: String, data: Box<RawValue> },
    /// Fetch the full entity state dump.
    GetStates { id: u64 },
}

impl UpstreamRequest {
    /// Correlation id carried by this request.
    pub fn id(&self) -> u64 {
        match self {
            Self::CallService { id, .. } | Self::GetStates { id } => *id,
        }
    }
}

/// Notifications flowing upstream session → broker.
#[derive(Debug)]
pub enum UpstreamEvent {
    /// The session reached steady state (authenticated + subscribed).
    Connected,
    /// The session ended or an attempt failed.
    Disconnected,
    /// Response to a correlated request. `payload` is the JSON text
    /// under the upstream `result` key, when present.
    Result { id: u64, success: bool, payload: Option<String> },
    /// A state_changed push, with the verbatim new_state JSON.
    State { entity_id: String, new_state: String },
}
