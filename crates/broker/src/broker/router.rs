// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request correlation and event fan-out for local clients.
//!
//! The router is the single owner of all client-facing state: the
//! client table, per-client subscription lists, and the
//! pending-request table. It runs as one task, so none of that state
//! needs locking; client connection tasks and the upstream session
//! talk to it over channels.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broker::command::{self, Command};
use crate::error::ErrorKind;
use crate::events::{UpstreamEvent, UpstreamRequest};

/// Identifies a connected local client.
pub type ClientId = u64;

/// First correlation id handed to client requests; everything below
/// is reserved (the state subscription uses 1). Ids are never reused
/// within a process.
const FIRST_CORRELATION_ID: u64 = 100;

/// Upper bound on outstanding correlated requests.
const MAX_PENDING: usize = 1024;

/// Upper bound on subscriptions held by one client.
const MAX_SUBSCRIPTIONS: usize = 256;

/// Operations sent by client connection tasks.
#[derive(Debug)]
pub enum Op {
    Connect { id: ClientId, tx: mpsc::UnboundedSender<String> },
    Line { id: ClientId, line: String },
    Disconnect { id: ClientId },
}

struct ClientEntry {
    tx: mpsc::UnboundedSender<String>,
    subs: Vec<Subscription>,
    next_sub_id: u64,
}

/// One client subscription, serialized verbatim into `subs` listings.
#[derive(Debug, Serialize)]
struct Subscription {
    id: u64,
    entity_id: String,
}

/// A request awaiting its upstream result.
#[derive(Debug)]
enum Pending {
    Call { client: ClientId },
    Get { client: ClientId, entity_id: String },
}

impl Pending {
    fn client(&self) -> ClientId {
        match self {
            Self::Call { client } | Self::Get { client, .. } => *client,
        }
    }
}

/// Drive the router until shutdown or both input channels close.
pub async fn run(
    requests: mpsc::UnboundedSender<UpstreamRequest>,
    mut ops: mpsc::UnboundedReceiver<Op>,
    mut upstream: mpsc::UnboundedReceiver<UpstreamEvent>,
    cancel: CancellationToken,
) {
    let mut router = Router::new(requests);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            op = ops.recv() => match op {
                Some(op) => router.handle_op(op),
                None => break,
            },
            event = upstream.recv() => match event {
                Some(event) => router.handle_upstream(event),
                None => break,
            },
        }
    }
}

/// Core broker state. Everything here is single-task; the methods are
/// synchronous because replies go out through unbounded senders.
struct Router {
    clients: HashMap<ClientId, ClientEntry>,
    pending: HashMap<u64, Pending>,
    next_correlation_id: u64,
    connected: bool,
    requests: mpsc::UnboundedSender<UpstreamRequest>,
}

impl Router {
    fn new(requests: mpsc::UnboundedSender<UpstreamRequest>) -> Self {
        Self {
            clients: HashMap::new(),
            pending: HashMap::new(),
            next_correlation_id: FIRST_CORRELATION_ID,
            connected: false,
            requests,
        }
    }

    fn handle_op(&mut self, op: Op) {
        match op {
            Op::Connect { id, tx } => {
                // Late joiners learn the upstream state right away.
                let greeting = if self.connected { "evt connected" } else { "evt disconnected" };
                let _ = tx.send(greeting.to_owned());
                self.clients.insert(id, ClientEntry { tx, subs: Vec::new(), next_sub_id: 1 });
            }
            Op::Line { id, line } => self.handle_line(id, &line),
            Op::Disconnect { id } => {
                self.clients.remove(&id);
                // Outstanding requests from this client get no reply.
                self.pending.retain(|_, pending| pending.client() != id);
            }
        }
    }

    fn handle_line(&mut self, id: ClientId, line: &str) {
        let command = match command::parse(line) {
            Ok(Some(command)) => command,
            Ok(None) => return,
            Err(kind) => {
                self.reply_err(id, kind);
                return;
            }
        };
        match command {
            Command::Ping => self.reply(id, "ok".to_owned()),
            Command::Info => {
                let ws = if self.connected { "connected" } else { "disconnected" };
                self.reply(id, format!("ok {{\"ws\":\"{ws}\"}}"));
            }
            Command::Subs => self.handle_subs(id),
            Command::Subscribe { entity_id } => self.handle_subscribe(id, entity_id),
            Command::Unsubscribe { sub_id } => self.handle_unsubscribe(id, sub_id),
            Command::Get { entity_id } => self.handle_get(id, entity_id),
            Command::Call { domain, service, data } => self.handle_call(id, domain, service, data),
        }
    }

    fn handle_subs(&mut self, id: ClientId) {
        let Some(entry) = self.clients.get(&id) else { return };
        let listing = serde_json::to_string(&entry.subs).unwrap_or_else(|_| "[]".to_owned());
        self.reply(id, format!("ok {listing}"));
    }

    fn handle_subscribe(&mut self, id: ClientId, entity_id: String) {
        let Some(entry) = self.clients.get_mut(&id) else { return };
        if entry.subs.len() >= MAX_SUBSCRIPTIONS {
            self.reply_err(id, ErrorKind::TooMany);
            return;
        }
        let sub_id = entry.next_sub_id;
        entry.next_sub_id += 1;
        entry.subs.push(Subscription { id: sub_id, entity_id });
        self.reply(id, format!("ok sub_id={sub_id}"));
    }

    fn handle_unsubscribe(&mut self, id: ClientId, sub_id: u64) {
        let Some(entry) = self.clients.get_mut(&id) else { return };
        let before = entry.subs.len();
        entry.subs.retain(|sub| sub.id != sub_id);
        if entry.subs.len() == before {
            self.reply_err(id, ErrorKind::NotFound);
        } else {
            self.reply(id, "ok".to_owned());
        }
    }

    fn handle_get(&mut self, id: ClientId, entity_id: String) {
        match self.allocate_correlation_id() {
            Ok(corr) => {
                self.pending.insert(corr, Pending::Get { client: id, entity_id });
                self.push_request(id, corr, UpstreamRequest::GetStates { id: corr });
            }
            Err(kind) => self.reply_err(id, kind),
        }
    }

    fn handle_call(&mut self, id: ClientId, domain: String, service: String, data: Box<RawValue>) {
        match self.allocate_correlation_id() {
            Ok(corr) => {
                self.pending.insert(corr, Pending::Call { client: id });
                self.push_request(
                    id,
                    corr,
                    UpstreamRequest::CallService { id: corr, domain, service, data },
                );
            }
            Err(kind) => self.reply_err(id, kind),
        }
    }

    /// Gate for correlated requests: upstream must be connected and a
    /// pending slot free.
    fn allocate_correlation_id(&mut self) -> Result<u64, ErrorKind> {
        if !self.connected {
            return Err(ErrorKind::HaDisconnected);
        }
        if self.pending.len() >= MAX_PENDING {
            return Err(ErrorKind::Busy);
        }
        let corr = self.next_correlation_id;
        self.next_correlation_id += 1;
        Ok(corr)
    }

    fn push_request(&mut self, id: ClientId, corr: u64, request: UpstreamRequest) {
        if self.requests.send(request).is_err() {
            // Session side is gone; fail like a disconnect.
            self.pending.remove(&corr);
            self.reply_err(id, ErrorKind::HaDisconnected);
        }
    }

    fn handle_upstream(&mut self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::Connected => self.set_connected(true),
            UpstreamEvent::Disconnected => self.set_connected(false),
            UpstreamEvent::Result { id, success, payload } => {
                self.handle_result(id, success, payload);
            }
            UpstreamEvent::State { entity_id, new_state } => self.fan_out(&entity_id, &new_state),
        }
    }

    /// Transition broadcasts are idempotent: duplicate notifications
    /// do not re-announce.
    fn set_connected(&mut self, connected: bool) {
        if self.connected == connected {
            return;
        }
        self.connected = connected;
        let line = if connected { "evt connected" } else { "evt disconnected" };
        tracing::info!(clients = self.clients.len(), "{line}");
        for entry in self.clients.values() {
            let _ = entry.tx.send(line.to_owned());
        }
    }

    fn handle_result(&mut self, id: u64, success: bool, payload: Option<String>) {
        let Some(pending) = self.pending.remove(&id) else {
            tracing::debug!(id, "dropping result with no pending request");
            return;
        };
        let client = pending.client();
        if !self.clients.contains_key(&client) {
            return;
        }
        if !self.connected {
            self.reply_err(client, ErrorKind::HaDisconnected);
            return;
        }
        if !success {
            self.reply_err(client, ErrorKind::HaError);
            return;
        }
        match pending {
            Pending::Call { .. } => self.reply(client, "ok".to_owned()),
            Pending::Get { entity_id, .. } => {
                let line = match payload {
                    Some(states) => get_reply(&states, &entity_id),
                    None => Err(ErrorKind::HaError),
                };
                match line {
                    Ok(line) => self.reply(client, line),
                    Err(kind) => self.reply_err(client, kind),
                }
            }
        }
    }

    fn fan_out(&mut self, entity_id: &str, new_state: &str) {
        for entry in self.clients.values() {
            for sub in &entry.subs {
                if sub.entity_id == entity_id {
                    let _ = entry.tx.send(format!("evt state {entity_id} {new_state}"));
                }
            }
        }
    }

    fn reply(&self, id: ClientId, line: String) {
        if let Some(entry) = self.clients.get(&id) {
            let _ = entry.tx.send(line);
        }
    }

    fn reply_err(&self, id: ClientId, kind: ErrorKind) {
        self.reply(id, format!("err {kind}"));
    }
}

/// Locate `entity_id` in a `get_states` array and build the reply
/// line from the matching element's exact JSON text.
fn get_reply(states: &str, entity_id: &str) -> Result<String, ErrorKind> {
    let entries: Vec<&RawValue> = serde_json::from_str(states).map_err(|_| ErrorKind::BadJson)?;
    for raw in entries {
        let Ok(probe) = serde_json::from_str::<StateProbe<'_>>(raw.get()) else { continue };
        if probe.entity_id == Some(entity_id) {
            let body = raw.get();
            // State dumps can run to megabytes; report allocation
            // failure to the caller instead of aborting.
            let mut line = String::new();
            line.try_reserve(body.len() + 3).map_err(|_| ErrorKind::Oom)?;
            line.push_str("ok ");
            line.push_str(body);
            return Ok(line);
        }
    }
    Err(ErrorKind::NotFound)
}

#[derive(Deserialize)]
struct StateProbe<'a> {
    entity_id: Option<&'a str>,
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
