// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests: real Unix socket clients against the full daemon,
//! with a scripted fake Home Assistant on the upstream side.

use std::path::Path;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serial_test::serial;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UnixStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use goofydeck_ha::config::Config;
use goofydeck_ha::upstream::supervisor::{TOKEN_VAR, URL_VAR};

const TOKEN: &str = "secret-token-1";

const STATES: &str = r#"{"entity_id":"light.kitchen","state":"off","attributes":{}},{"entity_id":"sensor.temp","state":"21.5","attributes":{"unit_of_measurement":"°C"}}"#;

// ── fake upstream ─────────────────────────────────────────────────────

struct FakeHa {
    port: u16,
    /// Every call_service message the server saw.
    seen_calls: mpsc::UnboundedReceiver<serde_json::Value>,
    /// Raw frames to push to the connected session.
    push: mpsc::UnboundedSender<String>,
    handle: tokio::task::JoinHandle<()>,
}

impl FakeHa {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake ha");
        let port = listener.local_addr().expect("local addr").port();
        let (seen_tx, seen_calls) = mpsc::unbounded_channel();
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(serve_fake_ha(listener, seen_tx, push_rx));
        Self { port, seen_calls, push: push_tx, handle }
    }

    fn url(&self) -> String {
        format!("ws://127.0.0.1:{}/api/websocket", self.port)
    }

    fn push_event(&self, entity_id: &str, new_state: &str) {
        let frame = format!(
            r#"{{"id":1,"type":"event","event":{{"event_type":"state_changed","data":{{"entity_id":"{entity_id}","old_state":null,"new_state":{new_state}}}}}}}"#
        );
        self.push.send(frame).expect("push event");
    }

    fn drain_calls(&mut self) -> Vec<serde_json::Value> {
        let mut calls = Vec::new();
        while let Ok(call) = self.seen_calls.try_recv() {
            calls.push(call);
        }
        calls
    }
}

async fn serve_fake_ha(
    listener: TcpListener,
    seen_tx: mpsc::UnboundedSender<serde_json::Value>,
    mut push_rx: mpsc::UnboundedReceiver<String>,
) {
    loop {
        let Ok((stream, _)) = listener.accept().await else { return };
        let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else { continue };
        if ws
            .send(Message::text(r#"{"type":"auth_required","ha_version":"2025.1.0"}"#))
            .await
            .is_err()
        {
            continue;
        }

        loop {
            tokio::select! {
                pushed = push_rx.recv() => {
                    let Some(frame) = pushed else { return };
                    if ws.send(Message::text(frame)).await.is_err() {
                        break;
                    }
                }
                frame = ws.next() => {
                    let Some(Ok(Message::Text(text))) = frame else { break };
                    let Ok(msg) = serde_json::from_str::<serde_json::Value>(text.as_str()) else {
                        break;
                    };
                    let reply = match msg["type"].as_str() {
                        Some("auth") => {
                            if msg["access_token"].as_str() == Some(TOKEN) {
                                r#"{"type":"auth_ok","ha_version":"2025.1.0"}"#.to_owned()
                            } else {
                                r#"{"type":"auth_invalid","message":"invalid token"}"#.to_owned()
                            }
                        }
                        Some("subscribe_events") => {
                            format!(
                                r#"{{"id":{},"type":"result","success":true,"result":null}}"#,
                                msg["id"]
                            )
                        }
                        Some("call_service") => {
                            let ok = msg["service"]
                                .as_str()
                                .is_some_and(|service| !service.starts_with("fail"));
                            let _ = seen_tx.send(msg.clone());
                            format!(
                                r#"{{"id":{},"type":"result","success":{ok},"result":null}}"#,
                                msg["id"]
                            )
                        }
                        Some("get_states") => {
                            format!(
                                r#"{{"id":{},"type":"result","success":true,"result":[{STATES}]}}"#,
                                msg["id"]
                            )
                        }
                        _ => continue,
                    };
                    if ws.send(Message::text(reply)).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

// ── local client helper ───────────────────────────────────────────────

struct TestClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl TestClient {
    async fn connect(path: &Path) -> Self {
        let stream = UnixStream::connect(path).await.expect("connect client");
        let (read_half, write_half) = stream.into_split();
        Self { reader: BufReader::new(read_half), writer: write_half }
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(format!("{line}\n").as_bytes()).await.expect("client write");
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a reply")
            .expect("client read");
        line.trim_end_matches('\n').to_owned()
    }

    async fn expect(&mut self, want: &str) {
        assert_eq!(self.read_line().await, want);
    }
}

async fn wait_for_socket(path: &Path) {
    for _ in 0..200 {
        if UnixStream::connect(path).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("broker socket never came up at {}", path.display());
}

// ── scenarios ─────────────────────────────────────────────────────────

#[tokio::test]
#[serial]
async fn end_to_end_bridge() {
    std::env::remove_var(URL_VAR);
    std::env::remove_var(TOKEN_VAR);

    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("ha.sock");
    let config = Config { socket: socket.clone(), reconnect_ms: 50 };
    let shutdown = CancellationToken::new();
    let daemon = tokio::spawn(goofydeck_ha::run_with_shutdown(config, shutdown.clone()));
    wait_for_socket(&socket).await;

    // Before the upstream exists: greeting, ping, info, and synchronous
    // failures for correlated commands.
    let mut alice = TestClient::connect(&socket).await;
    alice.expect("evt disconnected").await;
    alice.send("ping").await;
    alice.expect("ok").await;
    alice.send("info").await;
    alice.expect(r#"ok {"ws":"disconnected"}"#).await;
    alice.send("get sensor.temp").await;
    alice.expect("err ha_disconnected").await;
    alice.send("call light turn_on {}").await;
    alice.expect("err ha_disconnected").await;

    // Bring the upstream up; the broker reconnects on its own.
    let mut ha = FakeHa::start().await;
    std::env::set_var(URL_VAR, ha.url());
    std::env::set_var(TOKEN_VAR, TOKEN);
    alice.expect("evt connected").await;
    alice.send("info").await;
    alice.expect(r#"ok {"ws":"connected"}"#).await;

    // Subscribe round trip with a pushed state change.
    alice.send("sub-state light.kitchen").await;
    alice.expect("ok sub_id=1").await;
    alice.send("subs").await;
    alice.expect(r#"ok [{"id":1,"entity_id":"light.kitchen"}]"#).await;
    ha.push_event("light.kitchen", r#"{"entity_id":"light.kitchen","state":"on","attributes":{}}"#);
    alice
        .expect(r#"evt state light.kitchen {"entity_id":"light.kitchen","state":"on","attributes":{}}"#)
        .await;
    alice.send("unsub 1").await;
    alice.expect("ok").await;
    alice.send("subs").await;
    alice.expect("ok []").await;
    ha.push_event("light.kitchen", r#"{"state":"off"}"#);
    alice.send("ping").await;
    alice.expect("ok").await; // nothing was delivered for the unsubscribed entity

    // Service calls: success, upstream failure, local validation failure.
    alice.send(r#"call light turn_on {"entity_id":"light.k"}"#).await;
    alice.expect("ok").await;
    alice.send("call light fail_hard {}").await;
    alice.expect("err ha_error").await;
    assert_eq!(ha.drain_calls().len(), 2);
    alice.send("call light turn_on not-json").await;
    alice.expect("err bad_json").await;
    alice.send("call light turn_on {}").await;
    alice.expect("ok").await;
    // The rejected call never reached the upstream.
    assert_eq!(ha.drain_calls().len(), 1);

    // State queries.
    alice.send("get sensor.temp").await;
    alice
        .expect(r#"ok {"entity_id":"sensor.temp","state":"21.5","attributes":{"unit_of_measurement":"°C"}}"#)
        .await;
    alice.send("get light.nope").await;
    alice.expect("err not_found").await;

    // A late joiner is greeted with the current state and gets its own
    // sub-id namespace; fan-out stays selective.
    let mut bob = TestClient::connect(&socket).await;
    bob.expect("evt connected").await;
    bob.send("sub-state sensor.temp").await;
    bob.expect("ok sub_id=1").await;
    ha.push_event("sensor.temp", r#"{"state":"22.0"}"#);
    bob.expect(r#"evt state sensor.temp {"state":"22.0"}"#).await;
    alice.send("ping").await;
    alice.expect("ok").await; // alice is not subscribed to sensor.temp

    // Upstream flap: both clients hear about it.
    ha.handle.abort();
    alice.expect("evt disconnected").await;
    bob.expect("evt disconnected").await;

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon did not stop")
        .expect("daemon panicked");
    assert!(result.is_ok());
    assert!(!socket.exists(), "socket file should be removed on shutdown");
}

#[tokio::test]
#[serial]
async fn shutdown_removes_the_socket_without_upstream() {
    std::env::remove_var(URL_VAR);
    std::env::remove_var(TOKEN_VAR);

    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("ha.sock");
    let config = Config { socket: socket.clone(), reconnect_ms: 50 };
    let shutdown = CancellationToken::new();
    let daemon = tokio::spawn(goofydeck_ha::run_with_shutdown(config, shutdown.clone()));
    wait_for_socket(&socket).await;

    let mut client = TestClient::connect(&socket).await;
    client.expect("evt disconnected").await;

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon did not stop")
        .expect("daemon panicked");
    assert!(result.is_ok());
    assert!(!socket.exists());
}
