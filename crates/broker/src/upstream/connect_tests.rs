// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

// ── Endpoint::parse ───────────────────────────────────────────────────

#[test]
fn plain_scheme_defaults() -> anyhow::Result<()> {
    let ep = Endpoint::parse("ws://hass.local")?;
    assert_eq!(
        ep,
        Endpoint {
            tls: false,
            host: "hass.local".to_owned(),
            port: 80,
            path: "/api/websocket".to_owned()
        }
    );
    Ok(())
}

#[test]
fn tls_scheme_defaults() -> anyhow::Result<()> {
    let ep = Endpoint::parse("wss://hass.local")?;
    assert!(ep.tls);
    assert_eq!(ep.port, 443);
    assert_eq!(ep.path, "/api/websocket");
    Ok(())
}

#[test]
fn explicit_port_and_path() -> anyhow::Result<()> {
    let ep = Endpoint::parse("ws://10.0.0.2:8123/custom/ws")?;
    assert_eq!(ep.host, "10.0.0.2");
    assert_eq!(ep.port, 8123);
    assert_eq!(ep.path, "/custom/ws");
    Ok(())
}

#[test]
fn root_path_means_default() -> anyhow::Result<()> {
    let ep = Endpoint::parse("ws://hass.local:8123/")?;
    assert_eq!(ep.path, "/api/websocket");
    Ok(())
}

#[test]
fn rejects_other_schemes() {
    assert!(Endpoint::parse("http://hass.local").is_err());
    assert!(Endpoint::parse("hass.local:8123").is_err());
}

#[test]
fn rejects_bad_port_and_missing_host() {
    assert!(Endpoint::parse("ws://hass.local:notaport").is_err());
    assert!(Endpoint::parse("ws://:8123").is_err());
    assert!(Endpoint::parse("ws://").is_err());
}

// ── uri / origin ──────────────────────────────────────────────────────

#[test]
fn uri_always_carries_the_port() -> anyhow::Result<()> {
    let ep = Endpoint::parse("ws://hass.local")?;
    assert_eq!(ep.uri(), "ws://hass.local:80/api/websocket");
    let ep = Endpoint::parse("wss://hass.local:9443/x")?;
    assert_eq!(ep.uri(), "wss://hass.local:9443/x");
    Ok(())
}

#[test]
fn origin_scheme_follows_tls() -> anyhow::Result<()> {
    let ep = Endpoint::parse("ws://hass.local:8123")?;
    assert_eq!(ep.origin(), "http://hass.local:8123");
    let ep = Endpoint::parse("wss://hass.local")?;
    assert_eq!(ep.origin(), "https://hass.local:443");
    Ok(())
}
