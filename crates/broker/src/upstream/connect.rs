// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upstream endpoint parsing and WebSocket dialing.

use std::sync::Arc;

use anyhow::{bail, Context};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::ClientRequestBuilder;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};

/// Largest frame or message accepted from the upstream.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

const DEFAULT_PATH: &str = "/api/websocket";

/// Connected upstream stream.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Parsed upstream endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub tls: bool,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    /// Parse a `ws://` / `wss://` URL. The scheme selects TLS, the
    /// port defaults to 80/443 by scheme, and the path defaults to
    /// `/api/websocket` (a bare `/` also means the default).
    pub fn parse(url: &str) -> anyhow::Result<Self> {
        let (tls, rest) = if let Some(rest) = url.strip_prefix("wss://") {
            (true, rest)
        } else if let Some(rest) = url.strip_prefix("ws://") {
            (false, rest)
        } else {
            bail!("unsupported scheme (expected ws:// or wss://): {url}");
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>().with_context(|| format!("invalid port in url: {url}"))?,
            ),
            None => (authority, if tls { 443 } else { 80 }),
        };
        if host.is_empty() {
            bail!("missing host in url: {url}");
        }

        let path = if path.is_empty() || path == "/" { DEFAULT_PATH } else { path };
        Ok(Self { tls, host: host.to_owned(), port, path: path.to_owned() })
    }

    /// `ws(s)://host:port/path` with the port always explicit, so the
    /// upgrade request's Host header carries it too.
    pub fn uri(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{scheme}://{}:{}{}", self.host, self.port, self.path)
    }

    /// Origin header value, using the http scheme matching the TLS
    /// setting.
    pub fn origin(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// Open the WebSocket connection, TLS-wrapped when the endpoint asks
/// for it. Certificate verification is off: the trust boundary is the
/// operator's own network.
pub async fn dial(endpoint: &Endpoint) -> anyhow::Result<WsStream> {
    let uri: tokio_tungstenite::tungstenite::http::Uri =
        endpoint.uri().parse().with_context(|| format!("bad endpoint uri {}", endpoint.uri()))?;
    let request = ClientRequestBuilder::new(uri).with_header("Origin", endpoint.origin());

    let config = WebSocketConfig::default()
        .max_message_size(Some(MAX_FRAME_BYTES))
        .max_frame_size(Some(MAX_FRAME_BYTES));

    let connector = if endpoint.tls { trusting_connector()? } else { Connector::Plain };
    let (ws, _response) = tokio_tungstenite::connect_async_tls_with_config(
        request,
        Some(config),
        false,
        Some(connector),
    )
    .await?;
    Ok(ws)
}

/// Rustls connector that accepts any server certificate.
fn trusting_connector() -> anyhow::Result<Connector> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert { provider }))
        .with_no_client_auth();
    Ok(Connector::Rustls(Arc::new(config)))
}

#[derive(Debug)]
struct AcceptAnyCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
#[path = "connect_tests.rs"]
mod tests;
