//! Transport establishment and reconnect bookkeeping.
//!
//! [`open`] performs one TCP + TLS + WebSocket handshake. [`RetryState`]
//! decides how long to wait before the next attempt and when to give up.
//! A [`Connection`] describes the session currently owned by the service;
//! every reconnect produces a new one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};

use crate::config::WsConfig;
use crate::error::{GateWsError, Result};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// Connection record
// ---------------------------------------------------------------------------

/// One physical transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Monotonic per-service identifier, starting at 1.
    pub id: u64,
    pub created_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            created_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Connection({})", self.id)
    }
}

// ---------------------------------------------------------------------------
// Retry state
// ---------------------------------------------------------------------------

/// Exponential backoff bounded by a maximum number of consecutive attempts.
///
/// The delay doubles after every attempt, starting at `base` and capped at
/// `max`. [`reset`](Self::reset) is called after every successful connect.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempts: u64,
    next_delay: Duration,
    ceiling: u64,
    base: Duration,
    max: Duration,
}

impl RetryState {
    pub fn new(base: Duration, max: Duration, ceiling: u64) -> Self {
        Self {
            attempts: 0,
            next_delay: base,
            ceiling,
            base,
            max: max.max(base),
        }
    }

    pub fn from_config(config: &WsConfig) -> Self {
        Self::new(
            config.reconnect_base_delay,
            config.reconnect_max_delay,
            config.max_retry_conn,
        )
    }

    /// Count one more attempt and return the delay to wait before it, or
    /// `None` once the ceiling has been reached.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempts >= self.ceiling {
            return None;
        }
        self.attempts += 1;
        let delay = self.next_delay;
        self.next_delay = self.next_delay.saturating_mul(2).min(self.max);
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_delay = self.base;
    }

    /// Consecutive attempts since the last successful connect.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.ceiling
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Open one WebSocket connection to the configured endpoint.
///
/// Every failure, including a timeout, is reported as
/// [`GateWsError::Handshake`] so the caller can retry it uniformly.
pub(crate) async fn open(config: &WsConfig) -> Result<WsStream> {
    let url = config.endpoint()?;

    // Ignored when a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let connector = if config.skip_tls_verify {
        tracing::warn!(%url, "TLS certificate verification is disabled");
        Some(Connector::Rustls(Arc::new(insecure_tls_config()?)))
    } else {
        None
    };

    tracing::debug!(%url, "Connecting");
    let handshake = connect_async_tls_with_config(url.as_str(), None, true, connector);
    match tokio::time::timeout(config.connect_timeout, handshake).await {
        Ok(Ok((ws, _resp))) => Ok(ws),
        Ok(Err(e)) => Err(GateWsError::Handshake(e.to_string())),
        Err(_) => Err(GateWsError::Handshake(format!(
            "timed out after {:?}",
            config.connect_timeout
        ))),
    }
}

fn insecure_tls_config() -> Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| GateWsError::Handshake(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
        .with_no_client_auth();
    Ok(config)
}

/// Accepts any server certificate but still checks handshake signatures.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
