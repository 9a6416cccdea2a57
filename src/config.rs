//! Service configuration.
//!
//! [`WsConfig`] is built once (usually through [`WsServiceBuilder`]) and then
//! shared read-only by every component of a [`WsService`].

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_PING_INTERVAL,
    DEFAULT_RECONNECT_BASE_DELAY, DEFAULT_RECONNECT_MAX_DELAY, DEFAULT_SETTLE, WS_FUTURES_URL,
    WS_SPOT_URL,
};
use crate::error::{GateWsError, Result};
use crate::signer::Credentials;
use crate::types::enums::App;
use crate::ws::service::WsService;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for a [`WsService`].
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Product whose endpoint and ping channel are used. Default: spot.
    pub app: App,
    /// Futures settle currency. Default: `usdt`.
    pub settle: String,
    /// Endpoint override; takes precedence over `app`/`settle`.
    pub url: Option<String>,
    /// API key/secret for private channels.
    pub credentials: Credentials,
    /// Consecutive failed reconnect attempts tolerated before giving up.
    /// Default: unbounded (`u64::MAX`).
    pub max_retry_conn: u64,
    /// Disable server certificate validation. Default: false.
    pub skip_tls_verify: bool,
    /// Interval between application-level pings. Default: 10 s.
    pub ping_interval: Duration,
    /// Inbound silence after which the connection is treated as dead.
    /// Default: 30 s.
    pub heartbeat_timeout: Duration,
    /// Delay before the first reconnect attempt. Default: 1 s.
    pub reconnect_base_delay: Duration,
    /// Upper bound on the reconnect delay. Default: 30 s.
    pub reconnect_max_delay: Duration,
    /// Timeout for TCP connect + TLS + upgrade. Default: 10 s.
    pub connect_timeout: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            app: App::Spot,
            settle: DEFAULT_SETTLE.to_owned(),
            url: None,
            credentials: Credentials::default(),
            max_retry_conn: u64::MAX,
            skip_tls_verify: false,
            ping_interval: DEFAULT_PING_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            reconnect_max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl WsConfig {
    /// Resolve and validate the endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns [`GateWsError::Url`] for unparsable URLs and
    /// [`GateWsError::InvalidArgument`] for non-WebSocket schemes.
    pub fn endpoint(&self) -> Result<Url> {
        let raw = match (&self.url, self.app) {
            (Some(url), _) => url.clone(),
            (None, App::Spot) => WS_SPOT_URL.to_owned(),
            (None, App::Futures) => WS_FUTURES_URL.replace("{settle}", &self.settle),
        };
        let url = Url::parse(&raw)?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(GateWsError::InvalidArgument(format!(
                "unsupported endpoint scheme {other:?}, expected ws or wss"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`WsService`] with custom configuration.
///
/// # Example
///
/// ```no_run
/// use gate_ws::WsServiceBuilder;
///
/// let service = WsServiceBuilder::new()
///     .credentials("api-key", "api-secret")
///     .max_retry_conn(10)
///     .skip_tls_verify(false)
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct WsServiceBuilder {
    config: WsConfig,
}

impl WsServiceBuilder {
    /// Create a builder with default configuration (spot endpoint, no
    /// credentials, unbounded retries).
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the product endpoint. Default: spot.
    pub fn app(mut self, app: App) -> Self {
        self.config.app = app;
        self
    }

    /// Set the futures settle currency. Default: `usdt`.
    pub fn settle(mut self, settle: impl Into<String>) -> Self {
        self.config.settle = settle.into();
        self
    }

    /// Override the endpoint URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = Some(url.into());
        self
    }

    /// Set the API key and secret used for private channels.
    pub fn credentials(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.config.credentials = Credentials::new(key, secret);
        self
    }

    /// Set the reconnect ceiling. Default: unbounded.
    pub fn max_retry_conn(mut self, n: u64) -> Self {
        self.config.max_retry_conn = n;
        self
    }

    /// Disable certificate validation. Default: false.
    pub fn skip_tls_verify(mut self, skip: bool) -> Self {
        self.config.skip_tls_verify = skip;
        self
    }

    /// Set the ping interval. Default: 10 s.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    /// Set the inbound-silence timeout. Default: 30 s.
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.config.heartbeat_timeout = timeout;
        self
    }

    /// Set the first reconnect delay and the delay ceiling.
    /// Defaults: 1 s and 30 s.
    pub fn reconnect_delay(mut self, base: Duration, max: Duration) -> Self {
        self.config.reconnect_base_delay = base;
        self.config.reconnect_max_delay = max.max(base);
        self
    }

    /// Set the connect timeout. Default: 10 s.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Finish and return the immutable configuration.
    pub fn into_config(self) -> WsConfig {
        self.config
    }

    /// Build the [`WsService`].
    pub fn build(self) -> WsService {
        WsService::new(Arc::new(self.config))
    }
}
