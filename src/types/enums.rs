//! Enum types shared by the wire layer and the connection runtime.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Which gate.io product the service connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum App {
    /// Spot and margin channels.
    #[default]
    Spot,
    /// Perpetual futures channels.
    Futures,
}

impl App {
    /// Heartbeat channel for this product.
    pub fn ping_channel(self) -> &'static str {
        match self {
            Self::Spot => crate::constants::channels::SPOT_PING,
            Self::Futures => crate::constants::channels::FUTURES_PING,
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// The `event` field of a request or envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Event {
    Subscribe,
    Unsubscribe,
    Update,
    All,
    Error,
    /// Anything the server adds later; kept so decoding never fails on it.
    #[serde(other)]
    Unknown,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Update => "update",
            Self::All => "all",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Lifecycle state of the connection manager.
///
/// ```text
/// Disconnected → Connecting → Connected → Degraded → Reconnecting → Connecting → …
/// Connected → Closing → Disconnected
/// Reconnecting → Failed            (retry ceiling)
/// Connected → Failed               (auth rejected)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The transport failed; reconnect is about to start.
    Degraded,
    Reconnecting,
    Closing,
    /// Terminal: the retry ceiling was exceeded or auth was rejected.
    Failed,
}

impl ConnState {
    /// Whether no further transitions can happen without a new service.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
