//! Error types for the `gate-ws` crate.
//!
//! All fallible operations in this crate return [`Result<T>`], which is an
//! alias for `std::result::Result<T, GateWsError>`.
//!
//! [`GateWsError`] covers:
//! - **Transport errors** — Connection drops, read/write failures (retried)
//! - **Handshake errors** — TCP, TLS, or upgrade failures (retried)
//! - **Auth rejection** — The server refused our credentials (fatal)
//! - **Decode errors** — Malformed frames (the frame is dropped)
//! - **Retry exhaustion** — The reconnect ceiling was reached (fatal)
//! - **Server errors** — Error frames for a specific channel
//! - **Invalid arguments** — Client-side validation errors

/// All possible errors produced by the `gate-ws` client.
#[derive(Debug, thiserror::Error)]
pub enum GateWsError {
    /// A WebSocket transport error (drop, read or write failure).
    #[error("WebSocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// Establishing the connection failed (TCP, TLS, upgrade, timeout).
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The server explicitly rejected the supplied credentials.
    #[error("authentication rejected on {channel}: [{code}] {message}")]
    AuthRejected {
        /// Channel whose subscribe request was rejected.
        channel: String,
        /// Server error code.
        code: i64,
        /// Server error message.
        message: String,
    },

    /// A frame could not be decoded.
    #[error("frame decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The reconnect ceiling was reached without a successful connect.
    #[error("gave up reconnecting after {attempts} attempts")]
    RetryExhausted {
        /// Number of consecutive failed attempts.
        attempts: u64,
    },

    /// A signed operation was requested without a key or secret.
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    /// The server returned an error frame for a channel.
    #[error("server error on {channel}: [{code}] {message}")]
    Server {
        /// Channel the error frame was addressed to.
        channel: String,
        /// Server error code.
        code: i64,
        /// Server error message.
        message: String,
    },

    /// An error building or parsing the endpoint URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// The caller provided an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The service has been closed or has reached a terminal state.
    #[error("service is closed")]
    Closed,
}

impl GateWsError {
    /// Whether this error puts the service into its terminal failure state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthRejected { .. } | Self::RetryExhausted { .. })
    }

    /// Whether the connection manager retries after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Handshake(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GateWsError>;
