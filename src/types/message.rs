//! JSON frames exchanged with the gate.io WebSocket v4 server.
//!
//! Outbound frames are [`SubscribeRequest`] (for `subscribe` and
//! `unsubscribe`) and [`PingRequest`]. Every inbound frame decodes into the
//! [`UpdateMsg`] envelope, whose `result` is kept as opaque JSON bytes. The
//! payload's shape is channel-specific; decode it with
//! [`UpdateMsg::decode_result`].

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::constants::AUTH_METHOD_API_KEY;
use crate::error::Result;
use crate::types::enums::Event;

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// The `auth` block attached to requests on private channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthBlock {
    /// Always `"api_key"`.
    pub method: String,
    /// API key.
    #[serde(rename = "KEY")]
    pub key: String,
    /// Hex HMAC-SHA512 signature, see [`crate::signer`].
    #[serde(rename = "SIGN")]
    pub sign: String,
}

impl AuthBlock {
    pub fn api_key(key: impl Into<String>, sign: impl Into<String>) -> Self {
        Self {
            method: AUTH_METHOD_API_KEY.to_owned(),
            key: key.into(),
            sign: sign.into(),
        }
    }
}

/// A subscribe or unsubscribe request.
///
/// ```json
/// {"time":1700000000,"id":7,"channel":"spot.orders","event":"subscribe",
///  "payload":["BTC_USDT"],"auth":{"method":"api_key","KEY":"…","SIGN":"…"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Unix seconds; also the timestamp covered by the signature.
    pub time: i64,
    /// Request id, echoed by the server as the correlation id.
    pub id: u64,
    pub channel: String,
    pub event: Event,
    #[serde(default)]
    pub payload: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthBlock>,
}

impl SubscribeRequest {
    pub fn new(
        id: u64,
        time: i64,
        channel: impl Into<String>,
        event: Event,
        payload: Vec<String>,
    ) -> Self {
        Self {
            time,
            id,
            channel: channel.into(),
            event,
            payload,
            auth: None,
        }
    }

    /// Attach a signed auth block.
    pub fn with_auth(mut self, auth: AuthBlock) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a request previously produced by [`to_json`](Self::to_json).
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Application-level heartbeat: `{"time":…,"channel":"spot.ping"}`.
#[derive(Debug, Clone, Serialize)]
pub struct PingRequest<'a> {
    pub time: i64,
    pub channel: &'a str,
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// The `error` object of an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl ServerError {
    /// Whether the server is refusing our credentials.
    pub fn is_auth_failure(&self) -> bool {
        if self.code == crate::constants::ERR_CODE_AUTH_FAILED {
            return true;
        }
        let msg = self.message.to_ascii_lowercase();
        msg.contains("authentication") || msg.contains("signature") || msg.contains("invalid key")
    }
}

#[derive(Deserialize)]
struct RawEnvelope<'a> {
    #[serde(default)]
    time: i64,
    #[serde(default)]
    time_ms: Option<i64>,
    #[serde(default, alias = "request_id", alias = "requestId")]
    id: Option<u64>,
    channel: String,
    event: Event,
    #[serde(default)]
    error: Option<ServerError>,
    #[serde(default, borrow)]
    result: Option<&'a RawValue>,
}

/// The decoded outer frame common to every channel.
///
/// Constructed per inbound frame, handed to the channel's callback and then
/// dropped. `result` is never interpreted by this crate.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateMsg {
    /// Server time, unix seconds.
    pub time: i64,
    /// Server time, unix milliseconds (not sent on every channel).
    pub time_ms: Option<i64>,
    /// Correlation id echoed from the request, if any.
    pub id: Option<u64>,
    pub channel: String,
    pub event: Event,
    pub error: Option<ServerError>,
    /// Raw JSON text of `result`; empty when the frame carried none.
    pub result: Bytes,
}

impl UpdateMsg {
    /// Decode the envelope of one text frame.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawEnvelope<'_> = serde_json::from_str(text)?;
        let result = match raw.result {
            Some(v) if v.get() != "null" => Bytes::copy_from_slice(v.get().as_bytes()),
            _ => Bytes::new(),
        };
        Ok(Self {
            time: raw.time,
            time_ms: raw.time_ms,
            id: raw.id,
            channel: raw.channel,
            event: raw.event,
            error: raw.error,
            result,
        })
    }

    /// Decode `result` into a channel-specific type.
    ///
    /// Numeric-looking fields the server sends as strings should be typed
    /// as `String` on the caller's side.
    pub fn decode_result<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.result)?)
    }

    /// `result` as UTF-8 text (it was valid JSON text when received).
    pub fn result_str(&self) -> &str {
        std::str::from_utf8(&self.result).unwrap_or_default()
    }

    /// Whether this is a subscribe/unsubscribe acknowledgment.
    pub fn is_ack(&self) -> bool {
        matches!(self.event, Event::Subscribe | Event::Unsubscribe)
    }
}
