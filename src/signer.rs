//! Request signing for private channels.
//!
//! gate.io signs WebSocket requests with HMAC-SHA512 keyed by the API
//! secret, hex-encoded:
//!
//! - subscribe/unsubscribe: `channel={channel}&event={event}&time={time}`
//! - API requests carrying a body: `api\n{channel}\n{body}\n{time}`
//!
//! Signing is pure; the same inputs always produce the same signature.

use hmac::{Hmac, Mac};
use sha2::Sha512;

use crate::error::{GateWsError, Result};
use crate::types::message::AuthBlock;

type HmacSha512 = Hmac<Sha512>;

/// Build the string that gets signed.
pub fn canonical_message(channel: &str, event: &str, time: i64, body: Option<&str>) -> String {
    match body {
        Some(body) => format!("api\n{channel}\n{body}\n{time}"),
        None => format!("channel={channel}&event={event}&time={time}"),
    }
}

/// Hex HMAC-SHA512 of `message` keyed by `secret`.
pub fn hmac_sha512_hex(secret: &str, message: &str) -> Result<String> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| GateWsError::InvalidArgument(format!("HMAC key: {e}")))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// API key/secret pair used to sign private-channel requests.
#[derive(Clone, Default)]
pub struct Credentials {
    key: String,
    secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether both halves are present.
    pub fn is_complete(&self) -> bool {
        !self.key.is_empty() && !self.secret.is_empty()
    }

    /// Sign a request.
    ///
    /// # Errors
    ///
    /// [`GateWsError::MissingCredentials`] when the key or secret is empty.
    pub fn sign(&self, channel: &str, event: &str, time: i64, body: Option<&str>) -> Result<String> {
        if !self.is_complete() {
            return Err(GateWsError::MissingCredentials(format!(
                "channel {channel} requires an API key and secret"
            )));
        }
        let message = canonical_message(channel, event, time, body);
        hmac_sha512_hex(&self.secret, &message)
    }

    /// Build the `auth` block for a subscribe/unsubscribe request.
    pub fn auth_block(&self, channel: &str, event: &str, time: i64) -> Result<AuthBlock> {
        let sign = self.sign(channel, event, time, None)?;
        Ok(AuthBlock::api_key(self.key.clone(), sign))
    }
}
