//! Wire and state types for the gate.io WebSocket v4 API.
//!
//! ## Organization
//!
//! - [`enums`] — Product, event, and connection-state enumerations
//! - [`message`] — Outbound request frames and the inbound [`UpdateMsg`] envelope
//!
//! Everything is re-exported at the module root.

pub mod enums;
pub mod message;

pub use enums::*;
pub use message::*;
