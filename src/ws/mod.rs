//! The WebSocket subscription runtime.
//!
//! ## [`service`] — Entry point
//!
//! [`WsService`](service::WsService) owns one connection to a gate.io v4
//! endpoint at a time. It replays every registered subscription after each
//! (re)connect, signs private-channel requests, and reconnects with
//! exponential backoff up to the configured ceiling.
//!
//! ## Building blocks
//!
//! - [`registry`] — `(channel, args)` → callback store, replayed on connect
//! - [`dispatcher`] — envelope classification and per-channel delivery
//! - [`connection`] — transport handshake, TLS options, retry/backoff state
//! - [`status`] — lock-protected status snapshot and transition broadcast
//!
//! ## Delivery guarantees
//!
//! - Envelopes of one channel reach its callback in wire order
//! - A slow callback never delays other channels or the read loop
//! - Frames for unregistered channels are dropped

pub mod connection;
pub mod dispatcher;
pub mod registry;
pub mod service;
pub mod status;
