//! # gate-ws
//!
//! A Rust client for the [gate.io WebSocket v4 API](https://www.gate.io/docs/developers/apiv4/ws/en/).
//!
//! Register interest in channels with per-channel arguments and a callback;
//! the service authenticates private channels, reconnects transparently and
//! routes every update envelope to its channel's callback without blocking
//! the network read path.
//!
//! ## Quick Start
//!
//! ```no_run
//! use gate_ws::WsServiceBuilder;
//! use gate_ws::constants::channels;
//! use gate_ws::ws::registry::callback;
//!
//! #[tokio::main]
//! async fn main() -> gate_ws::Result<()> {
//!     let service = WsServiceBuilder::new()
//!         .credentials("your-api-key", "your-api-secret")
//!         .build();
//!     service.connect().await?;
//!     service
//!         .subscribe(
//!             channels::SPOT_ORDERS,
//!             vec!["BTC_USDT".into()],
//!             callback(|msg| println!("{}", msg.result_str())),
//!         )
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod signer;
pub mod types;
pub mod ws;

/// Re-export the service and its builder at crate root for convenience.
pub use config::{WsConfig, WsServiceBuilder};
/// Re-export the error type and Result alias.
pub use error::{GateWsError, Result};
pub use types::message::UpdateMsg;
pub use ws::registry::{CallBack, callback};
pub use ws::service::WsService;
