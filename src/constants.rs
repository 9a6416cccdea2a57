//! Constants for the gate.io WebSocket v4 API.
//!
//! Contains endpoint URLs, channel names, and protocol defaults. These are
//! used internally by [`WsService`](crate::ws::service::WsService) but are
//! also exported so callers can name channels without string literals.

use std::time::Duration;

// ---------------------------------------------------------------------------
// WebSocket URLs
// ---------------------------------------------------------------------------

/// WebSocket endpoint for spot channels.
pub const WS_SPOT_URL: &str = "wss://api.gateio.ws/ws/v4/";

/// WebSocket endpoint for futures channels; `{settle}` is replaced by the
/// settle currency (`usdt`, `btc`).
pub const WS_FUTURES_URL: &str = "wss://fx-ws.gateio.ws/v4/ws/{settle}";

/// Default futures settle currency.
pub const DEFAULT_SETTLE: &str = "usdt";

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Channel names understood by the server.
pub mod channels {
    pub const SPOT_PING: &str = "spot.ping";
    pub const SPOT_PONG: &str = "spot.pong";
    pub const SPOT_TICKERS: &str = "spot.tickers";
    pub const SPOT_TRADES: &str = "spot.trades";
    pub const SPOT_CANDLESTICKS: &str = "spot.candlesticks";
    pub const SPOT_ORDER_BOOK: &str = "spot.order_book";
    pub const SPOT_ORDER_BOOK_UPDATE: &str = "spot.order_book_update";
    pub const SPOT_BOOK_TICKER: &str = "spot.book_ticker";
    pub const SPOT_ORDERS: &str = "spot.orders";
    pub const SPOT_USER_TRADES: &str = "spot.usertrades";
    pub const SPOT_BALANCES: &str = "spot.balances";
    pub const SPOT_MARGIN_BALANCES: &str = "spot.margin_balances";
    pub const SPOT_FUNDING_BALANCES: &str = "spot.funding_balances";
    pub const SPOT_CROSS_BALANCES: &str = "spot.cross_balances";
    pub const SPOT_PRICE_ORDERS: &str = "spot.priceorders";

    pub const FUTURES_PING: &str = "futures.ping";
    pub const FUTURES_PONG: &str = "futures.pong";
    pub const FUTURES_TICKERS: &str = "futures.tickers";
    pub const FUTURES_TRADES: &str = "futures.trades";
    pub const FUTURES_ORDER_BOOK: &str = "futures.order_book";
    pub const FUTURES_ORDER_BOOK_UPDATE: &str = "futures.order_book_update";
    pub const FUTURES_BOOK_TICKER: &str = "futures.book_ticker";
    pub const FUTURES_CANDLESTICKS: &str = "futures.candlesticks";
    pub const FUTURES_ORDERS: &str = "futures.orders";
    pub const FUTURES_USER_TRADES: &str = "futures.usertrades";
    pub const FUTURES_LIQUIDATES: &str = "futures.liquidates";
    pub const FUTURES_AUTO_DELEVERAGES: &str = "futures.auto_deleverages";
    pub const FUTURES_POSITION_CLOSES: &str = "futures.position_closes";
    pub const FUTURES_BALANCES: &str = "futures.balances";
    pub const FUTURES_REDUCE_RISK_LIMITS: &str = "futures.reduce_risk_limits";
    pub const FUTURES_POSITIONS: &str = "futures.positions";
    pub const FUTURES_AUTO_ORDERS: &str = "futures.autoorders";

    /// Channels that only accept signed subscribe requests.
    pub const PRIVATE: &[&str] = &[
        SPOT_ORDERS,
        SPOT_USER_TRADES,
        SPOT_BALANCES,
        SPOT_MARGIN_BALANCES,
        SPOT_FUNDING_BALANCES,
        SPOT_CROSS_BALANCES,
        SPOT_PRICE_ORDERS,
        FUTURES_ORDERS,
        FUTURES_USER_TRADES,
        FUTURES_LIQUIDATES,
        FUTURES_AUTO_DELEVERAGES,
        FUTURES_POSITION_CLOSES,
        FUTURES_BALANCES,
        FUTURES_REDUCE_RISK_LIMITS,
        FUTURES_POSITIONS,
        FUTURES_AUTO_ORDERS,
    ];

    /// Whether `channel` requires an auth block on subscribe.
    pub fn requires_auth(channel: &str) -> bool {
        PRIVATE.contains(&channel)
    }

    /// Whether `channel` is a heartbeat reply rather than a data channel.
    pub fn is_pong(channel: &str) -> bool {
        channel == SPOT_PONG || channel == FUTURES_PONG
    }
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// Auth method name carried in the `auth` block.
pub const AUTH_METHOD_API_KEY: &str = "api_key";

/// Server error code for an authentication failure.
pub const ERR_CODE_AUTH_FAILED: i64 = 4;

/// Default interval between application-level pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);

/// Default silence after which the connection is considered dead.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default delay before the first reconnect attempt.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on the delay between reconnect attempts.
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default TCP + TLS + upgrade timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the state-transition broadcast channel.
pub const STATE_CHANNEL_CAPACITY: usize = 64;
