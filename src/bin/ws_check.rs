//! Binary that connects to the gate.io spot WebSocket, subscribes to spot
//! and futures order updates plus public spot trades for BTC_USDT, and
//! prints what arrives until Ctrl-C.
//!
//! Order payloads are decoded with every numeric-looking field kept as
//! text, which is how the server sends `stp_id` and friends.
//!
//! # Usage
//!
//! ```sh
//! export GATE_API_KEY="your-api-key"
//! export GATE_API_SECRET="your-api-secret"
//! cargo run --bin ws_check --features cli
//! ```

use std::env;
use std::time::Duration;

use gate_ws::WsServiceBuilder;
use gate_ws::constants::channels;
use gate_ws::types::enums::Event;
use gate_ws::ws::registry::callback;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct OrderSummary {
    #[serde(default)]
    id: serde_json::Value,
    #[serde(default, alias = "contract")]
    currency_pair: Option<String>,
    #[serde(default)]
    stp_id: Option<serde_json::Value>,
    #[serde(default)]
    stp_act: Option<String>,
}

#[tokio::main]
async fn main() -> gate_ws::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let key = env::var("GATE_API_KEY").unwrap_or_default();
    let secret = env::var("GATE_API_SECRET").unwrap_or_default();
    let authenticated = !key.is_empty() && !secret.is_empty();

    let service = WsServiceBuilder::new()
        .credentials(key, secret)
        .max_retry_conn(10)
        .skip_tls_verify(false)
        .build();
    service.set_error_callback(|e| eprintln!("Error: {e}"));

    println!("Connecting to gate.io WebSocket…");
    service.connect().await?;

    let on_orders = callback(|msg| {
        if msg.event != Event::Update {
            return;
        }
        match msg.decode_result::<Vec<OrderSummary>>() {
            Ok(orders) => {
                for o in orders {
                    println!(
                        "{} order {} {:?}: stp_id={:?} stp_act={:?}",
                        msg.channel, o.id, o.currency_pair, o.stp_id, o.stp_act
                    );
                }
            }
            Err(e) => eprintln!("{} decode error: {e}, raw: {}", msg.channel, msg.result_str()),
        }
    });
    let on_trade = callback(|msg| println!("trade: {}", msg.result_str()));

    let pair = vec!["BTC_USDT".to_owned()];
    if authenticated {
        service
            .subscribe(channels::SPOT_ORDERS, pair.clone(), on_orders.clone())
            .await?;
        service
            .subscribe(channels::FUTURES_ORDERS, pair.clone(), on_orders)
            .await?;
    } else {
        println!("GATE_API_KEY / GATE_API_SECRET not set, skipping order channels");
    }
    service.subscribe(channels::SPOT_TRADES, pair, on_trade).await?;

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => println!("connection status: {}", service.status().state),
        }
    }

    println!("Disconnecting…");
    service.close().await?;
    println!("Done.");
    Ok(())
}
