//! Tests for wire frames.

use gate_ws::signer::Credentials;
use gate_ws::types::enums::Event;
use gate_ws::types::message::{SubscribeRequest, UpdateMsg};
use serde::Deserialize;

#[test]
fn subscribe_request_round_trips() {
    let req = SubscribeRequest::new(
        7,
        1_700_000_000,
        "spot.trades",
        Event::Subscribe,
        vec!["BTC_USDT".into(), "ETH_USDT".into()],
    );
    let json = req.to_json().unwrap();
    let back = SubscribeRequest::from_json(&json).unwrap();
    assert_eq!(back.channel, "spot.trades");
    assert_eq!(back.payload, vec!["BTC_USDT", "ETH_USDT"]);
    assert_eq!(back, req);
}

#[test]
fn subscribe_request_wire_shape() {
    let auth = Credentials::new("k", "s")
        .auth_block("spot.orders", "subscribe", 1)
        .unwrap();
    let req = SubscribeRequest::new(1, 1, "spot.orders", Event::Subscribe, vec!["BTC_USDT".into()])
        .with_auth(auth);
    let value: serde_json::Value = serde_json::from_str(&req.to_json().unwrap()).unwrap();

    assert_eq!(value["event"], "subscribe");
    assert_eq!(value["payload"][0], "BTC_USDT");
    assert_eq!(value["auth"]["method"], "api_key");
    assert_eq!(value["auth"]["KEY"], "k");
    assert!(value["auth"]["SIGN"].as_str().is_some());
}

#[test]
fn public_request_has_no_auth_block() {
    let req = SubscribeRequest::new(1, 1, "spot.trades", Event::Unsubscribe, vec![]);
    let value: serde_json::Value = serde_json::from_str(&req.to_json().unwrap()).unwrap();
    assert!(value.get("auth").is_none());
    assert_eq!(value["event"], "unsubscribe");
}

#[test]
fn parse_update_envelope() {
    let text = r#"{"time":1700000000,"time_ms":1700000000123,"channel":"spot.orders","event":"update","result":[{"id":"1","stp_id":"0"}]}"#;
    let msg = UpdateMsg::parse(text).unwrap();
    assert_eq!(msg.channel, "spot.orders");
    assert_eq!(msg.event, Event::Update);
    assert_eq!(msg.time, 1_700_000_000);
    assert_eq!(msg.time_ms, Some(1_700_000_000_123));
    assert_eq!(msg.result_str(), r#"[{"id":"1","stp_id":"0"}]"#);
    assert!(msg.error.is_none());
}

#[test]
fn parse_ack_with_correlation_id() {
    let text = r#"{"time":1,"id":42,"channel":"spot.trades","event":"subscribe","error":null,"result":{"status":"success"}}"#;
    let msg = UpdateMsg::parse(text).unwrap();
    assert!(msg.is_ack());
    assert_eq!(msg.id, Some(42));

    let text = r#"{"time":1,"requestId":9,"channel":"spot.trades","event":"subscribe"}"#;
    assert_eq!(UpdateMsg::parse(text).unwrap().id, Some(9));
}

#[test]
fn parse_error_frame() {
    let text = r#"{"time":1,"channel":"spot.orders","event":"subscribe","error":{"code":4,"message":"invalid key"},"result":null}"#;
    let msg = UpdateMsg::parse(text).unwrap();
    let err = msg.error.unwrap();
    assert_eq!(err.code, 4);
    assert!(err.is_auth_failure());
    assert!(msg.result.is_empty());
}

#[test]
fn non_auth_error_is_not_auth_failure() {
    let text = r#"{"time":1,"channel":"spot.trades","event":"subscribe","error":{"code":2,"message":"unknown currency pair"}}"#;
    let err = UpdateMsg::parse(text).unwrap().error.unwrap();
    assert!(!err.is_auth_failure());
}

#[test]
fn unknown_event_decodes() {
    let text = r#"{"time":1,"channel":"spot.pong","event":"","result":null}"#;
    let msg = UpdateMsg::parse(text).unwrap();
    assert_eq!(msg.event, Event::Unknown);
}

#[test]
fn malformed_frames_fail_to_decode() {
    assert!(UpdateMsg::parse("not json").is_err());
    assert!(UpdateMsg::parse(r#"{"event":"update"}"#).is_err());
}

#[derive(Debug, Deserialize)]
struct Order {
    id: String,
    stp_id: String,
}

#[test]
fn numeric_looking_strings_stay_text() {
    let text = r#"{"time":1,"channel":"spot.orders","event":"update","result":[{"id":"123","stp_id":"4567"}]}"#;
    let msg = UpdateMsg::parse(text).unwrap();
    let orders: Vec<Order> = msg.decode_result().unwrap();
    assert_eq!(orders[0].id, "123");
    assert_eq!(orders[0].stp_id, "4567");
}
