//! End-to-end tests of `WsService` against an in-process WebSocket server.
//!
//! The mock server acknowledges every subscribe/unsubscribe request, answers
//! pings, and can be told to drop connections, reject signed requests, stop
//! listening, or stay silent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use gate_ws::error::GateWsError;
use gate_ws::types::enums::ConnState;
use gate_ws::ws::registry::callback;
use gate_ws::{WsService, WsServiceBuilder};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Mock server
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct ServerOpts {
    /// Connections with index below this are dropped...
    drop_first: usize,
    /// ...after this many requests.
    drop_after: usize,
    /// Stop listening after accepting this many connections.
    stop_after: Option<usize>,
    /// Answer signed requests with an auth error.
    reject_auth: bool,
    /// Never answer anything.
    silent: bool,
}

struct MockServer {
    url: String,
    frames: mpsc::UnboundedReceiver<(usize, Value)>,
    accepted: Arc<AtomicUsize>,
    push: broadcast::Sender<String>,
}

impl MockServer {
    async fn start(opts: ServerOpts) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (push, _) = broadcast::channel(64);

        let counter = accepted.clone();
        let push_tx = push.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let idx = counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(handle_connection(
                    stream,
                    idx,
                    opts.clone(),
                    frames_tx.clone(),
                    push_tx.subscribe(),
                ));
                if opts.stop_after.is_some_and(|n| idx + 1 >= n) {
                    break;
                }
            }
        });

        Self {
            url,
            frames,
            accepted,
            push,
        }
    }

    /// Next subscribe/unsubscribe request, skipping pings.
    async fn next_request(&mut self) -> (usize, Value) {
        loop {
            let (idx, frame) = timeout(WAIT, self.frames.recv())
                .await
                .expect("timed out waiting for a request")
                .expect("server stopped");
            if frame.get("event").is_some() {
                return (idx, frame);
            }
        }
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

async fn handle_connection(
    stream: TcpStream,
    idx: usize,
    opts: ServerOpts,
    frames_tx: mpsc::UnboundedSender<(usize, Value)>,
    mut push_rx: broadcast::Receiver<String>,
) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };
    let mut received = 0;

    loop {
        tokio::select! {
            msg = ws.next() => {
                let Some(Ok(msg)) = msg else { break };
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => {
                        let _ = frames_tx.send((idx, json!({"close": true})));
                        continue;
                    }
                    _ => continue,
                };
                let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                let channel = frame["channel"].as_str().unwrap_or_default().to_owned();
                let _ = frames_tx.send((idx, frame.clone()));

                if opts.silent {
                    continue;
                }
                if channel.ends_with(".ping") {
                    let pong = json!({
                        "time": frame["time"],
                        "channel": channel.replace(".ping", ".pong"),
                        "event": "",
                        "result": null,
                    });
                    let _ = ws.send(Message::Text(pong.to_string().into())).await;
                    continue;
                }

                received += 1;
                let reply = if opts.reject_auth && frame.get("auth").is_some() {
                    json!({
                        "time": 1, "id": frame["id"], "channel": channel, "event": frame["event"],
                        "error": {"code": 4, "message": "invalid key"}, "result": null,
                    })
                } else {
                    json!({
                        "time": 1, "id": frame["id"], "channel": channel, "event": frame["event"],
                        "error": null, "result": {"status": "success"},
                    })
                };
                if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                    break;
                }
                if idx < opts.drop_first && received >= opts.drop_after {
                    // Drop without a close handshake.
                    break;
                }
            }
            pushed = push_rx.recv() => match pushed {
                Ok(frame) => {
                    if ws.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Log output for failing runs: `RUST_LOG=gate_ws=debug cargo test`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn builder(server: &MockServer) -> WsServiceBuilder {
    WsServiceBuilder::new()
        .url(server.url.clone())
        .reconnect_delay(Duration::from_millis(10), Duration::from_millis(50))
        .connect_timeout(Duration::from_secs(2))
}

async fn wait_until(service: &WsService, pred: impl Fn(&gate_ws::ws::status::Status) -> bool) {
    timeout(WAIT, async {
        loop {
            if pred(&service.status()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("condition not reached, status: {:?}", service.status()));
}

fn collect_errors(service: &WsService) -> Arc<Mutex<Vec<String>>> {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    service.set_error_callback(move |e| sink.lock().unwrap().push(e.to_string()));
    errors
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnects_and_replays_after_transport_drops() {
    let mut server = MockServer::start(ServerOpts {
        drop_first: 3,
        drop_after: 2,
        ..Default::default()
    })
    .await;

    let service = builder(&server)
        .credentials("key", "secret")
        .max_retry_conn(5)
        .build();
    service
        .subscribe("spot.trades", vec!["BTC_USDT".into()], callback(|_| {}))
        .await
        .unwrap();
    service
        .subscribe("spot.orders", vec!["BTC_USDT".into()], callback(|_| {}))
        .await
        .unwrap();

    let mut states = service.subscribe_state();
    service.connect().await.unwrap();

    // Every connection replays both entries once, the signed one first.
    for conn in 0..4 {
        let (idx, first) = server.next_request().await;
        assert_eq!(idx, conn);
        assert_eq!(first["channel"], "spot.orders");
        assert_eq!(first["event"], "subscribe");
        assert_eq!(first["payload"][0], "BTC_USDT");
        assert_eq!(first["auth"]["KEY"], "key");

        let (idx, second) = server.next_request().await;
        assert_eq!(idx, conn);
        assert_eq!(second["channel"], "spot.trades");
        assert!(second.get("auth").is_none());
    }

    wait_until(&service, |s| s.state == ConnState::Connected && s.connection_id == Some(4)).await;

    let mut seen = Vec::new();
    while seen.iter().filter(|s| **s == ConnState::Connected).count() < 4 {
        seen.push(timeout(WAIT, states.recv()).await.unwrap().unwrap());
    }
    let mut expected = vec![ConnState::Connecting, ConnState::Connected];
    for _ in 0..3 {
        expected.extend([
            ConnState::Degraded,
            ConnState::Reconnecting,
            ConnState::Connecting,
            ConnState::Connected,
        ]);
    }
    assert_eq!(seen, expected);

    let status = service.status();
    assert_eq!(status.retry_attempts, 0);
    assert_eq!(status.reconnect_count, 3);

    // Nothing replayed twice on the surviving connection.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server.frames.try_recv().is_err());
    assert_eq!(server.accepted(), 4);

    service.close().await.unwrap();
}

#[tokio::test]
async fn gives_up_after_retry_ceiling() {
    let mut server = MockServer::start(ServerOpts {
        drop_first: 1,
        drop_after: 1,
        stop_after: Some(1),
        ..Default::default()
    })
    .await;

    let service = builder(&server).max_retry_conn(3).build();
    let errors = collect_errors(&service);
    service
        .subscribe("spot.trades", vec!["BTC_USDT".into()], callback(|_| {}))
        .await
        .unwrap();
    service.connect().await.unwrap();
    server.next_request().await;

    wait_until(&service, |s| s.state == ConnState::Failed).await;
    let status = service.status();
    assert_eq!(status.retry_attempts, 3);
    assert!(status.last_error.unwrap().contains("3 attempts"));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(service.state(), ConnState::Failed);
    assert_eq!(service.status().retry_attempts, 3);
    assert_eq!(server.accepted(), 1);

    let errors = errors.lock().unwrap().clone();
    assert_eq!(
        errors.iter().filter(|e| e.contains("gave up reconnecting")).count(),
        1
    );

    let err = service
        .subscribe("spot.tickers", vec![], callback(|_| {}))
        .await
        .unwrap_err();
    assert!(matches!(err, GateWsError::Closed));
}

#[tokio::test]
async fn auth_rejection_is_fatal_and_not_retried() {
    let mut server = MockServer::start(ServerOpts {
        reject_auth: true,
        ..Default::default()
    })
    .await;

    let service = builder(&server)
        .credentials("valid-looking", "but-wrong")
        .max_retry_conn(5)
        .build();
    let errors = collect_errors(&service);
    service
        .subscribe("spot.orders", vec!["BTC_USDT".into()], callback(|_| {}))
        .await
        .unwrap();
    service.connect().await.unwrap();
    server.next_request().await;

    wait_until(&service, |s| s.state == ConnState::Failed).await;
    assert!(
        service
            .status()
            .last_error
            .unwrap()
            .contains("authentication rejected")
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.accepted(), 1);
    assert_eq!(service.status().retry_attempts, 0);
    assert_eq!(service.state(), ConnState::Failed);

    let errors = errors.lock().unwrap().clone();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("spot.orders"));

    service.close().await.unwrap();
    assert_eq!(service.state(), ConnState::Failed);
}

#[tokio::test]
async fn live_subscribe_delivers_updates_until_unsubscribed() {
    let mut server = MockServer::start(ServerOpts::default()).await;
    let service = builder(&server).build();
    service.connect().await.unwrap();
    assert_eq!(service.state(), ConnState::Connected);

    let (tx, mut rx) = mpsc::unbounded_channel();
    // Outlives the registry entry so `rx` stays open after unsubscribe.
    let cb_tx = tx.clone();
    service
        .subscribe(
            "spot.trades",
            vec!["BTC_USDT".into()],
            callback(move |msg| {
                let _ = cb_tx.send(msg.result_str().to_owned());
            }),
        )
        .await
        .unwrap();

    let (_, req) = server.next_request().await;
    assert_eq!(req["event"], "subscribe");
    assert_eq!(req["channel"], "spot.trades");

    timeout(WAIT, async {
        while !service.is_ready("spot.trades") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let update = json!({
        "time": 1, "channel": "spot.trades", "event": "update",
        "result": {"id": 1, "currency_pair": "BTC_USDT", "amount": "0.1"},
    });
    server.push.send(update.to_string()).unwrap();
    let stray = json!({"time": 1, "channel": "spot.tickers", "event": "update", "result": {}});
    server.push.send(stray.to_string()).unwrap();

    let got = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(got.contains("\"amount\":\"0.1\""));

    service
        .unsubscribe("spot.trades", &["BTC_USDT".to_owned()])
        .await
        .unwrap();
    let (_, req) = server.next_request().await;
    assert_eq!(req["event"], "unsubscribe");
    assert!(service.subscriptions().is_empty());

    server.push.send(update.to_string()).unwrap();
    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());

    service.close().await.unwrap();
    drop(tx);
}

#[tokio::test]
async fn close_stops_background_loops() {
    let server = MockServer::start(ServerOpts::default()).await;
    let service = builder(&server).build();
    let mut states = service.subscribe_state();
    service.connect().await.unwrap();

    service.close().await.unwrap();
    assert_eq!(service.state(), ConnState::Disconnected);

    let mut seen = Vec::new();
    while let Ok(state) = states.try_recv() {
        seen.push(state);
    }
    assert_eq!(
        seen,
        vec![
            ConnState::Connecting,
            ConnState::Connected,
            ConnState::Closing,
            ConnState::Disconnected,
        ]
    );

    // No reconnect happens after close.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.accepted(), 1);
    assert!(matches!(service.connect().await, Err(GateWsError::Closed)));
    service.close().await.unwrap();
}

#[tokio::test]
async fn concurrent_connect_opens_one_transport() {
    let server = MockServer::start(ServerOpts::default()).await;
    let service = builder(&server).build();

    let (a, b) = tokio::join!(service.connect(), service.connect());
    assert!(a.is_ok() != b.is_ok(), "a={a:?} b={b:?}");
    let loser = if a.is_err() { a } else { b };
    assert!(matches!(loser, Err(GateWsError::InvalidArgument(_))));

    assert!(matches!(
        service.connect().await,
        Err(GateWsError::InvalidArgument(_))
    ));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.accepted(), 1);
    assert_eq!(service.status().connection_id, Some(1));

    service.close().await.unwrap();
}

#[tokio::test]
async fn closed_service_rejects_subscriptions() {
    let mut server = MockServer::start(ServerOpts::default()).await;
    let service = builder(&server).build();
    service
        .subscribe("spot.trades", vec!["BTC_USDT".into()], callback(|_| {}))
        .await
        .unwrap();
    service.connect().await.unwrap();
    server.next_request().await;
    service.close().await.unwrap();

    let err = service
        .subscribe("spot.tickers", vec!["BTC_USDT".into()], callback(|_| {}))
        .await
        .unwrap_err();
    assert!(matches!(err, GateWsError::Closed));
    let err = service
        .subscribe_with_auth("spot.tickers", vec![], callback(|_| {}), false)
        .await
        .unwrap_err();
    assert!(matches!(err, GateWsError::Closed));
    let err = service
        .unsubscribe("spot.trades", &["BTC_USDT".to_owned()])
        .await
        .unwrap_err();
    assert!(matches!(err, GateWsError::Closed));

    let subs = service.subscriptions();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].channel, "spot.trades");
}

#[tokio::test]
async fn close_sends_close_frame() {
    let mut server = MockServer::start(ServerOpts::default()).await;
    let service = builder(&server).build();
    service.connect().await.unwrap();
    service.close().await.unwrap();

    let (idx, frame) = timeout(WAIT, server.frames.recv()).await.unwrap().unwrap();
    assert_eq!(idx, 0);
    assert_eq!(frame["close"], true);
}

#[tokio::test]
async fn rejected_subscribe_leaves_registry_unchanged() {
    let server = MockServer::start(ServerOpts::default()).await;
    let service = builder(&server).build();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let first_tx = tx.clone();
    service
        .subscribe_with_auth(
            "spot.orders",
            vec!["BTC_USDT".into()],
            callback(move |_| {
                let _ = first_tx.send("first");
            }),
            false,
        )
        .await
        .unwrap();

    // Same key, but now signed without credentials: refused, old entry kept.
    let second_tx = tx.clone();
    let err = service
        .subscribe(
            "spot.orders",
            vec!["BTC_USDT".into()],
            callback(move |_| {
                let _ = second_tx.send("second");
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GateWsError::MissingCredentials(_)));
    assert!(
        service
            .subscribe("", vec![], callback(|_| {}))
            .await
            .is_err()
    );

    let subs = service.subscriptions();
    assert_eq!(subs.len(), 1);
    assert!(!subs[0].requires_auth);
    let msg = gate_ws::UpdateMsg::parse(
        r#"{"time":1,"channel":"spot.orders","event":"update","result":[]}"#,
    )
    .unwrap();
    (subs[0].callback)(&msg);
    assert_eq!(rx.try_recv().unwrap(), "first");
    drop(tx);
}

#[tokio::test]
async fn first_connect_failure_is_reported_not_retried() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let service = WsServiceBuilder::new()
        .url(url)
        .connect_timeout(Duration::from_secs(2))
        .build();
    let err = service.connect().await.unwrap_err();
    assert!(matches!(err, GateWsError::Handshake(_)), "got {err:?}");
    assert_eq!(service.state(), ConnState::Disconnected);
    assert!(service.status().last_error.is_some());
}

#[tokio::test]
async fn private_channel_requires_credentials() {
    let server = MockServer::start(ServerOpts::default()).await;
    let service = builder(&server).build();
    let err = service
        .subscribe("spot.orders", vec!["BTC_USDT".into()], callback(|_| {}))
        .await
        .unwrap_err();
    assert!(matches!(err, GateWsError::MissingCredentials(_)));
    assert!(service.subscriptions().is_empty());

    // Explicitly public subscription to the same channel name is allowed.
    service
        .subscribe_with_auth("spot.orders", vec![], callback(|_| {}), false)
        .await
        .unwrap();
    assert_eq!(service.subscriptions().len(), 1);
}

#[tokio::test]
async fn heartbeat_pings_and_reconnects_on_silence() {
    let mut server = MockServer::start(ServerOpts {
        silent: true,
        ..Default::default()
    })
    .await;

    let service = builder(&server)
        .ping_interval(Duration::from_millis(20))
        .heartbeat_timeout(Duration::from_millis(100))
        .build();
    service.connect().await.unwrap();

    let (_, ping) = timeout(WAIT, server.frames.recv()).await.unwrap().unwrap();
    assert_eq!(ping["channel"], "spot.ping");
    assert!(ping.get("event").is_none());

    timeout(WAIT, async {
        while server.accepted() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("no reconnect after heartbeat timeout");

    service.close().await.unwrap();
}

#[tokio::test]
async fn pongs_keep_connection_alive() {
    let server = MockServer::start(ServerOpts::default()).await;
    let service = builder(&server)
        .ping_interval(Duration::from_millis(20))
        .heartbeat_timeout(Duration::from_millis(150))
        .build();
    service.connect().await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(server.accepted(), 1);
    assert_eq!(service.state(), ConnState::Connected);
    assert!(service.status().last_activity.is_some());

    service.close().await.unwrap();
}
