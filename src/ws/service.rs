//! The subscription client: connect, subscribe, reconnect, dispatch.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────────────────────────────┐
//!            │              WsService               │
//!            │ (subscribe / unsubscribe / status)   │
//!            └──┬───────────────┬───────────────┬───┘
//!               │               │               │
//!          Registry ◄──── supervisor task ───► StatusReporter
//!                           │        │
//!                       read loop  heartbeat task
//!                           │
//!                       Dispatcher ──► per-channel workers ──► callbacks
//! ```
//!
//! The supervisor owns the read half of the current connection. When the
//! transport fails it reconnects with backoff, replays the registry and
//! resumes reading. The heartbeat task sends application pings and cancels
//! the connection when the server goes silent. One [`CancellationToken`]
//! reaches every suspension point, so [`WsService::close`] stops all of
//! them promptly.
//!
//! # Example
//!
//! ```no_run
//! use gate_ws::WsServiceBuilder;
//! use gate_ws::constants::channels;
//! use gate_ws::ws::registry::callback;
//!
//! # #[tokio::main]
//! # async fn main() -> gate_ws::Result<()> {
//! let service = WsServiceBuilder::new()
//!     .credentials("api-key", "api-secret")
//!     .max_retry_conn(10)
//!     .build();
//! service.connect().await?;
//!
//! service
//!     .subscribe(
//!         channels::SPOT_TRADES,
//!         vec!["BTC_USDT".into()],
//!         callback(|msg| println!("trade: {}", msg.result_str())),
//!     )
//!     .await?;
//!
//! println!("status: {}", service.status().state);
//! service.close().await?;
//! # Ok(())
//! # }
//! ```

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex as AsyncMutex, broadcast};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use crate::config::WsConfig;
use crate::constants::channels;
use crate::error::{GateWsError, Result};
use crate::types::enums::{ConnState, Event};
use crate::types::message::{PingRequest, SubscribeRequest};
use crate::ws::connection::{self, Connection, RetryState, WsStream};
use crate::ws::dispatcher::{Dispatch, Dispatcher, ErrorCallBack};
use crate::ws::registry::{CallBack, Subscription, SubscriptionRegistry};
use crate::ws::status::{Status, StatusReporter};

type WriterHalf = SplitSink<WsStream, Message>;
type ReaderHalf = SplitStream<WsStream>;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State shared between the caller-facing handle and background tasks.
struct Shared {
    config: Arc<WsConfig>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Dispatcher,
    status: StatusReporter,
    /// Write half of the current connection. Registry mutations that must
    /// be ordered against replay happen while this lock is held.
    writer: AsyncMutex<Option<WriterHalf>>,
    request_id: AtomicU64,
    connection_seq: AtomicU64,
}

impl Shared {
    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Build the JSON for a subscribe/unsubscribe request, signing it when
    /// the entry requires auth.
    fn build_request(
        &self,
        channel: &str,
        args: &[String],
        requires_auth: bool,
        event: Event,
    ) -> Result<String> {
        let time = Utc::now().timestamp();
        let mut req =
            SubscribeRequest::new(self.next_request_id(), time, channel, event, args.to_vec());
        if requires_auth {
            let auth = self
                .config
                .credentials
                .auth_block(channel, event.as_str(), time)?;
            req = req.with_auth(auth);
        }
        req.to_json()
    }

    /// Adopt a freshly opened transport: replay the registry, then mark
    /// the service connected.
    async fn install(&self, ws: WsStream, reconnected: bool) -> Result<(ReaderHalf, Connection)> {
        let (write, read) = ws.split();
        let conn = Connection::new(self.connection_seq.fetch_add(1, Ordering::Relaxed) + 1);
        self.registry.clear_ready();

        let mut guard = self.writer.lock().await;
        *guard = Some(write);

        let replay = self.replay(&mut guard).await;
        if let Err(e) = replay {
            *guard = None;
            return Err(e);
        }

        self.status.set_connected(&conn, reconnected);
        drop(guard);

        tracing::info!(connection = %conn, reconnected, "Connected");
        Ok((read, conn))
    }

    /// Send a subscribe request for every registry entry, auth-required
    /// entries first.
    async fn replay(&self, writer: &mut Option<WriterHalf>) -> Result<()> {
        let w = writer
            .as_mut()
            .ok_or_else(|| GateWsError::InvalidArgument("writer not available for replay".into()))?;

        let subs = self.registry.snapshot_all();
        for sub in &subs {
            let frame =
                match self.build_request(&sub.channel, &sub.args, sub.requires_auth, Event::Subscribe) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!(channel = %sub.channel, error = %e, "Skipping subscription on replay");
                        continue;
                    }
                };
            w.send(Message::Text(frame.into())).await?;
        }

        if !subs.is_empty() {
            tracing::debug!(count = subs.len(), "Replayed subscriptions");
        }
        Ok(())
    }

    /// Send a Close frame (best effort) and drop the write half.
    async fn release_writer(&self) {
        let mut guard = self.writer.lock().await;
        if let Some(ref mut w) = *guard {
            let _ = w.send(Message::Close(None)).await;
        }
        *guard = None;
    }

    /// Enter the terminal state and report `err` exactly once.
    fn fail(&self, err: GateWsError) {
        if self.status.fail(&err) {
            tracing::error!(error = %err, "Connection manager failed");
            self.dispatcher.report_error(err);
        }
    }
}

/// Why a read loop ended.
enum LoopExit {
    /// Shutdown was requested.
    Cancelled,
    /// Retry with backoff.
    Transport(GateWsError),
    /// Do not retry.
    Fatal(GateWsError),
}

/// Runs on every exit path of the supervisor, including panics.
struct Teardown {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.cancel.cancel();
        // A panicking supervisor never reaches `release_writer`.
        if std::thread::panicking() {
            if let Ok(mut writer) = self.shared.writer.try_lock() {
                *writer = None;
            }
        }
        if self.shared.status.state() != ConnState::Closing {
            self.shared.status.transition(ConnState::Disconnected);
        }
    }
}

// ---------------------------------------------------------------------------
// WsService
// ---------------------------------------------------------------------------

/// A long-lived subscription client for one gate.io WebSocket endpoint.
///
/// Use [`WsServiceBuilder`](crate::config::WsServiceBuilder) for ergonomic
/// construction.
pub struct WsService {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl WsService {
    /// Create a service with explicit configuration. Nothing connects until
    /// [`connect`](Self::connect).
    pub fn new(config: Arc<WsConfig>) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let shared = Arc::new(Shared {
            config,
            dispatcher: Dispatcher::new(registry.clone()),
            registry,
            status: StatusReporter::new(),
            writer: AsyncMutex::new(None),
            request_id: AtomicU64::new(0),
            connection_seq: AtomicU64::new(0),
        });

        Self {
            shared,
            cancel: CancellationToken::new(),
            supervisor: Mutex::new(None),
        }
    }

    /// Establish the transport, replay any registered subscriptions and
    /// start the background loops.
    ///
    /// Returns once the handshake has completed or failed; the first
    /// connect is not retried. Only one call can be in flight: a concurrent
    /// or repeated call fails with [`GateWsError::InvalidArgument`].
    pub async fn connect(&self) -> Result<()> {
        if self.cancel.is_cancelled() || self.shared.status.state().is_terminal() {
            return Err(GateWsError::Closed);
        }
        if !self.shared.status.begin_connect() {
            return Err(GateWsError::InvalidArgument(
                "service is already connected or connecting".into(),
            ));
        }

        let opened = match connection::open(&self.shared.config).await {
            Ok(ws) => self.shared.install(ws, false).await,
            Err(e) => Err(e),
        };
        let (read, conn) = match opened {
            Ok(ok) => ok,
            Err(e) => {
                tracing::error!(error = %e, "Connect failed");
                self.shared.status.record_error(&e);
                self.shared.status.transition(ConnState::Disconnected);
                return Err(e);
            }
        };
        if self.cancel.is_cancelled() {
            // `close` ran during the handshake.
            self.shared.release_writer().await;
            self.shared.status.transition(ConnState::Disconnected);
            return Err(GateWsError::Closed);
        }

        let task = tokio::spawn(Self::supervise(
            self.shared.clone(),
            self.cancel.clone(),
            read,
            conn,
        ));
        *self.lock_supervisor() = Some(task);
        Ok(())
    }

    /// Subscribe to `channel` with `args`, delivering updates to `callback`.
    ///
    /// Whether the request is signed is decided by
    /// [`channels::requires_auth`]; use
    /// [`subscribe_with_auth`](Self::subscribe_with_auth) to override it.
    pub async fn subscribe(
        &self,
        channel: &str,
        args: Vec<String>,
        callback: CallBack,
    ) -> Result<()> {
        self.subscribe_with_auth(channel, args, callback, channels::requires_auth(channel))
            .await
    }

    /// Register `(channel, args)` and, when connected, send the subscribe
    /// request right away. Otherwise it is sent on the next connect.
    ///
    /// Registering an existing key replaces its callback. If the request
    /// cannot be written the registry is put back the way it was.
    pub async fn subscribe_with_auth(
        &self,
        channel: &str,
        args: Vec<String>,
        callback: CallBack,
        requires_auth: bool,
    ) -> Result<()> {
        if channel.is_empty() {
            return Err(GateWsError::InvalidArgument("channel must not be empty".into()));
        }
        if requires_auth && !self.shared.config.credentials.is_complete() {
            return Err(GateWsError::MissingCredentials(format!(
                "channel {channel} requires an API key and secret"
            )));
        }
        self.ensure_open()?;

        let mut guard = self.shared.writer.lock().await;
        // Registered before the send so an early ack or update is routed.
        let previous = self.shared.registry.get(channel, &args);
        let created = self
            .shared
            .registry
            .register(channel, args.clone(), callback, requires_auth);

        if self.shared.status.state() == ConnState::Connected {
            if let Some(ref mut w) = *guard {
                let sent = match self
                    .shared
                    .build_request(channel, &args, requires_auth, Event::Subscribe)
                {
                    Ok(frame) => w
                        .send(Message::Text(frame.into()))
                        .await
                        .map_err(GateWsError::from),
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    self.shared.registry.restore(channel, &args, previous);
                    return Err(e);
                }
            }
        }

        tracing::debug!(channel, args = ?args, created, requires_auth, "Subscribed");
        Ok(())
    }

    /// Remove `(channel, args)` and, when connected, tell the server.
    ///
    /// Envelopes already queued for the old callback are still delivered.
    pub async fn unsubscribe(&self, channel: &str, args: &[String]) -> Result<()> {
        self.ensure_open()?;
        let mut guard = self.shared.writer.lock().await;
        let Some(removed) = self.shared.registry.unregister(channel, args) else {
            return Ok(());
        };

        if self.shared.status.state() == ConnState::Connected {
            if let Some(ref mut w) = *guard {
                let frame = self.shared.build_request(
                    &removed.channel,
                    &removed.args,
                    removed.requires_auth,
                    Event::Unsubscribe,
                )?;
                w.send(Message::Text(frame.into())).await?;
            }
        }

        tracing::debug!(channel, args = ?args, "Unsubscribed");
        Ok(())
    }

    /// Install a handler for server error frames and fatal lifecycle
    /// errors ([`GateWsError::AuthRejected`], [`GateWsError::RetryExhausted`]).
    pub fn set_error_callback<F>(&self, f: F)
    where
        F: Fn(&GateWsError) + Send + Sync + 'static,
    {
        let cb: ErrorCallBack = Arc::new(f);
        self.shared.dispatcher.set_error_callback(cb);
    }

    /// Current status snapshot. Never blocks on I/O.
    pub fn status(&self) -> Status {
        self.shared.status.snapshot()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnState {
        self.shared.status.state()
    }

    /// Receiver for every subsequent state transition.
    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnState> {
        self.shared.status.subscribe()
    }

    /// Whether the server acknowledged `channel` on the current connection.
    pub fn is_ready(&self, channel: &str) -> bool {
        self.shared.registry.is_ready(channel)
    }

    /// Copy of the registered subscriptions in replay order.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.shared.registry.snapshot_all()
    }

    /// The configuration this service was built with.
    pub fn config(&self) -> &WsConfig {
        &self.shared.config
    }

    /// Stop all background loops and release the transport.
    ///
    /// Safe to call more than once. A service that reached
    /// [`ConnState::Failed`] stays failed.
    pub async fn close(&self) -> Result<()> {
        self.shared.status.transition(ConnState::Closing);
        self.cancel.cancel();

        let task = self.lock_supervisor().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!("Supervisor task panicked");
                }
            }
        }

        self.shared.release_writer().await;
        self.shared.dispatcher.shutdown();
        self.shared.status.transition(ConnState::Disconnected);

        tracing::info!("WsService closed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    /// Reject work once [`close`](Self::close) ran or the service failed.
    fn ensure_open(&self) -> Result<()> {
        if self.cancel.is_cancelled() || self.shared.status.state().is_terminal() {
            return Err(GateWsError::Closed);
        }
        Ok(())
    }

    fn lock_supervisor(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.supervisor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Owns the read half; reconnects on transport failure until cancelled
    /// or a fatal error occurs.
    async fn supervise(
        shared: Arc<Shared>,
        cancel: CancellationToken,
        read: ReaderHalf,
        conn: Connection,
    ) {
        let _teardown = Teardown {
            shared: shared.clone(),
            cancel: cancel.clone(),
        };
        let mut retry = RetryState::from_config(&shared.config);
        let mut read = read;
        let mut conn = conn;

        loop {
            match Self::read_loop(&shared, &cancel, read, &conn).await {
                LoopExit::Cancelled => break,
                LoopExit::Fatal(err) => {
                    shared.fail(err);
                    shared.release_writer().await;
                    break;
                }
                LoopExit::Transport(err) => {
                    tracing::warn!(connection = %conn, error = %err, "Transport failed");
                    shared.status.record_error(&err);
                    shared.status.transition(ConnState::Degraded);
                    *shared.writer.lock().await = None;

                    match Self::reconnect(&shared, &cancel, &mut retry).await {
                        LoopOutcome::Connected(new_read, new_conn) => {
                            read = new_read;
                            conn = new_conn;
                        }
                        LoopOutcome::Cancelled => break,
                        LoopOutcome::Fatal(err) => {
                            shared.fail(err);
                            break;
                        }
                    }
                }
            }
        }

        tracing::debug!("Supervisor stopped");
    }

    /// Read frames until the transport fails, the heartbeat times out, a
    /// fatal frame arrives or shutdown is requested.
    async fn read_loop(
        shared: &Arc<Shared>,
        cancel: &CancellationToken,
        mut read: ReaderHalf,
        conn: &Connection,
    ) -> LoopExit {
        let conn_token = cancel.child_token();
        let heartbeat = tokio::spawn(Self::heartbeat_loop(shared.clone(), conn_token.clone()));

        let exit = loop {
            tokio::select! {
                biased;
                _ = conn_token.cancelled() => {
                    if cancel.is_cancelled() {
                        break LoopExit::Cancelled;
                    }
                    break LoopExit::Transport(GateWsError::Transport(tungstenite::Error::Io(
                        io::Error::new(io::ErrorKind::TimedOut, "heartbeat timeout"),
                    )));
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        shared.status.touch();
                        match shared.dispatcher.dispatch_text(text.as_str()) {
                            Dispatch::AuthRejected(err) => break LoopExit::Fatal(err),
                            Dispatch::Delivered { channel } => {
                                tracing::trace!(connection = %conn, channel = %channel, "Delivered");
                            }
                            _ => {}
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(connection = %conn, ?frame, "WebSocket closed by server");
                        break LoopExit::Transport(GateWsError::Transport(
                            tungstenite::Error::ConnectionClosed,
                        ));
                    }
                    Some(Ok(_)) => shared.status.touch(),
                    Some(Err(e)) => break LoopExit::Transport(GateWsError::Transport(e)),
                    None => {
                        tracing::info!(connection = %conn, "WebSocket stream ended");
                        break LoopExit::Transport(GateWsError::Transport(
                            tungstenite::Error::ConnectionClosed,
                        ));
                    }
                },
            }
        };

        conn_token.cancel();
        let _ = heartbeat.await;
        exit
    }

    /// Send application pings and cancel `token` when the server has been
    /// silent for longer than the heartbeat timeout.
    async fn heartbeat_loop(shared: Arc<Shared>, token: CancellationToken) {
        let config = &shared.config;
        let mut ticker = tokio::time::interval(config.ping_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let silent_for = shared
                        .status
                        .last_activity()
                        .and_then(|t| (Utc::now() - t).to_std().ok())
                        .unwrap_or_default();
                    if silent_for > config.heartbeat_timeout {
                        tracing::warn!(silent_ms = silent_for.as_millis() as u64, "Heartbeat timeout");
                        token.cancel();
                        break;
                    }

                    let ping = PingRequest {
                        time: Utc::now().timestamp(),
                        channel: config.app.ping_channel(),
                    };
                    let frame = match serde_json::to_string(&ping) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to encode ping");
                            continue;
                        }
                    };
                    let mut guard = shared.writer.lock().await;
                    if let Some(ref mut w) = *guard {
                        if let Err(e) = w.send(Message::Text(frame.into())).await {
                            tracing::debug!(error = %e, "Ping failed");
                            token.cancel();
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Reopen the transport with backoff until it succeeds, the retry
    /// ceiling is reached, or shutdown is requested.
    async fn reconnect(
        shared: &Arc<Shared>,
        cancel: &CancellationToken,
        retry: &mut RetryState,
    ) -> LoopOutcome {
        loop {
            shared.status.transition(ConnState::Reconnecting);
            let Some(delay) = retry.next_backoff() else {
                return LoopOutcome::Fatal(GateWsError::RetryExhausted {
                    attempts: retry.attempts(),
                });
            };
            shared.status.set_retry_attempts(retry.attempts());

            tracing::info!(
                attempt = retry.attempts(),
                max = retry.ceiling(),
                delay_ms = delay.as_millis() as u64,
                "Attempting reconnect..."
            );
            tokio::select! {
                _ = cancel.cancelled() => return LoopOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }

            shared.status.transition(ConnState::Connecting);
            let opened = tokio::select! {
                _ = cancel.cancelled() => return LoopOutcome::Cancelled,
                opened = connection::open(&shared.config) => opened,
            };

            let installed = match opened {
                Ok(ws) => shared.install(ws, true).await,
                Err(e) => Err(e),
            };
            match installed {
                Ok((read, conn)) => {
                    retry.reset();
                    return LoopOutcome::Connected(read, conn);
                }
                Err(e) => {
                    tracing::error!(attempt = retry.attempts(), error = %e, "Reconnection failed");
                    shared.status.record_error(&e);
                }
            }
        }
    }
}

/// Result of a reconnect cycle.
enum LoopOutcome {
    Connected(ReaderHalf, Connection),
    Cancelled,
    Fatal(GateWsError),
}

impl Drop for WsService {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.lock_supervisor().take() {
            task.abort();
        }
    }
}
