//! Routing of inbound frames to callbacks.
//!
//! The read loop hands every text frame to [`Dispatcher::dispatch_text`],
//! which decodes the envelope, classifies it and returns immediately.
//! `update` envelopes are queued to a per-channel worker task; the worker
//! runs callbacks one at a time on the blocking pool, so a channel's
//! callbacks see envelopes in wire order while a slow handler on one
//! channel never delays another channel or the read loop.
//!
//! ```text
//!   read loop ──► dispatch_text ──► worker("spot.trades") ──► callback
//!                              └──► worker("spot.orders") ──► callback
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::mpsc;

use crate::constants::channels;
use crate::error::GateWsError;
use crate::types::enums::Event;
use crate::types::message::UpdateMsg;
use crate::ws::registry::{CallBack, SubscriptionRegistry};

/// Handler for server error frames and fatal lifecycle errors.
pub type ErrorCallBack = Arc<dyn Fn(&GateWsError) + Send + Sync>;

type Job = (CallBack, Arc<UpdateMsg>);

/// What happened to one inbound frame.
#[derive(Debug)]
pub enum Dispatch {
    /// Undecodable, stray, or uninteresting; nothing was delivered.
    Dropped,
    /// Heartbeat reply.
    Pong,
    /// Subscribe/unsubscribe acknowledgment for a registered channel.
    Acked { channel: String, event: Event },
    /// Queued to the channel's callback.
    Delivered { channel: String },
    /// Error frame for a channel; already reported.
    ServerError,
    /// The server refused our credentials. Fatal for the connection manager.
    AuthRejected(GateWsError),
}

/// Classifies frames and fans `update` envelopes out to channel workers.
pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    workers: Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>,
    on_error: RwLock<Option<ErrorCallBack>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            registry,
            workers: Mutex::new(HashMap::new()),
            on_error: RwLock::new(None),
        }
    }

    /// Install the error callback, replacing any previous one.
    pub fn set_error_callback(&self, cb: ErrorCallBack) {
        *self.on_error.write().unwrap_or_else(PoisonError::into_inner) = Some(cb);
    }

    /// Decode and route one text frame. Must be called from a Tokio runtime.
    pub fn dispatch_text(&self, text: &str) -> Dispatch {
        let msg = match UpdateMsg::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable frame: {text}");
                return Dispatch::Dropped;
            }
        };
        self.dispatch(msg)
    }

    /// Route an already-decoded envelope.
    pub fn dispatch(&self, msg: UpdateMsg) -> Dispatch {
        if channels::is_pong(&msg.channel) {
            return Dispatch::Pong;
        }

        if let Some(err) = &msg.error {
            if err.is_auth_failure() && self.registry.requires_auth(&msg.channel) {
                return Dispatch::AuthRejected(GateWsError::AuthRejected {
                    channel: msg.channel.clone(),
                    code: err.code,
                    message: err.message.clone(),
                });
            }
            self.report_error(GateWsError::Server {
                channel: msg.channel.clone(),
                code: err.code,
                message: err.message.clone(),
            });
            return Dispatch::ServerError;
        }

        if msg.event == Event::Error {
            self.report_error(GateWsError::Server {
                channel: msg.channel.clone(),
                code: 0,
                message: msg.result_str().to_owned(),
            });
            return Dispatch::ServerError;
        }

        match msg.event {
            Event::Subscribe | Event::Unsubscribe => {
                if !self.registry.contains_channel(&msg.channel) {
                    tracing::debug!(channel = %msg.channel, "Ack for unregistered channel");
                    return Dispatch::Dropped;
                }
                self.registry
                    .set_ready(&msg.channel, msg.event == Event::Subscribe);
                tracing::debug!(channel = %msg.channel, event = %msg.event, "Acknowledged");
                Dispatch::Acked {
                    channel: msg.channel,
                    event: msg.event,
                }
            }
            Event::Update | Event::All => {
                let Some(cb) = self.registry.callback_for(&msg.channel) else {
                    tracing::debug!(channel = %msg.channel, "Dropping frame for unregistered channel");
                    return Dispatch::Dropped;
                };
                let channel = msg.channel.clone();
                self.enqueue(&channel, cb, Arc::new(msg));
                Dispatch::Delivered { channel }
            }
            Event::Error | Event::Unknown => {
                tracing::debug!(channel = %msg.channel, event = %msg.event, "Ignoring frame");
                Dispatch::Dropped
            }
        }
    }

    /// Report an error to the error callback (off the caller's task), or
    /// log it when none is installed.
    pub fn report_error(&self, err: GateWsError) {
        let cb = self
            .on_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match cb {
            Some(cb) => {
                tokio::task::spawn_blocking(move || cb(&err));
            }
            None => tracing::error!(error = %err, "Unhandled error"),
        }
    }

    /// Stop all channel workers once their queues drain.
    pub fn shutdown(&self) {
        self.lock_workers().clear();
    }

    fn lock_workers(&self) -> MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<Job>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, channel: &str, cb: CallBack, msg: Arc<UpdateMsg>) {
        let mut workers = self.lock_workers();
        let job = match workers.get(channel) {
            Some(tx) => match tx.send((cb, msg)) {
                Ok(()) => return,
                // Worker gone; start a fresh one with the same job.
                Err(mpsc::error::SendError(job)) => job,
            },
            None => (cb, msg),
        };

        let tx = spawn_worker(channel.to_owned());
        if tx.send(job).is_err() {
            tracing::error!(channel, "Channel worker exited immediately");
        }
        workers.insert(channel.to_owned(), tx);
    }
}

/// Per-channel consumer: runs each callback to completion before the next.
fn spawn_worker(channel: String) -> mpsc::UnboundedSender<Job> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    tokio::spawn(async move {
        while let Some((cb, msg)) = rx.recv().await {
            let result = tokio::task::spawn_blocking(move || cb(msg.as_ref())).await;
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!(channel = %channel, "Callback panicked");
                }
            }
        }
        tracing::debug!(channel = %channel, "Channel worker stopped");
    });
    tx
}
