//! Thread-safe view of the connection manager's state.
//!
//! [`StatusReporter::snapshot`] takes a read lock for the duration of a
//! clone and never waits on I/O, so it can be polled from anywhere at any
//! rate. Every state change is also published on a broadcast channel.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::constants::STATE_CHANNEL_CAPACITY;
use crate::error::GateWsError;
use crate::types::enums::ConnState;
use crate::ws::connection::Connection;

/// Point-in-time copy of the service status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Status {
    pub state: ConnState,
    /// Identifier of the current (or last) connection.
    pub connection_id: Option<u64>,
    pub connected_at: Option<DateTime<Utc>>,
    /// Time of the last inbound frame.
    pub last_activity: Option<DateTime<Utc>>,
    /// Successful reconnects since the service started.
    pub reconnect_count: u64,
    /// Consecutive failed attempts in the current outage; 0 while connected.
    pub retry_attempts: u64,
    pub last_error: Option<String>,
}

/// Owner of the [`Status`] snapshot and the transition channel.
pub struct StatusReporter {
    snapshot: RwLock<Status>,
    transitions: broadcast::Sender<ConnState>,
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter {
    pub fn new() -> Self {
        let (transitions, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            snapshot: RwLock::new(Status::default()),
            transitions,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Status> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Status> {
        self.snapshot.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Status {
        self.read().clone()
    }

    pub fn state(&self) -> ConnState {
        self.read().state
    }

    /// Receiver for every subsequent state transition.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnState> {
        self.transitions.subscribe()
    }

    /// Move to `state`. No-op when already there or after [`ConnState::Failed`].
    pub fn transition(&self, state: ConnState) -> bool {
        {
            let mut status = self.write();
            if status.state == state || status.state.is_terminal() {
                return false;
            }
            tracing::debug!(from = %status.state, to = %state, "State transition");
            status.state = state;
        }
        let _ = self.transitions.send(state);
        true
    }

    /// Claim `Disconnected → Connecting`. Only one caller can win; every
    /// other state refuses.
    pub fn begin_connect(&self) -> bool {
        {
            let mut status = self.write();
            if status.state != ConnState::Disconnected {
                return false;
            }
            tracing::debug!(from = %status.state, to = %ConnState::Connecting, "State transition");
            status.state = ConnState::Connecting;
        }
        let _ = self.transitions.send(ConnState::Connecting);
        true
    }

    /// Record a completed connect + replay.
    pub fn set_connected(&self, conn: &Connection, reconnected: bool) -> bool {
        {
            let mut status = self.write();
            if status.state.is_terminal() {
                return false;
            }
            status.state = ConnState::Connected;
            status.connection_id = Some(conn.id);
            status.connected_at = Some(conn.created_at);
            status.last_activity = Some(conn.created_at);
            status.retry_attempts = 0;
            if reconnected {
                status.reconnect_count += 1;
            }
        }
        let _ = self.transitions.send(ConnState::Connected);
        true
    }

    /// Refresh the last-activity time.
    pub fn touch(&self) {
        self.write().last_activity = Some(Utc::now());
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.read().last_activity
    }

    pub fn set_retry_attempts(&self, attempts: u64) {
        self.write().retry_attempts = attempts;
    }

    pub fn record_error(&self, err: &GateWsError) {
        self.write().last_error = Some(err.to_string());
    }

    /// Enter the terminal [`ConnState::Failed`] state. Returns `false` if
    /// the service had already failed, so the error is reported once.
    pub fn fail(&self, err: &GateWsError) -> bool {
        {
            let mut status = self.write();
            if status.state.is_terminal() {
                return false;
            }
            status.state = ConnState::Failed;
            status.last_error = Some(err.to_string());
        }
        let _ = self.transitions.send(ConnState::Failed);
        true
    }
}
