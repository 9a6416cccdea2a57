//! The record of what the caller wants to receive.
//!
//! A [`Subscription`] is keyed by `(channel, args)`. The registry outlives
//! every connection and is replayed against each new one, so it is the only
//! source of truth for desired subscriptions. All access goes through one
//! short-lived [`Mutex`] guard; it is never held across I/O or a callback.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::types::message::UpdateMsg;

/// Handler invoked with every `update` envelope of a channel.
pub type CallBack = Arc<dyn Fn(&UpdateMsg) + Send + Sync>;

/// Wrap a closure as a [`CallBack`].
pub fn callback<F>(f: F) -> CallBack
where
    F: Fn(&UpdateMsg) + Send + Sync + 'static,
{
    Arc::new(f)
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A registry entry: intent to receive updates for `channel` with `args`.
#[derive(Clone)]
pub struct Subscription {
    pub channel: String,
    pub args: Vec<String>,
    /// Whether subscribe requests must carry a signed `auth` block.
    pub requires_auth: bool,
    pub callback: CallBack,
    /// Bumped on every upsert; the newest entry of a channel owns delivery.
    revision: u64,
}

impl Subscription {
    fn matches(&self, channel: &str, args: &[String]) -> bool {
        self.channel == channel && self.args == args
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("args", &self.args)
            .field("requires_auth", &self.requires_auth)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    /// Insertion order is preserved; upserts replace in place.
    entries: Vec<Subscription>,
    revision: u64,
    /// Channels acknowledged on the current connection.
    ready: HashSet<String>,
}

/// Thread-safe store of [`Subscription`]s.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<Inner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace the entry for `(channel, args)`.
    ///
    /// Returns `true` when the key was new. A replaced callback is used from
    /// the next dispatch on; envelopes already queued keep the old one.
    pub fn register(
        &self,
        channel: impl Into<String>,
        args: Vec<String>,
        callback: CallBack,
        requires_auth: bool,
    ) -> bool {
        let channel = channel.into();
        let mut inner = self.lock();
        inner.revision += 1;
        let revision = inner.revision;

        if let Some(existing) = inner.entries.iter_mut().find(|s| s.matches(&channel, &args)) {
            existing.callback = callback;
            existing.requires_auth = requires_auth;
            existing.revision = revision;
            return false;
        }

        inner.entries.push(Subscription {
            channel,
            args,
            requires_auth,
            callback,
            revision,
        });
        true
    }

    /// Copy of the entry for `(channel, args)`, if any.
    pub fn get(&self, channel: &str, args: &[String]) -> Option<Subscription> {
        self.lock()
            .entries
            .iter()
            .find(|s| s.matches(channel, args))
            .cloned()
    }

    /// Undo a [`register`](Self::register): put `previous` back in place, or
    /// drop the key when there was none.
    pub fn restore(&self, channel: &str, args: &[String], previous: Option<Subscription>) {
        let mut inner = self.lock();
        let Some(idx) = inner.entries.iter().position(|s| s.matches(channel, args)) else {
            return;
        };
        match previous {
            Some(prev) => inner.entries[idx] = prev,
            None => {
                inner.entries.remove(idx);
                if !inner.entries.iter().any(|s| s.channel == channel) {
                    inner.ready.remove(channel);
                }
            }
        }
    }

    /// Remove the entry for `(channel, args)`, returning it if present.
    pub fn unregister(&self, channel: &str, args: &[String]) -> Option<Subscription> {
        let mut inner = self.lock();
        let idx = inner.entries.iter().position(|s| s.matches(channel, args))?;
        let removed = inner.entries.remove(idx);
        if !inner.entries.iter().any(|s| s.channel == channel) {
            inner.ready.remove(channel);
        }
        Some(removed)
    }

    /// Ordered copy for replay: auth-required entries first, each group in
    /// insertion order.
    pub fn snapshot_all(&self) -> Vec<Subscription> {
        let mut entries = self.lock().entries.clone();
        // Stable sort keeps insertion order inside each group.
        entries.sort_by_key(|s| !s.requires_auth);
        entries
    }

    /// The callback of the most recently registered entry for `channel`.
    pub fn callback_for(&self, channel: &str) -> Option<CallBack> {
        self.lock()
            .entries
            .iter()
            .filter(|s| s.channel == channel)
            .max_by_key(|s| s.revision)
            .map(|s| s.callback.clone())
    }

    pub fn contains_channel(&self, channel: &str) -> bool {
        self.lock().entries.iter().any(|s| s.channel == channel)
    }

    /// Whether any entry of `channel` needs signed requests.
    pub fn requires_auth(&self, channel: &str) -> bool {
        self.lock()
            .entries
            .iter()
            .any(|s| s.channel == channel && s.requires_auth)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    // -----------------------------------------------------------------------
    // Readiness
    // -----------------------------------------------------------------------

    pub(crate) fn set_ready(&self, channel: &str, ready: bool) {
        let mut inner = self.lock();
        if ready {
            inner.ready.insert(channel.to_owned());
        } else {
            inner.ready.remove(channel);
        }
    }

    /// Whether the server acknowledged `channel` on the current connection.
    pub fn is_ready(&self, channel: &str) -> bool {
        self.lock().ready.contains(channel)
    }

    pub(crate) fn clear_ready(&self) {
        self.lock().ready.clear();
    }
}
