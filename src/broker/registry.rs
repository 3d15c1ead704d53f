//! Shared broker registry.
//!
//! The registry is the single source of truth mutated by many connections
//! concurrently: live connections and their outbound handles, per-topic
//! subscriber sets, stored credentials, and login sessions. All maps are
//! lock-free `DashMap`s; check-and-mutate sequences go through the entry
//! API so two identical concurrent requests cannot race an invariant (a
//! duplicated subscriber id, a double login) into the maps.
//!
//! The registry is an injected component: every protocol engine receives an
//! `Arc<Registry>` at construction. It is never a process-wide singleton.

use crate::protocol::{ConnectionId, Frame};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Opaque send capability for one connection's outbound direction.
///
/// The reactor registers a handle that encodes the frame, queues the bytes
/// on the connection's write queue, and wakes the control thread. Sending
/// never blocks on the network. Tests register channel-backed fakes.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: Frame);
}

/// Concurrency-safe directory of connections, subscriptions, credentials,
/// and sessions.
pub struct Registry {
    /// Live connections by id.
    connections: DashMap<ConnectionId, Arc<dyn FrameSink>>,
    /// Topic key -> subscriber ids, insertion order, no duplicates.
    /// Empty sets are pruned immediately.
    topics: DashMap<String, Vec<ConnectionId>>,
    /// Username -> password. First write wins, entries are never deleted.
    credentials: DashMap<String, String>,
    /// Username -> connection currently logged in as that user.
    sessions: DashMap<String, ConnectionId>,
    /// Source of `message-id` for every delivered MESSAGE frame.
    message_counter: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            topics: DashMap::new(),
            credentials: DashMap::new(),
            sessions: DashMap::new(),
            message_counter: AtomicU64::new(0),
        }
    }

    /// Register a connection's outbound handle. Called at accept time by the
    /// server and again (idempotently) on successful CONNECT.
    pub fn register_connection(&self, id: ConnectionId, sink: Arc<dyn FrameSink>) {
        self.connections.insert(id, sink);
    }

    /// Remove a connection: drop its outbound handle, purge it from every
    /// topic's subscriber set, and release its session. Idempotent; unknown
    /// ids are a no-op.
    pub fn remove_connection(&self, id: ConnectionId) {
        self.connections.remove(&id);
        self.topics.retain(|_, subscribers| {
            subscribers.retain(|c| *c != id);
            !subscribers.is_empty()
        });
        self.logout(id);
        debug!("connection {} removed from registry", id);
    }

    /// Hand a frame to a connection for sending. Returns `false` if the
    /// connection is unknown (already disconnected).
    pub fn deliver(&self, id: ConnectionId, frame: Frame) -> bool {
        match self.connections.get(&id) {
            Some(sink) => {
                sink.send_frame(frame);
                true
            }
            None => false,
        }
    }

    /// Deliver a frame to every connection subscribed to `topic` at call
    /// time. The subscriber set is snapshotted before delivery so fan-out
    /// never holds a map lock while sending.
    pub fn publish(&self, topic: &str, frame: Frame) {
        let subscribers = match self.topics.get(topic) {
            Some(entry) => entry.clone(),
            None => return,
        };
        for id in subscribers {
            self.deliver(id, frame.clone());
        }
    }

    /// Add `id` to the topic's subscriber set. Idempotent: a connection
    /// appears in a set at most once.
    pub fn subscribe(&self, id: ConnectionId, topic: &str) {
        let mut subscribers = self.topics.entry(topic.to_string()).or_default();
        if !subscribers.contains(&id) {
            subscribers.push(id);
        }
    }

    /// Remove `id` from the topic's subscriber set, pruning the topic entry
    /// if the set becomes empty. Unknown topic or non-member is a no-op.
    pub fn unsubscribe(&self, id: ConnectionId, topic: &str) {
        if let Some(mut subscribers) = self.topics.get_mut(topic) {
            subscribers.retain(|c| *c != id);
        }
        self.topics.remove_if(topic, |_, subscribers| subscribers.is_empty());
    }

    /// Subscriber ids for a topic at this instant.
    pub fn subscribers(&self, topic: &str) -> Vec<ConnectionId> {
        self.topics
            .get(topic)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    pub fn user_exists(&self, login: &str) -> bool {
        self.credentials.contains_key(login)
    }

    pub fn credentials_match(&self, login: &str, passcode: &str) -> bool {
        self.credentials
            .get(login)
            .map(|stored| *stored == passcode)
            .unwrap_or(false)
    }

    /// Store credentials for a new username. First write wins; an existing
    /// password is never overwritten.
    pub fn register_credentials(&self, login: &str, passcode: &str) {
        self.credentials
            .entry(login.to_string())
            .or_insert_with(|| passcode.to_string());
    }

    pub fn is_logged_in(&self, login: &str) -> bool {
        self.sessions.contains_key(login)
    }

    /// Bind `login` to `id`. Returns `false` if the user is already logged
    /// in from a different connection; two racing CONNECTs for the same user
    /// resolve to exactly one winner.
    pub fn login(&self, login: &str, id: ConnectionId) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.sessions.entry(login.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(id);
                true
            }
            Entry::Occupied(entry) => *entry.get() == id,
        }
    }

    /// Release whichever username, if any, is currently bound to `id`.
    pub fn logout(&self, id: ConnectionId) {
        self.sessions.retain(|_, bound| *bound != id);
    }

    /// Next process-wide message id, starting at 1.
    pub fn next_message_id(&self) -> u64 {
        self.message_counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
