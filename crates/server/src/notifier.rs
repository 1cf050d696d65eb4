//! Per-owner pub/sub hub for the push channel.
//!
//! Each authenticated connection registers a bounded outbound queue under its
//! owner id. Publishing serializes the message once and offers it to every
//! queue of that owner without waiting: a full queue drops the message, a
//! closed queue is pruned.

use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use bulkpull_types::{normalize_id, ServerMessage};

use crate::metrics::{record_push_dropped, set_push_connections};

/// One live connection's outbound queue.
pub struct Subscription {
    pub conn_id: Uuid,
    pub tx: mpsc::Sender<String>,
    pub connected_at: Instant,
}

pub struct Notifier {
    subscriptions: DashMap<String, Vec<Subscription>>,
    capacity: usize,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscriptions: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Register a connection for `owner_id`; the receiver feeds its socket.
    pub fn subscribe(&self, owner_id: &str) -> (Uuid, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let conn_id = Uuid::new_v4();
        self.subscriptions
            .entry(normalize_id(owner_id))
            .or_default()
            .push(Subscription {
                conn_id,
                tx,
                connected_at: Instant::now(),
            });
        set_push_connections(self.connection_count());
        (conn_id, rx)
    }

    pub fn unsubscribe(&self, owner_id: &str, conn_id: Uuid) {
        let key = normalize_id(owner_id);
        if let Some(mut subs) = self.subscriptions.get_mut(&key) {
            if let Some(sub) = subs.iter().find(|s| s.conn_id == conn_id) {
                debug!(
                    owner_id = %key,
                    conn_id = %conn_id,
                    connected_secs = sub.connected_at.elapsed().as_secs(),
                    "push connection closed"
                );
            }
            subs.retain(|s| s.conn_id != conn_id);
        }
        self.subscriptions.remove_if(&key, |_, subs| subs.is_empty());
        set_push_connections(self.connection_count());
    }

    /// Fan `message` out to every connection of `owner_id`.
    ///
    /// Returns how many queues accepted it. Best effort: nothing is retried.
    pub fn publish(&self, owner_id: &str, message: &ServerMessage) -> usize {
        let key = normalize_id(owner_id);
        let payload = match serde_json::to_string(message) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, kind = message.kind(), "failed to serialize push message");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut pruned = false;
        if let Some(mut subs) = self.subscriptions.get_mut(&key) {
            subs.retain(|sub| match sub.tx.try_send(payload.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(owner_id = %key, conn_id = %sub.conn_id, kind = message.kind(), "push queue full, dropping message");
                    record_push_dropped();
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    pruned = true;
                    false
                }
            });
        }
        if pruned {
            self.subscriptions.remove_if(&key, |_, subs| subs.is_empty());
            set_push_connections(self.connection_count());
        }
        delivered
    }

    pub fn subscriber_count(&self, owner_id: &str) -> usize {
        self.subscriptions
            .get(&normalize_id(owner_id))
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.subscriptions.iter().map(|entry| entry.value().len()).sum()
    }
}
