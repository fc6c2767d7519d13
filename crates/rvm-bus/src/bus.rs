//! Peer table with one overwritable inbox slot per peer.
//!
//! Inbound text replaces whatever the slot held: at most one unread message
//! is kept per peer. Outbound text goes onto the peer's bounded connection
//! task queue; `send` never blocks the caller and drops when it is full.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rvm_core::PeerLink;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::BusError;

/// Queue feeding one peer's connection task.
pub type Outbound = mpsc::Sender<String>;

/// Capacity of each peer's outbound queue.
pub const OUTBOUND_QUEUE: usize = 64;

/// Identifies one registration. A later registration under the same name
/// gets a new id, so the old connection cannot unregister it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxMessage {
    pub text: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerInfo {
    pub name: String,
    pub registered_at: DateTime<Utc>,
    pub pending: bool,
}

#[derive(Debug)]
struct PeerSlot {
    conn: ConnId,
    outbound: Outbound,
    registered_at: DateTime<Utc>,
    inbox: Option<InboxMessage>,
}

#[derive(Debug, Default)]
pub struct MessageBus {
    peers: Mutex<HashMap<String, PeerSlot>>,
    arrived: Condvar,
    next_conn: AtomicU64,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PeerSlot>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─── Registration ─────────────────────────────────────────────

    /// Register `name`, replacing any earlier connection under that name.
    pub fn register(&self, name: &str, outbound: Outbound) -> ConnId {
        let conn = ConnId(self.next_conn.fetch_add(1, Ordering::Relaxed));
        let previous = self.lock().insert(
            name.to_owned(),
            PeerSlot {
                conn,
                outbound,
                registered_at: Utc::now(),
                inbox: None,
            },
        );
        if previous.is_some() {
            tracing::warn!(peer = %name, "peer re-registered, replacing older connection");
        } else {
            tracing::info!(peer = %name, "peer registered");
        }
        conn
    }

    /// Remove `name` and its inbox, but only if `conn` is still the
    /// current registration. Returns whether anything was removed.
    pub fn unregister(&self, name: &str, conn: ConnId) -> bool {
        let mut peers = self.lock();
        if peers.get(name).is_some_and(|slot| slot.conn == conn) {
            peers.remove(name);
            drop(peers);
            tracing::info!(peer = %name, "peer disconnected");
            true
        } else {
            false
        }
    }

    // ─── Inbound ──────────────────────────────────────────────────

    /// Store an inbound message, overwriting any unread one.
    pub fn deliver(&self, name: &str, text: impl Into<String>) {
        let mut peers = self.lock();
        let Some(slot) = peers.get_mut(name) else {
            tracing::debug!(peer = %name, "message from unregistered peer dropped");
            return;
        };
        if let Some(old) = slot.inbox.replace(InboxMessage {
            text: text.into(),
            received_at: Utc::now(),
        }) {
            tracing::debug!(peer = %name, dropped = %old.text, "unread message overwritten");
        }
        drop(peers);
        self.arrived.notify_all();
    }

    /// Consume-once read.
    pub fn get_command(&self, name: &str) -> Option<String> {
        self.take_message(name).map(|m| m.text)
    }

    /// Consume-once read that keeps the arrival time.
    pub fn take_message(&self, name: &str) -> Option<InboxMessage> {
        self.lock().get_mut(name).and_then(|slot| slot.inbox.take())
    }

    /// Peek without clearing.
    pub fn get_state(&self, name: &str) -> Option<String> {
        self.lock()
            .get(name)
            .and_then(|slot| slot.inbox.as_ref())
            .map(|m| m.text.clone())
    }

    /// Block the calling thread until a message for `name` arrives or
    /// `timeout` elapses. Consumes the message.
    pub fn wait_for(&self, name: &str, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        let mut peers = self.lock();
        loop {
            if let Some(msg) = peers.get_mut(name).and_then(|slot| slot.inbox.take()) {
                return Some(msg.text);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            peers = self
                .arrived
                .wait_timeout(peers, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    // ─── Outbound ─────────────────────────────────────────────────

    pub fn try_send(&self, name: &str, message: &str) -> Result<(), BusError> {
        let peers = self.lock();
        let slot = peers
            .get(name)
            .ok_or_else(|| BusError::PeerAbsent(name.to_owned()))?;
        slot.outbound
            .try_send(message.to_owned())
            .map_err(|e| match e {
                TrySendError::Full(_) => BusError::PeerBacklogged(name.to_owned()),
                TrySendError::Closed(_) => BusError::PeerClosed(name.to_owned()),
            })
    }

    /// Best-effort send to every registered peer. Returns how many queued it.
    pub fn broadcast(&self, message: &str) -> usize {
        let peers = self.lock();
        peers
            .iter()
            .filter(|(name, slot)| match slot.outbound.try_send(message.to_owned()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(peer = %name, "broadcast dropped, queue full");
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(peer = %name, "broadcast to closed peer skipped");
                    false
                }
            })
            .count()
    }

    // ─── Introspection ────────────────────────────────────────────

    pub fn is_registered(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<_> = self
            .lock()
            .iter()
            .map(|(name, slot)| PeerInfo {
                name: name.clone(),
                registered_at: slot.registered_at,
                pending: slot.inbox.is_some(),
            })
            .collect();
        peers.sort_by(|a, b| a.name.cmp(&b.name));
        peers
    }
}

impl PeerLink for MessageBus {
    fn take(&self, peer: &str) -> Option<String> {
        self.get_command(peer)
    }

    fn wait_take(&self, peer: &str, timeout: Duration) -> Option<String> {
        self.wait_for(peer, timeout)
    }

    fn send(&self, peer: &str, message: &str) {
        if let Err(e) = self.try_send(peer, message) {
            tracing::warn!(peer = %peer, error = %e, "send dropped");
        }
    }

    fn is_connected(&self, peer: &str) -> bool {
        self.is_registered(peer)
    }
}
