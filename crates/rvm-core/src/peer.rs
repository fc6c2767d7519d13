//! Peer-link trait: the engine's view of the message bus.
//! Enables mock injection for testing; `rvm_bus::MessageBus` is the real one.

use std::sync::Arc;
use std::time::Duration;

/// Registration name of the front-end application peer.
pub const APP_PEER: &str = "app";

/// Registration name of the vision classifier peer.
pub const VISION_PEER: &str = "vision";

/// Named peers, each with one overwritable inbox slot.
pub trait PeerLink: Send + Sync {
    /// Consume-once read: returns the pending message and clears the slot.
    fn take(&self, peer: &str) -> Option<String>;

    /// Bounded wait for a message, consuming it. Returns `None` once
    /// `timeout` elapses with the slot still empty.
    fn wait_take(&self, peer: &str, timeout: Duration) -> Option<String>;

    /// Fire-and-forget. Silently dropped (and logged) if the peer is absent.
    fn send(&self, peer: &str, message: &str);

    fn is_connected(&self, peer: &str) -> bool;
}

impl<T: PeerLink + ?Sized> PeerLink for Arc<T> {
    fn take(&self, peer: &str) -> Option<String> {
        (**self).take(peer)
    }

    fn wait_take(&self, peer: &str, timeout: Duration) -> Option<String> {
        (**self).wait_take(peer, timeout)
    }

    fn send(&self, peer: &str, message: &str) {
        (**self).send(peer, message);
    }

    fn is_connected(&self, peer: &str) -> bool {
        (**self).is_connected(peer)
    }
}
