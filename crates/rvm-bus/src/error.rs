//! Error types for the message bus.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("peer not registered: {0}")]
    PeerAbsent(String),

    #[error("peer connection closed: {0}")]
    PeerClosed(String),

    #[error("peer outbound queue full, message dropped: {0}")]
    PeerBacklogged(String),

    #[error("registration handshake failed: {0}")]
    Handshake(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("bus io error: {0}")]
    Io(#[from] std::io::Error),
}
