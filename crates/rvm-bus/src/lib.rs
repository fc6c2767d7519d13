//! rvm-bus: named-peer message bus over WebSocket.
//!
//! [`MessageBus`] is the synchronous peer table the state machine reads
//! from; [`BusServer`] accepts connections, runs the name handshake and
//! shuttles frames between sockets and the table.

pub mod bus;
pub mod error;
pub mod server;

pub use bus::{ConnId, InboxMessage, MessageBus, OUTBOUND_QUEUE, Outbound, PeerInfo};
pub use error::BusError;
pub use server::{BusServer, DEFAULT_MAX_PEERS};
