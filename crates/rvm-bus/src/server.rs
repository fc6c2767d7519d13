use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, mpsc};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::bus::{MessageBus, OUTBOUND_QUEUE};
use crate::error::BusError;

// ---------------------------------------------------------------------------
// BusServer
// ---------------------------------------------------------------------------

/// Default maximum number of concurrent peer connections.
pub const DEFAULT_MAX_PEERS: usize = 16;

/// How long a fresh connection has to send its registration name.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_NAME_LEN: usize = 64;

/// WebSocket listener in front of a [`MessageBus`].
///
/// Protocol: the first text frame a client sends is its peer name. Every
/// later text frame lands in that peer's inbox slot; everything queued for
/// the peer on the bus is written back as text frames.
pub struct BusServer {
    addr: SocketAddr,
    bus: Arc<MessageBus>,
    cancel: CancellationToken,
    max_peers: usize,
}

impl BusServer {
    pub fn new(addr: SocketAddr, bus: Arc<MessageBus>, cancel: CancellationToken) -> Self {
        Self {
            addr,
            bus,
            cancel,
            max_peers: DEFAULT_MAX_PEERS,
        }
    }

    pub fn with_max_peers(mut self, max: usize) -> Self {
        self.max_peers = max;
        self
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Bind, then accept connections until the cancellation token fires.
    pub async fn run(&self) -> Result<(), BusError> {
        let (listener, _) = self.bind().await?;
        self.serve(listener).await
    }

    /// Bind to the configured address and return the actual local address.
    /// Binding port 0 yields an OS-assigned port.
    pub async fn bind(&self) -> Result<(TcpListener, SocketAddr), BusError> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, max_peers = self.max_peers, "bus listening");
        Ok((listener, local_addr))
    }

    /// Run the accept loop on a pre-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BusError> {
        let semaphore = Arc::new(Semaphore::new(self.max_peers));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote)) => {
                            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                                tracing::warn!(
                                    remote = %remote,
                                    max = self.max_peers,
                                    "bus: connection limit reached, rejecting"
                                );
                                drop(stream);
                                continue;
                            };
                            tracing::debug!(remote = %remote, "bus: TCP connection accepted");
                            let bus = Arc::clone(&self.bus);
                            let cancel = self.cancel.clone();
                            tokio::spawn(async move {
                                let _permit = permit;
                                match tokio_tungstenite::accept_async(stream).await {
                                    Ok(ws) => {
                                        if let Err(e) = handle_peer(ws, bus, cancel).await {
                                            tracing::debug!(
                                                remote = %remote,
                                                error = %e,
                                                "peer handler finished with error"
                                            );
                                        }
                                    }
                                    Err(e) => {
                                        tracing::debug!(
                                            remote = %remote,
                                            error = %e,
                                            "ws handshake failed"
                                        );
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "bus: TCP accept failed");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("bus server: cancellation requested, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-peer handler
// ---------------------------------------------------------------------------

async fn handle_peer(
    ws: WebSocketStream<TcpStream>,
    bus: Arc<MessageBus>,
    cancel: CancellationToken,
) -> Result<(), BusError> {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let name = tokio::select! {
        result = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_name(&mut ws_rx)) => {
            match result {
                Ok(name) => name?,
                Err(_) => return Err(BusError::Handshake("no registration name received".into())),
            }
        }
        _ = cancel.cancelled() => return Ok(()),
    };

    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
    let conn = bus.register(&name, out_tx);

    let result = peer_loop(&name, &mut ws_tx, &mut ws_rx, &mut out_rx, &bus, &cancel).await;

    bus.unregister(&name, conn);
    result
}

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

async fn peer_loop(
    name: &str,
    ws_tx: &mut WsSink,
    ws_rx: &mut WsSource,
    out_rx: &mut mpsc::Receiver<String>,
    bus: &MessageBus,
    cancel: &CancellationToken,
) -> Result<(), BusError> {
    loop {
        tokio::select! {
            // --- inbound frame ---
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        tracing::debug!(peer = %name, error = %e, "ws read error, dropping peer");
                        return Err(e.into());
                    }
                    None => {
                        tracing::debug!(peer = %name, "peer stream ended");
                        return Ok(());
                    }
                };
                match msg {
                    Message::Text(text) => {
                        tracing::trace!(peer = %name, message = %text, "inbound");
                        bus.deliver(name, text);
                    }
                    Message::Ping(data) => ws_tx.send(Message::Pong(data)).await?,
                    Message::Close(_) => {
                        tracing::debug!(peer = %name, "peer sent close frame");
                        return Ok(());
                    }
                    _ => {}
                }
            }

            // --- outbound queue ---
            out = out_rx.recv() => {
                let Some(text) = out else {
                    // Sender dropped: a newer registration replaced this one.
                    tracing::debug!(peer = %name, "outbound queue closed, dropping connection");
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return Ok(());
                };
                ws_tx.send(Message::Text(text)).await?;
            }

            // --- cancellation ---
            _ = cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
}

/// Read frames until the first text frame and validate it as a peer name.
async fn read_name(ws_rx: &mut WsSource) -> Result<String, BusError> {
    while let Some(msg) = ws_rx.next().await {
        match msg? {
            Message::Text(text) => return validate_name(&text),
            Message::Close(_) => break,
            _ => continue,
        }
    }
    Err(BusError::Handshake("connection closed before registration".into()))
}

fn validate_name(raw: &str) -> Result<String, BusError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(BusError::Handshake("empty peer name".into()));
    }
    if name.len() > MAX_NAME_LEN || name.chars().any(char::is_whitespace) {
        return Err(BusError::Handshake(format!("invalid peer name: {name:?}")));
    }
    Ok(name.to_owned())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
