//! WebSocket bus client for the `send` and `listen` subcommands.

use std::net::SocketAddr;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use rvm_core::EventEnvelope;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type BusStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Photo payloads longer than this are elided when printed.
const PHOTO_PREVIEW_LEN: usize = 16;

/// Connect to the bus and register as `name`.
pub async fn connect(addr: SocketAddr, name: &str) -> anyhow::Result<BusStream> {
    let url = format!("ws://{addr}");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .with_context(|| format!("cannot connect to bus at {url}"))?;
    ws.send(Message::Text(name.to_owned()))
        .await
        .context("registration failed")?;
    Ok(ws)
}

/// `rvmd send`: register, send one message, print replies for a while.
pub async fn cmd_send(
    addr: SocketAddr,
    name: &str,
    message: &str,
    listen_secs: u64,
) -> anyhow::Result<()> {
    let mut ws = connect(addr, name).await?;
    ws.send(Message::Text(message.to_owned())).await?;
    let deadline = Instant::now() + Duration::from_secs(listen_secs);
    print_events(&mut ws, Some(deadline)).await?;
    let _ = ws.close(None).await;
    Ok(())
}

/// `rvmd listen`: register and print everything the daemon sends.
pub async fn cmd_listen(addr: SocketAddr, name: &str, secs: Option<u64>) -> anyhow::Result<()> {
    let mut ws = connect(addr, name).await?;
    let deadline = secs.map(|s| Instant::now() + Duration::from_secs(s));
    tokio::select! {
        result = print_events(&mut ws, deadline) => result?,
        _ = tokio::signal::ctrl_c() => {}
    }
    let _ = ws.close(None).await;
    Ok(())
}

/// Print text frames until `deadline` passes or the daemon hangs up.
async fn print_events(ws: &mut BusStream, deadline: Option<Instant>) -> anyhow::Result<()> {
    loop {
        let next = match deadline {
            Some(at) => match tokio::time::timeout_at(at, ws.next()).await {
                Ok(next) => next,
                Err(_) => return Ok(()),
            },
            None => ws.next().await,
        };
        match next {
            Some(Ok(Message::Text(text))) => println!("{}", format_event(&text)),
            Some(Ok(Message::Close(_))) | None => {
                eprintln!("bus closed the connection");
                return Ok(());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

/// One line per event: `timestamp event {data}`. Non-envelope text is
/// printed as-is.
pub(crate) fn format_event(text: &str) -> String {
    let Ok(mut envelope) = serde_json::from_str::<EventEnvelope>(text) else {
        return text.to_owned();
    };
    if let Some(Value::String(photo)) = envelope.data.get_mut("photo_base64") {
        if photo.len() > PHOTO_PREVIEW_LEN {
            let len = photo.len();
            photo.truncate(PHOTO_PREVIEW_LEN);
            photo.push_str(&format!("...({len} chars)"));
        }
    }
    if envelope.data.is_empty() {
        format!("{} {}", envelope.timestamp, envelope.event)
    } else {
        let data = serde_json::to_string(&envelope.data).unwrap_or_default();
        format!("{} {} {}", envelope.timestamp, envelope.event, data)
    }
}
