//! WebSocket listener using tokio-tungstenite.
//!
//! Accepts TCP connections, performs the WebSocket upgrade, and hands each
//! upgraded stream to the server through a channel.

use apifwd_core::{RelayError, RelayResult};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::error::{CapacityError, Error as WsError};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

pub type WsStream = WebSocketStream<TcpStream>;
pub type WsSink = SplitSink<WsStream, Message>;
pub type WsSource = SplitStream<WsStream>;

/// Frames up to this multiple of `max_frame_size` are read and discarded so
/// the connection survives; anything larger is refused by tungstenite.
const OVERSIZE_HEADROOM: usize = 4;

/// Largest message tungstenite will buffer for a given frame limit.
pub fn transport_limit(max_frame_size: usize) -> usize {
    max_frame_size.saturating_mul(OVERSIZE_HEADROOM)
}

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: WsStream,
    pub remote_addr: SocketAddr,
}

/// A bound listener and the stream of connections it accepts.
pub struct WebSocketListener {
    pub local_addr: SocketAddr,
    pub connections: mpsc::Receiver<WebSocketConnection>,
    /// Owns the listening socket; aborting it stops accepting and closes the port.
    pub accept_task: JoinHandle<()>,
}

/// Bind `bind_addr` and start accepting WebSocket connections.
pub async fn start_listener(
    bind_addr: SocketAddr,
    max_frame_size: usize,
) -> RelayResult<WebSocketListener> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| RelayError::Transport(format!("WS bind {bind_addr} failed: {e}")))?;
    let local_addr = tcp_listener.local_addr()?;

    let limit = transport_limit(max_frame_size);
    let ws_config = WebSocketConfig {
        max_message_size: Some(limit),
        max_frame_size: Some(limit),
        ..Default::default()
    };

    info!(addr = %local_addr, transport_limit = limit, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);

    let accept_task = tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        match tokio_tungstenite::accept_async_with_config(stream, Some(ws_config))
                            .await
                        {
                            Ok(ws_stream) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    Ok(WebSocketListener {
        local_addr,
        connections: rx,
        accept_task,
    })
}

/// One unit of inbound traffic.
#[derive(Debug)]
pub enum Inbound {
    /// A text or binary frame's payload.
    Frame(Vec<u8>),
    /// A frame over the size limit; its payload was discarded.
    Oversized(usize),
    /// A frame over the transport limit. Its payload is still on the wire,
    /// so the connection cannot be read any further.
    TooLarge(usize),
    /// The peer closed the connection.
    Closed,
}

/// Receive the next data frame.
///
/// Text and binary frames are both returned as bytes. Control frames are
/// skipped; tungstenite answers pings on its own.
pub async fn ws_recv(source: &mut WsSource, max_frame_size: usize) -> RelayResult<Inbound> {
    loop {
        let data = match source.next().await {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Close(_))) | None => return Ok(Inbound::Closed),
            Some(Ok(_)) => continue,
            Some(Err(WsError::Capacity(CapacityError::MessageTooLong { size, .. }))) => {
                return Ok(Inbound::TooLarge(size));
            }
            Some(Err(e)) => return Err(RelayError::Transport(format!("WS recv failed: {e}"))),
        };
        if data.len() > max_frame_size {
            return Ok(Inbound::Oversized(data.len()));
        }
        return Ok(Inbound::Frame(data));
    }
}

/// Send one text frame.
pub async fn ws_send_text(sink: &mut WsSink, text: String) -> RelayResult<()> {
    sink.send(Message::Text(text))
        .await
        .map_err(|e| RelayError::Transport(format!("WS send failed: {e}")))
}

/// Start the close handshake and flush it.
pub async fn ws_close(sink: &mut WsSink) -> RelayResult<()> {
    sink.close()
        .await
        .map_err(|e| RelayError::Transport(format!("WS close failed: {e}")))
}
