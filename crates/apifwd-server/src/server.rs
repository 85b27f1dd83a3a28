//! Core server: accepts connections and runs one handler per socket.
//!
//! Owns the shared session registry and coordinates the lifecycle of every
//! connection. Each socket gets a reader loop (feeding the
//! [`ConnectionHandler`]) and a writer task draining its outbound queue.

use crate::config::ServerConfig;
use crate::connection::{self, ConnId, Outbound};
use crate::handler::ConnectionHandler;
use crate::session::SessionRegistry;
use crate::transport::websocket::{self, Inbound, WebSocketConnection, WebSocketListener};
use apifwd_core::RelayResult;
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// The relay server, before it is started.
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
}

/// A running relay. Dropping it without [`ServerHandle::stop`] leaves
/// connections to be torn down by the runtime.
pub struct ServerHandle {
    local_addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    accept_task: JoinHandle<()>,
    dispatch_task: JoinHandle<()>,
    /// Broadcast sender for server shutdown notification.
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Create a new server instance.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    /// Bind the listener and start accepting connections.
    pub async fn start(self) -> RelayResult<ServerHandle> {
        let bind_addr = self.config.bind_addr()?;
        let WebSocketListener {
            local_addr,
            mut connections,
            accept_task,
        } = websocket::start_listener(bind_addr, self.config.max_frame_size).await?;

        let (shutdown_tx, _) = broadcast::channel(1);
        let max_frame_size = self.config.max_frame_size;

        let registry = self.registry.clone();
        let dispatch_shutdown = shutdown_tx.clone();
        let dispatch_task = tokio::spawn(async move {
            let next_conn_id = AtomicU64::new(1);
            while let Some(ws_conn) = connections.recv().await {
                let conn_id = next_conn_id.fetch_add(1, Ordering::Relaxed);
                let registry = registry.clone();
                let shutdown_rx = dispatch_shutdown.subscribe();
                tokio::spawn(serve_connection(
                    ws_conn,
                    conn_id,
                    registry,
                    max_frame_size,
                    shutdown_rx,
                ));
            }
            debug!("connection dispatch loop ended");
        });

        info!(addr = %local_addr, max_frame_size, "apifwd-server ready");

        Ok(ServerHandle {
            local_addr,
            registry: self.registry,
            accept_task,
            dispatch_task,
            shutdown_tx,
        })
    }
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[cfg(test)]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Close every registered connection, then stop listening.
    pub async fn stop(self) {
        let stats = self.registry.stats().await;
        info!(
            pending = stats.pending,
            sessions = stats.sessions,
            "stopping, closing registered connections"
        );
        self.registry.clear().await;

        self.accept_task.abort();
        self.dispatch_task.abort();

        // Connections that never authenticated are not in the registry.
        let _ = self.shutdown_tx.send(());
        info!("listener closed");
    }
}

/// Run one connection until either side closes it.
async fn serve_connection(
    ws_conn: WebSocketConnection,
    conn_id: ConnId,
    registry: Arc<SessionRegistry>,
    max_frame_size: usize,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let remote = ws_conn.remote_addr;
    info!(conn_id, remote = %remote, "new connection");

    let (mut sink, mut source) = ws_conn.ws_stream.split();
    let (handle, mut outbound_rx) = connection::channel(conn_id, Some(remote));

    let mut writer = tokio::spawn(async move {
        while let Some(out) = outbound_rx.recv().await {
            match out {
                Outbound::Text(text) => {
                    if let Err(e) = websocket::ws_send_text(&mut sink, text).await {
                        debug!(conn_id, error = %e, "write failed");
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = websocket::ws_close(&mut sink).await;
                    break;
                }
            }
        }
    });

    let handler = ConnectionHandler::new(handle.clone(), registry);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!(conn_id, "shutdown signal received");
                break;
            }
            _ = &mut writer => {
                debug!(conn_id, "writer finished");
                break;
            }
            inbound = websocket::ws_recv(&mut source, max_frame_size) => {
                match inbound {
                    Ok(Inbound::Frame(data)) => handler.on_message(&data).await,
                    Ok(Inbound::Oversized(len)) => handler.on_oversized(len, max_frame_size),
                    Ok(Inbound::TooLarge(len)) => {
                        handler.on_oversized(len, max_frame_size);
                        break;
                    }
                    Ok(Inbound::Closed) => break,
                    Err(e) => {
                        handler.on_error(&e);
                        break;
                    }
                }
            }
        }
    }

    handler.on_close().await;
    if !writer.is_finished() {
        handle.close();
        let _ = writer.await;
    }

    info!(conn_id, remote = %remote, "connection closed");
}
