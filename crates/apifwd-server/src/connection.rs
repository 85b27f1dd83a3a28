//! Per-socket outbound handles.
//!
//! The transport task owns the socket and drains an unbounded queue into it.
//! Everything else (handler, registry) holds a cloneable [`ConnectionHandle`]
//! that pushes into that queue, so sending never awaits socket I/O.

use apifwd_core::encode;
use serde::Serialize;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::warn;

/// Server-assigned connection identity.
pub type ConnId = u64;

/// An instruction for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send one text frame.
    Text(String),
    /// Close the socket; the writer stops after this.
    Close,
}

/// Cheap, cloneable reference to one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnId,
    remote_addr: Option<SocketAddr>,
    tx: mpsc::UnboundedSender<Outbound>,
}

/// Create a handle and the receiving end its writer task drains.
pub fn channel(
    id: ConnId,
    remote_addr: Option<SocketAddr>,
) -> (ConnectionHandle, mpsc::UnboundedReceiver<Outbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ConnectionHandle {
            id,
            remote_addr,
            tx,
        },
        rx,
    )
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Queue a pre-encoded frame. Returns `false` if the writer is gone.
    pub fn send_text(&self, text: String) -> bool {
        self.tx.send(Outbound::Text(text)).is_ok()
    }

    /// Encode and queue a message.
    pub fn send<T: Serialize>(&self, message: &T) -> bool {
        match encode(message) {
            Ok(text) => self.send_text(text),
            Err(e) => {
                warn!(conn_id = self.id, error = %e, "failed to encode outbound message");
                false
            }
        }
    }

    /// Ask the writer to close the socket.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    /// Whether the writer task is still draining this connection's queue.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apifwd_core::Envelope;

    #[test]
    fn send_and_close_are_queued_in_order() {
        let (handle, mut rx) = channel(7, None);
        assert!(handle.send(&Envelope::pong("p1")));
        handle.close();

        match rx.try_recv().unwrap() {
            Outbound::Text(text) => assert!(text.contains(r#""id":"p1""#)),
            other => panic!("expected text, got {other:?}"),
        }
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
    }

    #[test]
    fn dropped_writer_marks_handle_closed() {
        let (handle, rx) = channel(1, None);
        assert!(handle.is_open());
        drop(rx);
        assert!(!handle.is_open());
        assert!(!handle.send_text("{}".into()));
    }
}
