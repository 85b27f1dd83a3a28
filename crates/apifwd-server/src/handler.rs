//! Per-connection message handling.
//!
//! The transport read loop feeds frames here one at a time and awaits each
//! call before reading the next, so a connection's messages are handled in
//! arrival order.

use crate::connection::ConnectionHandle;
use crate::session::{AuthOutcome, RouteOutcome, SessionRegistry};
use apifwd_core::{
    frame_text, parse_envelope, Envelope, ErrorCode, ErrorMessage, MsgType, ParseError,
    RelayError,
};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Dispatches one connection's inbound frames to the session registry.
pub struct ConnectionHandler {
    conn: ConnectionHandle,
    registry: Arc<SessionRegistry>,
}

impl ConnectionHandler {
    pub fn new(conn: ConnectionHandle, registry: Arc<SessionRegistry>) -> Self {
        Self { conn, registry }
    }

    /// Handle one inbound frame. Never fails; a bad frame only costs itself.
    pub async fn on_message(&self, frame: &[u8]) {
        let raw = match frame_text(frame) {
            Ok(raw) => raw,
            Err(e) => return self.on_parse_error(e),
        };
        let envelope = match parse_envelope(raw) {
            Ok(envelope) => envelope,
            Err(e) => return self.on_parse_error(e),
        };

        match envelope {
            Envelope::Auth(auth) => {
                if let AuthOutcome::Paired { session_id } =
                    self.registry.handle_auth(&self.conn, &auth).await
                {
                    debug!(conn_id = self.conn.id(), session_id = %session_id, "joined session");
                }
            }
            Envelope::Request(request) => {
                let outcome = self.registry.handle_request(&self.conn, &request, raw).await;
                self.trace_route(MsgType::Request, &outcome);
            }
            Envelope::Response(response) => {
                let outcome = self.registry.handle_response(&self.conn, &response, raw).await;
                self.trace_route(MsgType::Response, &outcome);
            }
            Envelope::Ping(ping) => {
                self.conn.send(&Envelope::pong(ping.id));
            }
            other => {
                debug!(
                    conn_id = self.conn.id(),
                    msg_type = %other.msg_type(),
                    id = %other.id(),
                    "ignoring message"
                );
            }
        }
    }

    /// A frame exceeded the transport's size limit and was discarded unread.
    pub fn on_oversized(&self, len: usize, max: usize) {
        self.on_parse_error(ParseError::Malformed(format!(
            "frame too large: {len} bytes (max {max})"
        )));
    }

    /// The socket is gone: release everything the registry holds for it.
    pub async fn on_close(&self) {
        self.registry.handle_disconnect(&self.conn).await;
    }

    /// Log a transport error. Closing is left to the transport.
    pub fn on_error(&self, err: &RelayError) {
        warn!(conn_id = self.conn.id(), error = %err, "connection error");
    }

    fn trace_route(&self, msg_type: MsgType, outcome: &RouteOutcome) {
        match outcome {
            RouteOutcome::Forwarded { session_id } => {
                trace!(conn_id = self.conn.id(), session_id = %session_id, %msg_type, "forwarded");
            }
            RouteOutcome::Rejected(code) => {
                trace!(conn_id = self.conn.id(), code = %code, %msg_type, "not forwarded");
            }
        }
    }

    fn on_parse_error(&self, err: ParseError) {
        match err {
            ParseError::UnknownType(tag) => {
                warn!(conn_id = self.conn.id(), msg_type = %tag, "unknown message type");
            }
            ParseError::Malformed(reason) => {
                warn!(conn_id = self.conn.id(), reason = %reason, "failed to parse message");
                self.conn.send(&Envelope::Error(ErrorMessage::new(
                    ErrorCode::ParseError,
                    "could not parse message",
                )));
            }
        }
    }
}
