//! Session registry: pairing, session bookkeeping and message routing.
//!
//! A pairing key moves through `Empty → Pending → Paired → Empty`. The first
//! `auth` for a key parks its connection as pending; the first connection with
//! the opposite role completes the pairing. All tables sit behind one mutex
//! and every operation holds it for its full duration, so two racing `auth`
//! messages for the same key can never produce two sessions.

use crate::connection::{ConnId, ConnectionHandle};
use apifwd_core::{
    now_millis, ApiRequest, ApiResponse, AuthAck, AuthMessage, ClientInfo, Envelope, ErrorCode,
    ErrorMessage, MatchedPeer, Role,
};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A connection that authenticated and is waiting for its peer.
#[derive(Debug, Clone)]
pub struct PendingConnection {
    pub conn: ConnectionHandle,
    pub role: Role,
    /// Epoch millis of the `auth` that parked this connection.
    pub connected_at: u64,
    /// Id of that `auth` message; the pairing ack is correlated to it.
    pub auth_id: String,
    pub client_info: Option<ClientInfo>,
}

/// A live frontend/client pair.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub pairing_key: String,
    pub frontend: ConnectionHandle,
    pub client: ConnectionHandle,
    pub created_at: u64,
    pub last_activity: u64,
}

impl Session {
    /// The side of this session that is not `conn`, or `None` if `conn` is not a member.
    pub fn peer_of(&self, conn: ConnId) -> Option<&ConnectionHandle> {
        if self.frontend.id() == conn {
            Some(&self.client)
        } else if self.client.id() == conn {
            Some(&self.frontend)
        } else {
            None
        }
    }
}

/// What `handle_auth` did with an `auth` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Parked as the first peer for the key.
    Waiting,
    /// Completed a pairing.
    Paired { session_id: String },
    /// A peer with the same role is already waiting; the newcomer was closed.
    RoleConflict,
    /// The key already has an active session; the newcomer was closed.
    KeyInUse,
    /// This connection already holds a pending entry or a session.
    AlreadyAuthenticated,
}

/// What `handle_request` / `handle_response` did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Forwarded { session_id: String },
    Rejected(ErrorCode),
}

/// Table sizes, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub pending: usize,
    pub sessions: usize,
    pub indexed: usize,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Pairing key → waiting connection.
    pending: HashMap<String, PendingConnection>,
    /// Session id → session.
    sessions: HashMap<String, Session>,
    /// Pairing key → session id, for keys in the Paired state.
    keys: HashMap<String, String>,
    /// Connection → session id.
    index: HashMap<ConnId, String>,
}

impl RegistryState {
    fn holds(&self, conn: ConnId) -> bool {
        self.index.contains_key(&conn) || self.pending.values().any(|p| p.conn.id() == conn)
    }

    /// Resolve the session and peer for a sender, bumping `last_activity`.
    fn route(&mut self, conn: ConnId) -> Result<(String, ConnectionHandle), ErrorCode> {
        let session_id = self
            .index
            .get(&conn)
            .cloned()
            .ok_or(ErrorCode::NotAuthenticated)?;
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(ErrorCode::SessionNotFound)?;
        let peer = session
            .peer_of(conn)
            .cloned()
            .ok_or(ErrorCode::SessionNotFound)?;
        session.last_activity = now_millis();
        Ok((session_id, peer))
    }
}

/// Owns every pending entry, session and index record.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle an `auth` message from `conn`.
    pub async fn handle_auth(&self, conn: &ConnectionHandle, auth: &AuthMessage) -> AuthOutcome {
        let mut state = self.state.lock().await;
        let key = auth.pairing_key.as_str();

        debug!(
            conn_id = conn.id(),
            remote = ?conn.remote_addr(),
            role = %auth.role,
            key = %key_prefix(key),
            "auth request"
        );

        if state.holds(conn.id()) {
            warn!(conn_id = conn.id(), "auth on an already authenticated connection");
            conn.send(&AuthAck::rejected(&auth.id, "connection already authenticated"));
            return AuthOutcome::AlreadyAuthenticated;
        }

        if let Some(session_id) = state.keys.get(key) {
            warn!(
                conn_id = conn.id(),
                key = %key_prefix(key),
                session_id = %session_id,
                "pairing key already has an active session"
            );
            conn.send(&AuthAck::rejected(&auth.id, "pairing key already in use"));
            conn.send(&Envelope::Error(ErrorMessage::new(
                ErrorCode::KeyInUse,
                "pairing key already has an active session",
            )));
            conn.close();
            return AuthOutcome::KeyInUse;
        }

        let Some(waiting) = state.pending.remove(key) else {
            state.pending.insert(
                key.to_string(),
                PendingConnection {
                    conn: conn.clone(),
                    role: auth.role,
                    connected_at: now_millis(),
                    auth_id: auth.id.clone(),
                    client_info: auth.client_info.clone(),
                },
            );
            conn.send(&AuthAck::waiting(&auth.id));
            info!(conn_id = conn.id(), role = %auth.role, key = %key_prefix(key), "waiting for peer");
            return AuthOutcome::Waiting;
        };

        if waiting.role == auth.role {
            warn!(
                conn_id = conn.id(),
                role = %auth.role,
                key = %key_prefix(key),
                "role already present, rejecting"
            );
            state.pending.insert(key.to_string(), waiting);
            conn.send(&AuthAck::rejected(&auth.id, "role already present"));
            conn.close();
            return AuthOutcome::RoleConflict;
        }

        let now = now_millis();
        let session_id = generate_session_id();
        let (frontend, client) = match auth.role {
            Role::Frontend => (conn.clone(), waiting.conn.clone()),
            Role::Client => (waiting.conn.clone(), conn.clone()),
        };
        let (frontend_id, client_id) = (frontend.id(), client.id());

        state.index.insert(frontend_id, session_id.clone());
        state.index.insert(client_id, session_id.clone());
        state.keys.insert(key.to_string(), session_id.clone());
        state.sessions.insert(
            session_id.clone(),
            Session {
                id: session_id.clone(),
                pairing_key: key.to_string(),
                frontend,
                client,
                created_at: now,
                last_activity: now,
            },
        );

        waiting.conn.send(&AuthAck::paired(
            &waiting.auth_id,
            MatchedPeer {
                role: auth.role,
                connected_at: now,
            },
        ));
        conn.send(&AuthAck::paired(
            &auth.id,
            MatchedPeer {
                role: waiting.role,
                connected_at: waiting.connected_at,
            },
        ));

        info!(
            session_id = %session_id,
            key = %key_prefix(key),
            frontend = frontend_id,
            client = client_id,
            waiting_info = ?waiting.client_info,
            joining_info = ?auth.client_info,
            "session created"
        );

        AuthOutcome::Paired { session_id }
    }

    /// Forward a `request` to the sender's session peer.
    ///
    /// `raw` is the frame exactly as received; it is what the peer gets.
    pub async fn handle_request(
        &self,
        conn: &ConnectionHandle,
        request: &ApiRequest,
        raw: &str,
    ) -> RouteOutcome {
        let mut state = self.state.lock().await;

        let (session_id, peer) = match state.route(conn.id()) {
            Ok(route) => route,
            Err(code) => {
                let message = match code {
                    ErrorCode::NotAuthenticated => "connection is not paired",
                    _ => "session not found",
                };
                debug!(conn_id = conn.id(), request_id = %request.request_id, code = %code, "request rejected");
                conn.send(&Envelope::Error(ErrorMessage::new(code, message)));
                return RouteOutcome::Rejected(code);
            }
        };

        if !peer.send_text(raw.to_string()) {
            warn!(session_id = %session_id, peer = peer.id(), "peer queue closed, request dropped");
            return RouteOutcome::Rejected(ErrorCode::PeerDisconnected);
        }
        debug!(
            session_id = %session_id,
            request_id = %request.request_id,
            plugin = %request.plugin_id,
            method = %request.method_name,
            "forwarded request"
        );

        RouteOutcome::Forwarded { session_id }
    }

    /// Forward a `response` to the sender's session peer.
    ///
    /// Best effort: lookup failures are logged and the response is dropped
    /// without telling the sender.
    pub async fn handle_response(
        &self,
        conn: &ConnectionHandle,
        response: &ApiResponse,
        raw: &str,
    ) -> RouteOutcome {
        let mut state = self.state.lock().await;

        let (session_id, peer) = match state.route(conn.id()) {
            Ok(route) => route,
            Err(code) => {
                warn!(conn_id = conn.id(), request_id = %response.request_id, code = %code, "dropping response");
                return RouteOutcome::Rejected(code);
            }
        };

        if !peer.send_text(raw.to_string()) {
            warn!(session_id = %session_id, peer = peer.id(), "peer queue closed, response dropped");
            return RouteOutcome::Rejected(ErrorCode::PeerDisconnected);
        }
        debug!(
            session_id = %session_id,
            request_id = %response.request_id,
            success = response.success,
            "forwarded response"
        );

        RouteOutcome::Forwarded { session_id }
    }

    /// Drop every record that references `conn`.
    ///
    /// If `conn` was paired, the surviving peer gets one `PEER_DISCONNECTED`
    /// error and is then closed.
    pub async fn handle_disconnect(&self, conn: &ConnectionHandle) {
        let mut state = self.state.lock().await;
        let id = conn.id();

        state.pending.retain(|key, pending| {
            if pending.conn.id() == id {
                debug!(conn_id = id, key = %key_prefix(key), "abandoned pending pairing");
                false
            } else {
                true
            }
        });

        let Some(session_id) = state.index.remove(&id) else {
            return;
        };
        let Some(session) = state.sessions.remove(&session_id) else {
            return;
        };
        state.keys.remove(&session.pairing_key);

        if let Some(peer) = session.peer_of(id) {
            state.index.remove(&peer.id());
            if peer.is_open() {
                peer.send(&Envelope::Error(ErrorMessage::new(
                    ErrorCode::PeerDisconnected,
                    "peer disconnected",
                )));
                peer.close();
            }
        }

        let now = now_millis();
        info!(
            session_id = %session.id,
            conn_id = id,
            lifetime_ms = now.saturating_sub(session.created_at),
            idle_ms = now.saturating_sub(session.last_activity),
            "session closed"
        );
    }

    /// Close every held connection and empty all tables.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;

        for (_, pending) in state.pending.drain() {
            pending.conn.close();
        }
        for (_, session) in state.sessions.drain() {
            session.frontend.close();
            session.client.close();
        }
        state.keys.clear();
        state.index.clear();

        debug!("registry cleared");
    }

    pub async fn stats(&self) -> RegistryStats {
        let state = self.state.lock().await;
        RegistryStats {
            pending: state.pending.len(),
            sessions: state.sessions.len(),
            indexed: state.index.len(),
        }
    }
}

#[cfg(test)]
impl SessionRegistry {
    async fn pending_role(&self, key: &str) -> Option<Role> {
        self.state.lock().await.pending.get(key).map(|p| p.role)
    }

    async fn session_for_key(&self, key: &str) -> Option<Session> {
        let state = self.state.lock().await;
        state
            .keys
            .get(key)
            .and_then(|id| state.sessions.get(id))
            .cloned()
    }
}

/// Leading characters of a pairing key, safe to log.
fn key_prefix(key: &str) -> String {
    key.chars().take(4).collect()
}

/// Generate a random session ID (hex-encoded, 16 bytes = 32 hex chars).
fn generate_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}
