//! Relay wire messages.
//!
//! Every frame is a JSON object tagged by `type`. Payload fields the relay
//! never interprets (`params`, `result`, `details`) are kept as raw
//! [`serde_json::Value`]s.

use crate::ids::{generate_message_id, now_millis};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The closed set of `type` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MsgType {
    Auth,
    Request,
    Response,
    Error,
    Ping,
    Pong,
}

impl MsgType {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "auth" => Some(Self::Auth),
            "request" => Some(Self::Request),
            "response" => Some(Self::Response),
            "error" => Some(Self::Error),
            "ping" => Some(Self::Ping),
            "pong" => Some(Self::Pong),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Request => "request",
            Self::Response => "response",
            Self::Error => "error",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Endpoint identity within a session. A session has exactly one of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Frontend,
    Client,
}

impl Role {
    /// The role a peer must have to pair with this one.
    pub fn opposite(self) -> Self {
        match self {
            Self::Frontend => Self::Client,
            Self::Client => Self::Frontend,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Frontend => "frontend",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error codes the relay itself emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ParseError,
    NotAuthenticated,
    SessionNotFound,
    PeerDisconnected,
    KeyInUse,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::PeerDisconnected => "PEER_DISCONNECTED",
            Self::KeyInUse => "KEY_IN_USE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device description a peer may attach to its `auth` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

/// `auth`: join (or open) the pairing slot for `pairing_key` as `role`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthMessage {
    pub id: String,
    #[serde(default)]
    pub timestamp: u64,
    pub role: Role,
    pub pairing_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<ClientInfo>,
}

/// `request`: a plugin method call routed to the session peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequest {
    pub id: String,
    #[serde(default)]
    pub timestamp: u64,
    pub plugin_id: String,
    pub method_name: String,
    #[serde(default)]
    pub params: Value,
    pub request_id: String,
}

/// Failure detail carried by an unsuccessful [`ApiResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// `response`: the answer to an earlier [`ApiRequest`] with the same `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub id: String,
    #[serde(default)]
    pub timestamp: u64,
    pub request_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

/// `error`: sent by the relay to a single endpoint. Never forwarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub id: String,
    #[serde(default)]
    pub timestamp: u64,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorMessage {
    /// Build a relay-originated error with a fresh message id.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id: generate_message_id(),
            timestamp: now_millis(),
            code: code.as_str().to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// Header-only body shared by `ping` and `pong`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub id: String,
    #[serde(default)]
    pub timestamp: u64,
}

/// A parsed wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    Auth(AuthMessage),
    Request(ApiRequest),
    Response(ApiResponse),
    Error(ErrorMessage),
    Ping(Heartbeat),
    Pong(Heartbeat),
}

impl Envelope {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Self::Auth(_) => MsgType::Auth,
            Self::Request(_) => MsgType::Request,
            Self::Response(_) => MsgType::Response,
            Self::Error(_) => MsgType::Error,
            Self::Ping(_) => MsgType::Ping,
            Self::Pong(_) => MsgType::Pong,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Auth(m) => &m.id,
            Self::Request(m) => &m.id,
            Self::Response(m) => &m.id,
            Self::Error(m) => &m.id,
            Self::Ping(m) | Self::Pong(m) => &m.id,
        }
    }

    /// A `pong` echoing `id`, stamped with the current time.
    pub fn pong(id: impl Into<String>) -> Self {
        Self::Pong(Heartbeat {
            id: id.into(),
            timestamp: now_millis(),
        })
    }
}

/// The peer a successful pairing matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedPeer {
    pub role: Role,
    pub connected_at: u64,
}

/// Acknowledgement of an `auth` message, correlated by the auth message's `id`.
///
/// Travels as a `response` frame without a `requestId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthAck {
    #[serde(rename = "type")]
    pub msg_type: MsgType,
    pub id: String,
    pub timestamp: u64,
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_peer: Option<MatchedPeer>,
}

impl AuthAck {
    fn build(auth_id: &str, success: bool, message: &str, matched_peer: Option<MatchedPeer>) -> Self {
        Self {
            msg_type: MsgType::Response,
            id: auth_id.to_string(),
            timestamp: now_millis(),
            success,
            message: message.to_string(),
            matched_peer,
        }
    }

    /// First peer for a key: parked until the opposite role arrives.
    pub fn waiting(auth_id: &str) -> Self {
        Self::build(auth_id, true, "waiting for peer", None)
    }

    /// Pairing completed against `peer`.
    pub fn paired(auth_id: &str, peer: MatchedPeer) -> Self {
        Self::build(auth_id, true, "paired", Some(peer))
    }

    pub fn rejected(auth_id: &str, reason: &str) -> Self {
        Self::build(auth_id, false, reason, None)
    }
}
