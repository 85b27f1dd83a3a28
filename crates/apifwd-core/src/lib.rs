//! apifwd-core: Shared protocol library for the API forwarding relay.
//!
//! Provides the JSON envelope types exchanged between a paired frontend and
//! client, the parse/encode entry points, and id/clock helpers.

pub mod codec;
pub mod error;
pub mod ids;
pub mod messages;

// Re-export commonly used items at crate root.
pub use codec::{encode, frame_text, parse_envelope};
pub use error::{ParseError, RelayError, RelayResult};
pub use ids::{generate_message_id, now_millis};
pub use messages::{
    ApiError, ApiRequest, ApiResponse, AuthAck, AuthMessage, ClientInfo, Envelope, ErrorCode,
    ErrorMessage, Heartbeat, MatchedPeer, MsgType, Role,
};
