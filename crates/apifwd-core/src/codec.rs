//! JSON framing for relay messages.
//!
//! Wire format: one UTF-8 JSON object per WebSocket frame. Text and binary
//! frames are treated alike.

use crate::error::{ParseError, RelayResult};
use crate::messages::{Envelope, MsgType};
use serde_json::Value;

/// Serialize an outbound message into a frame body.
pub fn encode<T: serde::Serialize>(value: &T) -> RelayResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// View a raw frame as UTF-8 text.
pub fn frame_text(data: &[u8]) -> Result<&str, ParseError> {
    std::str::from_utf8(data).map_err(|e| ParseError::Malformed(format!("frame is not UTF-8: {e}")))
}

/// Parse a frame body into an [`Envelope`].
///
/// Never panics. A `type` outside the known set yields
/// [`ParseError::UnknownType`]; everything else that fails to match a
/// variant yields [`ParseError::Malformed`].
pub fn parse_envelope(raw: &str) -> Result<Envelope, ParseError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ParseError::Malformed(e.to_string()))?;

    match value.get("type") {
        Some(Value::String(tag)) => {
            if MsgType::from_tag(tag).is_none() {
                return Err(ParseError::UnknownType(tag.clone()));
            }
        }
        Some(_) => return Err(ParseError::Malformed("`type` is not a string".into())),
        None => return Err(ParseError::Malformed("missing `type` field".into())),
    }

    serde_json::from_value(value).map_err(|e| ParseError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Role;
    use serde_json::json;

    #[test]
    fn parses_auth() {
        let raw = r#"{"type":"auth","id":"1","timestamp":1700000000000,"role":"frontend","pairingKey":"abc","clientInfo":{"platform":"web","version":"1.0","deviceId":"d1"}}"#;
        match parse_envelope(raw).unwrap() {
            Envelope::Auth(auth) => {
                assert_eq!(auth.id, "1");
                assert_eq!(auth.role, Role::Frontend);
                assert_eq!(auth.pairing_key, "abc");
                let info = auth.client_info.unwrap();
                assert_eq!(info.device_id, "d1");
                assert_eq!(info.device_name, None);
            }
            other => panic!("expected auth, got {other:?}"),
        }
    }

    #[test]
    fn parses_request_with_opaque_params() {
        let raw = r#"{"type":"request","id":"7","timestamp":1,"pluginId":"notes","methodName":"list","params":{"filter":[1,"two",null]},"requestId":"r1"}"#;
        match parse_envelope(raw).unwrap() {
            Envelope::Request(req) => {
                assert_eq!(req.plugin_id, "notes");
                assert_eq!(req.method_name, "list");
                assert_eq!(req.request_id, "r1");
                assert_eq!(req.params, json!({"filter": [1, "two", null]}));
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn parses_failed_response() {
        let raw = r#"{"type":"response","id":"8","timestamp":2,"requestId":"r1","success":false,"error":{"code":"E_PLUGIN","message":"boom"}}"#;
        match parse_envelope(raw).unwrap() {
            Envelope::Response(resp) => {
                assert!(!resp.success);
                assert_eq!(resp.result, None);
                let err = resp.error.unwrap();
                assert_eq!(err.code, "E_PLUGIN");
                assert_eq!(err.stack, None);
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn parses_ping_without_timestamp() {
        let env = parse_envelope(r#"{"type":"ping","id":"p1"}"#).unwrap();
        assert_eq!(env.msg_type(), MsgType::Ping);
        assert_eq!(env.id(), "p1");
    }

    #[test]
    fn unknown_type_is_distinguished() {
        let err = parse_envelope(r#"{"type":"subscribe","id":"1","timestamp":1}"#).unwrap_err();
        assert_eq!(err, ParseError::UnknownType("subscribe".into()));
    }

    #[test]
    fn malformed_inputs() {
        for raw in [
            "not json",
            "[1,2,3]",
            r#"{"id":"1"}"#,
            r#"{"type":5,"id":"1"}"#,
            r#"{"type":"auth","id":"1","role":"frontend"}"#,
            r#"{"type":"auth","id":"1","role":"admin","pairingKey":"k"}"#,
            r#"{"type":"request","id":"1","pluginId":"p"}"#,
        ] {
            match parse_envelope(raw) {
                Err(ParseError::Malformed(_)) => {}
                other => panic!("{raw}: expected Malformed, got {other:?}"),
            }
        }
    }

    #[test]
    fn binary_frame_must_be_utf8() {
        assert_eq!(frame_text(br#"{"type":"ping"}"#).unwrap(), r#"{"type":"ping"}"#);
        assert!(matches!(
            frame_text(&[0xff, 0xfe, 0x00]),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn encode_tags_envelope() {
        let text = encode(&Envelope::pong("p9")).unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["type"], "pong");
        assert_eq!(v["id"], "p9");
    }
}
