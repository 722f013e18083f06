//! Codec for encoding and decoding Parley frames.
//!
//! Frames are plain JSON objects, one per transport message.

use chrono::{SecondsFormat, Utc};
use thiserror::Error;

use crate::frames::ChatFrame;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not valid UTF-8 text.
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a frame to its JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(frame: &ChatFrame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a frame from raw bytes.
///
/// # Errors
///
/// Returns an error if the data is not UTF-8 or not a valid frame.
pub fn decode(data: &[u8]) -> Result<ChatFrame, ProtocolError> {
    let text = std::str::from_utf8(data).map_err(|_| ProtocolError::InvalidUtf8)?;
    decode_str(text)
}

/// Decode a frame from JSON text.
///
/// # Errors
///
/// Returns an error if the text is not a valid frame.
pub fn decode_str(text: &str) -> Result<ChatFrame, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Current time as an RFC 3339 UTC timestamp with second precision.
#[must_use]
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::MessageKind;

    #[test]
    fn test_decode_client_frame() {
        let frame = decode(br#"{"username":"a","message":"hi","target":"lobby","type":"group"}"#)
            .unwrap();
        assert_eq!(frame.username, "a");
        assert_eq!(frame.kind, MessageKind::Group);
        assert_eq!(frame.target_name(), Some("lobby"));
        assert!(frame.sent_at.is_none());
    }

    #[test]
    fn test_decode_defaults_missing_fields() {
        let frame = decode_str(r#"{"type":"join_group","target":"lobby"}"#).unwrap();
        assert_eq!(frame.username, "");
        assert_eq!(frame.message, "");
        assert_eq!(frame.kind, MessageKind::JoinGroup);
    }

    #[test]
    fn test_decode_rejects_invalid() {
        assert!(matches!(decode(b"not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(decode(b"[1, 2]"), Err(ProtocolError::Json(_))));
        assert!(matches!(
            decode(&[0xff, 0xfe]),
            Err(ProtocolError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_decode_unrecognised_type() {
        let frame = decode_str(r#"{"username":"a","message":"x","type":"shout"}"#).unwrap();
        assert_eq!(frame.kind, MessageKind::Unknown);
        assert_eq!(frame.message, "x");

        let frame = decode_str(r#"{"username":"a","message":"typeless"}"#).unwrap();
        assert_eq!(frame.kind, MessageKind::Unknown);
        assert_eq!(frame.username, "a");
    }

    #[test]
    fn test_decode_large_frame() {
        let body = "x".repeat(2 * 1024 * 1024);
        let text = encode(&ChatFrame::broadcast("a", body.clone())).unwrap();
        assert_eq!(decode(text.as_bytes()).unwrap().message, body);
    }

    #[test]
    fn test_encode_omits_absent_fields() {
        let text = encode(&ChatFrame::broadcast("a", "hi")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "broadcast");
        assert!(value.get("target").is_none());
        assert!(value.get("sent_at").is_none());

        let frame = ChatFrame::private("a", "b", "psst").with_sent_at("2024-05-01T12:00:00Z");
        let text = encode(&frame).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["target"], "b");
        assert_eq!(value["sent_at"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn test_timestamp_is_rfc3339() {
        let ts = timestamp_now();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
        assert!(ts.ends_with('Z'));
    }
}
