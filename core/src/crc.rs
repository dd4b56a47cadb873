//! CRC (challenge-response) pre-handler.
//!
//! Modeled as pure function composition rather than stateful middleware:
//! `detect` decides whether a request body is a handshake; `respond` builds
//! the answer. Neither touches the ring, a shard, or any shared mutable
//! state — `ingress = CRC ∘ fast` composes cleanly because CRC never needs
//! to know about the rest of the pipeline.

use crate::signature;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct HandshakePayload {
    #[serde(rename = "plainToken")]
    plain_token: String,
}

#[derive(Debug, Deserialize)]
struct HandshakeBody {
    event: String,
    payload: HandshakePayload,
}

/// Returns the handshake's `plainToken` if `body` matches the recognized
/// shape `{"event":"endpoint.url_validation","payload":{"plainToken":"..."}}`
/// with a non-empty token; `None` otherwise (including any parse failure).
pub fn detect(body: &[u8]) -> Option<String> {
    let parsed: HandshakeBody = serde_json::from_slice(body).ok()?;
    if parsed.event != "endpoint.url_validation" {
        return None;
    }
    if parsed.payload.plain_token.is_empty() {
        return None;
    }
    Some(parsed.payload.plain_token)
}

/// Builds the JSON response body for a recognized handshake.
pub fn respond(plain_token: &str, secret: &[u8]) -> serde_json::Value {
    let encrypted = signature::hmac_hex(secret, plain_token.as_bytes());
    serde_json::json!({
        "plainToken": plain_token,
        "encryptedToken": encrypted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_handshake_shape() {
        let body = br#"{"event":"endpoint.url_validation","payload":{"plainToken":"abc"}}"#;
        assert_eq!(detect(body).as_deref(), Some("abc"));
    }

    #[test]
    fn rejects_empty_token() {
        let body = br#"{"event":"endpoint.url_validation","payload":{"plainToken":""}}"#;
        assert_eq!(detect(body), None);
    }

    #[test]
    fn rejects_other_events_and_malformed_json() {
        assert_eq!(detect(br#"{"event":"meeting.started","payload":{}}"#), None);
        assert_eq!(detect(b"not json"), None);
        assert_eq!(detect(b""), None);
        assert_eq!(detect(br#"{"a":1}"#), None);
    }

    #[test]
    fn respond_matches_s3_scenario() {
        let value = respond("abc", b"s");
        let expected_hex = signature::hmac_hex(b"s", b"abc");
        assert_eq!(value["plainToken"], "abc");
        assert_eq!(value["encryptedToken"], expected_hex);
    }
}
