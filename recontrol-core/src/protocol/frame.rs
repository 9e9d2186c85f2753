//! Inbound frame classification.
//!
//! Everything arriving on the socket is a JSON text frame. Control frames
//! carry a top-level `type`; application frames carry a `message` object.
//! Anything else is classified as [`InboundFrame::Other`] and dropped by the
//! receive loop after logging.

use serde_json::Value;

use crate::protocol::envelope::CommandRequest;

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Ping,
    Welcome,
    Disconnect { reason: String, reconnect: bool },
    Command { from: Option<String>, request: CommandRequest },
    Other(String),
}

/// Classify one text frame. Never fails; malformed input is `Other`.
pub fn classify(text: &str) -> InboundFrame {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return InboundFrame::Other(text.to_string());
    };

    if let Some(kind) = value.get("type").and_then(Value::as_str) {
        return match kind {
            "ping" => InboundFrame::Ping,
            "welcome" => InboundFrame::Welcome,
            "disconnect" => InboundFrame::Disconnect {
                reason: value
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                reconnect: value
                    .get("reconnect")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            },
            _ => InboundFrame::Other(text.to_string()),
        };
    }

    if let Some(message) = value.get("message") {
        let from = message
            .get("from")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Ok(request) = serde_json::from_value::<CommandRequest>(message.clone()) {
            return InboundFrame::Command { from, request };
        }
    }

    InboundFrame::Other(text.to_string())
}

/// Whether a disconnect reason points at stale or rejected credentials.
/// Case-insensitive substring match, as loose as the server's wording.
pub fn reason_is_credential(reason: &str) -> bool {
    let reason = reason.to_ascii_lowercase();
    reason.contains("unauth") || reason.contains("token")
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_frames() {
        assert_eq!(classify(r#"{"type":"ping"}"#), InboundFrame::Ping);
        assert_eq!(classify(r#"{"type":"welcome"}"#), InboundFrame::Welcome);
        assert_eq!(
            classify(r#"{"type":"disconnect","reason":"server restart","reconnect":true}"#),
            InboundFrame::Disconnect {
                reason: "server restart".into(),
                reconnect: true,
            }
        );
    }

    #[test]
    fn disconnect_defaults() {
        assert_eq!(
            classify(r#"{"type":"disconnect"}"#),
            InboundFrame::Disconnect {
                reason: String::new(),
                reconnect: false,
            }
        );
    }

    #[test]
    fn application_frame_with_numeric_id() {
        let frame = classify(
            r#"{"message":{"from":"operator","command":"mouse.move","payload":{"deltaX":3,"deltaY":0},"id":42}}"#,
        );
        let InboundFrame::Command { from, request } = frame else {
            panic!("expected a command frame");
        };
        assert_eq!(from.as_deref(), Some("operator"));
        assert_eq!(request.id.as_deref(), Some("42"));
        assert_eq!(request.command, "mouse.move");
    }

    #[test]
    fn fire_and_forget_frame_has_no_id() {
        let frame =
            classify(r#"{"message":{"from":"operator","command":"keyboard.keyDown","payload":{"key":65}}}"#);
        let InboundFrame::Command { request, .. } = frame else {
            panic!("expected a command frame");
        };
        assert!(request.id.is_none());
    }

    #[test]
    fn garbage_is_other() {
        assert!(matches!(classify("not json"), InboundFrame::Other(_)));
        assert!(matches!(classify(r#"{"type":"confetti"}"#), InboundFrame::Other(_)));
        assert!(matches!(classify(r#"{"message":{"no_command":1}}"#), InboundFrame::Other(_)));
    }

    #[test]
    fn credential_reasons() {
        assert!(reason_is_credential("Unauthorized"));
        assert!(reason_is_credential("expired token"));
        assert!(reason_is_credential("TOKEN_INVALID"));
        assert!(!reason_is_credential("server restart"));
        assert!(!reason_is_credential(""));
    }
}
