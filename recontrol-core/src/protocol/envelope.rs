//! Request/response envelopes and outbound channel frames.
//!
//! The control server speaks an ActionCable-style protocol: every outbound
//! frame names the logical channel in an `identifier` field that is itself a
//! JSON-encoded string, and application payloads travel inside a `data`
//! field that is a second layer of JSON encoding.

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ReconError;

/// Logical channel all command traffic flows over.
pub const CHANNEL: &str = "CommandChannel";

// ── CommandRequest / CommandResponse ─────────────────────────────

/// An inbound command. `id` is the correlation id; its absence marks the
/// command as fire-and-forget.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandRequest {
    #[serde(default, deserialize_with = "id_as_string")]
    pub id: Option<String>,
    pub command: String,
    #[serde(default)]
    pub payload: Value,
}

impl CommandRequest {
    pub fn new(id: Option<&str>, command: &str, payload: Value) -> Self {
        Self {
            id: id.map(str::to_string),
            command: command.to_string(),
            payload,
        }
    }
}

/// Correlation ids arrive as strings or numbers; normalize to a string.
fn id_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "id must be a string or number, got {other}"
        ))),
    }
}

/// The outcome of one identified command.
///
/// Wire form: `{id, status: "success", result}` or
/// `{id, status: "error", error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CommandResponse {
    Success { id: String, result: Value },
    Error {
        id: String,
        #[serde(rename = "error")]
        message: String,
    },
}

impl CommandResponse {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self::Success {
            id: id.into(),
            result,
        }
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Success { id, .. } | Self::Error { id, .. } => id,
        }
    }
}

// ── Outbound frames ──────────────────────────────────────────────

fn channel_identifier() -> String {
    serde_json::json!({ "channel": CHANNEL }).to_string()
}

/// The subscribe frame sent once per connection, before anything else.
pub fn subscribe_frame() -> String {
    serde_json::json!({
        "command": "subscribe",
        "identifier": channel_identifier(),
    })
    .to_string()
}

/// Wrap an application payload in the channel message envelope. The payload
/// is JSON-encoded into the `data` field as a string (double encoding).
pub fn message_frame<T: Serialize>(payload: &T) -> Result<String, ReconError> {
    let data = serde_json::to_string(payload)?;
    Ok(serde_json::json!({
        "command": "message",
        "identifier": channel_identifier(),
        "data": data,
    })
    .to_string())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_decodes_string_and_numeric_ids() {
        let r: CommandRequest =
            serde_json::from_value(json!({"id": "7", "command": "c", "payload": {}})).unwrap();
        assert_eq!(r.id.as_deref(), Some("7"));

        let r: CommandRequest =
            serde_json::from_value(json!({"id": 7, "command": "c", "payload": {}})).unwrap();
        assert_eq!(r.id.as_deref(), Some("7"));

        let r: CommandRequest = serde_json::from_value(json!({"command": "c"})).unwrap();
        assert!(r.id.is_none());
        assert_eq!(r.payload, Value::Null);
    }

    #[test]
    fn response_wire_form() {
        let ok = CommandResponse::success("1", json!({"out": "hi"}));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"id": "1", "status": "success", "result": {"out": "hi"}})
        );

        let err = CommandResponse::error("2", "boom");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"id": "2", "status": "error", "error": "boom"})
        );
    }

    #[test]
    fn subscribe_frame_double_encodes_identifier() {
        let frame: Value = serde_json::from_str(&subscribe_frame()).unwrap();
        assert_eq!(frame["command"], "subscribe");
        let identifier: Value = serde_json::from_str(frame["identifier"].as_str().unwrap()).unwrap();
        assert_eq!(identifier, json!({"channel": "CommandChannel"}));
    }

    #[test]
    fn message_frame_double_encodes_data() {
        let frame = message_frame(&json!({"command": "screen.frame", "regions": []})).unwrap();
        let frame: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(frame["command"], "message");
        let data: Value = serde_json::from_str(frame["data"].as_str().unwrap()).unwrap();
        assert_eq!(data["command"], "screen.frame");
    }
}
