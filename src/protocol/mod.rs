//! Wire protocol for session channel messages
//!
//! Inbound frames are JSON objects carrying an `action` field plus an opaque payload.
//! Outbound frames are either direct replies (`{"message", "status"}`), lifecycle
//! broadcasts of the same shape, the one-time start notification, or relayed signals
//! (`{"action", ...payload}`).

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Actions a client may request on a session channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Start,
    Pause,
    Stop,
    Offer,
    Answer,
    IceCandidate,
}

impl Action {
    /// Wire name of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Pause => "pause",
            Action::Stop => "stop",
            Action::Offer => "offer",
            Action::Answer => "answer",
            Action::IceCandidate => "ice_candidate",
        }
    }

    /// Negotiation messages are relayed, everything else is a lifecycle transition
    pub fn is_signal(&self) -> bool {
        matches!(self, Action::Offer | Action::Answer | Action::IceCandidate)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Action::Start),
            "pause" => Ok(Action::Pause),
            "stop" => Ok(Action::Stop),
            "offer" => Ok(Action::Offer),
            "answer" => Ok(Action::Answer),
            "ice_candidate" => Ok(Action::IceCandidate),
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }
}

/// Error types for inbound message decoding
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),
    #[error("Unknown action: {0}")]
    UnknownAction(String),
}

/// Decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub action: Action,
    /// Every field of the inbound object except `action`, in arrival order with numbers kept
    /// in their original textual form
    pub payload: Map<String, Value>,
}

impl Envelope {
    /// Decode a text frame
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let Value::Object(mut payload) = value else {
            return Err(ProtocolError::Malformed(
                "expected a JSON object".to_string(),
            ));
        };

        let action = match payload.shift_remove("action") {
            Some(Value::String(name)) => name.parse::<Action>()?,
            Some(_) => {
                return Err(ProtocolError::Malformed(
                    "`action` must be a string".to_string(),
                ));
            }
            None => {
                return Err(ProtocolError::Malformed(
                    "missing `action` field".to_string(),
                ));
            }
        };

        Ok(Self { action, payload })
    }
}

/// Status carried by replies and lifecycle broadcasts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Started,
    Paused,
    Stopped,
    Success,
    Error,
}

/// Direct response to the originating connection, also the lifecycle broadcast body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub message: String,
    pub status: Status,
}

impl Reply {
    pub fn started() -> Self {
        Self::new("Session has started", Status::Started)
    }

    pub fn paused() -> Self {
        Self::new("Session is paused", Status::Paused)
    }

    pub fn stopped() -> Self {
        Self::new("Session has stopped", Status::Stopped)
    }

    /// Acknowledgement for a relayed negotiation message
    pub fn relayed(action: Action) -> Self {
        Self::new(format!("{} relayed", action), Status::Success)
    }

    pub fn invalid_action() -> Self {
        Self::error("Invalid action")
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message, Status::Error)
    }

    fn new(message: impl Into<String>, status: Status) -> Self {
        Self {
            message: message.into(),
            status,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }
}

/// One-time "session has started" announcement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl Notification {
    pub fn session_started(title: &str) -> Self {
        Self {
            kind: "notification".to_string(),
            message: format!("Session \"{}\" has started!", title),
        }
    }
}

/// Build the relayed form of a negotiation message: `{"action": <action>, ...payload}`
pub fn signal_frame(action: Action, payload: &Map<String, Value>) -> Value {
    let mut frame = Map::with_capacity(payload.len() + 1);
    frame.insert(
        "action".to_string(),
        Value::String(action.as_str().to_string()),
    );
    for (key, value) in payload {
        frame.insert(key.clone(), value.clone());
    }
    Value::Object(frame)
}

/// Serialize an outbound frame once so it can be shared across recipients
pub fn encode<T: Serialize + ?Sized>(frame: &T) -> Option<Arc<str>> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            warn!("Failed to serialize outbound frame: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_lifecycle_action() {
        let envelope = Envelope::parse(r#"{"action": "start"}"#).unwrap();
        assert_eq!(envelope.action, Action::Start);
        assert!(envelope.payload.is_empty());
        assert!(!envelope.action.is_signal());
    }

    #[test]
    fn test_parse_signal_keeps_payload() {
        let envelope =
            Envelope::parse(r#"{"action": "ice_candidate", "candidate": {"sdpMLineIndex": 0}}"#)
                .unwrap();
        assert_eq!(envelope.action, Action::IceCandidate);
        assert!(envelope.action.is_signal());
        assert_eq!(envelope.payload["candidate"], json!({"sdpMLineIndex": 0}));
        assert!(!envelope.payload.contains_key("action"));
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        assert!(matches!(
            Envelope::parse("not json at all"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            Envelope::parse("[1, 2, 3]"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            Envelope::parse(r#"{"sdp": "xyz"}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            Envelope::parse(r#"{"action": 5}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_unknown_action() {
        assert_eq!(
            Envelope::parse(r#"{"action": "dance"}"#),
            Err(ProtocolError::UnknownAction("dance".to_string()))
        );
    }

    #[test]
    fn test_reply_wire_format() {
        let value = serde_json::to_value(Reply::invalid_action()).unwrap();
        assert_eq!(value, json!({"message": "Invalid action", "status": "error"}));

        let value = serde_json::to_value(Reply::relayed(Action::IceCandidate)).unwrap();
        assert_eq!(
            value,
            json!({"message": "ice_candidate relayed", "status": "success"})
        );
    }

    #[test]
    fn test_signal_frame_copies_payload() {
        let envelope = Envelope::parse(r#"{"action": "offer", "sdp": "xyz", "to": 3}"#).unwrap();
        let frame = signal_frame(envelope.action, &envelope.payload);
        assert_eq!(frame, json!({"action": "offer", "sdp": "xyz", "to": 3}));
    }

    #[test]
    fn test_signal_frame_preserves_order_and_numbers() {
        let inbound =
            r#"{"action":"offer","z":1,"a":2,"seq":12345678901234567890123,"ts":1.0e2}"#;
        let envelope = Envelope::parse(inbound).unwrap();
        let frame = encode(&signal_frame(envelope.action, &envelope.payload)).unwrap();
        assert_eq!(&*frame, inbound);

        let envelope = Envelope::parse(r#"{"z":[3,1],"action":"answer","b":{"y":0,"x":-0.50}}"#)
            .unwrap();
        let frame = encode(&signal_frame(envelope.action, &envelope.payload)).unwrap();
        assert_eq!(&*frame, r#"{"action":"answer","z":[3,1],"b":{"y":0,"x":-0.50}}"#);
    }

    #[test]
    fn test_parse_accepts_out_of_range_numbers() {
        let envelope = Envelope::parse(r#"{"action":"offer","x":1e400}"#).unwrap();
        let frame = encode(&signal_frame(envelope.action, &envelope.payload)).unwrap();
        assert_eq!(&*frame, r#"{"action":"offer","x":1e400}"#);
    }

    #[test]
    fn test_notification_wire_format() {
        let value = serde_json::to_value(Notification::session_started("Algebra")).unwrap();
        assert_eq!(
            value,
            json!({"type": "notification", "message": "Session \"Algebra\" has started!"})
        );
    }
}
