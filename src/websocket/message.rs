use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::store::KeywordCount;

/// Events sent from client to server.
///
/// Frames look like `{"type": "join", "payload": {"userId": "u1"}}`. The
/// legacy event names (`user_joined`, `message_sent`, ...) are accepted too.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Join { user_id: String },
    Leave { user_id: String },
    Message { user_id: String, text: String },
    Ping { user_id: Option<String>, timestamp: Option<i64> },
    Activity { user_id: Option<String>, timestamp: Option<i64>, kind: Option<String> },
    Observe,
}

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown event type: {0}")]
    UnknownType(String),

    #[error("Invalid {event} payload: {reason}")]
    InvalidPayload { event: &'static str, reason: String },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresencePayload {
    user_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePayload {
    user_id: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PingPayload {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityPayload {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default, alias = "type")]
    kind: Option<String>,
}

fn payload<T: for<'de> Deserialize<'de>>(
    event: &'static str,
    value: Value,
) -> Result<T, EventParseError> {
    let value = if value.is_null() {
        Value::Object(Default::default())
    } else {
        value
    };
    serde_json::from_value(value).map_err(|e| EventParseError::InvalidPayload {
        event,
        reason: e.to_string(),
    })
}

fn non_empty(event: &'static str, user_id: String) -> Result<String, EventParseError> {
    if user_id.trim().is_empty() {
        return Err(EventParseError::InvalidPayload {
            event,
            reason: "userId must not be empty".to_string(),
        });
    }
    Ok(user_id)
}

impl ClientEvent {
    pub fn parse(text: &str) -> Result<Self, EventParseError> {
        let envelope: Envelope = serde_json::from_str(text)?;

        match envelope.kind.as_str() {
            "join" | "user_joined" => {
                let p: PresencePayload = payload("join", envelope.payload)?;
                Ok(Self::Join {
                    user_id: non_empty("join", p.user_id)?,
                })
            }
            "leave" | "user_left" => {
                let p: PresencePayload = payload("leave", envelope.payload)?;
                Ok(Self::Leave {
                    user_id: non_empty("leave", p.user_id)?,
                })
            }
            "message" | "message_sent" => {
                let p: MessagePayload = payload("message", envelope.payload)?;
                Ok(Self::Message {
                    user_id: non_empty("message", p.user_id)?,
                    text: p.text,
                })
            }
            "ping" => {
                let p: PingPayload = payload("ping", envelope.payload)?;
                Ok(Self::Ping {
                    user_id: p.user_id,
                    timestamp: p.timestamp,
                })
            }
            "activity" | "user_activity" => {
                let p: ActivityPayload = payload("activity", envelope.payload)?;
                Ok(Self::Activity {
                    user_id: p.user_id,
                    timestamp: p.timestamp,
                    kind: p.kind,
                })
            }
            "observe" => Ok(Self::Observe),
            other => Err(EventParseError::UnknownType(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Message { .. } => "message",
            Self::Ping { .. } => "ping",
            Self::Activity { .. } => "activity",
            Self::Observe => "observe",
        }
    }
}

/// Metrics payload. A full snapshot on every tick, or a presence-only
/// update (`activeUsers` and `timestamp`) on join/leave/disconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages_per_sec: Option<f64>,
    pub active_users: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_keywords: Option<Vec<KeywordCount>>,
    /// Resident memory of the process in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
    /// Milliseconds since epoch
    pub timestamp: i64,
}

impl MetricsUpdate {
    pub fn presence(active_users: usize) -> Self {
        Self {
            messages_per_sec: None,
            active_users,
            top_keywords: None,
            memory_bytes: None,
            uptime_seconds: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_partial(&self) -> bool {
        self.messages_per_sec.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    pub server_time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownPayload {
    pub reason: String,
    /// Suggested reconnect delay in seconds
    pub reconnect_after: u64,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    #[serde(rename = "metrics-update")]
    Metrics(MetricsUpdate),
    #[serde(rename = "pong")]
    Pong(PongPayload),
    #[serde(rename = "error")]
    Error(ErrorPayload),
    #[serde(rename = "shutdown")]
    Shutdown(ShutdownPayload),
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            code: code.into(),
            message: message.into(),
        })
    }

    pub fn pong(user_id: Option<String>, timestamp: Option<i64>) -> Self {
        Self::Pong(PongPayload {
            user_id,
            timestamp,
            server_time: chrono::Utc::now().timestamp_millis(),
        })
    }

    pub fn shutdown(reason: impl Into<String>, reconnect_after: u64) -> Self {
        Self::Shutdown(ShutdownPayload {
            reason: reason.into(),
            reconnect_after,
        })
    }
}

/// What travels over a connection's outbound queue.
///
/// Broadcasts serialize once and share the frame across every connection.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Raw(ServerMessage),
    Preserialized(Arc<str>),
}

impl OutboundMessage {
    pub fn preserialize(message: &ServerMessage) -> Result<Self, serde_json::Error> {
        Ok(Self::Preserialized(Arc::from(serde_json::to_string(message)?)))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Raw(message) => serde_json::to_string(message),
            Self::Preserialized(json) => Ok(json.to_string()),
        }
    }
}

impl From<ServerMessage> for OutboundMessage {
    fn from(message: ServerMessage) -> Self {
        Self::Raw(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join_and_legacy_alias() {
        let join = ClientEvent::parse(r#"{"type":"join","payload":{"userId":"u1"}}"#).unwrap();
        let legacy =
            ClientEvent::parse(r#"{"type":"user_joined","payload":{"userId":"u1"}}"#).unwrap();

        assert_eq!(join, ClientEvent::Join { user_id: "u1".into() });
        assert_eq!(join, legacy);
    }

    #[test]
    fn test_parse_message_defaults_text() {
        let event = ClientEvent::parse(r#"{"type":"message_sent","payload":{"userId":"u1"}}"#)
            .unwrap();
        assert_eq!(
            event,
            ClientEvent::Message {
                user_id: "u1".into(),
                text: String::new()
            }
        );
    }

    #[test]
    fn test_parse_message_requires_user() {
        assert!(matches!(
            ClientEvent::parse(r#"{"type":"message","payload":{"text":"hello there"}}"#),
            Err(EventParseError::InvalidPayload { event: "message", .. })
        ));
        assert!(matches!(
            ClientEvent::parse(r#"{"type":"message_sent","payload":{"userId":"","text":"hi"}}"#),
            Err(EventParseError::InvalidPayload { event: "message", .. })
        ));
    }

    #[test]
    fn test_parse_activity_accepts_type_field() {
        let event = ClientEvent::parse(
            r#"{"type":"user_activity","payload":{"userId":"u1","timestamp":5,"type":"keepalive"}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::Activity {
                user_id: Some("u1".into()),
                timestamp: Some(5),
                kind: Some("keepalive".into())
            }
        );
    }

    #[test]
    fn test_parse_observe_without_payload() {
        assert_eq!(ClientEvent::parse(r#"{"type":"observe"}"#).unwrap(), ClientEvent::Observe);
        assert_eq!(
            ClientEvent::parse(r#"{"type":"ping"}"#).unwrap(),
            ClientEvent::Ping { user_id: None, timestamp: None }
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            ClientEvent::parse("not json"),
            Err(EventParseError::Malformed(_))
        ));
        assert!(matches!(
            ClientEvent::parse(r#"{"type":"dance"}"#),
            Err(EventParseError::UnknownType(_))
        ));
        assert!(matches!(
            ClientEvent::parse(r#"{"type":"join","payload":{}}"#),
            Err(EventParseError::InvalidPayload { event: "join", .. })
        ));
        assert!(matches!(
            ClientEvent::parse(r#"{"type":"leave","payload":{"userId":"  "}}"#),
            Err(EventParseError::InvalidPayload { event: "leave", .. })
        ));
    }

    #[test]
    fn test_presence_update_shape() {
        let msg = ServerMessage::Metrics(MetricsUpdate {
            timestamp: 42,
            ..MetricsUpdate::presence(3)
        });
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "type": "metrics-update",
                "payload": {"activeUsers": 3, "timestamp": 42}
            })
        );
    }

    #[test]
    fn test_full_update_parses_back() {
        let update = MetricsUpdate {
            messages_per_sec: Some(12.5),
            active_users: 4,
            top_keywords: Some(vec![KeywordCount::new("rust", 9)]),
            memory_bytes: Some(1024),
            uptime_seconds: Some(60),
            timestamp: 1,
        };
        let json = OutboundMessage::preserialize(&ServerMessage::Metrics(update.clone()))
            .unwrap()
            .to_json()
            .unwrap();

        let parsed: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ServerMessage::Metrics(update));
        assert!(json.contains(r#""messagesPerSec":12.5"#));
    }

    #[test]
    fn test_error_and_shutdown_frames() {
        let json = serde_json::to_string(&ServerMessage::error("CONNECTION_LIMIT", "full")).unwrap();
        assert_eq!(
            json,
            r#"{"type":"error","payload":{"code":"CONNECTION_LIMIT","message":"full"}}"#
        );

        let json = serde_json::to_string(&ServerMessage::shutdown("restart", 5)).unwrap();
        assert!(json.contains(r#""reconnectAfter":5"#));
    }
}
