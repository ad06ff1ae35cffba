use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RealtimeError;
use crate::ids::SessionId;

/// Closed set of inbound event types a listener can bind to.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MessageReceived,
    TypingStart,
    TypingStop,
    StatusChange,
    WorkoutUpdate,
    Notification,
    /// Raised by the connection manager itself, never by the remote peer.
    ConnectionStateChange,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::MessageReceived,
        EventType::TypingStart,
        EventType::TypingStop,
        EventType::StatusChange,
        EventType::WorkoutUpdate,
        EventType::Notification,
        EventType::ConnectionStateChange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageReceived => "message_received",
            Self::TypingStart => "typing_start",
            Self::TypingStop => "typing_stop",
            Self::StatusChange => "status_change",
            Self::WorkoutUpdate => "workout_update",
            Self::Notification => "notification",
            Self::ConnectionStateChange => "connection_state_change",
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, Self::ConnectionStateChange)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| RealtimeError::UnknownEventType(s.to_string()))
    }
}

/// Lifecycle state of a connection manager. Exactly one at a time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    #[default]
    Disconnected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound command kinds. These travel in the `type` field of a
/// [`WireEnvelope`] but are not listener-bindable event types.
pub mod commands {
    pub const AUTH: &str = "auth";
    pub const PING: &str = "ping";
    pub const MESSAGE: &str = "message";
    pub const TYPING_START: &str = "typing_start";
    pub const TYPING_STOP: &str = "typing_stop";
    pub const STATUS_CHANGE: &str = "status_change";
}

/// An event as delivered to listeners.
#[derive(Clone, Debug, PartialEq)]
pub struct EventEnvelope {
    pub event_type: EventType,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub sender_session_id: Option<SessionId>,
}

impl EventEnvelope {
    pub fn new(event_type: EventType, payload: Value) -> Self {
        Self {
            event_type,
            payload,
            timestamp: Utc::now(),
            sender_session_id: None,
        }
    }

    pub fn with_sender(mut self, session_id: SessionId) -> Self {
        self.sender_session_id = Some(session_id);
        self
    }

    /// Decode the payload into a typed structure.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, RealtimeError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn to_wire(&self) -> WireEnvelope {
        WireEnvelope {
            kind: self.event_type.as_str().to_string(),
            data: self.payload.clone(),
            timestamp: self.timestamp,
            session_id: self.sender_session_id.clone(),
        }
    }
}

/// The JSON frame exchanged with the backend, identical in both directions:
/// `{"type": ..., "data": {...}, "timestamp": ..., "sessionId": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl WireEnvelope {
    pub fn new(kind: impl Into<String>, data: Value, session_id: Option<SessionId>) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
            session_id,
        }
    }

    pub fn parse(text: &str) -> Result<Self, RealtimeError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, RealtimeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Map an inbound frame onto a listener-bindable event. Frames whose
    /// type is unknown, or which claim to be synthetic, yield `None`.
    pub fn into_event(self) -> Option<EventEnvelope> {
        let event_type: EventType = self.kind.parse().ok()?;
        if event_type.is_synthetic() {
            return None;
        }
        Some(EventEnvelope {
            event_type,
            payload: self.data,
            timestamp: self.timestamp,
            sender_session_id: self.session_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_str_matches_serde() {
        for t in EventType::ALL {
            let json = serde_json::to_value(t).unwrap();
            assert_eq!(json.as_str(), Some(t.as_str()));
        }
    }

    #[test]
    fn event_type_parse() {
        assert_eq!("workout_update".parse::<EventType>().unwrap(), EventType::WorkoutUpdate);
        assert!(matches!(
            "pong".parse::<EventType>(),
            Err(RealtimeError::UnknownEventType(_))
        ));
    }

    #[test]
    fn only_state_change_is_synthetic() {
        let synthetic: Vec<_> = EventType::ALL.into_iter().filter(|t| t.is_synthetic()).collect();
        assert_eq!(synthetic, vec![EventType::ConnectionStateChange]);
    }

    #[test]
    fn connection_state_defaults_to_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Error.to_string(), "error");
    }

    #[test]
    fn wire_envelope_field_names() {
        let sid = SessionId::from_raw("sess_1");
        let wire = WireEnvelope::new(commands::MESSAGE, json!({"threadId": "t1"}), Some(sid));
        let value = serde_json::to_value(&wire).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["data"]["threadId"], "t1");
        assert_eq!(value["sessionId"], "sess_1");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn wire_envelope_tolerates_missing_fields() {
        let wire = WireEnvelope::parse(r#"{"type":"notification"}"#).unwrap();
        assert_eq!(wire.kind, "notification");
        assert!(wire.data.is_null());
        assert!(wire.session_id.is_none());
    }

    #[test]
    fn into_event_maps_known_types() {
        let wire = WireEnvelope::parse(
            r#"{"type":"message_received","data":{"content":"hi"},"sessionId":"sess_x"}"#,
        )
        .unwrap();
        let event = wire.into_event().unwrap();
        assert_eq!(event.event_type, EventType::MessageReceived);
        assert_eq!(event.payload["content"], "hi");
        assert_eq!(event.sender_session_id, Some(SessionId::from_raw("sess_x")));
    }

    #[test]
    fn into_event_rejects_unknown_and_synthetic() {
        let unknown = WireEnvelope::new("pong", Value::Null, None);
        assert!(unknown.into_event().is_none());
        let spoofed = WireEnvelope::new("connection_state_change", json!({}), None);
        assert!(spoofed.into_event().is_none());
    }

    #[test]
    fn payload_as_decodes() {
        #[derive(Deserialize)]
        struct Body {
            content: String,
        }
        let event = EventEnvelope::new(EventType::MessageReceived, json!({"content": "hello"}));
        let body: Body = event.payload_as().unwrap();
        assert_eq!(body.content, "hello");
        assert!(event.payload_as::<Vec<u32>>().is_err());
    }
}
