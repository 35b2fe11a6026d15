//! Frame types for the Beacon wire protocol.
//!
//! Every inbound text frame is a JSON object carrying an `event` name and an
//! optional `data` object. Events prefixed with `channel:` address the broker
//! itself; everything else is a client event relayed through a channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix of broker-handled channel protocol events.
pub const CHANNEL_EVENT_PREFIX: &str = "channel:";

/// Prefix every relayable client event must carry.
pub const CLIENT_EVENT_PREFIX: &str = "client-";

/// Reserved namespace for broker-internal outbound events.
pub const SYSTEM_EVENT_PREFIX: &str = "system:";

/// Event names understood or emitted by the broker.
pub mod events {
    pub const SUBSCRIBE: &str = "channel:subscribe";
    pub const UNSUBSCRIBE: &str = "channel:unsubscribe";
    pub const PING: &str = "channel:ping";

    pub const CONNECTION_ESTABLISHED: &str = "connection_established";
    pub const SUBSCRIPTION_SUCCEEDED: &str = "subscription_succeeded";
    pub const MEMBER_ADDED: &str = "member_added";
    pub const MEMBER_REMOVED: &str = "member_removed";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
}

/// Which part of the broker handles an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `channel:*` protocol event.
    Channel,
    /// Anything else.
    Client,
}

impl EventKind {
    /// Classify an event name.
    #[must_use]
    pub fn of(event: &str) -> Self {
        if event.starts_with(CHANNEL_EVENT_PREFIX) {
            EventKind::Channel
        } else {
            EventKind::Client
        }
    }
}

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    /// Event name.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
    /// Target channel for client events sent in the flat envelope form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl InboundFrame {
    /// Create a frame.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            channel: None,
        }
    }

    /// Classify this frame by event name.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        EventKind::of(&self.event)
    }

    /// The channel this frame targets.
    ///
    /// The top-level `channel` field wins over `data.channel`.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.channel
            .as_deref()
            .or_else(|| self.data.get("channel").and_then(Value::as_str))
    }
}

/// Payload of a `channel:subscribe` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeData {
    /// Channel name.
    pub channel: String,
    /// Authorization signature, `<app key>:<hex digest>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    /// Presence data, either a JSON object or a JSON-encoded string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<Value>,
}

impl SubscribeData {
    /// The exact text the authorization signature covers for `channel_data`.
    ///
    /// String payloads are signed as sent; any other JSON value is signed as
    /// its compact serialization.
    #[must_use]
    pub fn channel_data_text(&self) -> Option<String> {
        match &self.channel_data {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }

    /// `channel_data` as a JSON value, decoding the string form.
    #[must_use]
    pub fn channel_data_value(&self) -> Option<Value> {
        match &self.channel_data {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => serde_json::from_str(s).ok(),
            Some(other) => Some(other.clone()),
        }
    }
}

/// Payload of a `channel:unsubscribe` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeData {
    /// Channel name.
    pub channel: String,
}

/// Error codes reported in `system:error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    InvalidAppKey = 4001,
    InvalidChannel = 4008,
    AuthorizationFailed = 4009,
    InvalidPresenceData = 4010,
    NotSubscribed = 4011,
    OverCapacity = 4100,
    MalformedPayload = 4300,
    ClientEventsDisabled = 4301,
    ClientEventRejected = 4302,
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> u16 {
        code as u16
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = &'static str;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            4001 => Ok(ErrorCode::InvalidAppKey),
            4008 => Ok(ErrorCode::InvalidChannel),
            4009 => Ok(ErrorCode::AuthorizationFailed),
            4010 => Ok(ErrorCode::InvalidPresenceData),
            4011 => Ok(ErrorCode::NotSubscribed),
            4100 => Ok(ErrorCode::OverCapacity),
            4300 => Ok(ErrorCode::MalformedPayload),
            4301 => Ok(ErrorCode::ClientEventsDisabled),
            4302 => Ok(ErrorCode::ClientEventRejected),
            _ => Err("Unknown error code"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind() {
        assert_eq!(EventKind::of("channel:subscribe"), EventKind::Channel);
        assert_eq!(EventKind::of("client-typing"), EventKind::Client);
        assert_eq!(EventKind::of("channelsubscribe"), EventKind::Client);
    }

    #[test]
    fn test_frame_channel_lookup() {
        let mut frame = InboundFrame::new("client-typing", json!({"channel": "private-a"}));
        assert_eq!(frame.channel(), Some("private-a"));

        frame.channel = Some("private-b".to_string());
        assert_eq!(frame.channel(), Some("private-b"));

        let frame = InboundFrame::new("client-typing", json!({}));
        assert_eq!(frame.channel(), None);
    }

    #[test]
    fn test_channel_data_forms() {
        let data: SubscribeData = serde_json::from_value(json!({
            "channel": "user-aware-room",
            "auth": "key:sig",
            "channel_data": "{\"user_id\":\"1\"}"
        }))
        .unwrap();
        assert_eq!(data.channel_data_text().as_deref(), Some("{\"user_id\":\"1\"}"));
        assert_eq!(data.channel_data_value(), Some(json!({"user_id": "1"})));

        let data: SubscribeData = serde_json::from_value(json!({
            "channel": "user-aware-room",
            "channel_data": {"user_id": 7}
        }))
        .unwrap();
        assert_eq!(data.channel_data_text().as_deref(), Some("{\"user_id\":7}"));

        let data: SubscribeData = serde_json::from_value(json!({"channel": "news"})).unwrap();
        assert!(data.auth.is_none());
        assert!(data.channel_data_text().is_none());
    }

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(u16::from(ErrorCode::MalformedPayload), 4300);
        assert_eq!(ErrorCode::try_from(4009), Ok(ErrorCode::AuthorizationFailed));
        assert_eq!(ErrorCode::try_from(4302), Ok(ErrorCode::ClientEventRejected));
        assert!(ErrorCode::try_from(1).is_err());
    }
}
