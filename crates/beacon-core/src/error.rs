//! Errors surfaced to clients.

use beacon_protocol::{codec, events, ErrorCode, ProtocolError};
use serde_json::json;
use thiserror::Error;

use crate::app::{AppId, RegistryError};
use crate::channel::ChannelError;

/// Any error produced while admitting a connection or handling one of its
/// messages. Each variant maps to a wire [`ErrorCode`].
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The application has no free connection slots.
    #[error("Application {0} is over connection quota")]
    OverCapacity(AppId),

    /// The application does not accept client events.
    #[error("Client events are disabled for application {0}")]
    ClientEventsDisabled(AppId),

    /// The event cannot be relayed as a client event.
    #[error("Client event {event} rejected: {reason}")]
    ClientEventRejected { event: String, reason: &'static str },
}

impl BrokerError {
    /// Wire error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            BrokerError::Registry(_) | BrokerError::Channel(ChannelError::Unauthenticated) => {
                ErrorCode::InvalidAppKey
            }
            BrokerError::Channel(ChannelError::InvalidChannel { .. }) => ErrorCode::InvalidChannel,
            BrokerError::Channel(ChannelError::AuthorizationFailed(_)) => {
                ErrorCode::AuthorizationFailed
            }
            BrokerError::Channel(ChannelError::InvalidPresenceData(_)) => {
                ErrorCode::InvalidPresenceData
            }
            BrokerError::Channel(ChannelError::NotSubscribed(_)) => ErrorCode::NotSubscribed,
            BrokerError::Protocol(_) => ErrorCode::MalformedPayload,
            BrokerError::OverCapacity(_) => ErrorCode::OverCapacity,
            BrokerError::ClientEventsDisabled(_) => ErrorCode::ClientEventsDisabled,
            BrokerError::ClientEventRejected { .. } => ErrorCode::ClientEventRejected,
        }
    }

    /// Short label used for metrics and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self.code() {
            ErrorCode::InvalidAppKey => "invalid_app_key",
            ErrorCode::InvalidChannel => "invalid_channel",
            ErrorCode::AuthorizationFailed => "authorization_failed",
            ErrorCode::InvalidPresenceData => "invalid_presence_data",
            ErrorCode::NotSubscribed => "not_subscribed",
            ErrorCode::OverCapacity => "over_capacity",
            ErrorCode::MalformedPayload => "malformed_payload",
            ErrorCode::ClientEventsDisabled => "client_events_disabled",
            ErrorCode::ClientEventRejected => "client_event_rejected",
        }
    }

    /// The channel the error concerns, if any.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        match self {
            BrokerError::Channel(e) => e.channel(),
            _ => None,
        }
    }

    /// Render as a `system:error` event.
    #[must_use]
    pub fn to_event(&self) -> String {
        let data = json!({
            "code": u16::from(self.code()),
            "kind": self.kind(),
            "message": self.to_string(),
        });
        match self.channel() {
            Some(channel) => codec::system_channel_event(events::ERROR, channel, data),
            None => codec::system_event(events::ERROR, data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_error_event_with_channel() {
        let err = BrokerError::from(ChannelError::AuthorizationFailed("private-a".to_string()));
        let value: Value = serde_json::from_str(&err.to_event()).unwrap();
        assert_eq!(value["event"], "system:error");
        assert_eq!(value["channel"], "private-a");
        assert_eq!(value["code"], 4009);
        assert_eq!(value["kind"], "authorization_failed");
    }

    #[test]
    fn test_error_event_without_channel() {
        let err = BrokerError::from(ProtocolError::MalformedPayload("eof".to_string()));
        let value: Value = serde_json::from_str(&err.to_event()).unwrap();
        assert_eq!(value["event"], "system:error");
        assert!(value.get("channel").is_none());
        assert_eq!(value["code"], 4300);
        assert_eq!(value["kind"], "malformed_payload");
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            BrokerError::from(RegistryError::InvalidAppKey("k".to_string())).code(),
            ErrorCode::InvalidAppKey
        );
        assert_eq!(BrokerError::OverCapacity(1).code(), ErrorCode::OverCapacity);
    }
}
