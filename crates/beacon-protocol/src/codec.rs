//! Parsing of inbound frames and formatting of outbound event envelopes.
//!
//! Outbound envelopes have the shape `{"event": .., "channel": .., ...data}`:
//! object payloads are spread into the envelope, any other payload is placed
//! under a `data` key. Envelope keys always win over payload keys.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::frames::{InboundFrame, SYSTEM_EVENT_PREFIX};

/// Maximum inbound frame size (64 KiB).
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur while parsing or formatting.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The inbound frame is not a valid event object.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// The inbound frame exceeds the maximum size.
    #[error("Payload size {0} exceeds maximum {max}", max = MAX_PAYLOAD_SIZE)]
    PayloadTooLarge(usize),
}

/// Parse a raw text frame into an [`InboundFrame`].
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if the text is not JSON, is not
/// an object, or lacks a string `event` field.
pub fn parse(raw: &str) -> Result<InboundFrame, ProtocolError> {
    if raw.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(raw.len()));
    }

    serde_json::from_str(raw).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

/// Serialize a payload to its wire form.
#[must_use]
pub fn format_payload(payload: &Value) -> String {
    payload.to_string()
}

/// Build `{event, channel, ...data}`.
#[must_use]
pub fn channel_event(event: &str, channel: &str, data: Value) -> String {
    envelope(event.to_string(), Some(channel), data)
}

/// Build `{event: "system:<event>", channel, ...data}`.
#[must_use]
pub fn system_channel_event(event: &str, channel: &str, data: Value) -> String {
    envelope(system_event_name(event), Some(channel), data)
}

/// Build `{event: "system:<event>", ...data}` for events not tied to a channel.
#[must_use]
pub fn system_event(event: &str, data: Value) -> String {
    envelope(system_event_name(event), None, data)
}

/// Namespace an event name under the reserved system prefix.
#[must_use]
pub fn system_event_name(event: &str) -> String {
    format!("{SYSTEM_EVENT_PREFIX}{event}")
}

fn envelope(event: String, channel: Option<&str>, data: Value) -> String {
    let mut fields = match data {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            map
        }
    };

    fields.insert("event".to_string(), Value::String(event));
    if let Some(channel) = channel {
        fields.insert("channel".to_string(), Value::String(channel.to_string()));
    }

    format_payload(&Value::Object(fields))
}
