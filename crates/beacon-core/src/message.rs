//! Inbound message routing.
//!
//! [`classify`] turns a raw text frame into either a [`ChannelMessage`]
//! (`channel:*` protocol events handled by the broker) or a
//! [`ClientMessage`] (events relayed to other members of a channel).

use beacon_protocol::{
    codec, events, EventKind, InboundFrame, ProtocolError, SubscribeData, UnsubscribeData,
    CLIENT_EVENT_PREFIX,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::channel::{ChannelError, ChannelKind};
use crate::connection::Connection;
use crate::error::BrokerError;
use crate::manager::ChannelManager;

/// A classified inbound message.
#[derive(Debug)]
pub enum Message<'a> {
    Channel(ChannelMessage<'a>),
    Client(ClientMessage<'a>),
}

impl Message<'_> {
    /// The event name.
    #[must_use]
    pub fn event(&self) -> &str {
        match self {
            Message::Channel(m) => &m.frame.event,
            Message::Client(m) => &m.frame.event,
        }
    }

    /// Act on the message.
    ///
    /// # Errors
    ///
    /// Returns the error to report back to the sending connection.
    pub fn respond(&self) -> Result<(), BrokerError> {
        match self {
            Message::Channel(m) => m.respond(),
            Message::Client(m) => m.respond(),
        }
    }
}

/// Parse and classify a raw frame from `connection`.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if the frame is not a valid
/// event object.
pub fn classify<'a>(
    raw: &str,
    connection: &'a Arc<Connection>,
    channels: &'a ChannelManager,
) -> Result<Message<'a>, ProtocolError> {
    let frame = codec::parse(raw)?;
    trace!(socket = %connection, event = %frame.event, "Classified frame");

    Ok(match frame.kind() {
        EventKind::Channel => Message::Channel(ChannelMessage {
            frame,
            connection,
            channels,
        }),
        EventKind::Client => Message::Client(ClientMessage {
            frame,
            connection,
            channels,
        }),
    })
}

fn data_as<T: DeserializeOwned>(frame: &InboundFrame) -> Result<T, ProtocolError> {
    serde_json::from_value(frame.data.clone()).map_err(|e| {
        ProtocolError::MalformedPayload(format!("invalid data for {}: {e}", frame.event))
    })
}

/// A `channel:*` protocol event.
#[derive(Debug)]
pub struct ChannelMessage<'a> {
    pub frame: InboundFrame,
    connection: &'a Arc<Connection>,
    channels: &'a ChannelManager,
}

impl ChannelMessage<'_> {
    /// Dispatch on the event name. Unknown `channel:*` events are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is malformed or the channel operation fails.
    pub fn respond(&self) -> Result<(), BrokerError> {
        match self.frame.event.as_str() {
            events::SUBSCRIBE => {
                let data: SubscribeData = data_as(&self.frame)?;
                self.channels.subscribe(self.connection, &data)?;
            }
            events::UNSUBSCRIBE => {
                let data: UnsubscribeData = data_as(&self.frame)?;
                self.channels.unsubscribe(self.connection, &data.channel);
            }
            events::PING => {
                self.connection
                    .send(codec::system_event(events::PONG, Value::Null));
            }
            other => {
                debug!(socket = %self.connection, event = %other, "Ignoring unknown channel event");
            }
        }
        Ok(())
    }
}

/// A client event relayed through a channel.
#[derive(Debug)]
pub struct ClientMessage<'a> {
    pub frame: InboundFrame,
    connection: &'a Arc<Connection>,
    channels: &'a ChannelManager,
}

impl ClientMessage<'_> {
    /// Relay the event to the other members of its channel.
    ///
    /// Only `client-` events on private and user-aware channels are relayed,
    /// and the sender must already be subscribed.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ClientEventRejected`] for an unprefixed event or
    /// a public channel, and an error if client events are disabled for the
    /// application, the channel is missing, or the sender is not subscribed.
    pub fn respond(&self) -> Result<(), BrokerError> {
        let event = self.frame.event.as_str();
        if !event.starts_with(CLIENT_EVENT_PREFIX) {
            return Err(BrokerError::ClientEventRejected {
                event: event.to_string(),
                reason: "missing client- prefix",
            });
        }

        let (Some(app), Some(socket_id)) =
            (self.connection.application(), self.connection.socket_id())
        else {
            return Err(ChannelError::Unauthenticated.into());
        };
        if !app.client_messages_enabled() {
            return Err(BrokerError::ClientEventsDisabled(app.id()));
        }

        let name = self.frame.channel().ok_or_else(|| {
            ProtocolError::MalformedPayload(format!("{event} is missing a channel"))
        })?;
        if !ChannelKind::from_name(name).requires_authorization() {
            return Err(BrokerError::ClientEventRejected {
                event: event.to_string(),
                reason: "public channels do not relay client events",
            });
        }

        let channel = self
            .channels
            .find(app.id(), name)
            .filter(|channel| channel.is_subscribed(socket_id))
            .ok_or_else(|| ChannelError::NotSubscribed(name.to_string()))?;

        let payload = codec::channel_event(event, name, self.frame.data.clone());
        let delivered = channel.broadcast_to_others(self.connection, &payload);
        trace!(socket = %socket_id, channel = %name, event = %event, delivered, "Relayed client event");
        Ok(())
    }
}
