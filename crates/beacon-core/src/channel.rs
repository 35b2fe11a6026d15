//! Channel abstraction for Beacon.
//!
//! A channel is a named broadcast group scoped to one application. Its kind is
//! fixed by the name prefix when the channel is created:
//!
//! | Prefix | Kind | Subscribe requires |
//! |---|---|---|
//! | `private-` | [`ChannelKind::Private`] | valid signature |
//! | `user-aware-` | [`ChannelKind::PresenceAware`] | valid signature and a user identity |
//! | anything else | [`ChannelKind::Public`] | nothing |

use beacon_protocol::{codec, events, SubscribeData};
use beacon_transport::SocketId;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::app::AppId;
use crate::auth;
use crate::connection::Connection;
use crate::presence::{IdentityResolver, Member, Presence};

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 200;

/// Name prefix selecting [`ChannelKind::Private`].
pub const PRIVATE_PREFIX: &str = "private-";

/// Name prefix selecting [`ChannelKind::PresenceAware`].
pub const PRESENCE_PREFIX: &str = "user-aware-";

/// Validate a channel name.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("Channel name too long");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_-=@,.;".contains(c))
    {
        return Err("Channel name contains invalid characters");
    }
    Ok(())
}

/// Channel errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// Invalid channel name.
    #[error("Invalid channel name {name:?}: {reason}")]
    InvalidChannel {
        name: String,
        reason: &'static str,
    },

    /// Signature did not match.
    #[error("Invalid signature for channel {0}")]
    AuthorizationFailed(String),

    /// No user identity could be resolved from `channel_data`.
    #[error("Invalid presence data for channel {0}")]
    InvalidPresenceData(String),

    /// Connection has no application or socket ID.
    #[error("Connection is not authenticated")]
    Unauthenticated,

    /// Connection is not a member of the channel.
    #[error("Not subscribed to channel: {0}")]
    NotSubscribed(String),
}

impl ChannelError {
    /// The channel the error refers to, if any.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        match self {
            ChannelError::InvalidChannel { name, .. } => Some(name),
            ChannelError::AuthorizationFailed(name)
            | ChannelError::InvalidPresenceData(name)
            | ChannelError::NotSubscribed(name) => Some(name),
            ChannelError::Unauthenticated => None,
        }
    }
}

/// Authorization policy of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Public,
    Private,
    PresenceAware,
}

impl ChannelKind {
    /// Select the kind implied by a channel name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.starts_with(PRIVATE_PREFIX) {
            ChannelKind::Private
        } else if name.starts_with(PRESENCE_PREFIX) {
            ChannelKind::PresenceAware
        } else {
            ChannelKind::Public
        }
    }

    /// Whether subscribing requires a signature.
    #[must_use]
    pub fn requires_authorization(self) -> bool {
        !matches!(self, ChannelKind::Public)
    }
}

#[derive(Debug, Default)]
struct Members {
    connections: HashMap<SocketId, Arc<Connection>>,
    presence: Presence,
}

/// A channel for pub/sub messaging.
#[derive(Debug)]
pub struct Channel {
    name: String,
    app_id: AppId,
    kind: ChannelKind,
    members: RwLock<Members>,
}

impl Channel {
    /// Create a channel; the kind follows from the name.
    #[must_use]
    pub fn new(app_id: AppId, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind: ChannelKind::from_name(&name),
            name,
            app_id,
            members: RwLock::new(Members::default()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn app_id(&self) -> AppId {
        self.app_id
    }

    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Subscribe a connection.
    ///
    /// Private and user-aware channels check `payload.auth` first. For
    /// user-aware channels the identity is resolved from `channel_data`, and
    /// `member_added` goes out to existing members when the identity is new.
    /// On success the subscriber receives `subscription_succeeded`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not authenticated, the signature
    /// does not match, or no identity can be resolved. The connection is not
    /// added in that case.
    pub fn subscribe(
        &self,
        connection: &Arc<Connection>,
        payload: &SubscribeData,
        resolver: &dyn IdentityResolver,
    ) -> Result<(), ChannelError> {
        let (Some(socket_id), Some(app)) = (connection.socket_id(), connection.application())
        else {
            return Err(ChannelError::Unauthenticated);
        };

        if self.kind.requires_authorization() {
            let channel_data = payload.channel_data_text();
            let authorized = payload.auth.as_deref().is_some_and(|signature| {
                auth::verify(app, socket_id.as_str(), &self.name, channel_data.as_deref(), signature)
            });
            if !authorized {
                warn!(app = self.app_id, channel = %self.name, socket = %socket_id, "Authorization failed");
                return Err(ChannelError::AuthorizationFailed(self.name.clone()));
            }
        }

        let member = match self.kind {
            ChannelKind::PresenceAware => {
                let data = payload.channel_data_value();
                let member = resolver
                    .resolve(data.as_ref())
                    .ok_or_else(|| ChannelError::InvalidPresenceData(self.name.clone()))?;
                Some(member)
            }
            _ => None,
        };

        let (added, recipients, presence) = {
            let mut members = self.members.write();
            let mut added = None;
            let mut recipients = Vec::new();

            if let Some(member) = member {
                if members.presence.join(socket_id.clone(), member.clone()) {
                    recipients = members.connections.values().cloned().collect();
                    added = Some(member);
                }
            }
            members
                .connections
                .insert(socket_id.clone(), Arc::clone(connection));

            let presence = (self.kind == ChannelKind::PresenceAware)
                .then(|| members.presence.snapshot());
            (added, recipients, presence)
        };

        debug!(app = self.app_id, channel = %self.name, socket = %socket_id, "Connection subscribed");

        if let Some(member) = added {
            let event = codec::system_channel_event(events::MEMBER_ADDED, &self.name, json!(member));
            deliver(&recipients, &event);
        }

        let data = match presence {
            Some(presence) => json!({ "presence": presence }),
            None => Value::Null,
        };
        connection.send(codec::system_channel_event(
            events::SUBSCRIPTION_SUCCEEDED,
            &self.name,
            data,
        ));

        Ok(())
    }

    /// Unsubscribe a connection. Removing a non-member is a no-op.
    ///
    /// Returns `true` if the connection was subscribed.
    pub fn unsubscribe(&self, connection: &Connection) -> bool {
        let Some(socket_id) = connection.socket_id() else {
            return false;
        };

        let (removed, recipients) = {
            let mut members = self.members.write();
            if members.connections.remove(socket_id).is_none() {
                return false;
            }
            let removed = members.presence.leave(socket_id);
            let recipients: Vec<_> = match removed {
                Some(_) => members.connections.values().cloned().collect(),
                None => Vec::new(),
            };
            (removed, recipients)
        };

        debug!(app = self.app_id, channel = %self.name, socket = %socket_id, "Connection unsubscribed");

        if let Some(member) = removed {
            let event = codec::system_channel_event(
                events::MEMBER_REMOVED,
                &self.name,
                json!({ "user_id": member.user_id }),
            );
            deliver(&recipients, &event);
        }

        true
    }

    /// Send a payload to every member.
    ///
    /// Returns the number of members the payload was handed to.
    pub fn broadcast(&self, payload: &str) -> usize {
        deliver(&self.snapshot(|_| true), payload)
    }

    /// Send a payload to every member except `sender`.
    pub fn broadcast_to_others(&self, sender: &Connection, payload: &str) -> usize {
        let excluded = sender.socket_id();
        deliver(&self.snapshot(|id| Some(id) != excluded), payload)
    }

    /// Send a payload to every member whose socket ID is not excluded.
    ///
    /// `None` excludes nobody.
    pub fn broadcast_to_all_except(&self, payload: &str, excluded: Option<&[SocketId]>) -> usize {
        let excluded = excluded.unwrap_or_default();
        deliver(&self.snapshot(|id| !excluded.contains(id)), payload)
    }

    /// Check if the channel has any members.
    #[must_use]
    pub fn has_connections(&self) -> bool {
        !self.members.read().connections.is_empty()
    }

    /// Number of member connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.members.read().connections.len()
    }

    /// Check if a socket is a member.
    #[must_use]
    pub fn is_subscribed(&self, socket_id: &SocketId) -> bool {
        self.members.read().connections.contains_key(socket_id)
    }

    /// All member connections.
    #[must_use]
    pub fn subscribed_connections(&self) -> Vec<Arc<Connection>> {
        self.snapshot(|_| true)
    }

    /// Distinct user identities. Empty unless the channel is user-aware.
    #[must_use]
    pub fn members(&self) -> Vec<Member> {
        self.members.read().presence.members()
    }

    fn snapshot(&self, include: impl Fn(&SocketId) -> bool) -> Vec<Arc<Connection>> {
        self.members
            .read()
            .connections
            .iter()
            .filter(|(id, _)| include(id))
            .map(|(_, conn)| Arc::clone(conn))
            .collect()
    }
}

/// Hand a payload to each connection. A failed send never stops the fan-out.
fn deliver(recipients: &[Arc<Connection>], payload: &str) -> usize {
    let delivered = recipients
        .iter()
        .filter(|conn| conn.send(payload.to_string()))
        .count();
    trace!(recipients = recipients.len(), delivered, "Broadcast");
    delivered
}
