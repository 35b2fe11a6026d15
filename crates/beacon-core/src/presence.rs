//! Presence tracking for user-aware channels.
//!
//! Presence follows distinct user identities rather than connections: a user
//! with three open tabs is one member. Membership changes are reported only
//! when an identity gains its first connection or loses its last one.

use beacon_transport::SocketId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::debug;

/// A user identity present in a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// Stable user identifier.
    pub user_id: String,
    /// Application-defined user metadata.
    #[serde(default)]
    pub user_info: Value,
}

impl Member {
    /// Create a member.
    #[must_use]
    pub fn new(user_id: impl Into<String>, user_info: Value) -> Self {
        Self {
            user_id: user_id.into(),
            user_info,
        }
    }
}

/// Derives a user identity from a subscribe request's `channel_data`.
pub trait IdentityResolver: Send + Sync {
    /// Resolve the identity, or `None` if the data does not name one.
    fn resolve(&self, channel_data: Option<&Value>) -> Option<Member>;
}

impl<F> IdentityResolver for F
where
    F: Fn(Option<&Value>) -> Option<Member> + Send + Sync,
{
    fn resolve(&self, channel_data: Option<&Value>) -> Option<Member> {
        self(channel_data)
    }
}

/// Reads `user_id` (string or number) and optional `user_info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserIdResolver;

impl IdentityResolver for UserIdResolver {
    fn resolve(&self, channel_data: Option<&Value>) -> Option<Member> {
        let data = channel_data?;
        let user_id = match data.get("user_id")? {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let user_info = data.get("user_info").cloned().unwrap_or(Value::Null);
        Some(Member::new(user_id, user_info))
    }
}

#[derive(Debug)]
struct Identity {
    member: Member,
    connections: usize,
}

/// Presence tracker for one channel.
#[derive(Debug, Default)]
pub struct Presence {
    /// Socket ID to user ID.
    sockets: HashMap<SocketId, String>,
    /// User ID to identity with its connection count.
    identities: HashMap<String, Identity>,
}

impl Presence {
    /// Create a new presence tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct identities.
    #[must_use]
    pub fn count(&self) -> usize {
        self.identities.len()
    }

    /// Check if a user identity is present.
    #[must_use]
    pub fn is_present(&self, user_id: &str) -> bool {
        self.identities.contains_key(user_id)
    }

    /// Check if a socket is tracked.
    #[must_use]
    pub fn has_socket(&self, socket_id: &SocketId) -> bool {
        self.sockets.contains_key(socket_id)
    }

    /// Track a socket for an identity.
    ///
    /// Returns `true` if this is the identity's first connection. A socket that
    /// is already tracked is left untouched.
    pub fn join(&mut self, socket_id: SocketId, member: Member) -> bool {
        if self.sockets.contains_key(&socket_id) {
            return false;
        }

        self.sockets.insert(socket_id, member.user_id.clone());
        match self.identities.get_mut(&member.user_id) {
            Some(identity) => {
                identity.connections += 1;
                false
            }
            None => {
                debug!(user = %member.user_id, "Presence: member joined");
                self.identities.insert(
                    member.user_id.clone(),
                    Identity {
                        member,
                        connections: 1,
                    },
                );
                true
            }
        }
    }

    /// Stop tracking a socket.
    ///
    /// Returns the member if this was the identity's last connection.
    pub fn leave(&mut self, socket_id: &SocketId) -> Option<Member> {
        let user_id = self.sockets.remove(socket_id)?;
        let identity = self.identities.get_mut(&user_id)?;
        identity.connections -= 1;
        if identity.connections > 0 {
            return None;
        }

        debug!(user = %user_id, "Presence: member left");
        self.identities.remove(&user_id).map(|identity| identity.member)
    }

    /// All present members.
    #[must_use]
    pub fn members(&self) -> Vec<Member> {
        self.identities
            .values()
            .map(|identity| identity.member.clone())
            .collect()
    }

    /// Presence payload for `subscription_succeeded`: `{ids, hash, count}`.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        let ids: Vec<&str> = self.identities.keys().map(String::as_str).collect();
        let hash: Map<String, Value> = self
            .identities
            .iter()
            .map(|(id, identity)| (id.clone(), identity.member.user_info.clone()))
            .collect();

        json!({
            "ids": ids,
            "hash": hash,
            "count": self.identities.len(),
        })
    }

    /// Check if presence is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}
