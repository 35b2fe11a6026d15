//! Transport abstraction traits for Beacon.
//!
//! The broker never touches a transport directly. It only needs to push text
//! frames to a client and ask for the client to be disconnected, which is what
//! the [`Socket`] capability exposes.

use rand::Rng;
use std::fmt;
use thiserror::Error;

/// Stable per-connection identifier, formatted `<digits>.<digits>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub String);

impl SocketId {
    /// Create a socket ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random socket ID.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let major: u32 = rng.gen_range(1..1_000_000_000);
        let minor: u32 = rng.gen_range(1..1_000_000_000);
        Self(format!("{major}.{minor}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SocketId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SocketId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Close code and reason sent to the client when the broker hangs up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Application close code (4000-4999).
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
}

impl CloseReason {
    /// Create a close reason.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Outbound capability of one live client connection.
///
/// Implementations must not block: the broker calls these methods while
/// fanning a payload out to every member of a channel.
pub trait Socket: Send + Sync {
    /// Queue a text frame for the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is already closed.
    fn send(&self, payload: String) -> Result<(), TransportError>;

    /// Ask the transport to tear the connection down.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is already closed.
    fn close(&self, reason: Option<CloseReason>) -> Result<(), TransportError>;

    /// Check if the socket still accepts frames.
    fn is_open(&self) -> bool;

    /// Get the remote address of the client, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_id_generation() {
        let id1 = SocketId::generate();
        let id2 = SocketId::generate();
        assert_ne!(id1, id2);

        let (major, minor) = id1.as_str().split_once('.').unwrap();
        assert!(major.parse::<u32>().is_ok());
        assert!(minor.parse::<u32>().is_ok());
    }

    #[test]
    fn test_socket_id_from_string() {
        let id: SocketId = "123.456".into();
        assert_eq!(id.as_str(), "123.456");
        assert_eq!(id.to_string(), "123.456");
    }
}
