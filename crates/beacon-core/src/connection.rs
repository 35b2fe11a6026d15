//! A live client connection.
//!
//! A [`Connection`] pairs the transport's [`Socket`] capability with the
//! identity the broker assigns at acceptance (socket ID) and the application
//! the client authenticated against.

use beacon_transport::{CloseReason, Socket, SocketId};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use crate::app::Application;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, no application bound yet.
    Connecting,
    /// Bound to an application, may join channels.
    Authenticated,
    /// Removed from every channel. Terminal.
    Disconnected,
}

/// One client connection.
pub struct Connection {
    socket_id: OnceLock<SocketId>,
    application: OnceLock<Arc<Application>>,
    disconnected: AtomicBool,
    socket: Box<dyn Socket>,
}

impl Connection {
    /// Wrap a transport socket.
    #[must_use]
    pub fn new(socket: impl Socket + 'static) -> Self {
        Self {
            socket_id: OnceLock::new(),
            application: OnceLock::new(),
            disconnected: AtomicBool::new(false),
            socket: Box::new(socket),
        }
    }

    /// Assign the connection's socket ID.
    ///
    /// # Panics
    ///
    /// Panics if a socket ID was already assigned. Socket IDs are exclusion
    /// keys for broadcasts and must never change once handed out.
    pub fn assign_socket_id(&self, id: SocketId) {
        if let Err(id) = self.socket_id.set(id) {
            panic!(
                "socket id already assigned ({}), refusing to reassign to {}",
                self.socket_id.get().map_or("?", SocketId::as_str),
                id
            );
        }
    }

    /// The socket ID, if assigned.
    #[must_use]
    pub fn socket_id(&self) -> Option<&SocketId> {
        self.socket_id.get()
    }

    /// Bind the application this connection authenticated against.
    ///
    /// Returns `false` if an application was already bound; the first binding
    /// is kept.
    pub fn bind_application(&self, app: Arc<Application>) -> bool {
        let app_id = app.id();
        if self.application.set(app).is_err() {
            warn!(socket = %self, app = app_id, "Application already bound");
            return false;
        }
        true
    }

    /// The bound application, if authenticated.
    #[must_use]
    pub fn application(&self) -> Option<&Arc<Application>> {
        self.application.get()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        if self.disconnected.load(Ordering::SeqCst) {
            ConnectionState::Disconnected
        } else if self.application.get().is_some() {
            ConnectionState::Authenticated
        } else {
            ConnectionState::Connecting
        }
    }

    /// Check if the connection reached its terminal state.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Move to [`ConnectionState::Disconnected`].
    ///
    /// Returns `true` only for the call that performed the transition.
    pub(crate) fn mark_disconnected(&self) -> bool {
        !self.disconnected.swap(true, Ordering::SeqCst)
    }

    /// Send a text frame.
    ///
    /// Transport failures are logged and swallowed; the connection is cleaned
    /// up when the transport reports the disconnect. Returns whether the frame
    /// was handed to the transport.
    pub fn send(&self, payload: impl Into<String>) -> bool {
        match self.socket.send(payload.into()) {
            Ok(()) => true,
            Err(e) => {
                debug!(socket = %self, error = %e, "Dropping frame for stale connection");
                false
            }
        }
    }

    /// Ask the transport to close the connection.
    ///
    /// Channel cleanup happens when the transport reports the disconnect.
    pub fn close(&self) {
        self.close_with(None);
    }

    /// Close the connection with an application close code.
    pub fn close_with(&self, reason: Option<CloseReason>) {
        if let Err(e) = self.socket.close(reason) {
            debug!(socket = %self, error = %e, "Close on closed connection");
        }
    }

    /// Remote address reported by the transport.
    #[must_use]
    pub fn remote_addr(&self) -> Option<String> {
        self.socket.remote_addr()
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.socket_id.get() {
            Some(id) => f.write_str(id.as_str()),
            None => f.write_str("<unassigned>"),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("socket_id", &self.socket_id.get())
            .field("app", &self.application.get().map(|a| a.id()))
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_transport::{Outbound, QueuedSocket};

    #[test]
    fn test_lifecycle() {
        let (socket, _rx) = QueuedSocket::channel();
        let conn = Connection::new(socket);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.socket_id().is_none());

        conn.assign_socket_id(SocketId::new("1.1"));
        assert_eq!(conn.socket_id().unwrap().as_str(), "1.1");
        assert_eq!(conn.to_string(), "1.1");

        assert!(conn.bind_application(Arc::new(Application::new(1, "abc", "s"))));
        assert_eq!(conn.state(), ConnectionState::Authenticated);
        assert!(!conn.bind_application(Arc::new(Application::new(2, "def", "s"))));
        assert_eq!(conn.application().unwrap().id(), 1);

        assert!(conn.mark_disconnected());
        assert!(!conn.mark_disconnected());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    #[should_panic(expected = "socket id already assigned")]
    fn test_socket_id_assigned_twice() {
        let (socket, _rx) = QueuedSocket::channel();
        let conn = Connection::new(socket);
        conn.assign_socket_id(SocketId::new("1.1"));
        conn.assign_socket_id(SocketId::new("2.2"));
    }

    #[test]
    fn test_send_swallows_transport_errors() {
        let (socket, mut rx) = QueuedSocket::channel();
        let conn = Connection::new(socket);

        assert!(conn.send("one"));
        conn.close_with(Some(CloseReason::new(4001, "bye")));
        assert!(!conn.send("two"));
        conn.close();

        assert_eq!(rx.try_recv().unwrap(), Outbound::Text("one".to_string()));
        assert!(matches!(rx.try_recv().unwrap(), Outbound::Close(Some(_))));
        assert!(rx.try_recv().is_err());
    }
}
