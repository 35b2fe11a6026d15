//! Queue-backed socket.
//!
//! Frames are pushed into an unbounded channel and drained by whichever task
//! owns the real transport. This keeps [`Socket::send`] non-blocking and lets
//! tests observe exactly what a client would receive.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::trace;

use crate::traits::{CloseReason, Socket, TransportError};

/// An item queued for a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame.
    Text(String),
    /// Close the connection.
    Close(Option<CloseReason>),
}

/// Receiving half of a [`QueuedSocket`].
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// A socket that queues outbound frames for a writer task.
#[derive(Debug)]
pub struct QueuedSocket {
    sender: mpsc::UnboundedSender<Outbound>,
    is_open: AtomicBool,
    remote_addr: Option<String>,
}

impl QueuedSocket {
    /// Create a socket and the receiver its frames are delivered to.
    #[must_use]
    pub fn channel() -> (Self, OutboundReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let socket = Self {
            sender,
            is_open: AtomicBool::new(true),
            remote_addr: None,
        };
        (socket, receiver)
    }

    /// Attach the client's remote address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }
}

impl Socket for QueuedSocket {
    fn send(&self, payload: String) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        trace!(bytes = payload.len(), "Queueing frame");
        self.sender
            .send(Outbound::Text(payload))
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn close(&self, reason: Option<CloseReason>) -> Result<(), TransportError> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        self.sender
            .send(Outbound::Close(reason))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst) && !self.sender.is_closed()
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.clone()
    }
}
