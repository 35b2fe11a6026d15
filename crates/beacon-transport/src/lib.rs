//! # beacon-transport
//!
//! Transport abstraction layer for the Beacon broker.
//!
//! The broker core only sees the [`Socket`] capability: send a text frame,
//! close the connection. This crate provides:
//!
//! - **Socket** - The send/close capability trait
//! - **SocketId** - Per-connection identifier generation
//! - **QueuedSocket** - A non-blocking socket backed by an mpsc queue
//! - **websocket::pump** - Drains a queue into an axum WebSocket
//!
//! ```rust,ignore
//! use beacon_transport::{QueuedSocket, websocket};
//!
//! let (socket, queue) = QueuedSocket::channel();
//! let (sink, stream) = ws.split();
//! tokio::spawn(websocket::pump(queue, sink));
//! ```

pub mod queue;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use queue::{Outbound, OutboundReceiver, QueuedSocket};
pub use traits::{CloseReason, Socket, SocketId, TransportError};
