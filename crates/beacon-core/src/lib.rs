//! # beacon-core
//!
//! Core of the Beacon multi-tenant pub/sub broker.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Application** - Tenant registry resolved from the connection path
//! - **Connection** - Socket ID, bound application and send/close capability
//! - **Channel** - Public, private and user-aware broadcast groups
//! - **ChannelManager** - Per-application channel lifecycle
//! - **Message** - Classification and dispatch of inbound frames
//! - **Broker** - Open/message/close lifecycle of a client
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌────────────────┐     ┌─────────┐
//! │  Transport  │────▶│   Broker    │────▶│ ChannelManager │────▶│ Channel │
//! └─────────────┘     └─────────────┘     └────────────────┘     └─────────┘
//!                            │                                        │
//!                            ▼                                        ▼
//!                     ┌─────────────┐                          ┌──────────┐
//!                     │  Registry   │                          │ Presence │
//!                     └─────────────┘                          └──────────┘
//! ```

pub mod app;
pub mod auth;
pub mod broker;
pub mod channel;
pub mod connection;
pub mod error;
pub mod manager;
pub mod message;
pub mod presence;

pub use app::{AppId, Application, ApplicationRegistry, RegistryError};
pub use broker::{Broker, BrokerConfig};
pub use channel::{Channel, ChannelError, ChannelKind};
pub use connection::{Connection, ConnectionState};
pub use error::BrokerError;
pub use manager::{ChannelManager, ManagerStats};
pub use message::{classify, ChannelMessage, ClientMessage, Message};
pub use presence::{IdentityResolver, Member, Presence, UserIdResolver};
