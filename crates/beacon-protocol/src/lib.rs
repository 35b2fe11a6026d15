//! # beacon-protocol
//!
//! Wire protocol definitions for the Beacon broker.
//!
//! Clients and the broker exchange JSON text frames. Inbound frames are
//! `{"event": .., "data": {..}}` objects; outbound frames are flat
//! `{"event": .., "channel": .., ...payload}` envelopes.
//!
//! ## Event namespaces
//!
//! - `channel:*` - Broker protocol events (subscribe, unsubscribe, ping)
//! - `client-*` - Client events relayed to other channel members
//! - `system:*` - Broker-internal outbound events (membership, errors)
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, EventKind};
//! use serde_json::json;
//!
//! let frame = codec::parse(r#"{"event":"channel:subscribe","data":{"channel":"news"}}"#).unwrap();
//! assert_eq!(frame.kind(), EventKind::Channel);
//!
//! let out = codec::system_channel_event("subscription_succeeded", "news", json!({}));
//! assert!(out.contains("system:subscription_succeeded"));
//! ```

pub mod codec;
pub mod frames;

pub use codec::{parse, ProtocolError};
pub use frames::{
    events, ErrorCode, EventKind, InboundFrame, SubscribeData, UnsubscribeData,
    CHANNEL_EVENT_PREFIX, CLIENT_EVENT_PREFIX, SYSTEM_EVENT_PREFIX,
};
