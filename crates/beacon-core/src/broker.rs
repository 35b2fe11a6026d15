//! Connection lifecycle.
//!
//! The [`Broker`] ties the registry and channel manager to the three
//! callbacks a transport produces for every client: open, message, close.

use beacon_protocol::{codec, events};
use beacon_transport::{CloseReason, Socket, SocketId};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::app::ApplicationRegistry;
use crate::connection::Connection;
use crate::error::BrokerError;
use crate::manager::ChannelManager;
use crate::message::classify;

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Seconds of silence after which clients should ping, advertised in
    /// `connection_established`.
    pub activity_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            activity_timeout_secs: 30,
        }
    }
}

/// The pub/sub broker.
#[derive(Debug)]
pub struct Broker {
    registry: Arc<ApplicationRegistry>,
    channels: ChannelManager,
    config: BrokerConfig,
}

impl Broker {
    /// Create a broker over a populated registry.
    #[must_use]
    pub fn new(registry: Arc<ApplicationRegistry>, config: BrokerConfig) -> Self {
        Self::with_channel_manager(registry, ChannelManager::new(), config)
    }

    /// Create a broker with a preconfigured channel manager.
    #[must_use]
    pub fn with_channel_manager(
        registry: Arc<ApplicationRegistry>,
        channels: ChannelManager,
        config: BrokerConfig,
    ) -> Self {
        info!(apps = registry.len(), "Creating broker");
        Self {
            registry,
            channels,
            config,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ApplicationRegistry {
        &self.registry
    }

    #[must_use]
    pub fn channels(&self) -> &ChannelManager {
        &self.channels
    }

    /// Admit a new transport connection for the application with `app_key`.
    ///
    /// On success the client receives `connection_established` with its
    /// socket ID. On failure the client receives a `system:error`, the socket
    /// is closed with the error code, and the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Registry`] for an unknown key and
    /// [`BrokerError::OverCapacity`] when the application is full.
    pub fn open(
        &self,
        socket: impl Socket + 'static,
        app_key: &str,
    ) -> Result<Arc<Connection>, BrokerError> {
        let connection = Arc::new(Connection::new(socket));
        connection.assign_socket_id(SocketId::generate());

        if let Err(e) = self.admit(&connection, app_key) {
            warn!(socket = %connection, key = %app_key, error = %e, "Connection refused");
            connection.send(e.to_event());
            connection.close_with(Some(CloseReason::new(u16::from(e.code()), e.kind())));
            return Err(e);
        }

        debug!(
            socket = %connection,
            remote = ?connection.remote_addr(),
            key = %app_key,
            "Connection established"
        );
        connection.send(codec::system_event(
            events::CONNECTION_ESTABLISHED,
            json!({
                "socket_id": connection.to_string(),
                "activity_timeout": self.config.activity_timeout_secs,
            }),
        ));

        Ok(connection)
    }

    fn admit(&self, connection: &Connection, app_key: &str) -> Result<(), BrokerError> {
        let app = self.registry.resolve_by_key(app_key)?;

        if let Some(capacity) = app.capacity() {
            if self.channels.application_connection_count(app.id()) >= capacity {
                return Err(BrokerError::OverCapacity(app.id()));
            }
        }

        connection.bind_application(app);
        Ok(())
    }

    /// Handle one inbound text frame.
    ///
    /// Errors are reported to the sending connection as `system:error` and
    /// also returned for logging. No error affects other connections.
    ///
    /// # Errors
    ///
    /// Returns the error reported to the client.
    pub fn handle_message(&self, connection: &Arc<Connection>, raw: &str) -> Result<(), BrokerError> {
        let result = classify(raw, connection, &self.channels)
            .map_err(BrokerError::from)
            .and_then(|message| message.respond());

        if let Err(e) = &result {
            debug!(socket = %connection, error = %e, "Message rejected");
            connection.send(e.to_event());
        }
        result
    }

    /// Transport reported the connection closed.
    pub fn close(&self, connection: &Connection) {
        self.channels.remove_connection(connection);
        debug!(socket = %connection, "Connection closed");
    }
}
