//! Channel manager.
//!
//! The manager owns the two-level map `application -> channel name -> channel`
//! and is the only place channels are created or deleted. Every mutation runs
//! while holding the application's map entry, so membership changes and
//! channel lifecycle for one application are serialized while independent
//! applications proceed in parallel.

use beacon_protocol::SubscribeData;
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::app::AppId;
use crate::channel::{validate_channel_name, Channel, ChannelError};
use crate::connection::Connection;
use crate::presence::{IdentityResolver, UserIdResolver};

type ChannelMap = HashMap<String, Arc<Channel>>;

/// Registry of live channels for every application.
pub struct ChannelManager {
    apps: DashMap<AppId, ChannelMap>,
    resolver: Arc<dyn IdentityResolver>,
}

impl ChannelManager {
    /// Create a manager resolving presence identities with [`UserIdResolver`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_resolver(Arc::new(UserIdResolver))
    }

    /// Create a manager with a custom presence identity resolver.
    #[must_use]
    pub fn with_resolver(resolver: Arc<dyn IdentityResolver>) -> Self {
        info!("Creating channel manager");
        Self {
            apps: DashMap::new(),
            resolver,
        }
    }

    /// Get the registered channel, or a fresh one if absent.
    ///
    /// A fresh channel is not registered. It becomes reachable through
    /// [`subscribe`](Self::subscribe) once it has a member, so a memberless
    /// channel is never visible to other callers.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel name is invalid.
    pub fn find_or_create(&self, app_id: AppId, name: &str) -> Result<Arc<Channel>, ChannelError> {
        check_name(name)?;
        Ok(self.find(app_id, name).unwrap_or_else(|| {
            trace!(app = app_id, channel = %name, "Constructed unregistered channel");
            Arc::new(Channel::new(app_id, name))
        }))
    }

    /// Look up a channel without creating it.
    #[must_use]
    pub fn find(&self, app_id: AppId, name: &str) -> Option<Arc<Channel>> {
        self.apps
            .get(&app_id)
            .and_then(|channels| channels.get(name).cloned())
    }

    /// All channels of an application.
    #[must_use]
    pub fn application_channels(&self, app_id: AppId) -> HashMap<String, Arc<Channel>> {
        self.apps
            .get(&app_id)
            .map(|channels| channels.value().clone())
            .unwrap_or_default()
    }

    /// Sum of member counts across an application's channels.
    ///
    /// A connection subscribed to `k` channels occupies `k` slots; this is a
    /// slot count, not a count of distinct connections.
    #[must_use]
    pub fn application_connection_count(&self, app_id: AppId) -> usize {
        self.apps
            .get(&app_id)
            .map(|channels| channels.values().map(|c| c.connection_count()).sum())
            .unwrap_or(0)
    }

    /// Subscribe a connection to a channel of its application.
    ///
    /// The channel is created if needed and registered only if the
    /// subscription leaves it with at least one member. A connection that has
    /// already been removed is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is unauthenticated, the name is
    /// invalid, or the channel rejects the subscription.
    pub fn subscribe(
        &self,
        connection: &Arc<Connection>,
        payload: &SubscribeData,
    ) -> Result<(), ChannelError> {
        let app_id = connection
            .application()
            .map(|app| app.id())
            .ok_or(ChannelError::Unauthenticated)?;
        check_name(&payload.channel)?;

        let result = {
            let mut channels = self.apps.entry(app_id).or_default();
            if connection.is_disconnected() {
                trace!(app = app_id, socket = %connection, "Subscribe after disconnect ignored");
                Ok(())
            } else {
                let channel = match channels.get(&payload.channel) {
                    Some(channel) => Arc::clone(channel),
                    None => Arc::new(Channel::new(app_id, payload.channel.as_str())),
                };

                let result = channel.subscribe(connection, payload, self.resolver.as_ref());
                if channel.has_connections() {
                    channels
                        .entry(payload.channel.clone())
                        .or_insert_with(|| {
                            debug!(app = app_id, channel = %payload.channel, "Created channel");
                            channel
                        });
                } else {
                    channels.remove(&payload.channel);
                }
                result
            }
        };

        self.drop_application_if_empty(app_id);
        result
    }

    /// Unsubscribe a connection from one channel, deleting it if left empty.
    ///
    /// Returns `true` if the connection was a member.
    pub fn unsubscribe(&self, connection: &Connection, name: &str) -> bool {
        let Some(app_id) = connection.application().map(|app| app.id()) else {
            return false;
        };

        let removed = match self.apps.get_mut(&app_id) {
            Some(mut channels) => {
                let removed = channels
                    .get(name)
                    .is_some_and(|channel| channel.unsubscribe(connection));
                sweep(app_id, &mut channels);
                removed
            }
            None => false,
        };

        self.drop_application_if_empty(app_id);
        removed
    }

    /// Remove a connection from every channel of its application.
    ///
    /// Channels left empty are deleted, then the application's entry if it has
    /// no channels left. Unbound connections are ignored and repeated calls are
    /// no-ops.
    pub fn remove_connection(&self, connection: &Connection) {
        let Some(app_id) = connection.application().map(|app| app.id()) else {
            return;
        };

        {
            let mut channels = self.apps.entry(app_id).or_default();
            if connection.mark_disconnected() {
                debug!(app = app_id, socket = %connection, "Removing connection from all channels");
            }
            for channel in channels.values() {
                channel.unsubscribe(connection);
            }
            sweep(app_id, &mut channels);
        }

        self.drop_application_if_empty(app_id);
    }

    /// Manager statistics.
    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats {
            application_count: self.apps.len(),
            ..ManagerStats::default()
        };
        for entry in self.apps.iter() {
            stats.channel_count += entry.len();
            stats.connection_slots += entry.values().map(|c| c.connection_count()).sum::<usize>();
        }
        stats
    }

    fn drop_application_if_empty(&self, app_id: AppId) {
        if self
            .apps
            .remove_if(&app_id, |_, channels| channels.is_empty())
            .is_some()
        {
            trace!(app = app_id, "Dropped empty application entry");
        }
    }
}

impl fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Manager statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Applications with at least one channel.
    pub application_count: usize,
    /// Number of live channels.
    pub channel_count: usize,
    /// Total subscriptions across all channels.
    pub connection_slots: usize,
}

fn check_name(name: &str) -> Result<(), ChannelError> {
    validate_channel_name(name).map_err(|reason| ChannelError::InvalidChannel {
        name: name.to_string(),
        reason,
    })
}

fn sweep(app_id: AppId, channels: &mut ChannelMap) {
    channels.retain(|name, channel| {
        let keep = channel.has_connections();
        if !keep {
            debug!(app = app_id, channel = %name, "Deleted empty channel");
        }
        keep
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Application;
    use crate::channel::tests::{app, connect, drain, events_of, presence, signed};
    use crate::presence::Member;
    use serde_json::Value;

    fn public(channel: &str) -> SubscribeData {
        SubscribeData {
            channel: channel.to_string(),
            auth: None,
            channel_data: None,
        }
    }

    #[test]
    fn test_private_orders_scenario() {
        let manager = ChannelManager::new();
        let app = app();
        let (c1, _rx) = connect(&app, "1.1");

        manager
            .subscribe(&c1, &signed(&app, "1.1", "private-orders"))
            .unwrap();
        let channel = manager.find(1, "private-orders").unwrap();
        let members = channel.subscribed_connections();
        assert_eq!(members.len(), 1);
        assert!(Arc::ptr_eq(&members[0], &c1));

        manager.remove_connection(&c1);
        assert!(manager.find(1, "private-orders").is_none());
        assert!(manager.application_channels(1).is_empty());
    }

    #[test]
    fn test_failed_authorization_leaves_no_channel() {
        let manager = ChannelManager::new();
        let app = app();
        let (c1, _rx) = connect(&app, "1.1");

        let err = manager
            .subscribe(&c1, &signed(&app, "2.2", "private-orders"))
            .unwrap_err();
        assert_eq!(err, ChannelError::AuthorizationFailed("private-orders".to_string()));
        assert!(manager.find(1, "private-orders").is_none());
        assert_eq!(manager.stats(), ManagerStats::default());
    }

    #[test]
    fn test_failed_subscribe_keeps_existing_members() {
        let manager = ChannelManager::new();
        let app = app();
        let (c1, _rx1) = connect(&app, "1.1");
        let (c2, _rx2) = connect(&app, "1.2");

        manager.subscribe(&c1, &signed(&app, "1.1", "private-orders")).unwrap();
        assert!(manager
            .subscribe(&c2, &signed(&app, "1.1", "private-orders"))
            .is_err());

        let channel = manager.find(1, "private-orders").unwrap();
        assert_eq!(channel.connection_count(), 1);
        assert!(!channel.is_subscribed(&"1.2".into()));
    }

    #[test]
    fn test_unsubscribe_sole_member_deletes_channel() {
        let manager = ChannelManager::new();
        let app = app();
        let (c1, _rx) = connect(&app, "1.1");

        manager.subscribe(&c1, &public("news")).unwrap();
        assert!(manager.find(1, "news").is_some());

        assert!(manager.unsubscribe(&c1, "news"));
        assert!(manager.find(1, "news").is_none());
        assert!(!manager.unsubscribe(&c1, "news"));
        assert_eq!(manager.stats().application_count, 0);
    }

    #[test]
    fn test_membership_follows_program_order() {
        let manager = ChannelManager::new();
        let app = app();
        let (c1, _rx1) = connect(&app, "1.1");
        let (c2, _rx2) = connect(&app, "1.2");
        let (c3, _rx3) = connect(&app, "1.3");

        manager.subscribe(&c1, &public("news")).unwrap();
        manager.subscribe(&c2, &public("news")).unwrap();
        manager.unsubscribe(&c1, "news");
        manager.subscribe(&c3, &public("news")).unwrap();
        manager.subscribe(&c1, &public("news")).unwrap();
        manager.unsubscribe(&c2, "news");
        manager.subscribe(&c1, &public("news")).unwrap();

        let channel = manager.find(1, "news").unwrap();
        let mut ids: Vec<String> = channel
            .subscribed_connections()
            .iter()
            .map(|c| c.to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, ["1.1", "1.3"]);
    }

    #[test]
    fn test_remove_connection_is_idempotent() {
        let manager = ChannelManager::new();
        let app = app();
        let (c1, _rx1) = connect(&app, "1.1");
        let (c2, _rx2) = connect(&app, "1.2");

        manager.subscribe(&c1, &public("news")).unwrap();
        manager.subscribe(&c1, &public("sports")).unwrap();
        manager.subscribe(&c2, &public("news")).unwrap();

        manager.remove_connection(&c1);
        let once = manager.stats();
        manager.remove_connection(&c1);
        assert_eq!(manager.stats(), once);

        assert_eq!(once.channel_count, 1);
        assert_eq!(once.connection_slots, 1);
        assert!(manager.find(1, "sports").is_none());
        assert!(manager.find(1, "news").unwrap().is_subscribed(&"1.2".into()));
    }

    #[test]
    fn test_remove_unbound_connection_is_noop() {
        let manager = ChannelManager::new();
        let app = app();
        let (c1, _rx) = connect(&app, "1.1");
        manager.subscribe(&c1, &public("news")).unwrap();

        let (socket, _rx2) = beacon_transport::QueuedSocket::channel();
        let stranger = Connection::new(socket);
        manager.remove_connection(&stranger);

        assert_eq!(manager.application_connection_count(1), 1);
    }

    #[test]
    fn test_subscribe_after_disconnect_is_ignored() {
        let manager = ChannelManager::new();
        let app = app();
        let (c1, _rx) = connect(&app, "1.1");

        manager.remove_connection(&c1);
        manager.subscribe(&c1, &public("news")).unwrap();
        assert!(manager.find(1, "news").is_none());
    }

    #[test]
    fn test_connection_count_counts_slots() {
        let manager = ChannelManager::new();
        let app = app();
        let (c1, _rx1) = connect(&app, "1.1");
        let (c2, _rx2) = connect(&app, "1.2");

        manager.subscribe(&c1, &public("news")).unwrap();
        manager.subscribe(&c1, &public("sports")).unwrap();
        manager.subscribe(&c1, &public("weather")).unwrap();
        manager.subscribe(&c2, &public("news")).unwrap();

        // Two distinct connections, four slots: c1 counts once per channel.
        assert_eq!(manager.application_connection_count(1), 4);
        assert_eq!(manager.application_connection_count(2), 0);
    }

    #[test]
    fn test_applications_are_isolated() {
        let manager = ChannelManager::new();
        let app1 = app();
        let app2 = Arc::new(Application::new(2, "def", "t"));
        let (c1, _rx1) = connect(&app1, "1.1");
        let (c2, _rx2) = connect(&app2, "2.1");

        manager.subscribe(&c1, &public("news")).unwrap();
        manager.subscribe(&c2, &public("news")).unwrap();

        assert_eq!(manager.find(1, "news").unwrap().connection_count(), 1);
        assert_eq!(manager.find(2, "news").unwrap().connection_count(), 1);

        manager.remove_connection(&c1);
        assert!(manager.find(1, "news").is_none());
        assert!(manager.find(2, "news").is_some());
    }

    #[test]
    fn test_find_or_create() {
        let manager = ChannelManager::new();
        let fresh = manager.find_or_create(1, "private-x").unwrap();
        assert_eq!(fresh.kind(), crate::ChannelKind::Private);
        assert!(!fresh.has_connections());

        // A memberless channel is never registered.
        assert!(manager.find(1, "private-x").is_none());
        assert!(manager.application_channels(1).is_empty());
        assert_eq!(manager.stats(), ManagerStats::default());

        assert!(matches!(
            manager.find_or_create(1, "bad name"),
            Err(ChannelError::InvalidChannel { .. })
        ));

        let app = app();
        let (c1, _rx) = connect(&app, "1.1");
        manager.subscribe(&c1, &public("news")).unwrap();
        let registered = manager.find(1, "news").unwrap();
        assert!(Arc::ptr_eq(&registered, &manager.find_or_create(1, "news").unwrap()));

        manager.remove_connection(&c1);
        assert!(manager.application_channels(1).is_empty());
    }

    #[test]
    fn test_presence_through_manager() {
        let manager = ChannelManager::new();
        let app = app();
        let (watcher, mut rx_w) = connect(&app, "1.0");
        let (a1, _rx1) = connect(&app, "1.1");
        let (a2, _rx2) = connect(&app, "1.2");
        let room = "user-aware-room";

        manager.subscribe(&watcher, &presence(&app, "1.0", room, "w")).unwrap();
        manager.subscribe(&a1, &presence(&app, "1.1", room, "alice")).unwrap();
        manager.subscribe(&a2, &presence(&app, "1.2", room, "alice")).unwrap();
        manager.remove_connection(&a1);
        manager.remove_connection(&a2);

        let frames = drain(&mut rx_w);
        assert_eq!(
            events_of(&frames),
            [
                "system:subscription_succeeded",
                "system:member_added",
                "system:member_removed"
            ]
        );
    }

    #[test]
    fn test_custom_resolver() {
        let resolver = |data: Option<&Value>| {
            data.and_then(|d| d.get("uid"))
                .and_then(Value::as_str)
                .map(|uid| Member::new(uid, Value::Null))
        };
        let manager = ChannelManager::with_resolver(Arc::new(resolver));
        let app = app();
        let (c1, _rx) = connect(&app, "1.1");

        let data = serde_json::json!({"uid": "custom"}).to_string();
        let payload = SubscribeData {
            channel: "user-aware-room".to_string(),
            auth: Some(crate::auth::sign(&app, "1.1", "user-aware-room", Some(&data))),
            channel_data: Some(Value::String(data)),
        };
        manager.subscribe(&c1, &payload).unwrap();

        let members = manager.find(1, "user-aware-room").unwrap().members();
        assert_eq!(members[0].user_id, "custom");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_churn_leaves_consistent_state() {
        let manager = Arc::new(ChannelManager::new());
        let app = app();

        let mut handles = Vec::new();
        for i in 0..32 {
            let manager = Arc::clone(&manager);
            let app = Arc::clone(&app);
            handles.push(tokio::spawn(async move {
                let (conn, _rx) = connect(&app, &format!("1.{i}"));
                for round in 0..20 {
                    let name = format!("room-{}", (i + round) % 4);
                    manager.subscribe(&conn, &public(&name)).unwrap();
                    if round % 3 == 0 {
                        manager.unsubscribe(&conn, &name);
                    }
                    tokio::task::yield_now().await;
                }
                manager.remove_connection(&conn);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(manager.stats(), ManagerStats::default());
        assert!(manager.application_channels(1).is_empty());
    }
}
