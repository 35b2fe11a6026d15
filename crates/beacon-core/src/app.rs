//! Application registry.
//!
//! Applications are the tenants of the broker. Each one owns an isolated set
//! of channels and signs private channel subscriptions with its secret.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Application identifier.
pub type AppId = u64;

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No application with this ID.
    #[error("Invalid app id: {0}")]
    InvalidAppId(AppId),

    /// No application with this key.
    #[error("Invalid app key: {0}")]
    InvalidAppKey(String),

    /// An application with this ID is already registered.
    #[error("Duplicate application id: {0}")]
    DuplicateApplicationId(AppId),

    /// An application with this key is already registered.
    #[error("Duplicate application key: {0}")]
    DuplicateApplicationKey(String),
}

fn default_true() -> bool {
    true
}

/// A registered tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    id: AppId,
    key: String,
    secret: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    name: String,
    /// Maximum connection slots, see [`ChannelManager::application_connection_count`](crate::ChannelManager::application_connection_count).
    #[serde(default)]
    capacity: Option<usize>,
    #[serde(default = "default_true")]
    client_messages_enabled: bool,
}

impl Application {
    /// Create an application with client events enabled and no capacity limit.
    #[must_use]
    pub fn new(id: AppId, key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id,
            key: key.into(),
            secret: secret.into(),
            host: String::new(),
            name: String::new(),
            capacity: None,
            client_messages_enabled: true,
        }
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    #[must_use]
    pub fn with_client_messages(mut self, enabled: bool) -> Self {
        self.client_messages_enabled = enabled;
        self
    }

    #[must_use]
    pub fn id(&self) -> AppId {
        self.id
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    #[must_use]
    pub fn client_messages_enabled(&self) -> bool {
        self.client_messages_enabled
    }
}

/// Lookup table of applications by ID and by key.
///
/// Populated once at startup and shared read-only afterwards.
#[derive(Debug, Default)]
pub struct ApplicationRegistry {
    apps: HashMap<AppId, Arc<Application>>,
    ids_by_key: HashMap<String, AppId>,
}

impl ApplicationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of applications.
    ///
    /// # Errors
    ///
    /// Returns the first duplicate ID or key encountered.
    pub fn from_apps(apps: impl IntoIterator<Item = Application>) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for app in apps {
            registry.register(app)?;
        }
        Ok(registry)
    }

    /// Register an application.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID or key is already taken. The registry is
    /// left unchanged in that case.
    pub fn register(&mut self, app: Application) -> Result<Arc<Application>, RegistryError> {
        if self.apps.contains_key(&app.id) {
            return Err(RegistryError::DuplicateApplicationId(app.id));
        }
        if self.ids_by_key.contains_key(&app.key) {
            return Err(RegistryError::DuplicateApplicationKey(app.key));
        }

        info!(app = app.id, key = %app.key, name = %app.name, "Registered application");

        let app = Arc::new(app);
        self.ids_by_key.insert(app.key.clone(), app.id);
        self.apps.insert(app.id, Arc::clone(&app));
        Ok(app)
    }

    /// Resolve an application by its public key.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidAppKey`] if no application has this key.
    pub fn resolve_by_key(&self, key: &str) -> Result<Arc<Application>, RegistryError> {
        self.ids_by_key
            .get(key)
            .and_then(|id| self.apps.get(id))
            .cloned()
            .ok_or_else(|| RegistryError::InvalidAppKey(key.to_string()))
    }

    /// Resolve an application by ID.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidAppId`] if no application has this ID.
    pub fn resolve_by_id(&self, id: AppId) -> Result<Arc<Application>, RegistryError> {
        self.apps
            .get(&id)
            .cloned()
            .ok_or(RegistryError::InvalidAppId(id))
    }

    /// Number of registered applications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.apps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Iterate over registered applications.
    pub fn applications(&self) -> impl Iterator<Item = &Arc<Application>> {
        self.apps.values()
    }
}
