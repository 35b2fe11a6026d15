//! Server configuration.
//!
//! Configuration is layered:
//! - A TOML file (`beacon.toml`, `/etc/beacon/beacon.toml` or
//!   `~/.config/beacon/beacon.toml`, first match wins, or `--config <path>`)
//! - Environment variables (`BEACON_*`, nested keys separated by `__`)
//! - Built-in defaults

use anyhow::{Context, Result};
use beacon_core::{Application, ApplicationRegistry, BrokerConfig};
use beacon_protocol::codec::MAX_PAYLOAD_SIZE;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

const CONFIG_PATHS: [&str; 3] = [
    "beacon.toml",
    "/etc/beacon/beacon.toml",
    "~/.config/beacon/beacon.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Registered applications.
    #[serde(default)]
    pub apps: Vec<Application>,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path under which `/{app_key}` is accepted.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// Seconds advertised to clients as the ping interval.
    #[serde(default = "default_activity_timeout")]
    pub activity_timeout_secs: u64,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6001
}

fn default_true() -> bool {
    true
}

fn default_path_prefix() -> String {
    "/app".to_string()
}

fn default_activity_timeout() -> u64 {
    30
}

fn default_max_message_size() -> usize {
    MAX_PAYLOAD_SIZE
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            metrics: MetricsConfig::default(),
            apps: Vec::new(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            path_prefix: default_path_prefix(),
            activity_timeout_secs: default_activity_timeout(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first default path that exists, with
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let path = CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());

        Self::layered(path.as_deref())
    }

    /// Load configuration from a specific file, with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = shellexpand::tilde(&path.as_ref().to_string_lossy()).into_owned();
        Self::layered(Some(Path::new(&path)))
    }

    fn layered(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            tracing::debug!(path = %path.display(), "Loading config file");
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }

        let source = path.map_or_else(|| "defaults".to_string(), |p| p.display().to_string());
        builder
            .add_source(
                ::config::Environment::with_prefix("BEACON")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config: {source}"))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse config: {source}"))
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Build the application registry from `[[apps]]`.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate application IDs or keys.
    pub fn registry(&self) -> Result<ApplicationRegistry> {
        ApplicationRegistry::from_apps(self.apps.iter().cloned())
            .context("Invalid application configuration")
    }

    /// Broker settings derived from the transport section.
    #[must_use]
    pub fn broker(&self) -> BrokerConfig {
        BrokerConfig {
            activity_timeout_secs: self.transport.activity_timeout_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        host = "0.0.0.0"
        port = 9000

        [transport]
        activity_timeout_secs = 120

        [[apps]]
        id = 1
        key = "abc"
        secret = "s"
        capacity = 100

        [[apps]]
        id = 2
        key = "def"
        secret = "t"
        client_messages_enabled = false
    "#;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 6001);
        assert_eq!(config.transport.path_prefix, "/app");
        assert_eq!(config.transport.max_message_size, 64 * 1024);
        assert!(config.metrics.enabled);
        assert!(config.apps.is_empty());
    }

    #[test]
    fn test_config_bind_addr() {
        let addr = Config::default().bind_addr().unwrap();
        assert_eq!(addr.port(), 6001);

        let config = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.transport.activity_timeout_secs, 120);
        assert_eq!(config.transport.path_prefix, "/app");
        assert_eq!(config.broker().activity_timeout_secs, 120);

        let registry = config.registry().unwrap();
        assert_eq!(registry.len(), 2);
        let abc = registry.resolve_by_key("abc").unwrap();
        assert_eq!(abc.capacity(), Some(100));
        assert!(abc.client_messages_enabled());
        assert!(!registry.resolve_by_id(2).unwrap().client_messages_enabled());
    }

    #[test]
    fn test_duplicate_apps_rejected() {
        let config: Config = toml::from_str(
            r#"
            [[apps]]
            id = 1
            key = "abc"
            secret = "s"

            [[apps]]
            id = 2
            key = "abc"
            secret = "t"
        "#,
        )
        .unwrap();
        assert!(config.registry().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let path = std::env::temp_dir().join(format!("beacon-test-{}.toml", std::process::id()));
        std::fs::write(&path, SAMPLE).unwrap();

        let config = Config::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.apps.len(), 2);
        assert_eq!(config.registry().unwrap().resolve_by_key("def").unwrap().id(), 2);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Config::from_file("/nonexistent/beacon.toml").is_err());
    }
}
