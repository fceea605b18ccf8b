// src/config.rs
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};
use lapin::uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::rabbitmq::errors::{RabbitMqError, Result};

/// Environment variable naming an explicit settings file.
pub const CONFIG_PATH_VAR: &str = "RABBITMQ_CONFIG";

/// Broker address and credentials.
///
/// Built with [`ConnectionConfig::new`] and the `with_*` methods. A
/// [`crate::BrokerConnection`] keeps its own copy, so changes made after
/// connecting have no effect on the open session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    user: String,
    password: String,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_vhost")]
    vhost: String,
    #[serde(default)]
    debug: bool,
    #[serde(default)]
    connection_timeout_ms: Option<u64>,
    #[serde(default)]
    heartbeat_seconds: Option<u16>,
}

/// Names of the exchange and queue declared on connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default = "default_exchange")]
    exchange: String,
    #[serde(default = "default_queue")]
    queue: String,
}

/// Everything a process entry point needs to reach the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
}

// Default values
fn default_host() -> String { "localhost".to_string() }
fn default_port() -> u16 { 5672 }
fn default_vhost() -> String { "/".to_string() }
fn default_exchange() -> String { "router".to_string() }
fn default_queue() -> String { "messages".to_string() }

impl ConnectionConfig {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            host: default_host(),
            port: default_port(),
            vhost: default_vhost(),
            debug: false,
            connection_timeout_ms: None,
            heartbeat_seconds: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = vhost.into();
        self
    }

    /// Log message bodies at `info` level.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Give up on the TCP connect after `timeout`.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Heartbeat interval to negotiate with the broker; 0 disables it.
    pub fn with_heartbeat(mut self, seconds: u16) -> Self {
        self.heartbeat_seconds = Some(seconds);
        self
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn vhost(&self) -> &str {
        &self.vhost
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn connection_timeout(&self) -> Option<Duration> {
        self.connection_timeout_ms.map(Duration::from_millis)
    }

    pub fn heartbeat(&self) -> Option<u16> {
        self.heartbeat_seconds
    }

    pub fn validate(&self) -> Result<()> {
        if self.user.is_empty() {
            return Err(RabbitMqError::InvalidConfig("user must not be empty".to_string()));
        }
        if self.password.is_empty() {
            return Err(RabbitMqError::InvalidConfig("password must not be empty".to_string()));
        }
        if self.host.is_empty() {
            return Err(RabbitMqError::InvalidConfig("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(RabbitMqError::InvalidConfig("port must not be 0".to_string()));
        }
        Ok(())
    }

    /// Structured URI for [`lapin::Connection::connect_uri`]. Built field by
    /// field so the vhost never needs percent-encoding.
    pub fn amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            scheme: AMQPScheme::AMQP,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.user.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            query: AMQPQueryString {
                heartbeat: self.heartbeat_seconds,
                connection_timeout: self.connection_timeout_ms,
                ..AMQPQueryString::default()
            },
        }
    }

    /// `host:port/vhost` without credentials, for log lines.
    pub fn endpoint(&self) -> String {
        format!("{}:{}{}", self.host, self.port, display_vhost(&self.vhost))
    }
}

fn display_vhost(vhost: &str) -> String {
    if vhost.starts_with('/') {
        vhost.to_string()
    } else {
        format!("/{}", vhost)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("vhost", &self.vhost)
            .field("debug", &self.debug)
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .field("heartbeat_seconds", &self.heartbeat_seconds)
            .finish()
    }
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            exchange: default_exchange(),
            queue: default_queue(),
        }
    }
}

impl TopologyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn validate(&self) -> Result<()> {
        // The nameless default exchange can be neither declared nor bound.
        if self.exchange.is_empty() {
            return Err(RabbitMqError::InvalidConfig("exchange name must not be empty".to_string()));
        }
        if self.queue.is_empty() {
            return Err(RabbitMqError::InvalidConfig("queue name must not be empty".to_string()));
        }
        Ok(())
    }
}

impl Settings {
    pub fn new(connection: ConnectionConfig, topology: TopologyConfig) -> Self {
        Self { connection, topology }
    }

    /// Load from the first settings file found, falling back to the
    /// environment (see [`Settings::from_env`]). A `RABBITMQ_CONFIG` that
    /// names a missing file is an error, never a fallback.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_or_else(find_config_file()?, Self::from_env)
    }

    /// Load `path` if one was located, otherwise use `fallback`.
    pub fn load_or_else<F>(path: Option<PathBuf>, fallback: F) -> anyhow::Result<Self>
    where
        F: FnOnce() -> Result<Self>,
    {
        match path {
            Some(path) => load_settings_file(&path),
            None => {
                debug!("No settings file found; reading settings from the environment");
                Ok(fallback()?)
            }
        }
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let settings: Settings = serde_json::from_str(json)
            .context("Configuration file contains invalid JSON or missing required fields")?;
        settings.connection.validate()?;
        settings.topology.validate()?;
        Ok(settings)
    }
}

// Configuration file discovery
pub fn find_config_file() -> anyhow::Result<Option<PathBuf>> {
    let explicit = std::env::var(CONFIG_PATH_VAR).ok();
    search_config_file(explicit.as_deref(), Path::new("."), home::home_dir().as_deref())
}

/// Resolve the settings file: an explicit path must exist; otherwise
/// `rabbitmq.json`, then `config/rabbitmq.json` under `base`, then
/// `.rabbitmq.json` under `home`.
pub fn search_config_file(
    explicit: Option<&str>,
    base: &Path,
    home: Option<&Path>,
) -> anyhow::Result<Option<PathBuf>> {
    if let Some(explicit) = explicit {
        let path = PathBuf::from(explicit);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(anyhow!("{} points to a missing file: {}", CONFIG_PATH_VAR, path.display()));
    }

    let locations = [
        ("Current directory", base.join("rabbitmq.json")),
        ("Current directory (alternative)", base.join("config").join("rabbitmq.json")),
    ];

    for (location_name, path) in locations.iter() {
        if path.exists() {
            debug!("Found config file in {}: {}", location_name, path.display());
            return Ok(Some(path.clone()));
        }
    }

    if let Some(home_dir) = home {
        let home_config = home_dir.join(".rabbitmq.json");
        if home_config.exists() {
            debug!("Found config file in home directory: {}", home_config.display());
            return Ok(Some(home_config));
        }
    }

    Ok(None)
}

pub fn load_settings_file(path: &Path) -> anyhow::Result<Settings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let settings = Settings::from_json(&content)
        .with_context(|| format!("Invalid config file at {}", path.display()))?;
    info!(
        endpoint = %settings.connection.endpoint(),
        "Loaded settings from {}",
        path.display()
    );
    Ok(settings)
}
