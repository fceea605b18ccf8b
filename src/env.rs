use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenv::dotenv;

use crate::config::{ConnectionConfig, Settings, TopologyConfig};
use crate::rabbitmq::errors::{RabbitMqError, Result};

pub const USER_VAR: &str = "RABBITMQ_USER";
pub const PASSWORD_VAR: &str = "RABBITMQ_PASSWORD";
pub const HOST_VAR: &str = "RABBITMQ_HOST";
pub const PORT_VAR: &str = "RABBITMQ_PORT";
pub const VHOST_VAR: &str = "RABBITMQ_VHOST";
pub const DEBUG_VAR: &str = "RABBITMQ_DEBUG";
pub const CONNECTION_TIMEOUT_VAR: &str = "RABBITMQ_CONNECTION_TIMEOUT_MS";
pub const HEARTBEAT_VAR: &str = "RABBITMQ_HEARTBEAT_SECONDS";
pub const EXCHANGE_VAR: &str = "RABBITMQ_EXCHANGE";
pub const QUEUE_VAR: &str = "RABBITMQ_QUEUE";

fn default_user() -> String {
    "guest".to_string()
}

fn default_password() -> String {
    "guest".to_string()
}

impl Settings {
    /// Read settings from the process environment, after loading `.env`
    /// if one is present.
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from any key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut connection = ConnectionConfig::new(
            lookup(USER_VAR).unwrap_or_else(default_user),
            lookup(PASSWORD_VAR).unwrap_or_else(default_password),
        );
        if let Some(host) = lookup(HOST_VAR) {
            connection = connection.with_host(host);
        }
        if let Some(port) = parse_var::<u16>(&lookup, PORT_VAR)? {
            connection = connection.with_port(port);
        }
        if let Some(vhost) = lookup(VHOST_VAR) {
            connection = connection.with_vhost(vhost);
        }
        if let Some(debug) = lookup(DEBUG_VAR) {
            connection = connection.with_debug(parse_bool(DEBUG_VAR, &debug)?);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, CONNECTION_TIMEOUT_VAR)? {
            connection = connection.with_connection_timeout(Duration::from_millis(ms));
        }
        if let Some(seconds) = parse_var::<u16>(&lookup, HEARTBEAT_VAR)? {
            connection = connection.with_heartbeat(seconds);
        }

        let mut topology = TopologyConfig::default();
        if let Some(exchange) = lookup(EXCHANGE_VAR) {
            topology = topology.with_exchange(exchange);
        }
        if let Some(queue) = lookup(QUEUE_VAR) {
            topology = topology.with_queue(queue);
        }

        connection.validate()?;
        topology.validate()?;
        Ok(Settings::new(connection, topology))
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| RabbitMqError::InvalidConfig(format!("{}={:?}: {}", key, val, e))),
        None => Ok(None),
    }
}

fn parse_bool(key: &str, val: &str) -> Result<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(RabbitMqError::InvalidConfig(format!(
            "{}={:?} is not a boolean",
            key, other
        ))),
    }
}
