use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, TopologyConfig};
use crate::rabbitmq::errors::{RabbitMqError, Result};

/// Routing key used for the single queue binding and for every publish.
pub const BINDING_KEY: &str = "";

const CLOSE_REPLY_CODE: u16 = 200;

/// One broker connection and one channel on it, with the configured queue
/// bound to the configured exchange.
///
/// Connecting is eager: [`BrokerConnection::connect`] either returns a fully
/// declared session or an error with nothing left open.
pub struct BrokerConnection {
    config: ConnectionConfig,
    topology: TopologyConfig,
    connection: Option<Connection>,
    channel: Option<Channel>,
}

impl BrokerConnection {
    pub async fn connect(config: ConnectionConfig, topology: TopologyConfig) -> Result<Self> {
        config.validate()?;
        topology.validate()?;

        info!(endpoint = %config.endpoint(), user = %config.user(), "Connecting to RabbitMQ");
        let properties = ConnectionProperties::default()
            .with_connection_name(format!("{}-{}", env!("CARGO_PKG_NAME"), std::process::id()).into());
        let connection = Connection::connect_uri(config.amqp_uri(), properties)
            .await
            .map_err(RabbitMqError::ConnectionError)?;
        debug!("Successfully connected to RabbitMQ");

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                shutdown(None, Some(connection)).await;
                return Err(RabbitMqError::ConnectionError(e));
            }
        };

        if let Err(e) = declare_topology(&channel, &topology).await {
            shutdown(Some(channel), Some(connection)).await;
            return Err(e);
        }

        info!(
            exchange = %topology.exchange(),
            queue = %topology.queue(),
            "Connected to RabbitMQ and declared topology"
        );

        Ok(Self {
            config,
            topology,
            connection: Some(connection),
            channel: Some(channel),
        })
    }

    pub fn channel(&self) -> Result<&Channel> {
        self.channel.as_ref().ok_or(RabbitMqError::ChannelClosed)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn topology(&self) -> &TopologyConfig {
        &self.topology
    }

    pub fn is_connected(&self) -> bool {
        match (&self.connection, &self.channel) {
            (Some(connection), Some(channel)) => {
                connection.status().connected() && channel.status().connected()
            }
            _ => false,
        }
    }

    /// Close the channel, then the connection. Failures are logged and
    /// dropped; calling this again is a no-op.
    pub async fn close(&mut self) {
        let channel = self.channel.take();
        let connection = self.connection.take();
        if channel.is_none() && connection.is_none() {
            return;
        }
        info!(endpoint = %self.config.endpoint(), "Closing RabbitMQ connection");
        shutdown(channel, connection).await;
    }
}

impl Drop for BrokerConnection {
    fn drop(&mut self) {
        let channel = self.channel.take();
        let connection = self.connection.take();
        if channel.is_none() && connection.is_none() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(shutdown(channel, connection));
            }
            Err(_) => {
                debug!("No runtime available; dropping RabbitMQ connection without closing it");
            }
        }
    }
}

async fn declare_topology(channel: &Channel, topology: &TopologyConfig) -> Result<()> {
    let queue = channel
        .queue_declare(
            topology.queue(),
            QueueDeclareOptions {
                durable: true,
                exclusive: false,
                auto_delete: false,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| RabbitMqError::topology(format!("declare queue '{}'", topology.queue()), e))?;
    debug!(
        queue = %topology.queue(),
        messages = queue.message_count(),
        consumers = queue.consumer_count(),
        "Queue declared"
    );

    channel
        .exchange_declare(
            topology.exchange(),
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                auto_delete: false,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| {
            RabbitMqError::topology(format!("declare exchange '{}'", topology.exchange()), e)
        })?;
    debug!(exchange = %topology.exchange(), "Exchange declared");

    channel
        .queue_bind(
            topology.queue(),
            topology.exchange(),
            BINDING_KEY,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| {
            RabbitMqError::topology(
                format!("bind queue '{}' to '{}'", topology.queue(), topology.exchange()),
                e,
            )
        })?;

    Ok(())
}

async fn shutdown(channel: Option<Channel>, connection: Option<Connection>) {
    if let Some(channel) = channel {
        if channel.status().connected() {
            if let Err(e) = channel.close(CLOSE_REPLY_CODE, "Closing channel").await {
                warn!("Failed to close RabbitMQ channel: {}", e);
            }
        }
    }
    if let Some(connection) = connection {
        if connection.status().connected() {
            if let Err(e) = connection.close(CLOSE_REPLY_CODE, "Closing connection").await {
                warn!("Failed to close RabbitMQ connection: {}", e);
            }
        }
    }
}
