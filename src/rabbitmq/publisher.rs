use lapin::options::BasicPublishOptions;
use serde::Serialize;
use tracing::{debug, info};

use super::connection::{BrokerConnection, BINDING_KEY};
use crate::config::{ConnectionConfig, TopologyConfig};
use crate::message::{encode_body, publish_properties};
use crate::rabbitmq::errors::{RabbitMqError, Result};

/// Sends JSON messages to the configured exchange.
pub struct Publisher {
    connection: BrokerConnection,
}

impl Publisher {
    pub async fn new(config: ConnectionConfig, topology: TopologyConfig) -> Result<Self> {
        let connection = BrokerConnection::connect(config, topology).await?;
        Ok(Self::from_connection(connection))
    }

    pub fn from_connection(connection: BrokerConnection) -> Self {
        Publisher { connection }
    }

    pub fn connection(&self) -> &BrokerConnection {
        &self.connection
    }

    /// Serialize `payload` and hand it to the broker as a persistent
    /// message. Returns once the frame is sent; no confirm is awaited.
    pub async fn publish<T: Serialize + ?Sized>(&self, payload: &T) -> Result<()> {
        let body = encode_body(payload)?;
        let channel = self.connection.channel()?;
        let exchange = self.connection.topology().exchange();

        channel
            .basic_publish(
                exchange,
                BINDING_KEY,
                BasicPublishOptions::default(),
                &body,
                publish_properties(),
            )
            .await
            .map_err(RabbitMqError::PublishError)?;

        if self.connection.config().is_debug() {
            info!(exchange = %exchange, body = %String::from_utf8_lossy(&body), "Published message");
        } else {
            debug!(exchange = %exchange, bytes = body.len(), "Published message");
        }
        Ok(())
    }

    pub async fn close(&mut self) {
        self.connection.close().await;
    }
}
