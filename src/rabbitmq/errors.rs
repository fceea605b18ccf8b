// src/rabbitmq/errors.rs

use lapin::Error as LapinError;
use serde_json::Error as SerdeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RabbitMqError {
    #[error("RabbitMQ connection error: {0}")]
    ConnectionError(#[source] LapinError),

    #[error("RabbitMQ topology error ({context}): {source}")]
    TopologyError {
        context: String,
        #[source]
        source: LapinError,
    },

    #[error("Message serialization error: {0}")]
    SerializationError(#[source] SerdeError),

    #[error("Message deserialization error: {0}")]
    DeserializationError(#[source] SerdeError),

    #[error("RabbitMQ publish error: {0}")]
    PublishError(#[source] LapinError),

    #[error("RabbitMQ subscription error: {0}")]
    SubscriptionError(String),

    #[error("RabbitMQ consume error: {0}")]
    ConsumeError(#[source] LapinError),

    #[error("RabbitMQ acknowledge error: {0}")]
    AckError(#[source] LapinError),

    #[error("RabbitMQ channel is closed")]
    ChannelClosed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

// Custom Result type for RabbitMQ operations
pub type Result<T> = std::result::Result<T, RabbitMqError>;

impl RabbitMqError {
    pub(crate) fn topology(context: impl Into<String>, source: LapinError) -> Self {
        RabbitMqError::TopologyError {
            context: context.into(),
            source,
        }
    }
}
