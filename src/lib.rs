//! Thin RabbitMQ wrapper: one connection and channel per role, a durable
//! queue bound to a durable direct exchange, JSON publishing, and a
//! sequential consumer loop with handler-driven acknowledgement.
//!
//! ```no_run
//! # async fn run() -> rabbitmq_pubsub::Result<()> {
//! use rabbitmq_pubsub::{ConnectionConfig, Publisher, TopologyConfig};
//!
//! let mut publisher =
//!     Publisher::new(ConnectionConfig::new("guest", "guest"), TopologyConfig::default()).await?;
//! publisher.publish(&serde_json::json!({"test": {"result": true}})).await?;
//! publisher.close().await;
//! # Ok(()) }
//! ```

pub mod config;
pub mod env;
pub mod logging;
pub mod message;
pub mod rabbitmq;

pub use config::{ConnectionConfig, Settings, TopologyConfig};
pub use message::Envelope;
pub use rabbitmq::{
    BrokerConnection, Consumer, MessageHandler, Publisher, RabbitMqError, Result,
};
