// src/rabbitmq/mod.rs
// Broker session, publisher and consumer built on lapin

pub mod errors;
pub mod connection;
pub mod publisher;
pub mod consumer;

pub use connection::{BrokerConnection, BINDING_KEY};
pub use consumer::{Consumer, MessageHandler};
pub use errors::{RabbitMqError, Result};
pub use publisher::Publisher;
