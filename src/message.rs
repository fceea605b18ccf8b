use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicCancelOptions, BasicNackOptions},
    BasicProperties, Channel,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::rabbitmq::errors::{RabbitMqError, Result};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// AMQP `delivery_mode` value asking the broker to write the message to disk.
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Payload that tells the monitor to cancel its subscription.
pub const QUIT_SENTINEL: &str = "quit";

/// Serialize a payload into the UTF-8 JSON body that goes on the wire.
pub fn encode_body<T: Serialize + ?Sized>(payload: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(payload).map_err(RabbitMqError::SerializationError)
}

pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(RabbitMqError::DeserializationError)
}

/// Properties stamped on every published message.
pub fn publish_properties() -> BasicProperties {
    BasicProperties::default()
        .with_content_type(JSON_CONTENT_TYPE.into())
        .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
        .with_message_id(Uuid::new_v4().to_string().into())
        .with_timestamp(Utc::now().timestamp() as u64)
}

/// Matches both a raw `quit` body and the JSON string `"quit"`.
pub fn is_quit_body(body: &[u8]) -> bool {
    if body == QUIT_SENTINEL.as_bytes() {
        return true;
    }
    matches!(
        serde_json::from_slice::<Value>(body),
        Ok(Value::String(ref s)) if s == QUIT_SENTINEL
    )
}

/// One delivered message, handed to a [`crate::MessageHandler`].
///
/// The envelope carries what the handler needs to finish the exchange with
/// the broker: the delivery tag for `ack`/`nack` and the consumer tag for
/// `cancel`. Nothing is acknowledged automatically.
pub struct Envelope {
    delivery: Delivery,
    channel: Channel,
    consumer_tag: String,
    cancelled: Arc<AtomicBool>,
}

impl Envelope {
    pub(crate) fn new(
        delivery: Delivery,
        channel: Channel,
        consumer_tag: String,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            delivery,
            channel,
            consumer_tag,
            cancelled,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.delivery.data
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery.delivery_tag
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn redelivered(&self) -> bool {
        self.delivery.redelivered
    }

    pub fn properties(&self) -> &BasicProperties {
        &self.delivery.properties
    }

    pub fn content_type(&self) -> Option<&str> {
        self.delivery.properties.content_type().as_ref().map(|ct| ct.as_str())
    }

    pub fn message_id(&self) -> Option<&str> {
        self.delivery.properties.message_id().as_ref().map(|id| id.as_str())
    }

    pub fn is_persistent(&self) -> bool {
        *self.delivery.properties.delivery_mode() == Some(PERSISTENT_DELIVERY_MODE)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        decode_body(self.body())
    }

    pub fn json_value(&self) -> Result<Value> {
        self.json()
    }

    pub fn is_quit(&self) -> bool {
        is_quit_body(self.body())
    }

    pub async fn ack(&self) -> Result<()> {
        self.delivery
            .ack(BasicAckOptions::default())
            .await
            .map_err(RabbitMqError::AckError)
    }

    pub async fn nack(&self, requeue: bool) -> Result<()> {
        self.delivery
            .nack(BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            })
            .await
            .map_err(RabbitMqError::AckError)
    }

    /// Cancel the subscription this message arrived on. `listen()` drops
    /// the subscription as soon as the handler returns; deliveries already
    /// buffered for it are left unacked and go back to the queue when the
    /// channel closes.
    pub async fn cancel(&self) -> Result<()> {
        self.channel
            .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|e| {
                RabbitMqError::SubscriptionError(format!(
                    "failed to cancel consumer '{}': {}",
                    self.consumer_tag, e
                ))
            })?;
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }
}
