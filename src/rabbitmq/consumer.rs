use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{future::select_all, StreamExt};
use lapin::{
    options::{BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
    Consumer as LapinConsumer,
};
use tracing::{debug, error, info};

use super::connection::BrokerConnection;
use crate::config::{ConnectionConfig, TopologyConfig};
use crate::message::Envelope;
use crate::rabbitmq::errors::{RabbitMqError, Result};

/// Callback invoked once per delivered message.
///
/// Implemented for any `FnMut(Envelope) -> impl Future<Output = Result<()>>`,
/// so a plain `async move` closure works. The handler owns acknowledgement:
/// nothing is acked on its behalf.
#[async_trait]
pub trait MessageHandler: Send {
    async fn handle(&mut self, envelope: Envelope) -> Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: FnMut(Envelope) -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&mut self, envelope: Envelope) -> Result<()> {
        (self)(envelope).await
    }
}

/// Unacked deliveries the broker may push to one subscription.
pub const PREFETCH_COUNT: u16 = 1;

struct Subscription {
    consumer: LapinConsumer,
    handler: Box<dyn MessageHandler>,
    cancelled: Arc<AtomicBool>,
}

/// Receives messages from the configured queue and dispatches them to
/// handlers registered with [`Consumer::subscribe`].
pub struct Consumer {
    connection: BrokerConnection,
    subscriptions: HashMap<String, Subscription>,
}

impl Consumer {
    pub async fn new(config: ConnectionConfig, topology: TopologyConfig) -> Result<Self> {
        let connection = BrokerConnection::connect(config, topology).await?;
        Ok(Self::from_connection(connection))
    }

    pub fn from_connection(connection: BrokerConnection) -> Self {
        Consumer {
            connection,
            subscriptions: HashMap::new(),
        }
    }

    pub fn connection(&self) -> &BrokerConnection {
        &self.connection
    }

    /// Tags of the subscriptions `listen()` is still waiting on.
    pub fn subscriptions(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.subscriptions.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Start consuming the bound queue under `consumer_tag` with manual
    /// acknowledgement. An empty tag lets the broker pick one; the tag in
    /// effect is returned.
    pub async fn subscribe<H>(&mut self, consumer_tag: &str, handler: H) -> Result<String>
    where
        H: MessageHandler + 'static,
    {
        if !consumer_tag.is_empty() && self.subscriptions.contains_key(consumer_tag) {
            return Err(RabbitMqError::SubscriptionError(format!(
                "consumer tag '{}' is already registered",
                consumer_tag
            )));
        }

        let channel = self.connection.channel()?;
        let queue = self.connection.topology().queue();
        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await
            .map_err(|e| {
                RabbitMqError::SubscriptionError(format!("failed to set prefetch: {}", e))
            })?;
        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                RabbitMqError::SubscriptionError(format!(
                    "failed to consume '{}' as '{}': {}",
                    queue, consumer_tag, e
                ))
            })?;

        let tag = consumer.tag().as_str().to_string();
        info!(queue = %queue, consumer_tag = %tag, "Subscribed to queue");

        self.subscriptions.insert(
            tag.clone(),
            Subscription {
                consumer,
                handler: Box::new(handler),
                cancelled: Arc::new(AtomicBool::new(false)),
            },
        );
        Ok(tag)
    }

    /// Dispatch deliveries until every subscription has been cancelled.
    ///
    /// Deliveries are handled one at a time: the handler's future runs to
    /// completion before the next delivery is read, so messages from one
    /// queue are seen in broker order. A subscription is dropped as soon as
    /// its handler returns after cancelling it, so deliveries buffered behind
    /// the cancel are never dispatched. Returns at once if nothing is
    /// subscribed. A receive failure or a handler error ends the loop and
    /// leaves the remaining subscriptions registered.
    pub async fn listen(&mut self) -> Result<()> {
        let channel = self.connection.channel()?.clone();
        let log_bodies = self.connection.config().is_debug();

        while !self.subscriptions.is_empty() {
            let (tag, next) = {
                let pending = self.subscriptions.iter_mut().map(|(tag, subscription)| {
                    Box::pin(async move { (tag.clone(), subscription.consumer.next().await) })
                });
                select_all(pending).await.0
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    error!(consumer_tag = %tag, "Error receiving message: {}", e);
                    return Err(RabbitMqError::ConsumeError(e));
                }
                None => {
                    info!(consumer_tag = %tag, "Subscription stream ended");
                    self.subscriptions.remove(&tag);
                    continue;
                }
            };

            if log_bodies {
                info!(
                    consumer_tag = %tag,
                    delivery_tag = delivery.delivery_tag,
                    body = %String::from_utf8_lossy(&delivery.data),
                    "Received message"
                );
            } else {
                debug!(
                    consumer_tag = %tag,
                    delivery_tag = delivery.delivery_tag,
                    bytes = delivery.data.len(),
                    "Received message"
                );
            }

            let subscription = match self.subscriptions.get_mut(&tag) {
                Some(subscription) => subscription,
                None => continue,
            };
            let cancelled = subscription.cancelled.clone();
            let envelope = Envelope::new(delivery, channel.clone(), tag.clone(), cancelled.clone());
            let handled = subscription.handler.handle(envelope).await;

            if cancelled.load(Ordering::SeqCst) {
                info!(consumer_tag = %tag, "Subscription cancelled");
                self.subscriptions.remove(&tag);
            }
            handled?;
        }

        info!("No subscriptions left; stopped listening");
        Ok(())
    }

    pub async fn close(&mut self) {
        self.subscriptions.clear();
        self.connection.close().await;
    }
}
