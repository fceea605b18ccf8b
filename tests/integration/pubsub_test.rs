// Publish/consume round trips against a live broker. Ignored by default.

mod common;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use lapin::options::BasicGetOptions;
use rabbitmq_pubsub::{
    message::JSON_CONTENT_TYPE, BrokerConnection, Consumer, Envelope, Publisher, RabbitMqError,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;

use common::{broker_config, cleanup, unique_topology};

const LISTEN_TIMEOUT: Duration = Duration::from_secs(10);

type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), RabbitMqError>> + Send>>;

#[derive(Debug)]
struct Received {
    body: Value,
    content_type: Option<String>,
    persistent: bool,
    consumer_tag: String,
}

/// Handler that forwards every non-quit body to `tx`, acks, and cancels on
/// the quit sentinel.
fn forwarding_handler(tx: mpsc::UnboundedSender<Received>) -> impl FnMut(Envelope) -> HandlerFuture + Send {
    move |envelope: Envelope| {
        let tx = tx.clone();
        Box::pin(async move {
            let body: Value = envelope.json()?;
            envelope.ack().await?;
            if envelope.is_quit() {
                envelope.cancel().await?;
            } else {
                let _ = tx.send(Received {
                    body,
                    content_type: envelope.content_type().map(str::to_string),
                    persistent: envelope.is_persistent(),
                    consumer_tag: envelope.consumer_tag().to_string(),
                });
            }
            Ok::<(), RabbitMqError>(())
        })
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Received>) -> Vec<Received> {
    let mut received = Vec::new();
    while let Ok(message) = rx.try_recv() {
        received.push(message);
    }
    received
}

#[tokio::test]
#[ignore] // requires a running RabbitMQ instance
async fn test_publish_and_consume_test_message() {
    let config = broker_config();
    let topology = unique_topology("roundtrip");

    let mut consumer = Consumer::new(config.clone(), topology.clone()).await.expect("consumer");
    let mut publisher = Publisher::new(config.clone(), topology.clone()).await.expect("publisher");

    publisher.publish(&json!({"test": {"result": true}})).await.expect("publish");
    publisher.publish("quit").await.expect("publish quit");

    let (tx, mut rx) = mpsc::unbounded_channel();
    consumer
        .subscribe("test-consumer", forwarding_handler(tx))
        .await
        .expect("subscribe");

    timeout(LISTEN_TIMEOUT, consumer.listen())
        .await
        .expect("listen returns after quit")
        .expect("listen ok");

    let received = drain(&mut rx);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body, json!({"test": {"result": true}}));
    assert_eq!(received[0].content_type.as_deref(), Some(JSON_CONTENT_TYPE));
    assert!(received[0].persistent);
    assert_eq!(received[0].consumer_tag, "test-consumer");
    assert!(consumer.subscriptions().is_empty());

    publisher.close().await;
    consumer.close().await;
    cleanup(&config, &topology).await;
}

#[tokio::test]
#[ignore] // requires a running RabbitMQ instance
async fn test_payloads_arrive_once_unchanged_and_in_order() {
    let config = broker_config();
    let topology = unique_topology("fifo");

    let payloads = vec![
        json!({"test": {"result": true}}),
        json!("plain string"),
        json!(42),
        json!([1, "two", {"three": 3.5}]),
        json!(null),
        json!({"nested": {"list": [], "empty": {}, "unicode": "h\u{e9}llo"}}),
    ];

    let mut publisher = Publisher::new(config.clone(), topology.clone()).await.expect("publisher");
    for payload in &payloads {
        publisher.publish(payload).await.expect("publish");
    }
    publisher.publish("quit").await.expect("publish quit");

    let mut consumer = Consumer::new(config.clone(), topology.clone()).await.expect("consumer");
    let (tx, mut rx) = mpsc::unbounded_channel();
    consumer.subscribe("fifo-consumer", forwarding_handler(tx)).await.expect("subscribe");

    timeout(LISTEN_TIMEOUT, consumer.listen())
        .await
        .expect("listen returns after quit")
        .expect("listen ok");

    let bodies: Vec<Value> = drain(&mut rx).into_iter().map(|r| r.body).collect();
    assert_eq!(bodies, payloads);

    publisher.close().await;
    consumer.close().await;
    cleanup(&config, &topology).await;
}

#[tokio::test]
#[ignore] // requires a running RabbitMQ instance
async fn test_listen_without_subscriptions_returns() {
    let config = broker_config();
    let topology = unique_topology("idle");

    let mut consumer = Consumer::new(config.clone(), topology.clone()).await.expect("consumer");
    timeout(Duration::from_secs(1), consumer.listen())
        .await
        .expect("listen returns immediately")
        .expect("listen ok");

    consumer.close().await;
    cleanup(&config, &topology).await;
}

#[tokio::test]
#[ignore] // requires a running RabbitMQ instance
async fn test_duplicate_consumer_tag_is_rejected() {
    let config = broker_config();
    let topology = unique_topology("duptag");

    let mut consumer = Consumer::new(config.clone(), topology.clone()).await.expect("consumer");
    let (tx, _rx) = mpsc::unbounded_channel();
    consumer
        .subscribe("dup", forwarding_handler(tx.clone()))
        .await
        .expect("first subscribe");

    let second = consumer.subscribe("dup", forwarding_handler(tx)).await;
    assert!(matches!(second, Err(RabbitMqError::SubscriptionError(_))));
    assert_eq!(consumer.subscriptions(), vec!["dup"]);

    consumer.close().await;
    cleanup(&config, &topology).await;
}

#[tokio::test]
#[ignore] // requires a running RabbitMQ instance
async fn test_broker_generated_consumer_tag() {
    let config = broker_config();
    let topology = unique_topology("gentag");

    let mut consumer = Consumer::new(config.clone(), topology.clone()).await.expect("consumer");
    let (tx, _rx) = mpsc::unbounded_channel();
    let tag = consumer.subscribe("", forwarding_handler(tx)).await.expect("subscribe");
    assert!(!tag.is_empty());
    assert_eq!(consumer.subscriptions(), vec![tag.as_str()]);

    consumer.close().await;
    cleanup(&config, &topology).await;
}

#[tokio::test]
#[ignore] // requires a running RabbitMQ instance
async fn test_handler_error_stops_listen_and_keeps_subscription() {
    let config = broker_config();
    let topology = unique_topology("handlererr");

    let mut publisher = Publisher::new(config.clone(), topology.clone()).await.expect("publisher");
    publisher.publish(&json!({"boom": true})).await.expect("publish");

    let mut consumer = Consumer::new(config.clone(), topology.clone()).await.expect("consumer");
    consumer
        .subscribe("failing", |envelope: Envelope| async move {
            envelope.nack(true).await?;
            Err::<(), RabbitMqError>(RabbitMqError::SubscriptionError("handler gave up".to_string()))
        })
        .await
        .expect("subscribe");

    let result = timeout(LISTEN_TIMEOUT, consumer.listen())
        .await
        .expect("listen returns on handler error");
    assert!(matches!(result, Err(RabbitMqError::SubscriptionError(_))));
    assert_eq!(consumer.subscriptions(), vec!["failing"]);

    publisher.close().await;
    consumer.close().await;
    cleanup(&config, &topology).await;
}

#[tokio::test]
#[ignore] // requires a running RabbitMQ instance
async fn test_messages_after_quit_stay_in_queue() {
    let config = broker_config();
    let topology = unique_topology("afterquit");

    let mut publisher = Publisher::new(config.clone(), topology.clone()).await.expect("publisher");
    publisher.publish(&json!({"a": 1})).await.expect("publish a");
    publisher.publish("quit").await.expect("publish quit");
    publisher.publish(&json!({"b": 2})).await.expect("publish b");

    let mut consumer = Consumer::new(config.clone(), topology.clone()).await.expect("consumer");
    let (tx, mut rx) = mpsc::unbounded_channel();
    consumer.subscribe("quit-consumer", forwarding_handler(tx)).await.expect("subscribe");

    timeout(LISTEN_TIMEOUT, consumer.listen())
        .await
        .expect("listen returns after quit")
        .expect("listen ok");
    assert!(consumer.subscriptions().is_empty());

    let bodies: Vec<Value> = drain(&mut rx).into_iter().map(|r| r.body).collect();
    assert_eq!(bodies, vec![json!({"a": 1})]);

    // Anything the broker had already pushed is unacked and returns to the
    // queue once the consumer's channel closes.
    consumer.close().await;

    let mut reader = BrokerConnection::connect(config.clone(), topology.clone())
        .await
        .expect("reader");
    let mut remaining = None;
    for _ in 0..20 {
        remaining = reader
            .channel()
            .expect("open channel")
            .basic_get(topology.queue(), BasicGetOptions { no_ack: true })
            .await
            .expect("basic_get");
        if remaining.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let remaining = remaining.expect("message published after quit is still queued");
    let body: Value = serde_json::from_slice(&remaining.delivery.data).expect("json body");
    assert_eq!(body, json!({"b": 2}));

    reader.close().await;
    publisher.close().await;
    cleanup(&config, &topology).await;
}
