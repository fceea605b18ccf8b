use anyhow::Context;
use rabbitmq_pubsub::{logging::init_tracing, Consumer, Envelope, RabbitMqError, Settings};
use tracing::{info, warn};

const DEFAULT_CONSUMER_TAG: &str = "test-consumer";

async fn process_message(envelope: Envelope) -> Result<(), RabbitMqError> {
    match envelope.json_value() {
        Ok(content) => println!("{:#}", content),
        Err(e) => warn!(delivery_tag = envelope.delivery_tag(), "Undecodable message: {}", e),
    }

    envelope.ack().await?;

    // Send a message with the string "quit" to cancel the consumer.
    if envelope.is_quit() {
        info!(consumer_tag = %envelope.consumer_tag(), "Quit message received, cancelling");
        envelope.cancel().await?;
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Failed to load RabbitMQ settings")?;
    init_tracing(settings.connection.is_debug());

    let consumer_tag = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONSUMER_TAG.to_string());

    let mut consumer = Consumer::new(settings.connection, settings.topology)
        .await
        .context("Failed to connect consumer")?;
    consumer
        .subscribe(&consumer_tag, process_message)
        .await
        .context("Failed to subscribe")?;

    info!(consumer_tag = %consumer_tag, "Waiting for messages. Send \"quit\" to stop.");
    let result = consumer.listen().await;
    consumer.close().await;
    result.context("Consumer stopped with an error")
}
