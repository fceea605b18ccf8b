use anyhow::Context;
use rabbitmq_pubsub::{logging::init_tracing, Publisher, Settings};
use serde_json::{json, Value};
use tracing::info;

/// Parse the argument as JSON, or send it as a JSON string (`send quit`).
fn payload_from_arg(arg: Option<String>) -> Value {
    match arg {
        Some(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        None => json!({"test": {"result": true}}),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Failed to load RabbitMQ settings")?;
    init_tracing(settings.connection.is_debug());

    let payload = payload_from_arg(std::env::args().nth(1));

    let mut publisher = Publisher::new(settings.connection, settings.topology)
        .await
        .context("Failed to connect publisher")?;
    publisher.publish(&payload).await.context("Failed to publish message")?;
    info!("Published {}", payload);

    publisher.close().await;
    Ok(())
}
