//! Example `MessageHandler` wired to the NATS-backed queue consumer.
//! Counts messages per `eventType` and acks unconditionally; not
//! production enrichment, just a demonstration of the consumer plumbing
//! from `tip-adapters::consumer`.
//!
//! Not built as part of the workspace; copy into a binary target to run.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tip_adapters::consumer::{ConsumerConfig, ConsumerError, MessageHandler, QueueConsumer};
use tip_adapters::metrics::IngestionMetrics;
use tip_adapters::queue::NatsMessageQueue;
use tip_ports::QueueMessage;
use tracing::info;

struct CountingHandler {
    metrics: Arc<IngestionMetrics>,
}

impl MessageHandler for CountingHandler {
    async fn handle(&self, message: &QueueMessage) -> Result<(), ConsumerError> {
        let value: serde_json::Value =
            serde_json::from_slice(&message.body).map_err(|e| ConsumerError::Handler {
                message: e.to_string(),
            })?;
        let event_type = value.get("eventType").and_then(|v| v.as_str()).unwrap_or("unknown");
        info!(event_type, "consumed event");
        self.metrics.record_dedupe();
        Ok(())
    }
}

pub async fn run_demo_consumer(queue: NatsMessageQueue) {
    let handler = CountingHandler {
        metrics: Arc::new(IngestionMetrics::default()),
    };
    let consumer = QueueConsumer::new(queue, handler, ConsumerConfig::default());
    let running = AtomicBool::new(true);
    consumer.run(1, &running).await;
}
