//! Message queue adapter backing the outbox dispatcher, the replay
//! engine, and the queue consumer scaffold.
//!
//! The external interface documents this queue's configuration as
//! `SQS_QUEUE_URL`/`SQS_DLQ_URL` (see SPEC_FULL.md §9, "Substitutions").
//! This workspace's existing messaging dependency is NATS JetStream, not
//! an AWS SQS client, so those two variable *names* are kept but their
//! *values* are treated as JetStream stream/subject identifiers.

use std::collections::HashMap;
use std::sync::Arc;

use async_nats::jetstream::{self, consumer::PullConsumer, stream::Stream};
use tip_ports::{MessageQueue, QueueError, QueueMessage};
use tokio::sync::Mutex;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct NatsQueueConfig {
    pub nats_url: String,
    /// Interpreted as the JetStream stream name (falls back to
    /// `"TIP_EVENTS"` when `SQS_QUEUE_URL` is unset).
    pub stream_name: String,
    /// Interpreted as the publish subject.
    pub subject: String,
    pub consumer_name: String,
}

impl Default for NatsQueueConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            stream_name: "TIP_EVENTS".to_string(),
            subject: "tip.events".to_string(),
            consumer_name: "tip-consumer".to_string(),
        }
    }
}

pub struct NatsMessageQueue {
    subject: String,
    jetstream: jetstream::Context,
    stream: Stream,
    consumer_name: String,
    /// Maps a synthetic receipt handle to the acked/nacked JetStream
    /// message, since `async-nats` messages (not plain bytes) carry the
    /// ack handle.
    pending: Arc<Mutex<HashMap<String, jetstream::Message>>>,
}

impl NatsMessageQueue {
    pub async fn connect(config: NatsQueueConfig) -> Result<Self, QueueError> {
        let client = async_nats::connect(&config.nats_url)
            .await
            .map_err(|e| QueueError::ConnectionError {
                message: e.to_string(),
            })?;
        let jetstream = jetstream::new(client);

        let stream = jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: config.stream_name.clone(),
                subjects: vec![config.subject.clone()],
                ..Default::default()
            })
            .await
            .map_err(|e| QueueError::ConnectionError {
                message: e.to_string(),
            })?;

        Ok(Self {
            subject: config.subject,
            jetstream,
            stream,
            consumer_name: config.consumer_name,
            pending: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn pull_consumer(&self, visibility_secs: u64) -> Result<PullConsumer, QueueError> {
        self.stream
            .get_or_create_consumer(
                &self.consumer_name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(self.consumer_name.clone()),
                    ack_wait: std::time::Duration::from_secs(visibility_secs),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| QueueError::ConnectionError {
                message: e.to_string(),
            })
    }
}

impl MessageQueue for NatsMessageQueue {
    #[instrument(skip(self, body))]
    async fn publish(&self, body: &[u8]) -> Result<(), QueueError> {
        self.jetstream
            .publish(self.subject.clone(), body.to_vec().into())
            .await
            .map_err(|e| QueueError::PublishError {
                message: e.to_string(),
            })?
            .await
            .map_err(|e| QueueError::PublishError {
                message: e.to_string(),
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn receive(
        &self,
        batch: usize,
        wait_secs: u64,
        visibility_secs: u64,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        use futures::StreamExt;

        let consumer = self.pull_consumer(visibility_secs).await?;
        let mut messages = consumer
            .fetch()
            .max_messages(batch)
            .expires(std::time::Duration::from_secs(wait_secs))
            .messages()
            .await
            .map_err(|e| QueueError::ConnectionError {
                message: e.to_string(),
            })?;

        let mut out = Vec::new();
        let mut pending = self.pending.lock().await;
        while let Some(Ok(message)) = messages.next().await {
            let handle = uuid_like_token();
            let body = message.payload.to_vec();
            pending.insert(handle.clone(), message);
            out.push(QueueMessage {
                receipt_handle: handle,
                body,
            });
        }

        Ok(out)
    }

    #[instrument(skip(self))]
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut pending = self.pending.lock().await;
        if let Some(message) = pending.remove(receipt_handle) {
            message
                .ack()
                .await
                .map_err(|e| QueueError::PublishError {
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }
}

fn uuid_like_token() -> String {
    uuid::Uuid::new_v4().to_string()
}
