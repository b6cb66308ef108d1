//! Reusable long-polling queue consumer scaffold. Downstream processors
//! plug in a [`MessageHandler`]; this module only handles receive,
//! visibility, and retry-forever looping.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tip_ports::{MessageQueue, QueueError, QueueMessage};
use tracing::{error, info, instrument, warn};

pub const DEFAULT_BATCH: usize = 10;
pub const DEFAULT_WAIT_SECS: u64 = 20;
pub const DEFAULT_VISIBILITY_SECS: u64 = 30;
const LOOP_ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchStats {
    pub received: usize,
    pub processed: usize,
    pub failed: usize,
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("handler error: {message}")]
    Handler { message: String },
}

/// Business logic plugged into the scaffold. Implementations should be
/// idempotent on the message's `event_id`, since delivery is
/// at-least-once.
pub trait MessageHandler: Send + Sync {
    fn handle(
        &self,
        message: &QueueMessage,
    ) -> impl Future<Output = Result<(), ConsumerError>> + Send;
}

pub struct ConsumerConfig {
    pub batch: usize,
    pub wait_secs: u64,
    pub visibility_secs: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch: DEFAULT_BATCH,
            wait_secs: DEFAULT_WAIT_SECS,
            visibility_secs: DEFAULT_VISIBILITY_SECS,
        }
    }
}

pub struct QueueConsumer<Q, H> {
    queue: Q,
    handler: H,
    config: ConsumerConfig,
}

impl<Q, H> QueueConsumer<Q, H>
where
    Q: MessageQueue,
    H: MessageHandler,
{
    pub fn new(queue: Q, handler: H, config: ConsumerConfig) -> Self {
        Self {
            queue,
            handler,
            config,
        }
    }

    /// One receive-process-ack cycle.
    #[instrument(skip(self))]
    pub async fn process_batch(&self) -> Result<BatchStats, ConsumerError> {
        let messages = self
            .queue
            .receive(
                self.config.batch,
                self.config.wait_secs,
                self.config.visibility_secs,
            )
            .await?;

        let mut stats = BatchStats {
            received: messages.len(),
            ..Default::default()
        };

        for message in &messages {
            match self.handler.handle(message).await {
                Ok(()) => {
                    self.queue.delete(&message.receipt_handle).await?;
                    stats.processed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "handler failed, leaving message visible for retry");
                    stats.failed += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Runs `process_batch` forever, or `max_iterations` times if
    /// nonzero. Loop-level failures (e.g. the queue itself is
    /// unreachable) back off 5 seconds and continue.
    pub async fn run(&self, max_iterations: u32, running: &std::sync::atomic::AtomicBool) -> BatchStats {
        let mut total = BatchStats::default();
        let mut iterations = 0u32;

        while running.load(std::sync::atomic::Ordering::SeqCst) {
            match self.process_batch().await {
                Ok(stats) => {
                    total.received += stats.received;
                    total.processed += stats.processed;
                    total.failed += stats.failed;
                }
                Err(e) => {
                    error!(error = %e, "consumer loop error, backing off");
                    tokio::time::sleep(LOOP_ERROR_BACKOFF).await;
                }
            }

            iterations += 1;
            if max_iterations != 0 && iterations >= max_iterations {
                break;
            }
        }

        info!(received = total.received, processed = total.processed, failed = total.failed, "consumer stopped");
        total
    }
}
