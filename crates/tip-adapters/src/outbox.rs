//! Transactional outbox dispatcher: drains unpublished rows to the queue
//! in committed (`outbox_id`) order, at-least-once.

use std::time::Duration;

use thiserror::Error;
use tip_ports::{EventStore, EventStoreError, MessageQueue, QueueError};
use tracing::{error, info, instrument};

pub const DEFAULT_BATCH_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy)]
pub struct OutboxDispatcherConfig {
    pub batch_size: i64,
}

impl Default for OutboxDispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("store error: {0}")]
    Store(#[from] EventStoreError),
    #[error("publish error: {0}")]
    Publish(#[from] QueueError),
}

pub struct OutboxDispatcher<S, Q> {
    store: S,
    queue: Q,
    config: OutboxDispatcherConfig,
}

impl<S, Q> OutboxDispatcher<S, Q>
where
    S: EventStore,
    Q: MessageQueue,
{
    pub fn new(store: S, queue: Q, config: OutboxDispatcherConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Drains up to `batch_size` unpublished rows in `outbox_id` order.
    /// A publish failure aborts the cycle without marking the failing row
    /// published; the next cycle retries from that row.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<usize, DispatchError> {
        let rows = self.store.unpublished_outbox(self.config.batch_size).await?;
        let mut dispatched = 0;

        for row in rows {
            let body = serde_json::to_vec(&row.payload).map_err(|e| {
                DispatchError::Store(EventStoreError::SerializationError {
                    message: e.to_string(),
                })
            })?;

            if let Err(e) = self.queue.publish(&body).await {
                error!(outbox_id = row.outbox_id, error = %e, "publish failed, aborting cycle");
                return Err(DispatchError::Publish(e));
            }

            self.store.mark_outbox_published(row.outbox_id).await?;
            dispatched += 1;
        }

        info!(dispatched, "outbox cycle complete");
        Ok(dispatched)
    }

    /// Runs cycles on a fixed interval until `max_cycles` is reached
    /// (`0` = unbounded) or `running` is cleared. `interval == 0` means
    /// one-shot: run a single cycle and return.
    pub async fn run_loop(
        &self,
        interval: Duration,
        max_cycles: u32,
        running: &std::sync::atomic::AtomicBool,
    ) -> Result<usize, DispatchError> {
        let mut total = 0;
        let mut cycles = 0u32;

        loop {
            if !running.load(std::sync::atomic::Ordering::SeqCst) {
                break;
            }

            total += self.run_cycle().await?;
            cycles += 1;

            if interval.is_zero() {
                break;
            }
            if max_cycles != 0 && cycles >= max_cycles {
                break;
            }

            tokio::time::sleep(interval).await;
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_batch_size_is_one_hundred() {
        assert_eq!(OutboxDispatcherConfig::default().batch_size, DEFAULT_BATCH_SIZE);
    }
}
