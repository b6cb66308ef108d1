//! Replay engine: re-publishes historical canonical events over a
//! timestamp window, bypassing the outbox. Not idempotency-checked;
//! downstream consumers must tolerate duplicate `event_id`s.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tip_ports::{EventStore, EventStoreError, MessageQueue, QueueError, TimestampKey};
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("store error: {0}")]
    Store(#[from] EventStoreError),
    #[error("publish error: {0}")]
    Publish(#[from] QueueError),
}

/// Streams event rows whose `key` timestamp lies in `[start, end]`,
/// ordered ascending by that column, and publishes each row's payload to
/// the queue unmodified. Returns the count published.
#[instrument(skip(store, queue))]
pub async fn replay<S, Q>(
    store: &S,
    queue: &Q,
    key: TimestampKey,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<usize, ReplayError>
where
    S: EventStore,
    Q: MessageQueue,
{
    let rows = store.range_by_timestamp(key, start, end).await?;
    let mut count = 0;

    for payload in rows {
        let body = serde_json::to_vec(&payload).map_err(|e| {
            ReplayError::Store(EventStoreError::SerializationError {
                message: e.to_string(),
            })
        })?;
        queue.publish(&body).await?;
        count += 1;
    }

    info!(count, "replay complete");
    Ok(count)
}
