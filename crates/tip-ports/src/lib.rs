//! Port traits separating the ingestion core from its adapters: the
//! relational store, the blob archive, the message queue, per-source
//! fetch state, and the system clock.

use std::future::Future;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tip_domain::CanonicalEvent;

/// Outcome of inserting a canonical event: either it was newly committed,
/// or an existing row with the same `dedupe_key` was found (a dedupe, not
/// an error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted { outbox_id: Option<i64> },
    Deduped,
}

/// Which timestamp column a range query or replay orders by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampKey {
    TsEvent,
    TsIngested,
}

/// An undelivered or delivered outbox row as seen by the dispatcher.
#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub outbox_id: i64,
    pub event_id: String,
    pub payload: serde_json::Value,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("connection error: {message}")]
    ConnectionError { message: String },
    #[error("serialization error: {message}")]
    SerializationError { message: String },
    #[error("transaction failed: {message}")]
    TransactionFailed { message: String },
    #[error("migration failed applying {file}: {message}")]
    MigrationFailed { file: String, message: String },
}

/// The relational store: events, outbox, event_artifacts, canary_runs,
/// and per-source fetch state (see [`FetchStateStore`]).
pub trait EventStore: Send + Sync {
    /// Inserts the canonical event and, if `emit` is true, a companion
    /// outbox row, in one transaction. A conflict on `dedupe_key` is
    /// reported as [`InsertOutcome::Deduped`], not an error.
    fn insert_with_outbox(
        &self,
        event: &CanonicalEvent,
        emit: bool,
    ) -> impl Future<Output = Result<InsertOutcome, EventStoreError>> + Send;

    /// Event rows whose `key` timestamp lies in `[start, end]`, ordered
    /// ascending by that column. Used by the replay engine.
    fn range_by_timestamp(
        &self,
        key: TimestampKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<serde_json::Value>, EventStoreError>> + Send;

    /// Up to `limit` undelivered outbox rows, ordered ascending by
    /// `outbox_id`.
    fn unpublished_outbox(
        &self,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<OutboxRow>, EventStoreError>> + Send;

    /// Marks a single outbox row delivered. Called once per row, inside
    /// the dispatcher's per-cycle transaction.
    fn mark_outbox_published(
        &self,
        outbox_id: i64,
    ) -> impl Future<Output = Result<(), EventStoreError>> + Send;

    /// Records a one-off operator invocation's summary stats.
    fn record_canary_run(
        &self,
        service: &str,
        version: &str,
        stats: &serde_json::Value,
        status: &str,
    ) -> impl Future<Output = Result<(), EventStoreError>> + Send;

    /// Applies a single migration file's SQL in one transaction.
    fn apply_migration(
        &self,
        file_name: &str,
        sql: &str,
    ) -> impl Future<Output = Result<(), EventStoreError>> + Send;
}

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("not found: {key}")]
    NotFound { key: String },
    #[error("storage error: {message}")]
    StorageError { message: String },
}

/// The content-addressed, time-partitioned blob archive.
pub trait BlobStore: Send + Sync {
    fn put_raw(
        &self,
        source: &str,
        ts_event: DateTime<Utc>,
        event_id: &str,
        body: &[u8],
    ) -> impl Future<Output = Result<String, BlobStoreError>> + Send;

    fn put_canonical(
        &self,
        event_type: &str,
        ts_event: DateTime<Utc>,
        event_id: &str,
        body: &[u8],
    ) -> impl Future<Output = Result<String, BlobStoreError>> + Send;

    fn put_enriched(
        &self,
        model_name: &str,
        event_type: &str,
        ts_event: DateTime<Utc>,
        event_id: &str,
        body: &[u8],
    ) -> impl Future<Output = Result<String, BlobStoreError>> + Send;

    /// Reserves (returns, without writing) the daily index-partition key
    /// for the out-of-scope downstream indexer.
    fn index_partition_key(&self, event_type: &str, ts: DateTime<Utc>) -> String;

    fn exists(&self, key: &str) -> impl Future<Output = Result<bool, BlobStoreError>> + Send;
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("connection error: {message}")]
    ConnectionError { message: String },
    #[error("publish error: {message}")]
    PublishError { message: String },
}

/// A message received from the queue, carrying enough to acknowledge or
/// abandon it.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub receipt_handle: String,
    pub body: Vec<u8>,
}

/// At-least-once message queue used by the outbox dispatcher, the replay
/// engine, and the queue consumer scaffold.
pub trait MessageQueue: Send + Sync {
    fn publish(&self, body: &[u8]) -> impl Future<Output = Result<(), QueueError>> + Send;

    fn receive(
        &self,
        batch: usize,
        wait_secs: u64,
        visibility_secs: u64,
    ) -> impl Future<Output = Result<Vec<QueueMessage>, QueueError>> + Send;

    fn delete(
        &self,
        receipt_handle: &str,
    ) -> impl Future<Output = Result<(), QueueError>> + Send;
}

#[derive(Debug, Error)]
pub enum FetchStateError {
    #[error("connection error: {message}")]
    ConnectionError { message: String },
}

/// Cached conditional-request state for one polled entity.
#[derive(Debug, Clone, Default)]
pub struct EntityState {
    pub last_etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_poll_at: Option<DateTime<Utc>>,
}

/// Per-source fetch state: seen-filing ledger and conditional-request
/// cache, used by the rate-limited fetcher.
pub trait FetchStateStore: Send + Sync {
    fn is_seen(
        &self,
        source_entity: &str,
        accession: &str,
    ) -> impl Future<Output = Result<bool, FetchStateError>> + Send;

    fn mark_seen(
        &self,
        source_entity: &str,
        accession: &str,
    ) -> impl Future<Output = Result<(), FetchStateError>> + Send;

    fn get_entity_state(
        &self,
        source_entity: &str,
    ) -> impl Future<Output = Result<Option<EntityState>, FetchStateError>> + Send;

    fn update_entity_state(
        &self,
        source_entity: &str,
        last_etag: Option<&str>,
        last_modified: Option<&str>,
        polled_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), FetchStateError>> + Send;
}

/// Seam for time, so tests can control `now()`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
