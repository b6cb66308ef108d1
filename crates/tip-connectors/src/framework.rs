//! Generic connector runtime: fetch → normalize → write-raw →
//! transactional persist-and-outbox → write-canonical.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tip_adapters::alerts::AlertNotifier;
use tip_domain::{
    synthesize_dedupe_key, CanonicalEvent, EventId, EventType, PayloadRefs, Source,
};
use tip_ports::{BlobStore, Clock, EventStore, InsertOutcome};
use tracing::{debug, error, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Persist only; no outbox row, no downstream emission.
    Shadow,
    /// Persist and enqueue an outbox row for later dispatch.
    Emit,
}

/// Everything a `normalize` implementation can supply about one raw
/// record. Only `event_type` and `ts_event` are required; the rest
/// default to sensible empties and are filled in by `run_once`.
#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    pub event_type: EventType,
    pub ts_event: Option<DateTime<Utc>>,
    pub symbol: Option<String>,
    pub entity_id: Option<String>,
    pub severity: i32,
    pub confidence: Option<f64>,
    pub payload: serde_json::Value,
    pub dedupe_key: Option<String>,
}

impl Default for NormalizedEvent {
    fn default() -> Self {
        Self {
            event_type: EventType::SystemHealth,
            ts_event: None,
            symbol: None,
            entity_id: None,
            severity: 50,
            confidence: None,
            payload: serde_json::json!({}),
            dedupe_key: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("fetch failed: {message}")]
    Fetch { message: String },
    #[error("normalize failed: {message}")]
    Normalize { message: String },
    #[error("blob write failed: {message}")]
    Blob { message: String },
    #[error("store error: {message}")]
    Store { message: String },
}

/// A pluggable source: supplies raw records and knows how to normalize
/// one. `fetch` represents one poll cycle and is not restartable.
pub trait Connector: Send + Sync {
    type Raw: Serialize + Send + Sync;

    fn name(&self) -> &str;
    fn source(&self) -> Source;

    fn fetch(&self) -> impl Future<Output = Result<Vec<Self::Raw>, ConnectorError>> + Send;

    fn normalize(&self, raw: &Self::Raw) -> Result<NormalizedEvent, ConnectorError>;
}

/// Per-cycle stats, the single source of truth for a `run_once` call. No
/// error escapes `run_once`; everything is accounted for here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub fetched: usize,
    pub ingested: usize,
    pub deduped: usize,
    pub errors: usize,
}

/// Runs one poll cycle: fetch, then for each raw record, write-raw,
/// dedupe-check-and-insert (with outbox row in emit mode), then
/// best-effort write-canonical. Exceptions from normalization or the
/// store are caught per-record and counted in `errors`; the cycle never
/// aborts because of one bad record.
#[instrument(skip(connector, blob, store, clock, alerts))]
pub async fn run_once<C, B, S, K>(
    connector: &C,
    blob: &B,
    store: &S,
    clock: &K,
    alerts: &AlertNotifier,
    mode: Mode,
) -> RunStats
where
    C: Connector,
    B: BlobStore,
    S: EventStore,
    K: Clock,
{
    let mut stats = RunStats::default();

    let raws = match connector.fetch().await {
        Ok(raws) => raws,
        Err(e) => {
            error!(connector = connector.name(), error = %e, "fetch failed, cycle yields nothing");
            stats.errors += 1;
            return stats;
        }
    };

    for raw in &raws {
        stats.fetched += 1;
        if let Err(e) = process_one(connector, blob, store, clock, alerts, mode, raw, &mut stats).await {
            debug!(connector = connector.name(), error = %e, "record processing error");
            stats.errors += 1;
        }
    }

    stats
}

async fn process_one<C, B, S, K>(
    connector: &C,
    blob: &B,
    store: &S,
    clock: &K,
    alerts: &AlertNotifier,
    mode: Mode,
    raw: &C::Raw,
    stats: &mut RunStats,
) -> Result<(), ConnectorError>
where
    C: Connector,
    B: BlobStore,
    S: EventStore,
    K: Clock,
{
    let now = clock.now();
    let event_id = EventId::new();

    let normalized = connector
        .normalize(raw)
        .map_err(|e| ConnectorError::Normalize {
            message: e.to_string(),
        })?;

    let ts_event = normalized.ts_event.unwrap_or(now);

    let raw_json = serde_json::to_vec(raw).map_err(|e| ConnectorError::Normalize {
        message: e.to_string(),
    })?;
    let raw_uri = blob
        .put_raw(connector.source().as_str(), ts_event, &event_id.to_string(), &raw_json)
        .await
        .map_err(|e| ConnectorError::Blob {
            message: e.to_string(),
        })?;

    let dedupe_key = match normalized.dedupe_key.clone() {
        Some(key) => key,
        None => synthesize_dedupe_key(&normalized.payload).map_err(|e| ConnectorError::Normalize {
            message: e.to_string(),
        })?,
    };

    let event = CanonicalEvent::new(
        event_id,
        normalized.event_type,
        connector.source(),
        normalized.symbol.clone(),
        normalized.entity_id.clone(),
        ts_event,
        now,
        dedupe_key,
        normalized.severity,
        normalized.confidence,
        normalized.payload.clone(),
        PayloadRefs {
            raw: Some(raw_uri),
            normalized: None,
            enriched: None,
        },
    )
    .map_err(|e| ConnectorError::Normalize {
        message: e.to_string(),
    })?;

    let emit = mode == Mode::Emit;
    let outcome = store
        .insert_with_outbox(&event, emit)
        .await
        .map_err(|e| ConnectorError::Store {
            message: e.to_string(),
        })?;

    match outcome {
        InsertOutcome::Deduped => {
            stats.deduped += 1;
            return Ok(());
        }
        InsertOutcome::Inserted { .. } => {
            stats.ingested += 1;
        }
    }

    if let Err(e) = alerts
        .notify(
            &format!(
                "{} {} severity={} symbol={}",
                connector.source().as_str(),
                event.event_type.as_str(),
                event.severity,
                event.symbol.as_deref().unwrap_or("-")
            ),
            event.severity,
        )
        .await
    {
        warn!(event_id = %event.event_id, error = %e, "alert notification failed");
    }

    // Best-effort: a failure here is logged and does not unwind the
    // already-committed row.
    let canonical_json = match serde_json::to_vec(&event) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(event_id = %event.event_id, error = %e, "failed to serialize canonical event for blob write");
            return Ok(());
        }
    };
    if let Err(e) = blob
        .put_canonical(event.event_type.as_str(), ts_event, &event.event_id.to_string(), &canonical_json)
        .await
    {
        warn!(event_id = %event.event_id, error = %e, "canonical blob write failed after commit, row stands without it");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_normalized_event_has_neutral_severity() {
        let normalized = NormalizedEvent::default();
        assert_eq!(normalized.severity, 50);
        assert!(normalized.dedupe_key.is_none());
    }

    #[test]
    fn run_stats_default_is_all_zero() {
        assert_eq!(RunStats::default(), RunStats {
            fetched: 0,
            ingested: 0,
            deduped: 0,
            errors: 0,
        });
    }
}
