//! Hand-rolled ingestion metrics: atomic counters and a fixed-bucket
//! histogram, in the style already used by this workspace's HTTP
//! service rather than a dedicated metrics crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

/// Bucket upper bounds in seconds, matching the ranges the original
/// ingestion-lag/enrichment-latency histograms used.
const BUCKET_BOUNDS_SECS: [f64; 10] = [0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

pub struct Histogram {
    buckets: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            buckets: (0..=BUCKET_BOUNDS_SECS.len()).map(|_| AtomicU64::new(0)).collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }
}

impl Histogram {
    pub fn observe(&self, seconds: f64) {
        let bucket = BUCKET_BOUNDS_SECS
            .iter()
            .position(|bound| seconds <= *bound)
            .unwrap_or(BUCKET_BOUNDS_SECS.len());
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((seconds * 1_000_000.0).max(0.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect(),
            sum_seconds: self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            count: self.count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramSnapshot {
    pub buckets: Vec<u64>,
    pub sum_seconds: f64,
    pub count: u64,
}

#[derive(Default)]
pub struct IngestionMetrics {
    ingestion_lag: Histogram,
    enrichment_latency: Histogram,
    errors_by_component: Mutex<HashMap<String, AtomicU64>>,
    dedupe_count: AtomicU64,
    external_spend_micros: AtomicU64,
}

impl IngestionMetrics {
    pub fn record_ingestion_lag(&self, ts_event_to_ts_ingested_secs: f64) {
        self.ingestion_lag.observe(ts_event_to_ts_ingested_secs);
    }

    pub fn record_enrichment_latency(&self, seconds: f64) {
        self.enrichment_latency.observe(seconds);
    }

    pub fn record_error(&self, component: &str) {
        let mut errors = self.errors_by_component.lock().expect("metrics lock poisoned");
        errors
            .entry(component.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dedupe(&self) {
        self.dedupe_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_external_spend(&self, usd: f64) {
        self.external_spend_micros
            .fetch_add((usd * 1_000_000.0).max(0.0) as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let errors = self.errors_by_component.lock().expect("metrics lock poisoned");
        MetricsSnapshot {
            ingestion_lag: self.ingestion_lag.snapshot(),
            enrichment_latency: self.enrichment_latency.snapshot(),
            errors_by_component: errors
                .iter()
                .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
                .collect(),
            dedupe_count: self.dedupe_count.load(Ordering::Relaxed),
            external_spend_usd: self.external_spend_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub ingestion_lag: HistogramSnapshot,
    pub enrichment_latency: HistogramSnapshot,
    pub errors_by_component: HashMap<String, u64>,
    pub dedupe_count: u64,
    pub external_spend_usd: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_counts_observations() {
        let hist = Histogram::default();
        hist.observe(0.05);
        hist.observe(250.0);
        let snap = hist.snapshot();
        assert_eq!(snap.count, 2);
    }

    #[test]
    fn error_counter_is_per_component() {
        let metrics = IngestionMetrics::default();
        metrics.record_error("edgar");
        metrics.record_error("edgar");
        metrics.record_error("reddit");
        let snap = metrics.snapshot();
        assert_eq!(snap.errors_by_component.get("edgar"), Some(&2));
        assert_eq!(snap.errors_by_component.get("reddit"), Some(&1));
    }

    #[test]
    fn dedupe_counter_increments() {
        let metrics = IngestionMetrics::default();
        metrics.record_dedupe();
        metrics.record_dedupe();
        assert_eq!(metrics.snapshot().dedupe_count, 2);
    }
}
