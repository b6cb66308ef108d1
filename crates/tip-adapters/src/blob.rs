//! Blob archive: gzip-JSON bodies under deterministic, time-partitioned
//! keys, backed by an S3-API-compatible object store.

use std::io::Write;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::{config::Region, Client as S3Client};
use chrono::{DateTime, Datelike, Utc};
use flate2::{write::GzEncoder, Compression};
use tip_ports::BlobStore;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct BlobConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl BlobConfig {
    pub fn local_dev() -> Self {
        Self {
            bucket: "tip-dev".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: Some("http://localhost:9000".to_string()),
            access_key_id: "minioadmin".to_string(),
            secret_access_key: "minioadmin".to_string(),
        }
    }
}

pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
}

impl S3BlobStore {
    pub async fn new(config: BlobConfig) -> Result<Self, tip_ports::BlobStoreError> {
        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "tip-blob-store",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .behavior_version(BehaviorVersion::latest());

        if let Some(endpoint) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let client = S3Client::from_conf(builder.build());

        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }

    async fn put_gzip_json(&self, key: &str, body: &[u8]) -> Result<String, tip_ports::BlobStoreError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(body)
            .map_err(|e| tip_ports::BlobStoreError::StorageError {
                message: e.to_string(),
            })?;
        let gzipped = encoder
            .finish()
            .map_err(|e| tip_ports::BlobStoreError::StorageError {
                message: e.to_string(),
            })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(gzipped.into())
            .content_type("application/json")
            .content_encoding("gzip")
            .send()
            .await
            .map_err(|e| tip_ports::BlobStoreError::StorageError {
                message: e.to_string(),
            })?;

        Ok(format!("s3://{}/{}", self.bucket, key))
    }
}

struct Ymd {
    yyyy: i32,
    mm: u32,
    dd: u32,
}

fn ymd(ts: DateTime<Utc>) -> Ymd {
    Ymd {
        yyyy: ts.year(),
        mm: ts.month(),
        dd: ts.day(),
    }
}

pub fn raw_key(source: &str, ts_event: DateTime<Utc>, event_id: &str) -> String {
    let Ymd { yyyy, mm, dd } = ymd(ts_event);
    format!("raw/{source}/yyyy={yyyy:04}/mm={mm:02}/dd={dd:02}/{event_id}.json.gz")
}

pub fn event_key(event_type: &str, ts_event: DateTime<Utc>, event_id: &str) -> String {
    let Ymd { yyyy, mm, dd } = ymd(ts_event);
    format!(
        "events/eventType={event_type}/yyyy={yyyy:04}/mm={mm:02}/dd={dd:02}/{event_id}.json.gz"
    )
}

pub fn enriched_key(
    model_name: &str,
    event_type: &str,
    ts_event: DateTime<Utc>,
    event_id: &str,
) -> String {
    let Ymd { yyyy, mm, dd } = ymd(ts_event);
    format!(
        "enriched/model={model_name}/eventType={event_type}/yyyy={yyyy:04}/mm={mm:02}/dd={dd:02}/{event_id}.json.gz"
    )
}

pub fn index_partition_key(event_type: &str, ts: DateTime<Utc>) -> String {
    let Ymd { yyyy, mm, dd } = ymd(ts);
    format!(
        "indexes/daily/eventType={event_type}/yyyy={yyyy:04}/mm={mm:02}/dd={dd:02}/part-000.parquet"
    )
}

impl BlobStore for S3BlobStore {
    #[instrument(skip(self, body))]
    async fn put_raw(
        &self,
        source: &str,
        ts_event: DateTime<Utc>,
        event_id: &str,
        body: &[u8],
    ) -> Result<String, tip_ports::BlobStoreError> {
        let key = raw_key(source, ts_event, event_id);
        self.put_gzip_json(&key, body).await
    }

    #[instrument(skip(self, body))]
    async fn put_canonical(
        &self,
        event_type: &str,
        ts_event: DateTime<Utc>,
        event_id: &str,
        body: &[u8],
    ) -> Result<String, tip_ports::BlobStoreError> {
        let key = event_key(event_type, ts_event, event_id);
        self.put_gzip_json(&key, body).await
    }

    #[instrument(skip(self, body))]
    async fn put_enriched(
        &self,
        model_name: &str,
        event_type: &str,
        ts_event: DateTime<Utc>,
        event_id: &str,
        body: &[u8],
    ) -> Result<String, tip_ports::BlobStoreError> {
        let key = enriched_key(model_name, event_type, ts_event, event_id);
        self.put_gzip_json(&key, body).await
    }

    fn index_partition_key(&self, event_type: &str, ts: DateTime<Utc>) -> String {
        index_partition_key(event_type, ts)
    }

    #[instrument(skip(self))]
    async fn exists(&self, key: &str) -> Result<bool, tip_ports::BlobStoreError> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) {
                    Ok(false)
                } else {
                    Err(tip_ports::BlobStoreError::StorageError {
                        message: e.to_string(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn raw_key_is_time_partitioned_by_ts_event() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();
        let key = raw_key("edgar", ts, "abc-123");
        assert_eq!(key, "raw/edgar/yyyy=2024/mm=03/dd=07/abc-123.json.gz");
    }

    #[test]
    fn event_key_includes_event_type() {
        let ts = Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap();
        let key = event_key("SOCIAL.MENTIONS", ts, "abc-123");
        assert_eq!(
            key,
            "events/eventType=SOCIAL.MENTIONS/yyyy=2024/mm=12/dd=31/abc-123.json.gz"
        );
    }

    #[test]
    fn index_partition_key_has_no_event_id() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let key = index_partition_key("DISCLOSURE.FILING", ts);
        assert_eq!(
            key,
            "indexes/daily/eventType=DISCLOSURE.FILING/yyyy=2024/mm=01/dd=01/part-000.parquet"
        );
    }
}
