//! PostgreSQL-backed relational store: events, outbox, event_artifacts,
//! canary_runs, and the per-source fetch-state tables.

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tip_domain::CanonicalEvent;
use tip_ports::{
    EntityState, EventStore, EventStoreError, FetchStateError, FetchStateStore, InsertOutcome,
    OutboxRow, TimestampKey,
};
use tracing::{debug, error, instrument};

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self, EventStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(dsn)
            .await
            .map_err(|e| EventStoreError::ConnectionError {
                message: e.to_string(),
            })?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn event_type_str(event: &CanonicalEvent) -> &'static str {
    event.event_type.as_str()
}

fn source_str(event: &CanonicalEvent) -> &'static str {
    event.source.as_str()
}

impl EventStore for PostgresStore {
    #[instrument(skip(self, event), fields(dedupe_key = %event.dedupe_key))]
    async fn insert_with_outbox(
        &self,
        event: &CanonicalEvent,
        emit: bool,
    ) -> Result<InsertOutcome, EventStoreError> {
        let mut tx =
            self.pool
                .begin()
                .await
                .map_err(|e| EventStoreError::TransactionFailed {
                    message: e.to_string(),
                })?;

        let existing = sqlx::query("SELECT 1 FROM events WHERE dedupe_key = $1")
            .bind(&event.dedupe_key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| EventStoreError::TransactionFailed {
                message: e.to_string(),
            })?;

        if existing.is_some() {
            tx.commit()
                .await
                .map_err(|e| EventStoreError::TransactionFailed {
                    message: e.to_string(),
                })?;
            debug!("dedupe conflict, no-op insert");
            return Ok(InsertOutcome::Deduped);
        }

        let payload_json = serde_json::to_value(event).map_err(|e| {
            EventStoreError::SerializationError {
                message: e.to_string(),
            }
        })?;

        sqlx::query(
            "INSERT INTO events (
                event_id, schema_version, event_type, source, symbol, entity_id,
                ts_event, ts_ingested, dedupe_key, severity, confidence,
                payload_json, raw_s3_uri, normalized_s3_uri, hash, created_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,NULL,now())",
        )
        .bind(event.event_id.as_uuid())
        .bind(&event.schema_version)
        .bind(event_type_str(event))
        .bind(source_str(event))
        .bind(&event.symbol)
        .bind(&event.entity_id)
        .bind(event.ts_event)
        .bind(event.ts_ingested)
        .bind(&event.dedupe_key)
        .bind(event.severity)
        .bind(event.confidence)
        .bind(&payload_json)
        .bind(&event.payload_refs.raw)
        .bind(&event.payload_refs.normalized)
        .execute(&mut *tx)
        .await
        .map_err(|e| EventStoreError::TransactionFailed {
            message: e.to_string(),
        })?;

        let mut outbox_id = None;
        if emit {
            let row = sqlx::query(
                "INSERT INTO outbox (event_id, payload, published_at)
                 VALUES ($1, $2, NULL) RETURNING outbox_id",
            )
            .bind(event.event_id.as_uuid())
            .bind(&payload_json)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| EventStoreError::TransactionFailed {
                message: e.to_string(),
            })?;
            outbox_id = Some(row.try_get::<i64, _>("outbox_id").map_err(|e| {
                EventStoreError::TransactionFailed {
                    message: e.to_string(),
                }
            })?);
        }

        tx.commit()
            .await
            .map_err(|e| EventStoreError::TransactionFailed {
                message: e.to_string(),
            })?;

        Ok(InsertOutcome::Inserted { outbox_id })
    }

    #[instrument(skip(self))]
    async fn range_by_timestamp(
        &self,
        key: TimestampKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<serde_json::Value>, EventStoreError> {
        let column = match key {
            TimestampKey::TsEvent => "ts_event",
            TimestampKey::TsIngested => "ts_ingested",
        };
        let sql = format!(
            "SELECT payload_json FROM events WHERE {column} BETWEEN $1 AND $2 ORDER BY {column} ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EventStoreError::ConnectionError {
                message: e.to_string(),
            })?;

        rows.into_iter()
            .map(|row| {
                row.try_get::<serde_json::Value, _>("payload_json")
                    .map_err(|e| EventStoreError::SerializationError {
                        message: e.to_string(),
                    })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn unpublished_outbox(&self, limit: i64) -> Result<Vec<OutboxRow>, EventStoreError> {
        let rows = sqlx::query(
            "SELECT outbox_id, event_id, payload, published_at FROM outbox
             WHERE published_at IS NULL ORDER BY outbox_id ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EventStoreError::ConnectionError {
            message: e.to_string(),
        })?;

        rows.into_iter()
            .map(|row| {
                Ok(OutboxRow {
                    outbox_id: row.try_get("outbox_id").map_err(|e| {
                        EventStoreError::SerializationError {
                            message: e.to_string(),
                        }
                    })?,
                    event_id: row
                        .try_get::<uuid::Uuid, _>("event_id")
                        .map_err(|e| EventStoreError::SerializationError {
                            message: e.to_string(),
                        })?
                        .to_string(),
                    payload: row.try_get("payload").map_err(|e| {
                        EventStoreError::SerializationError {
                            message: e.to_string(),
                        }
                    })?,
                    published_at: row.try_get("published_at").map_err(|e| {
                        EventStoreError::SerializationError {
                            message: e.to_string(),
                        }
                    })?,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn mark_outbox_published(&self, outbox_id: i64) -> Result<(), EventStoreError> {
        sqlx::query("UPDATE outbox SET published_at = now() WHERE outbox_id = $1")
            .bind(outbox_id)
            .execute(&self.pool)
            .await
            .map_err(|e| EventStoreError::TransactionFailed {
                message: e.to_string(),
            })?;
        Ok(())
    }

    #[instrument(skip(self, stats))]
    async fn record_canary_run(
        &self,
        service: &str,
        version: &str,
        stats: &serde_json::Value,
        status: &str,
    ) -> Result<(), EventStoreError> {
        sqlx::query(
            "INSERT INTO canary_runs (service, version, stats_json, status, created_at)
             VALUES ($1, $2, $3, $4, now())",
        )
        .bind(service)
        .bind(version)
        .bind(stats)
        .bind(status)
        .execute(&self.pool)
        .await
        .map_err(|e| EventStoreError::TransactionFailed {
            message: e.to_string(),
        })?;
        Ok(())
    }

    #[instrument(skip(self, sql))]
    async fn apply_migration(&self, file_name: &str, sql: &str) -> Result<(), EventStoreError> {
        let mut tx =
            self.pool
                .begin()
                .await
                .map_err(|e| EventStoreError::MigrationFailed {
                    file: file_name.to_string(),
                    message: e.to_string(),
                })?;
        sqlx::raw_sql(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!(file = file_name, error = %e, "migration failed");
                EventStoreError::MigrationFailed {
                    file: file_name.to_string(),
                    message: e.to_string(),
                }
            })?;
        tx.commit()
            .await
            .map_err(|e| EventStoreError::MigrationFailed {
                file: file_name.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

impl FetchStateStore for PostgresStore {
    #[instrument(skip(self))]
    async fn is_seen(&self, source_entity: &str, accession: &str) -> Result<bool, FetchStateError> {
        let row: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM seen_filings WHERE source_entity = $1 AND accession = $2",
        )
        .bind(source_entity)
        .bind(accession)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FetchStateError::ConnectionError {
            message: e.to_string(),
        })?;
        Ok(row.is_some())
    }

    #[instrument(skip(self))]
    async fn mark_seen(&self, source_entity: &str, accession: &str) -> Result<(), FetchStateError> {
        sqlx::query(
            "INSERT INTO seen_filings (source_entity, accession, first_seen_at)
             VALUES ($1, $2, now())
             ON CONFLICT (source_entity, accession) DO NOTHING",
        )
        .bind(source_entity)
        .bind(accession)
        .execute(&self.pool)
        .await
        .map_err(|e| FetchStateError::ConnectionError {
            message: e.to_string(),
        })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_entity_state(
        &self,
        source_entity: &str,
    ) -> Result<Option<EntityState>, FetchStateError> {
        let row = sqlx::query(
            "SELECT last_etag, last_modified, last_poll_at FROM entity_state WHERE source_entity = $1",
        )
        .bind(source_entity)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FetchStateError::ConnectionError {
            message: e.to_string(),
        })?;

        Ok(row.map(|row| EntityState {
            last_etag: row.try_get("last_etag").ok(),
            last_modified: row.try_get("last_modified").ok(),
            last_poll_at: row.try_get("last_poll_at").ok(),
        }))
    }

    #[instrument(skip(self))]
    async fn update_entity_state(
        &self,
        source_entity: &str,
        last_etag: Option<&str>,
        last_modified: Option<&str>,
        polled_at: DateTime<Utc>,
    ) -> Result<(), FetchStateError> {
        sqlx::query(
            "INSERT INTO entity_state (source_entity, last_etag, last_modified, last_poll_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (source_entity) DO UPDATE SET
                last_etag = COALESCE(excluded.last_etag, entity_state.last_etag),
                last_modified = COALESCE(excluded.last_modified, entity_state.last_modified),
                last_poll_at = excluded.last_poll_at",
        )
        .bind(source_entity)
        .bind(last_etag)
        .bind(last_modified)
        .bind(polled_at)
        .execute(&self.pool)
        .await
        .map_err(|e| FetchStateError::ConnectionError {
            message: e.to_string(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dsn() -> Option<String> {
        std::env::var("TIP_TEST_DATABASE_URL").ok()
    }

    #[tokio::test]
    async fn insert_and_dedupe_round_trip() {
        let Some(dsn) = test_dsn() else {
            eprintln!("skipping: TIP_TEST_DATABASE_URL not set");
            return;
        };
        let store = PostgresStore::connect(&dsn, 5).await.unwrap();

        let event = tip_domain::CanonicalEvent::new(
            tip_domain::EventId::new(),
            tip_domain::EventType::SocialMentions,
            tip_domain::Source::Wsb,
            Some("OPEN".into()),
            None,
            Utc::now(),
            Utc::now(),
            format!("reddit:test:{}", uuid::Uuid::new_v4()),
            10,
            Some(0.5),
            serde_json::json!({}),
            tip_domain::PayloadRefs::default(),
        )
        .unwrap();

        let first = store.insert_with_outbox(&event, true).await.unwrap();
        assert!(matches!(first, InsertOutcome::Inserted { .. }));

        let second = store.insert_with_outbox(&event, true).await.unwrap();
        assert_eq!(second, InsertOutcome::Deduped);
    }
}
