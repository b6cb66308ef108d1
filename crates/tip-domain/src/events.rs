//! Canonical event model: schema, invariants, timestamp discipline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::DomainError;

const SCHEMA_VERSION: &str = "v1";
const SYMBOL_PATTERN: &str = r"^[A-Z.\-]{1,16}$";

/// Opaque 128-bit event identifier, generated at ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed event type enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "DISCLOSURE.FILING")]
    DisclosureFiling,
    #[serde(rename = "SOCIAL.MENTIONS")]
    SocialMentions,
    #[serde(rename = "MARKET.BAR")]
    MarketBar,
    #[serde(rename = "MODEL.INSIGHT")]
    ModelInsight,
    #[serde(rename = "SYSTEM.HEALTH")]
    SystemHealth,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::DisclosureFiling => "DISCLOSURE.FILING",
            EventType::SocialMentions => "SOCIAL.MENTIONS",
            EventType::MarketBar => "MARKET.BAR",
            EventType::ModelInsight => "MODEL.INSIGHT",
            EventType::SystemHealth => "SYSTEM.HEALTH",
        }
    }
}

/// Closed source enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Edgar,
    Wsb,
    Market,
    Llm,
    System,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Edgar => "edgar",
            Source::Wsb => "wsb",
            Source::Market => "market",
            Source::Llm => "llm",
            Source::System => "system",
        }
    }
}

/// Blob URIs for lineage, attached to a canonical event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PayloadRefs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enriched: Option<String>,
}

/// The canonical event, invariant across all sources.
///
/// Decoding rejects unknown fields and naive timestamps; construction
/// through [`CanonicalEvent::new`] enforces the same invariants so that a
/// value of this type is always valid on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CanonicalEvent {
    pub event_id: EventId,
    pub schema_version: String,
    pub event_type: EventType,
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(deserialize_with = "deserialize_ts_event")]
    pub ts_event: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_ts_ingested")]
    pub ts_ingested: DateTime<Utc>,
    pub dedupe_key: String,
    pub severity: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub payload: serde_json::Value,
    pub payload_refs: PayloadRefs,
}

impl CanonicalEvent {
    /// Builds and validates a canonical event. Mirrors the field-level
    /// constraints in the decoder so construction and decoding agree.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: EventId,
        event_type: EventType,
        source: Source,
        symbol: Option<String>,
        entity_id: Option<String>,
        ts_event: DateTime<Utc>,
        ts_ingested: DateTime<Utc>,
        dedupe_key: String,
        severity: i32,
        confidence: Option<f64>,
        payload: serde_json::Value,
        payload_refs: PayloadRefs,
    ) -> Result<Self, DomainError> {
        if let Some(ref s) = symbol {
            validate_symbol(s)?;
        }
        validate_severity(severity)?;
        if let Some(c) = confidence {
            validate_confidence(c)?;
        }
        if dedupe_key.len() > 255 {
            return Err(DomainError::DedupeKeyTooLong);
        }

        Ok(Self {
            event_id,
            schema_version: SCHEMA_VERSION.to_string(),
            event_type,
            source,
            symbol,
            entity_id,
            ts_event,
            ts_ingested,
            dedupe_key,
            severity,
            confidence,
            payload,
            payload_refs,
        })
    }

    /// Stable, sorted-key, compact-separator JSON encoding. Used wherever
    /// content hashing is applied (dedupe-key synthesis, bundle hashes).
    pub fn stable_encode(&self) -> Result<String, DomainError> {
        stable_encode_value(&serde_json::to_value(self).map_err(|e| DomainError::EncodingError {
            message: e.to_string(),
        })?)
    }
}

/// Validates the `^[A-Z.\-]{1,16}$` symbol pattern.
pub fn validate_symbol(symbol: &str) -> Result<(), DomainError> {
    let re = regex::Regex::new(SYMBOL_PATTERN).expect("static symbol pattern is valid");
    if re.is_match(symbol) {
        Ok(())
    } else {
        Err(DomainError::InvalidSymbol {
            symbol: symbol.to_string(),
        })
    }
}

pub fn validate_severity(severity: i32) -> Result<(), DomainError> {
    if (0..=100).contains(&severity) {
        Ok(())
    } else {
        Err(DomainError::SeverityOutOfRange {
            value: severity as i64,
        })
    }
}

pub fn validate_confidence(confidence: f64) -> Result<(), DomainError> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(DomainError::ConfidenceOutOfRange { value: confidence })
    }
}

/// Rejects naive (offset-less) timestamps. Used as the `CanonicalEvent`
/// deserialize path for `tsEvent`/`tsIngested` so decoding an event whose
/// timestamp field lacks a UTC offset fails, rather than relying on
/// chrono's own RFC-3339 parser to reject it implicitly.
pub fn require_tz_aware(raw: &str, field: &str) -> Result<DateTime<Utc>, DomainError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DomainError::InvalidEvent {
            field: field.to_string(),
            reason: "timestamp has no UTC offset".to_string(),
        })
}

fn deserialize_ts_event<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    require_tz_aware(&raw, "tsEvent").map_err(serde::de::Error::custom)
}

fn deserialize_ts_ingested<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    require_tz_aware(&raw, "tsIngested").map_err(serde::de::Error::custom)
}

/// `serde_json::Value`'s default `Map` is `BTreeMap`-backed (the
/// `preserve_order` feature is not enabled anywhere in this workspace), so
/// re-serializing through `Value` already yields sorted keys; `to_string`
/// already uses compact separators. This function exists so callers have
/// one named entry point for "the stable encoding" rather than relying on
/// that fact implicitly.
pub fn stable_encode_value(value: &serde_json::Value) -> Result<String, DomainError> {
    serde_json::to_string(value).map_err(|e| DomainError::EncodingError {
        message: e.to_string(),
    })
}

/// `sha256(stable-encode(normalized))`, the dedupe-key fallback per the
/// dedupe contract when a source adapter omits a natural key.
pub fn synthesize_dedupe_key(normalized: &serde_json::Value) -> Result<String, DomainError> {
    let encoded = stable_encode_value(normalized)?;
    let mut hasher = Sha256::new();
    hasher.update(encoded.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_pattern_boundaries() {
        assert!(validate_symbol("A").is_ok());
        assert!(validate_symbol("BRK.B").is_ok());
        assert!(validate_symbol("ABCDEFGHIJKLMNOPQ").is_err()); // 17 chars
        assert!(validate_symbol("abc").is_err());
    }

    #[test]
    fn severity_boundaries() {
        assert!(validate_severity(0).is_ok());
        assert!(validate_severity(100).is_ok());
        assert!(validate_severity(-1).is_err());
        assert!(validate_severity(101).is_err());
    }

    #[test]
    fn confidence_boundaries() {
        assert!(validate_confidence(0.0).is_ok());
        assert!(validate_confidence(1.0).is_ok());
        assert!(validate_confidence(1.01).is_err());
    }

    #[test]
    fn stable_encoding_round_trips() {
        let event = CanonicalEvent::new(
            EventId::new(),
            EventType::SocialMentions,
            Source::Wsb,
            Some("OPEN".to_string()),
            None,
            Utc::now(),
            Utc::now(),
            "reddit:wallstreetbets:abc123".to_string(),
            10,
            Some(0.81),
            serde_json::json!({"text": "to the moon"}),
            PayloadRefs::default(),
        )
        .unwrap();

        let encoded = event.stable_encode().unwrap();
        let decoded: CanonicalEvent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.event_id, event.event_id);
        assert_eq!(decoded.dedupe_key, event.dedupe_key);
    }

    #[test]
    fn stable_encoding_is_deterministic_regardless_of_key_insertion_order() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(
            stable_encode_value(&a).unwrap(),
            stable_encode_value(&b).unwrap()
        );
    }

    #[test]
    fn decode_rejects_unknown_fields() {
        let mut value = serde_json::to_value(
            CanonicalEvent::new(
                EventId::new(),
                EventType::SystemHealth,
                Source::System,
                None,
                None,
                Utc::now(),
                Utc::now(),
                "system:health:1".to_string(),
                0,
                None,
                serde_json::json!({}),
                PayloadRefs::default(),
            )
            .unwrap(),
        )
        .unwrap();
        value["unexpectedField"] = serde_json::json!("nope");
        let result: Result<CanonicalEvent, _> = serde_json::from_value(value);
        assert!(result.is_err());
    }

    #[test]
    fn decode_rejects_naive_timestamp() {
        assert!(require_tz_aware("2024-01-01T00:00:00", "tsEvent").is_err());
        assert!(require_tz_aware("2024-01-01T00:00:00Z", "tsEvent").is_ok());
    }

    #[test]
    fn full_event_decode_rejects_a_naive_ts_event_field() {
        let mut value = serde_json::to_value(
            CanonicalEvent::new(
                EventId::new(),
                EventType::SystemHealth,
                Source::System,
                None,
                None,
                Utc::now(),
                Utc::now(),
                "system:health:2".to_string(),
                0,
                None,
                serde_json::json!({}),
                PayloadRefs::default(),
            )
            .unwrap(),
        )
        .unwrap();
        value["tsEvent"] = serde_json::json!("2024-01-01T00:00:00");
        let result: Result<CanonicalEvent, _> = serde_json::from_value(value);
        assert!(result.is_err());
    }
}
