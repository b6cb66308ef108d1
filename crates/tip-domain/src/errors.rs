use thiserror::Error;

/// Domain-level validation failures for the canonical event model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid event field '{field}': {reason}")]
    InvalidEvent { field: String, reason: String },

    #[error("symbol '{symbol}' does not match required pattern")]
    InvalidSymbol { symbol: String },

    #[error("severity {value} out of range 0..=100")]
    SeverityOutOfRange { value: i64 },

    #[error("confidence {value} out of range 0.0..=1.0")]
    ConfidenceOutOfRange { value: f64 },

    #[error("dedupe key exceeds 255 characters")]
    DedupeKeyTooLong,

    #[error("stable encoding failed: {message}")]
    EncodingError { message: String },
}
