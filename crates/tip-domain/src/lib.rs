//! Pure domain logic for the ingestion pipeline: the canonical event
//! schema, its validator, and the dedupe-key contract. No I/O.

pub mod errors;
pub mod events;

pub use errors::DomainError;
pub use events::{
    require_tz_aware, stable_encode_value, synthesize_dedupe_key, CanonicalEvent, EventId,
    EventType, PayloadRefs, Source,
};
