//! Error types for the core crate.
//!
//! [`IngestError`] is what producers see when handing an event to the
//! pipeline. [`CoreError`] covers everything else a caller can act on:
//! persistence, live-state and pub/sub backend failures. Failures that
//! happen *inside* the consumer loop never surface as errors; they are
//! logged and folded into the next broadcast.

use ropt_types::InvalidEvent;

/// Synchronous, producer-visible ingestion failures.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The queue is at capacity. The producer should drop the event and let
    /// its own buffer retry later.
    #[error("event queue full")]
    Overflow,

    /// The consumer has stopped; no further events are accepted.
    #[error("event pipeline closed")]
    Closed,

    /// The event failed validation at the ingestion boundary.
    #[error("malformed event: {0}")]
    Malformed(#[from] InvalidEvent),
}

/// Errors from core operations outside the ingest path.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A backing store operation failed.
    #[error("store error: {0}")]
    Db(#[from] ropt_db::DbError),

    /// Pub/sub transport failure.
    #[error("NATS error: {0}")]
    Nats(String),
}
