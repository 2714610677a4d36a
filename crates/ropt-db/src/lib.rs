//! Data layer for ROPT (`Dragonfly` + `PostgreSQL`).
//!
//! `PostgreSQL` is the cold store: the durable event log, the zone
//! definitions, the run registry, performance samples and the
//! operator-edited base graph.
//! `Dragonfly` is the hot store backing the shared live state when more than
//! one ingestion process runs.
//!
//! ```text
//! Ingestion consumer
//!     |
//!     +-- live actor state / recent events --> Dragonfly (DragonflyPool)
//!     |
//!     +-- durable log ------------------------> PostgreSQL (PostgresPool)
//!         |-- EventStore  (append-only events, replay queries)
//!         |-- ZoneStore   (zone polygons)
//!         |-- RunStore    (run registry)
//!         |-- MetricStore (performance samples)
//!         +-- GraphStore  (base routing graph document)
//! ```
//!
//! # Modules
//!
//! - [`dragonfly`] -- `Dragonfly` (Redis-compatible) live-state keys
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`event_store`] -- Event insertion and run/time-window queries
//! - [`zone_store`] -- Zone upsert and listing
//! - [`run_store`] -- Run start/stop/list
//! - [`metric_store`] -- Performance sample insert and run queries
//! - [`graph_store`] -- Base graph load/save
//! - [`error`] -- Shared error types

pub mod dragonfly;
pub mod error;
pub mod event_store;
pub mod graph_store;
pub mod metric_store;
pub mod postgres;
pub mod run_store;
pub mod zone_store;

// Re-export primary types for convenience.
pub use dragonfly::{DragonflyPool, LiveKeys, LiveView, ZoneWrite};
pub use error::DbError;
pub use event_store::{EventQuery, EventRow, EventStore};
pub use graph_store::GraphStore;
pub use metric_store::{MetricRow, MetricStore};
pub use postgres::{PostgresConfig, PostgresPool};
pub use run_store::{RunRow, RunStore};
pub use zone_store::{ZoneRow, ZoneStore};

/// Convert a millisecond timestamp to the signed column type.
pub(crate) fn ms_to_db(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

/// Convert a signed column value back to milliseconds.
pub(crate) fn ms_from_db(ms: i64) -> u64 {
    u64::try_from(ms).unwrap_or(0)
}
