//! Durable event log.
//!
//! Every ingested event is written here once, after live state has been
//! updated. Reads serve the operator event list and run replay, both ordered
//! by the producer timestamp.

use ropt_types::{EventId, EventRecord, RunId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DbError;
use crate::{ms_from_db, ms_to_db};

/// Filter for [`EventStore::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventQuery {
    /// Only events belonging to this run.
    pub run_id: Option<RunId>,
    /// Only events with `ts_ms >= since_ms`.
    pub since_ms: Option<u64>,
    /// Maximum number of rows returned.
    pub limit: usize,
}

impl EventQuery {
    /// All events of one run, oldest first, up to `limit`.
    pub const fn for_run(run_id: RunId, limit: usize) -> Self {
        Self {
            run_id: Some(run_id),
            since_ms: None,
            limit,
        }
    }

    /// Whether `record` passes the run and time filters (ignores `limit`).
    pub fn matches(&self, record: &EventRecord) -> bool {
        self.run_id.is_none_or(|run| record.run_id == run)
            && self.since_ms.is_none_or(|since| record.ts_ms >= since)
    }
}

/// Operations on the `events` table.
pub struct EventStore<'a> {
    pool: &'a PgPool,
}

impl<'a> EventStore<'a> {
    /// Create a new event store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Append one event. Returns the stored id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn insert(&self, record: &EventRecord) -> Result<EventId, DbError> {
        sqlx::query(
            r"INSERT INTO events (id, event_type, ts_ms, actor_id, zone_id, run_id, received_ms, payload)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(record.id.into_inner())
        .bind(&record.event_type)
        .bind(ms_to_db(record.ts_ms))
        .bind(&record.actor_id)
        .bind(record.zone_id.as_deref())
        .bind(record.run_id.into_inner())
        .bind(ms_to_db(record.received_ms))
        .bind(&record.payload)
        .execute(self.pool)
        .await?;

        tracing::debug!(event_id = %record.id, run_id = %record.run_id, "Inserted event");
        Ok(record.id)
    }

    /// Query events ordered by `ts_ms` ascending.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn query(&self, filter: &EventQuery) -> Result<Vec<EventRow>, DbError> {
        let limit = i64::try_from(filter.limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, EventRow>(
            r"SELECT id, event_type, ts_ms, actor_id, zone_id, run_id, received_ms, payload
              FROM events
              WHERE ($1::UUID IS NULL OR run_id = $1)
                AND ($2::BIGINT IS NULL OR ts_ms >= $2)
              ORDER BY ts_ms, id
              LIMIT $3",
        )
        .bind(filter.run_id.map(RunId::into_inner))
        .bind(filter.since_ms.map(ms_to_db))
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }
}

/// A row from the `events` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    /// Event identifier assigned at ingestion.
    pub id: Uuid,
    /// Producer event type string.
    pub event_type: String,
    /// Producer timestamp in milliseconds.
    pub ts_ms: i64,
    /// Tracked actor.
    pub actor_id: String,
    /// Zone the event refers to, if any.
    pub zone_id: Option<String>,
    /// Run the event was filed under.
    pub run_id: Uuid,
    /// Server receive timestamp in milliseconds.
    pub received_ms: i64,
    /// Opaque producer payload.
    pub payload: serde_json::Value,
}

impl From<EventRow> for EventRecord {
    fn from(row: EventRow) -> Self {
        Self {
            id: EventId::from(row.id),
            event_type: row.event_type,
            ts_ms: ms_from_db(row.ts_ms),
            actor_id: row.actor_id,
            zone_id: row.zone_id,
            run_id: RunId::from(row.run_id),
            received_ms: ms_from_db(row.received_ms),
            payload: row.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use ropt_types::EventIn;

    use super::*;

    fn record(run: RunId, ts_ms: u64) -> EventRecord {
        EventRecord::from_ingested(EventIn::new("ZONE_ENTER", "p1", Some("zone_A"), ts_ms), run, ts_ms)
    }

    #[test]
    fn query_filters_by_run_and_time() {
        let run = RunId::new();
        let other = RunId::new();
        let filter = EventQuery {
            run_id: Some(run),
            since_ms: Some(100),
            limit: 10,
        };

        assert!(filter.matches(&record(run, 100)));
        assert!(!filter.matches(&record(run, 99)));
        assert!(!filter.matches(&record(other, 500)));
        assert!(EventQuery::for_run(other, 1).matches(&record(other, 0)));
    }
}
