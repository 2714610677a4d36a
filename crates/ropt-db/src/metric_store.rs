//! Performance samples.
//!
//! Samples are append-only and read back oldest first, optionally narrowed
//! to one run.

use std::collections::BTreeMap;

use ropt_types::{MetricId, MetricRecord, RunId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DbError;
use crate::{ms_from_db, ms_to_db};

/// Operations on the `metrics` table.
pub struct MetricStore<'a> {
    pool: &'a PgPool,
}

impl<'a> MetricStore<'a> {
    /// Create a new metric store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Append one sample. Returns the stored id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the values cannot be encoded or the insert
    /// fails.
    pub async fn insert(&self, record: &MetricRecord) -> Result<MetricId, DbError> {
        let values = serde_json::to_value(&record.values)?;
        sqlx::query(
            r"INSERT INTO metrics (id, source, ts_ms, run_id, metric_values, received_ms)
              VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.id.into_inner())
        .bind(&record.source)
        .bind(ms_to_db(record.ts_ms))
        .bind(record.run_id.map(RunId::into_inner))
        .bind(&values)
        .bind(ms_to_db(record.received_ms))
        .execute(self.pool)
        .await?;

        tracing::debug!(metric_id = %record.id, source = %record.source, "Inserted metric");
        Ok(record.id)
    }

    /// Samples ordered by `ts_ms` ascending, optionally for one run.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn query(&self, run_id: Option<RunId>, limit: usize) -> Result<Vec<MetricRow>, DbError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, MetricRow>(
            r"SELECT id, source, ts_ms, run_id, metric_values, received_ms
              FROM metrics
              WHERE ($1::UUID IS NULL OR run_id = $1)
              ORDER BY ts_ms, id
              LIMIT $2",
        )
        .bind(run_id.map(RunId::into_inner))
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }
}

/// A row from the `metrics` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MetricRow {
    /// Sample identifier.
    pub id: Uuid,
    /// Reporter.
    pub source: String,
    /// Sample time in milliseconds.
    pub ts_ms: i64,
    /// Run the sample was filed under.
    pub run_id: Option<Uuid>,
    /// JSON object of named measurements.
    pub metric_values: serde_json::Value,
    /// Server receive timestamp in milliseconds.
    pub received_ms: i64,
}

impl TryFrom<MetricRow> for MetricRecord {
    type Error = DbError;

    fn try_from(row: MetricRow) -> Result<Self, Self::Error> {
        let values: BTreeMap<String, f64> =
            serde_json::from_value(row.metric_values).map_err(|e| DbError::Corrupt {
                key: format!("metrics.{}.metric_values", row.id),
                detail: e.to_string(),
            })?;
        Ok(Self {
            id: MetricId::from(row.id),
            source: row.source,
            ts_ms: ms_from_db(row.ts_ms),
            run_id: row.run_id.map(RunId::from),
            values,
            received_ms: ms_from_db(row.received_ms),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn row(values: serde_json::Value) -> MetricRow {
        MetricRow {
            id: Uuid::now_v7(),
            source: "edge_cam_2".to_owned(),
            ts_ms: 1_000,
            run_id: None,
            metric_values: values,
            received_ms: 1_005,
        }
    }

    #[test]
    fn row_converts_to_record() {
        let record = MetricRecord::try_from(row(serde_json::json!({ "fps": 29.5 }))).unwrap();
        assert_eq!(record.values.get("fps"), Some(&29.5));
        assert_eq!(record.ts_ms, 1_000);
        assert_eq!(record.run_id, None);
    }

    #[test]
    fn non_numeric_values_are_corrupt() {
        let result = MetricRecord::try_from(row(serde_json::json!({ "fps": "fast" })));
        assert!(matches!(result, Err(DbError::Corrupt { .. })));
    }
}
