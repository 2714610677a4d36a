//! Run registry.
//!
//! A run groups events for later replay. Starting a run here only records
//! it; which run is *active* is live state, owned by the caller.

use ropt_types::{Run, RunId, now_ms};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DbError;
use crate::{ms_from_db, ms_to_db};

/// Operations on the `runs` table.
pub struct RunStore<'a> {
    pool: &'a PgPool,
}

impl<'a> RunStore<'a> {
    /// Create a new run store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Record a new run starting now.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn start(&self, notes: Option<&str>) -> Result<Run, DbError> {
        let run = Run {
            id: RunId::new(),
            started_at_ms: now_ms(),
            ended_at_ms: None,
            notes: notes.map(str::to_owned),
        };

        sqlx::query(
            r"INSERT INTO runs (id, started_at_ms, ended_at_ms, notes)
              VALUES ($1, $2, NULL, $3)",
        )
        .bind(run.id.into_inner())
        .bind(ms_to_db(run.started_at_ms))
        .bind(run.notes.as_deref())
        .execute(self.pool)
        .await?;

        tracing::info!(run_id = %run.id, "Run started");
        Ok(run)
    }

    /// Mark a run ended now. Notes replace the stored notes only when given.
    ///
    /// Returns `false` if no such run exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the update fails.
    pub async fn stop(&self, run_id: RunId, notes: Option<&str>) -> Result<bool, DbError> {
        let result = sqlx::query(
            r"UPDATE runs
              SET ended_at_ms = $2, notes = COALESCE($3, notes)
              WHERE id = $1",
        )
        .bind(run_id.into_inner())
        .bind(ms_to_db(now_ms()))
        .bind(notes)
        .execute(self.pool)
        .await?;

        let found = result.rows_affected() > 0;
        tracing::info!(run_id = %run_id, found, "Run stopped");
        Ok(found)
    }

    /// Most recent runs first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn list(&self, limit: usize) -> Result<Vec<Run>, DbError> {
        let rows = sqlx::query_as::<_, RunRow>(
            r"SELECT id, started_at_ms, ended_at_ms, notes
              FROM runs
              ORDER BY started_at_ms DESC
              LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(Run::from).collect())
    }
}

/// A row from the `runs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunRow {
    /// Run identifier.
    pub id: Uuid,
    /// Start time in milliseconds.
    pub started_at_ms: i64,
    /// End time in milliseconds, if stopped.
    pub ended_at_ms: Option<i64>,
    /// Operator notes.
    pub notes: Option<String>,
}

impl From<RunRow> for Run {
    fn from(row: RunRow) -> Self {
        Self {
            id: RunId::from(row.id),
            started_at_ms: ms_from_db(row.started_at_ms),
            ended_at_ms: row.ended_at_ms.map(ms_from_db),
            notes: row.notes,
        }
    }
}
