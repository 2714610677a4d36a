//! Zone polygon storage.

use ropt_types::{Zone, now_ms};
use sqlx::PgPool;

use crate::error::DbError;
use crate::ms_to_db;

/// Operations on the `zones` table.
pub struct ZoneStore<'a> {
    pool: &'a PgPool,
}

impl<'a> ZoneStore<'a> {
    /// Create a new zone store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// All zones ordered by `zone_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails, or
    /// [`DbError::Corrupt`] if a stored polygon is not a list of points.
    pub async fn list(&self) -> Result<Vec<Zone>, DbError> {
        let rows = sqlx::query_as::<_, ZoneRow>(
            r"SELECT zone_id, polygon, frame, severity, notes
              FROM zones
              ORDER BY zone_id",
        )
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(Zone::try_from).collect()
    }

    /// Insert or replace each zone by `zone_id` in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization or any write fails; nothing is
    /// committed in that case.
    pub async fn upsert(&self, zones: &[Zone]) -> Result<usize, DbError> {
        let updated_ms = ms_to_db(now_ms());
        let mut tx = self.pool.begin().await?;

        for zone in zones {
            let polygon = serde_json::to_value(&zone.polygon)?;
            sqlx::query(
                r"INSERT INTO zones (zone_id, polygon, frame, severity, notes, updated_ms)
                  VALUES ($1, $2, $3, $4, $5, $6)
                  ON CONFLICT (zone_id) DO UPDATE
                  SET polygon = EXCLUDED.polygon,
                      frame = EXCLUDED.frame,
                      severity = EXCLUDED.severity,
                      notes = EXCLUDED.notes,
                      updated_ms = EXCLUDED.updated_ms",
            )
            .bind(&zone.zone_id)
            .bind(&polygon)
            .bind(zone.frame.as_deref())
            .bind(zone.severity.as_deref())
            .bind(zone.notes.as_deref())
            .bind(updated_ms)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!(count = zones.len(), "Upserted zones");
        Ok(zones.len())
    }
}

/// A row from the `zones` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ZoneRow {
    /// Unique zone identifier.
    pub zone_id: String,
    /// JSON array of `[x, y]` pairs.
    pub polygon: serde_json::Value,
    /// Coordinate frame name.
    pub frame: Option<String>,
    /// Severity classification.
    pub severity: Option<String>,
    /// Free-form operator notes.
    pub notes: Option<String>,
}

impl TryFrom<ZoneRow> for Zone {
    type Error = DbError;

    fn try_from(row: ZoneRow) -> Result<Self, Self::Error> {
        let polygon = serde_json::from_value(row.polygon).map_err(|e| DbError::Corrupt {
            key: format!("zones.{}.polygon", row.zone_id),
            detail: e.to_string(),
        })?;
        Ok(Self {
            zone_id: row.zone_id,
            polygon,
            frame: row.frame,
            severity: row.severity,
            notes: row.notes,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn row_converts_to_zone() {
        let row = ZoneRow {
            zone_id: "zone_A".to_owned(),
            polygon: serde_json::json!([[0.0, 0.0], [0.0, 10.0], [10.0, 10.0]]),
            frame: Some("map".to_owned()),
            severity: None,
            notes: None,
        };
        let zone = Zone::try_from(row).unwrap();
        assert_eq!(zone.polygon.len(), 3);
        assert_eq!(zone.frame.as_deref(), Some("map"));
    }

    #[test]
    fn malformed_polygon_is_corrupt() {
        let row = ZoneRow {
            zone_id: "zone_X".to_owned(),
            polygon: serde_json::json!({"not": "a polygon"}),
            frame: None,
            severity: None,
            notes: None,
        };
        assert!(matches!(Zone::try_from(row), Err(DbError::Corrupt { .. })));
    }
}
