//! Base routing graph storage.
//!
//! The graph is edited as a whole and stored as one JSON document under a
//! fixed name.

use ropt_types::{BaseGraph, now_ms};
use sqlx::PgPool;

use crate::error::DbError;
use crate::ms_to_db;

/// Name of the document holding the site graph.
const GRAPH_NAME: &str = "site";

/// Operations on the `base_graph` table.
pub struct GraphStore<'a> {
    pool: &'a PgPool,
}

impl<'a> GraphStore<'a> {
    /// Create a new graph store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Load the stored graph, or `None` if none was ever saved.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails, or
    /// [`DbError::Corrupt`] if the stored document does not parse.
    pub async fn load(&self) -> Result<Option<BaseGraph>, DbError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as(r"SELECT graph FROM base_graph WHERE name = $1")
                .bind(GRAPH_NAME)
                .fetch_optional(self.pool)
                .await?;

        row.map(|(doc,)| {
            serde_json::from_value(doc).map_err(|e| DbError::Corrupt {
                key: format!("base_graph.{GRAPH_NAME}"),
                detail: e.to_string(),
            })
        })
        .transpose()
    }

    /// Replace the stored graph.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization or the write fails.
    pub async fn save(&self, graph: &BaseGraph) -> Result<(), DbError> {
        let doc = serde_json::to_value(graph)?;
        sqlx::query(
            r"INSERT INTO base_graph (name, graph, updated_ms)
              VALUES ($1, $2, $3)
              ON CONFLICT (name) DO UPDATE
              SET graph = EXCLUDED.graph, updated_ms = EXCLUDED.updated_ms",
        )
        .bind(GRAPH_NAME)
        .bind(&doc)
        .bind(ms_to_db(now_ms()))
        .execute(self.pool)
        .await?;

        tracing::info!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Saved base graph"
        );
        Ok(())
    }
}
