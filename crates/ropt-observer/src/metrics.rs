//! Performance sample handlers.
//!
//! Edge pipelines and the backend report small bags of named numbers
//! (`fps`, `latency_ms`, `solve_ms`, ...). Samples are stored as submitted
//! and read back per run for dashboards and replay.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/metrics` | Store one sample |
//! | `GET` | `/metrics` | Samples, oldest first, optionally for one run |

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use ropt_core::AppContext;
use ropt_types::{MetricIn, MetricRecord, now_ms};

use crate::error::ObserverError;
use crate::handlers::parse_run_id;

/// Default number of samples returned by `GET /metrics`.
pub const DEFAULT_METRIC_LIMIT: usize = 500;

/// Upper bound for `GET /metrics?limit`.
pub const MAX_METRIC_LIMIT: usize = 5_000;

/// Query parameters for `GET /metrics`.
#[derive(Debug, serde::Deserialize)]
pub struct MetricsQuery {
    /// Only samples filed under this run (UUID).
    pub run_id: Option<String>,
    /// Maximum number of samples (default 500, clamped to 1..=5000).
    pub limit: Option<usize>,
}

/// Validate and store one sample, stamping `received_ms`.
///
/// Answers `201` with the stored id, `400` for an unusable sample.
pub async fn post_metric(
    State(ctx): State<Arc<AppContext>>,
    body: Result<Json<MetricIn>, JsonRejection>,
) -> Result<impl IntoResponse, ObserverError> {
    let Json(metric) = body?;
    metric.validate()?;

    let record = MetricRecord::from_submitted(metric, now_ms());
    let id = ctx.persistence.insert_metric(&record).await?;
    tracing::debug!(%id, source = %record.source, values = record.values.len(), "Metric stored");

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "ok": true, "id": id })),
    ))
}

/// Stored samples ordered by `ts_ms`.
pub async fn list_metrics(
    State(ctx): State<Arc<AppContext>>,
    Query(params): Query<MetricsQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let run_id = params.run_id.as_deref().map(parse_run_id).transpose()?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_METRIC_LIMIT)
        .clamp(1, MAX_METRIC_LIMIT);

    let metrics = ctx.persistence.query_metrics(run_id, limit).await?;

    Ok(Json(serde_json::json!({
        "count": metrics.len(),
        "metrics": metrics,
    })))
}
