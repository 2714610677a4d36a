//! Operator handlers: zones, runs and the routing graph.
//!
//! These endpoints change configuration-like state (zone polygons, the base
//! graph, the active run). Live actor state is never written here.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/zones` | All stored zones |
//! | `PUT` | `/zones` | Upsert zones and rebuild the zone index |
//! | `POST` | `/runs/start` | Register a run and make it active |
//! | `POST` | `/runs/stop` | Close a run |
//! | `GET` | `/runs` | Most recent runs |
//! | `GET` | `/planning/graph` | Base graph with blocking applied |
//! | `PUT` | `/planning/graph` | Replace the base graph |
//! | `POST` | `/planning/route` | Solve now with caller constraints |

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use ropt_core::AppContext;
use ropt_planning::RefreshReport;
use ropt_types::{BaseGraph, Zone};

use crate::error::ObserverError;
use crate::handlers::parse_run_id;

/// Default number of runs returned by `GET /runs`.
pub const DEFAULT_RUN_LIMIT: usize = 50;

/// Upper bound for `GET /runs?limit`.
pub const MAX_RUN_LIMIT: usize = 500;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Request body for `POST /runs/start`.
#[derive(Debug, Default, serde::Deserialize)]
pub struct StartRunRequest {
    /// Operator notes for the run.
    #[serde(default)]
    pub notes: Option<String>,
}

/// Request body for `POST /runs/stop`.
#[derive(Debug, serde::Deserialize)]
pub struct StopRunRequest {
    /// Run to close (UUID).
    pub run_id: String,
    /// Notes replacing the run's notes, if given.
    #[serde(default)]
    pub notes: Option<String>,
}

/// Query parameters for `GET /runs`.
#[derive(Debug, serde::Deserialize)]
pub struct RunsQuery {
    /// Maximum number of runs (default 50, clamped to 1..=500).
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Zones
// ---------------------------------------------------------------------------

/// List every stored zone.
pub async fn list_zones(
    State(ctx): State<Arc<AppContext>>,
) -> Result<impl IntoResponse, ObserverError> {
    let zones = ctx.persistence.get_zones().await?;
    Ok(Json(serde_json::json!({
        "count": zones.len(),
        "zones": zones,
    })))
}

/// Upsert zones, then rebuild the zone index from the full stored set.
///
/// Zones with unusable polygons are stored but skipped by the index; they
/// are listed under `skipped`.
pub async fn put_zones(
    State(ctx): State<Arc<AppContext>>,
    body: Result<Json<Vec<Zone>>, JsonRejection>,
) -> Result<impl IntoResponse, ObserverError> {
    let Json(zones) = body?;
    let report = ctx.replace_zones(&zones).await?;
    Ok(Json(report_json(&report)))
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// Register a run and make it the active run.
pub async fn start_run(
    State(ctx): State<Arc<AppContext>>,
    body: Result<Json<StartRunRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ObserverError> {
    let Json(request) = body?;
    let run = ctx.start_run(request.notes.as_deref()).await?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "run": run,
    })))
}

/// Close a run; the active run is cleared only if it is this one.
pub async fn stop_run(
    State(ctx): State<Arc<AppContext>>,
    body: Result<Json<StopRunRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ObserverError> {
    let Json(request) = body?;
    let run_id = parse_run_id(&request.run_id)?;
    let outcome = ctx.stop_run(run_id, request.notes.as_deref()).await?;
    Ok(Json(serde_json::json!({
        "ok": outcome.stopped,
        "run_id": run_id,
        "stopped": outcome.stopped,
        "was_active": outcome.was_active,
    })))
}

/// Most recent runs first.
pub async fn list_runs(
    State(ctx): State<Arc<AppContext>>,
    Query(params): Query<RunsQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let limit = params.limit.unwrap_or(DEFAULT_RUN_LIMIT).clamp(1, MAX_RUN_LIMIT);
    let runs = ctx.persistence.list_runs(limit).await?;
    let active_run_id = ctx.live.active_run_id().await?;
    Ok(Json(serde_json::json!({
        "count": runs.len(),
        "active_run_id": active_run_id,
        "runs": runs,
    })))
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// The base graph with edges through blocked nodes marked impassable.
pub async fn get_graph(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    Json(ctx.weighted_graph().await)
}

/// Store and swap in a new base graph. Blocked nodes are recomputed from
/// the existing zone index.
pub async fn put_graph(
    State(ctx): State<Arc<AppContext>>,
    body: Result<Json<BaseGraph>, JsonRejection>,
) -> Result<impl IntoResponse, ObserverError> {
    let Json(graph) = body?;
    let nodes = graph.nodes.len();
    let edges = graph.edges.len();
    let report = ctx.replace_base_graph(graph).await?;

    let mut body = report_json(&report);
    if let Some(map) = body.as_object_mut() {
        map.insert("nodes".to_owned(), nodes.into());
        map.insert("edges".to_owned(), edges.into());
    }
    Ok(Json(body))
}

/// Solve against the current graph. The body is passed to the solver as its
/// constraints; an empty body means no constraints.
pub async fn plan_route(
    State(ctx): State<Arc<AppContext>>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<impl IntoResponse, ObserverError> {
    let constraints = match body {
        Ok(Json(value)) => value,
        Err(JsonRejection::MissingJsonContentType(_)) => serde_json::json!({}),
        Err(rejection) => return Err(rejection.into()),
    };
    if !constraints.is_object() {
        return Err(ObserverError::InvalidRequest(
            "constraints must be a JSON object".to_owned(),
        ));
    }
    Ok(Json(ctx.plan_route(&constraints).await))
}

fn report_json(report: &RefreshReport) -> serde_json::Value {
    let skipped: Vec<String> = report.skipped.iter().map(ToString::to_string).collect();
    serde_json::json!({
        "ok": true,
        "indexed": report.indexed,
        "skipped": skipped,
    })
}
