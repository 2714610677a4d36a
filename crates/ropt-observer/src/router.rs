//! Axum router construction.
//!
//! Assembles all routes (REST + `WebSocket`) into a single [`Router`]
//! with CORS middleware enabled for cross-origin dashboard access.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use ropt_core::AppContext;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::metrics;
use crate::operator;
use crate::ws;

/// Build the complete Axum router.
///
/// The router includes:
/// - `GET /health`, `GET /health/ready` -- liveness and readiness
/// - `GET /state` -- point-in-time snapshot
/// - `POST /events`, `GET /events` -- ingestion and log query
/// - `POST /metrics`, `GET /metrics` -- performance samples
/// - `GET /zones`, `PUT /zones` -- zone listing and editing
/// - `POST /runs/start`, `POST /runs/stop`, `GET /runs` -- run lifecycle
/// - `GET /planning/graph`, `PUT /planning/graph` -- base routing graph
/// - `POST /planning/route` -- on-demand solve
/// - `GET /ws` -- live viewer stream
/// - `GET /ws/replay` -- replay of one run
///
/// CORS allows any origin; dashboards are served from elsewhere.
pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(handlers::health))
        .route("/health/ready", get(handlers::ready))
        // Live state and ingestion
        .route("/state", get(handlers::get_state))
        .route("/events", post(handlers::post_event).get(handlers::list_events))
        .route("/metrics", post(metrics::post_metric).get(metrics::list_metrics))
        // Operator
        .route("/zones", get(operator::list_zones).put(operator::put_zones))
        .route("/runs", get(operator::list_runs))
        .route("/runs/start", post(operator::start_run))
        .route("/runs/stop", post(operator::stop_run))
        .route(
            "/planning/graph",
            get(operator::get_graph).put(operator::put_graph),
        )
        .route("/planning/route", post(operator::plan_route))
        // WebSocket
        .route("/ws", get(ws::ws_live))
        .route("/ws/replay", get(ws::ws_replay))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
