//! Health, live state and ingestion handlers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Liveness plus a persistence ping |
//! | `GET` | `/health/ready` | Readiness: persistence and solver reachable |
//! | `GET` | `/state` | Point-in-time snapshot |
//! | `POST` | `/events` | Enqueue one event |
//! | `GET` | `/events` | Query the event log |

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use ropt_core::AppContext;
use ropt_db::EventQuery;
use ropt_types::{EventIn, RunId};

use crate::error::ObserverError;

/// Default number of events returned by `GET /events`.
pub const DEFAULT_EVENT_LIMIT: usize = 200;

/// Upper bound for `GET /events?limit`.
pub const MAX_EVENT_LIMIT: usize = 1_000;

/// Query parameters for `GET /events`.
#[derive(Debug, serde::Deserialize)]
pub struct EventsQuery {
    /// Only events of this run (UUID).
    pub run_id: Option<String>,
    /// Only events stamped at or after this time (Unix ms).
    pub since_ms: Option<u64>,
    /// Maximum number of events (default 200, clamped to 1..=1000).
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Liveness. Always `200`; the persistence ping is reported, not enforced.
pub async fn health(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let persistence = match ctx.persistence.ping().await {
        Ok(()) => "ok".to_owned(),
        Err(e) => {
            tracing::warn!(error = %e, "Persistence ping failed");
            format!("error: {e}")
        }
    };

    Json(serde_json::json!({
        "status": "ok",
        "live_state": ctx.live.backend_name(),
        "persistence_backend": ctx.persistence.backend_name(),
        "persistence": persistence,
        "queue_depth": ctx.queue.depth(),
        "viewers": ctx.fanout.viewer_count().await,
    }))
}

/// Readiness. `503` unless both persistence and the solver answer.
pub async fn ready(
    State(ctx): State<Arc<AppContext>>,
) -> Result<impl IntoResponse, ObserverError> {
    ctx.persistence
        .ping()
        .await
        .map_err(|e| ObserverError::Unavailable(format!("persistence: {e}")))?;
    ctx.solver
        .health()
        .await
        .map_err(|e| ObserverError::Unavailable(format!("solver: {e}")))?;

    Ok(Json(serde_json::json!({ "status": "ready" })))
}

// ---------------------------------------------------------------------------
// GET /state
// ---------------------------------------------------------------------------

/// The current snapshot, same shape as a `snapshot` message's `data`.
pub async fn get_state(
    State(ctx): State<Arc<AppContext>>,
) -> Result<impl IntoResponse, ObserverError> {
    Ok(Json(ctx.snapshot().await?))
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Enqueue one event without waiting for it to be processed.
///
/// Answers `202` once queued, `400` for a malformed event and `503` with
/// `{"ok": false, "error": "event_queue_full"}` when the queue is full.
pub async fn post_event(
    State(ctx): State<Arc<AppContext>>,
    body: Result<Json<EventIn>, JsonRejection>,
) -> Result<impl IntoResponse, ObserverError> {
    let Json(event) = body?;
    let actor_id = event.actor_id.clone();

    ctx.queue.try_enqueue(event).inspect_err(|e| {
        tracing::debug!(actor_id = %actor_id, error = %e, "Event rejected at ingestion");
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "ok": true,
            "queue_depth": ctx.queue.depth(),
        })),
    ))
}

/// Query the durable event log, oldest first.
pub async fn list_events(
    State(ctx): State<Arc<AppContext>>,
    Query(params): Query<EventsQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let run_id = params.run_id.as_deref().map(parse_run_id).transpose()?;
    let filter = EventQuery {
        run_id,
        since_ms: params.since_ms,
        limit: clamp_limit(params.limit),
    };

    let events = ctx.persistence.query_events(&filter).await?;

    Ok(Json(serde_json::json!({
        "count": events.len(),
        "events": events,
    })))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn clamp_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .clamp(1, MAX_EVENT_LIMIT)
}

/// Parse a run id, returning an [`ObserverError`] on failure.
pub(crate) fn parse_run_id(s: &str) -> Result<RunId, ObserverError> {
    s.parse::<RunId>()
        .map_err(|e| ObserverError::InvalidRequest(format!("invalid run_id {s}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_limit_is_clamped() {
        assert_eq!(clamp_limit(None), 200);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(50)), 50);
        assert_eq!(clamp_limit(Some(10_000)), 1_000);
    }

    #[test]
    fn bad_run_id_is_a_bad_request() {
        assert!(matches!(
            parse_run_id("not-a-uuid"),
            Err(ObserverError::InvalidRequest(_))
        ));
    }
}
