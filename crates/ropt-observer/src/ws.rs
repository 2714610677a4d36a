//! `WebSocket` handlers for live viewers and replay.
//!
//! `GET /ws` registers the connection with the fanout, sends the current
//! snapshot, then forwards every broadcast frame. The registration is
//! removed as soon as the socket closes or a send fails.
//!
//! `GET /ws/replay?run_id=..&speed=..&limit=..` streams one logged run as
//! `replay_event` messages followed by `replay_done`, then closes. Replay
//! sessions are independent of the live fanout.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use ropt_core::{AppContext, ReplayRequest, run_replay};
use ropt_types::Notification;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ObserverError;
use crate::handlers::parse_run_id;

/// Replay frames buffered between the replay task and the socket.
const REPLAY_BUFFER: usize = 32;

/// Query parameters for `GET /ws/replay`.
#[derive(Debug, serde::Deserialize)]
pub struct ReplayQuery {
    /// Run to replay (UUID).
    pub run_id: String,
    /// Playback speed multiplier, clamped to the configured bounds.
    pub speed: Option<f64>,
    /// Maximum number of events, clamped to the configured bounds.
    pub limit: Option<usize>,
}

/// What the client side of a socket asked for.
enum ClientSignal {
    Continue,
    Closed,
}

// ---------------------------------------------------------------------------
// Live
// ---------------------------------------------------------------------------

/// Upgrade to a live viewer connection.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_live(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<AppContext>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_live(socket, ctx))
}

async fn handle_live(mut socket: WebSocket, ctx: Arc<AppContext>) {
    let mut viewer = ctx.fanout.connect().await;
    let viewer_id = viewer.id;
    debug!(viewer_id, "Live viewer connected");

    match ctx.snapshot().await {
        Ok(snapshot) => {
            if send_notification(&mut socket, &Notification::Snapshot(snapshot))
                .await
                .is_err()
            {
                ctx.fanout.disconnect(viewer_id).await;
                return;
            }
        }
        Err(e) => warn!(viewer_id, error = %e, "Failed to build initial snapshot"),
    }

    loop {
        tokio::select! {
            frame = viewer.rx.recv() => {
                let Some(frame) = frame else {
                    debug!(viewer_id, "Viewer dropped by fanout");
                    break;
                };
                if socket.send(Message::Text(frame.as_ref().into())).await.is_err() {
                    debug!(viewer_id, "Live viewer disconnected (send failed)");
                    break;
                }
            }
            msg = socket.recv() => {
                if matches!(handle_client(&mut socket, msg).await, ClientSignal::Closed) {
                    debug!(viewer_id, "Live viewer disconnected");
                    break;
                }
            }
        }
    }

    ctx.fanout.disconnect(viewer_id).await;
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// Upgrade to a replay session for one run.
///
/// # Route
///
/// `GET /ws/replay`
///
/// # Errors
///
/// Returns `400` before upgrading if `run_id` is not a UUID.
pub async fn ws_replay(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<AppContext>>,
    Query(params): Query<ReplayQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let run_id = parse_run_id(&params.run_id)?;
    let request = ReplayRequest::clamped(run_id, params.speed, params.limit, &ctx.config.replay);
    Ok(ws.on_upgrade(move |socket| handle_replay(socket, ctx, request)))
}

async fn handle_replay(mut socket: WebSocket, ctx: Arc<AppContext>, request: ReplayRequest) {
    let (tx, mut rx) = mpsc::channel(REPLAY_BUFFER);
    let cap = ctx.config.replay.max_step_delay();

    let replay_ctx = Arc::clone(&ctx);
    let replay = tokio::spawn(async move {
        if let Err(e) = run_replay(&replay_ctx.persistence, request, cap, tx).await {
            warn!(run_id = %request.run_id, error = %e, "Replay failed");
        }
    });

    loop {
        tokio::select! {
            next = rx.recv() => {
                let Some(notification) = next else {
                    break;
                };
                if send_notification(&mut socket, &notification).await.is_err() {
                    debug!(run_id = %request.run_id, "Replay viewer disconnected (send failed)");
                    break;
                }
            }
            msg = socket.recv() => {
                if matches!(handle_client(&mut socket, msg).await, ClientSignal::Closed) {
                    debug!(run_id = %request.run_id, "Replay viewer disconnected");
                    break;
                }
            }
        }
    }

    replay.abort();
    let _ = socket.send(Message::Close(None)).await;
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn send_notification(
    socket: &mut WebSocket,
    notification: &Notification,
) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(notification) {
        Ok(j) => j,
        Err(e) => {
            warn!("Failed to serialize notification: {e}");
            return Ok(());
        }
    };
    socket.send(Message::Text(json.into())).await
}

async fn handle_client(
    socket: &mut WebSocket,
    msg: Option<Result<Message, axum::Error>>,
) -> ClientSignal {
    match msg {
        Some(Ok(Message::Close(_))) | None => ClientSignal::Closed,
        Some(Ok(Message::Ping(data))) => {
            if socket.send(Message::Pong(data)).await.is_err() {
                return ClientSignal::Closed;
            }
            ClientSignal::Continue
        }
        Some(Err(e)) => {
            debug!("WebSocket error: {e}");
            ClientSignal::Closed
        }
        // Ignore other message types (text, binary from client).
        _ => ClientSignal::Continue,
    }
}
