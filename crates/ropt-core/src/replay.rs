//! Run replay for a single viewer.
//!
//! Logged events of one run are re-emitted as `replay_event` notifications
//! with their original relative spacing divided by a speed factor. A single
//! gap never waits longer than the configured cap, so a quiet stretch in the
//! recording does not stall the replay. A `replay_done` notification always
//! ends the stream, including when the run has no events.

use std::time::Duration;

use ropt_db::EventQuery;
use ropt_types::{EventRecord, Notification, ReplayDone, RunId};
use tokio::sync::mpsc;

use crate::config::ReplayConfig;
use crate::error::CoreError;
use crate::persistence::Persistence;

/// A replay request with speed and size already clamped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayRequest {
    /// Run to replay.
    pub run_id: RunId,
    /// Playback speed multiplier (2.0 plays twice as fast).
    pub speed: f64,
    /// Maximum number of events replayed.
    pub limit: usize,
}

impl ReplayRequest {
    /// Clamp caller-supplied values against `config`. Missing or
    /// non-finite speeds use the default.
    pub fn clamped(
        run_id: RunId,
        speed: Option<f64>,
        limit: Option<usize>,
        config: &ReplayConfig,
    ) -> Self {
        let speed = speed
            .filter(|s| s.is_finite())
            .unwrap_or(config.default_speed)
            .clamp(config.min_speed, config.max_speed);
        let limit = limit
            .unwrap_or(config.default_limit)
            .clamp(1, config.max_limit.max(1));
        Self {
            run_id,
            speed,
            limit,
        }
    }
}

/// Pause before emitting an event stamped `ts_ms` after one stamped
/// `prev_ms`. Out-of-order timestamps produce no pause.
pub fn step_delay(prev_ms: u64, ts_ms: u64, speed: f64, cap: Duration) -> Duration {
    let gap = Duration::from_millis(ts_ms.saturating_sub(prev_ms));
    if gap.is_zero() {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(gap.as_secs_f64() / speed)
        .unwrap_or(cap)
        .min(cap)
}

/// Stream the run's events into `tx`, then `replay_done`.
///
/// Stops early, without error, when the receiver goes away. Returns the
/// number of `replay_event` notifications delivered.
///
/// # Errors
///
/// Returns [`CoreError`] if the event log cannot be read.
pub async fn run_replay(
    persistence: &Persistence,
    request: ReplayRequest,
    cap: Duration,
    tx: mpsc::Sender<Notification>,
) -> Result<u64, CoreError> {
    let events = persistence
        .query_events(&EventQuery::for_run(request.run_id, request.limit))
        .await?;

    tracing::info!(
        run_id = %request.run_id,
        events = events.len(),
        speed = request.speed,
        "Replay starting"
    );

    let sent = emit(events, request.speed, cap, &tx).await;
    if let Some(count) = sent {
        let done = Notification::ReplayDone(ReplayDone {
            run_id: request.run_id,
            count,
        });
        if tx.send(done).await.is_err() {
            tracing::debug!(run_id = %request.run_id, "Replay viewer left before completion");
        }
        return Ok(count);
    }

    tracing::debug!(run_id = %request.run_id, "Replay viewer left mid-stream");
    Ok(0)
}

/// Returns `None` if the receiver was dropped.
async fn emit(
    events: Vec<EventRecord>,
    speed: f64,
    cap: Duration,
    tx: &mpsc::Sender<Notification>,
) -> Option<u64> {
    let mut prev_ms: Option<u64> = None;
    let mut count: u64 = 0;

    for event in events {
        if let Some(prev) = prev_ms {
            let delay = step_delay(prev, event.ts_ms, speed, cap);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        prev_ms = Some(event.ts_ms);
        tx.send(Notification::ReplayEvent(event)).await.ok()?;
        count = count.saturating_add(1);
    }
    Some(count)
}
