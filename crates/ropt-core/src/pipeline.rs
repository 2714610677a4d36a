//! Event ingestion pipeline.
//!
//! Producers hand validated events to an [`EventQueue`]; exactly one consumer
//! task (see [`spawn_consumer`]) takes them off in arrival order and runs
//! each one to completion before looking at the next:
//!
//! 1. Resolve the run: the event's own, else the active run, else a new run
//!    claimed as active. If another process claimed one first, that run is
//!    adopted and ours is closed.
//! 2. Stamp `received_ms` and append to the durable log. A failed write is
//!    logged and the event carries on.
//! 3. Under the context's apply guard: update the actor and zone flag, push
//!    into the live ring buffer and, for an enter/exit with a zone, block or
//!    unblock the zone.
//! 4. If blocking changed, re-solve and broadcast a `route_update`.
//! 5. Broadcast a `snapshot`.
//!
//! Nothing inside the consumer returns an error to anyone. Failures are
//! logged and surface only through what the next broadcast carries.

use std::sync::Arc;

use ropt_types::{EventIn, EventRecord, Notification, RunId, now_ms};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::ShutdownPolicy;
use crate::context::AppContext;
use crate::error::IngestError;

/// Producer handle of the bounded ingestion queue.
#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<EventIn>,
}

impl EventQueue {
    /// Validate and enqueue without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Malformed`] for an invalid event,
    /// [`IngestError::Overflow`] when the queue is full and
    /// [`IngestError::Closed`] when the consumer is gone.
    pub fn try_enqueue(&self, event: EventIn) -> Result<(), IngestError> {
        event.validate()?;
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => IngestError::Overflow,
            mpsc::error::TrySendError::Closed(_) => IngestError::Closed,
        })
    }

    /// Number of events waiting for the consumer.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity().saturating_sub(self.tx.capacity())
    }

    /// Fixed queue capacity.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Consumer half of the ingestion queue.
pub struct EventReceiver {
    rx: mpsc::Receiver<EventIn>,
}

/// Create a queue holding at most `capacity` events.
pub fn channel(capacity: usize) -> (EventQueue, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventQueue { tx }, EventReceiver { rx })
}

/// Spawn the single consumer.
///
/// The task runs until `shutdown` flips to `true` (or its sender is
/// dropped), then applies the configured [`ShutdownPolicy`] to whatever is
/// still queued.
pub fn spawn_consumer(
    ctx: Arc<AppContext>,
    mut events: EventReceiver,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            capacity = ctx.queue.capacity(),
            live_state = ctx.live.backend_name(),
            persistence = ctx.persistence.backend_name(),
            "Event consumer started"
        );

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                next = events.rx.recv() => {
                    let Some(event) = next else {
                        tracing::info!("Event queue closed");
                        return;
                    };
                    process_event(&ctx, event).await;
                }
            }
        }

        events.rx.close();
        let mut remaining: u64 = 0;
        match ctx.config.ingest.shutdown_policy {
            ShutdownPolicy::Drain => {
                while let Ok(event) = events.rx.try_recv() {
                    process_event(&ctx, event).await;
                    remaining = remaining.saturating_add(1);
                }
                tracing::info!(drained = remaining, "Event consumer drained queue and stopped");
            }
            ShutdownPolicy::Discard => {
                while events.rx.try_recv().is_ok() {
                    remaining = remaining.saturating_add(1);
                }
                if remaining > 0 {
                    tracing::warn!(discarded = remaining, "Queued events discarded at shutdown");
                }
                tracing::info!("Event consumer stopped");
            }
        }
    })
}

/// Apply one event to every component and broadcast the result.
///
/// Returns the record as logged.
pub async fn process_event(ctx: &AppContext, event: EventIn) -> EventRecord {
    let run_id = resolve_run(ctx, event.run_id).await;
    let record = EventRecord::from_ingested(event, run_id, now_ms());

    if let Err(e) = ctx.persistence.insert_event(&record).await {
        tracing::warn!(
            event_id = %record.id,
            run_id = %record.run_id,
            error = %e,
            "Failed to persist event, continuing"
        );
    }

    if let Some(pending) = ctx.apply_event(&record).await {
        let update = ctx.reroute(&record, pending).await;
        ctx.fanout.broadcast(&Notification::RouteUpdate(update)).await;
    }

    match ctx.snapshot().await {
        Ok(snapshot) => ctx.fanout.broadcast(&Notification::Snapshot(snapshot)).await,
        Err(e) => tracing::warn!(error = %e, "Failed to build snapshot for broadcast"),
    }

    record
}

async fn resolve_run(ctx: &AppContext, explicit: Option<RunId>) -> RunId {
    if let Some(run_id) = explicit {
        return run_id;
    }

    match ctx.live.active_run_id().await {
        Ok(Some(run_id)) => return run_id,
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to read active run"),
    }

    let run_id = match ctx.persistence.start_run(None).await {
        Ok(run) => run.id,
        Err(e) => {
            let run_id = RunId::new();
            tracing::warn!(%run_id, error = %e, "Failed to register run, using unregistered id");
            run_id
        }
    };
    let active = match ctx.live.claim_active_run_id(run_id).await {
        Ok(active) => active,
        Err(e) => {
            tracing::warn!(%run_id, error = %e, "Failed to mark run active");
            return run_id;
        }
    };

    if active == run_id {
        tracing::info!(%run_id, "Started run for unlabeled events");
    } else {
        tracing::info!(%run_id, %active, "Another process started a run first, adopting it");
        if let Err(e) = ctx.persistence.stop_run(run_id, Some("superseded")).await {
            tracing::warn!(%run_id, error = %e, "Failed to close superseded run");
        }
    }
    active
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_rejects_without_blocking() {
        let (queue, _rx) = channel(2);
        for ts in 0..2 {
            queue
                .try_enqueue(EventIn::new("ZONE_OBSERVATION", "p1", None, ts))
                .unwrap();
        }
        assert_eq!(queue.depth(), 2);

        let err = queue
            .try_enqueue(EventIn::new("ZONE_OBSERVATION", "p1", None, 3))
            .unwrap_err();
        assert!(matches!(err, IngestError::Overflow));
        assert_eq!(queue.depth(), 2);
    }

    #[test]
    fn malformed_events_never_reach_the_queue() {
        let (queue, _rx) = channel(4);
        let err = queue
            .try_enqueue(EventIn::new("ZONE_ENTER", "  ", Some("zone_A"), 1))
            .unwrap_err();
        assert!(matches!(err, IngestError::Malformed(_)));
        assert_eq!(queue.depth(), 0);
    }

    #[test]
    fn closed_queue_reports_closed() {
        let (queue, rx) = channel(4);
        drop(rx);
        let err = queue
            .try_enqueue(EventIn::new("ZONE_ENTER", "p1", Some("zone_A"), 1))
            .unwrap_err();
        assert!(matches!(err, IngestError::Closed));
    }
}
