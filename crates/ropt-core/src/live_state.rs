//! Live state store: actors, the recent-event ring buffer and the active run.
//!
//! [`LiveState`] is the single capability interface the pipeline and the
//! HTTP layer talk to. The backend is chosen at startup from configuration:
//!
//! - [`LiveState::Memory`] keeps everything in-process behind one lock. It is
//!   correct only when exactly one ingestion process exists; two processes
//!   with memory backends silently diverge.
//! - [`LiveState::Shared`] keeps the same data in `Dragonfly` so several
//!   ingestion processes observe one state.
//!
//! Writes happen only from the pipeline's consumer (plus the run endpoints
//! setting the active run). Each event lands as one unit and snapshots are
//! value copies.

use std::collections::{BTreeMap, VecDeque};

use ropt_db::{DragonflyPool, LiveKeys};
use ropt_types::{ActorState, EventRecord, RunId, Snapshot, now_ms};
use tokio::sync::RwLock;

use crate::error::CoreError;

/// Ring buffer and snapshot window sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveLimits {
    /// Maximum events kept in the ring buffer.
    pub max_events: usize,
    /// Events included in a snapshot (newest, oldest first).
    pub snapshot_recent: usize,
}

/// Live state backend, selected at startup.
pub enum LiveState {
    /// Single-process, in-memory.
    Memory(MemoryLiveState),
    /// `Dragonfly`-backed, shared between processes.
    Shared(SharedLiveState),
}

impl LiveState {
    /// A fresh in-memory store.
    pub fn memory(limits: LiveLimits) -> Self {
        Self::Memory(MemoryLiveState::new(limits))
    }

    /// A shared store over `pool` using keys under `prefix`.
    pub fn shared(pool: DragonflyPool, prefix: &str, limits: LiveLimits) -> Self {
        Self::Shared(SharedLiveState {
            pool,
            keys: LiveKeys::new(prefix),
            limits,
        })
    }

    /// Backend name for logs and health output.
    pub const fn backend_name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Shared(_) => "shared",
        }
    }

    /// Apply one event as a unit: create or refresh the actor with
    /// `last_seen_ms = record.ts_ms`, fold the event's transition over its
    /// flag for the event's zone (absent reads as outside) and append the
    /// event to the ring buffer, evicting the oldest beyond `max_events`.
    /// Returns the actor's resulting state.
    ///
    /// Observations still create the zone entry, so every zone an actor was
    /// seen in appears in its map. No snapshot observes the actor update
    /// without the matching event, or the reverse.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the shared backend fails.
    pub async fn apply_event(&self, record: &EventRecord) -> Result<ActorState, CoreError> {
        match self {
            Self::Memory(store) => Ok(store.apply_event(record).await),
            Self::Shared(store) => Ok(store
                .pool
                .apply_event(&store.keys, record, store.limits.max_events)
                .await?),
        }
    }

    /// A point-in-time copy of actors, the recent-event tail and the active
    /// run. Blocking fields are left empty for the caller to fill.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the shared backend fails.
    pub async fn snapshot(&self) -> Result<Snapshot, CoreError> {
        match self {
            Self::Memory(store) => Ok(store.snapshot().await),
            Self::Shared(store) => store.snapshot().await,
        }
    }

    /// The active run, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the shared backend fails.
    pub async fn active_run_id(&self) -> Result<Option<RunId>, CoreError> {
        match self {
            Self::Memory(store) => Ok(store.inner.read().await.active_run_id),
            Self::Shared(store) => Ok(store.pool.get_active_run(&store.keys).await?),
        }
    }

    /// Set or clear the active run. Past events keep their run.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the shared backend fails.
    pub async fn set_active_run_id(&self, run_id: Option<RunId>) -> Result<(), CoreError> {
        match self {
            Self::Memory(store) => {
                store.inner.write().await.active_run_id = run_id;
                Ok(())
            }
            Self::Shared(store) => Ok(store.pool.set_active_run(&store.keys, run_id).await?),
        }
    }

    /// Make `run_id` active unless a run already is, and return the run that
    /// is active afterwards. Concurrent claimants all get the same answer.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the shared backend fails.
    pub async fn claim_active_run_id(&self, run_id: RunId) -> Result<RunId, CoreError> {
        match self {
            Self::Memory(store) => {
                let mut inner = store.inner.write().await;
                Ok(*inner.active_run_id.get_or_insert(run_id))
            }
            Self::Shared(store) => Ok(store.pool.claim_active_run(&store.keys, run_id).await?),
        }
    }

    /// Clear the active run only if it is `run_id`. Returns whether it was.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the shared backend fails.
    pub async fn clear_active_run_if(&self, run_id: RunId) -> Result<bool, CoreError> {
        match self {
            Self::Memory(store) => {
                let mut inner = store.inner.write().await;
                if inner.active_run_id == Some(run_id) {
                    inner.active_run_id = None;
                    return Ok(true);
                }
                Ok(false)
            }
            Self::Shared(store) => {
                if store.pool.get_active_run(&store.keys).await? == Some(run_id) {
                    store.pool.set_active_run(&store.keys, None).await?;
                    return Ok(true);
                }
                Ok(false)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    actors: BTreeMap<String, ActorState>,
    events: VecDeque<EventRecord>,
    active_run_id: Option<RunId>,
}

/// Process-local live state behind a single [`RwLock`].
///
/// Snapshots take the read lock once, so they never observe a half-applied
/// event.
pub struct MemoryLiveState {
    inner: RwLock<MemoryInner>,
    limits: LiveLimits,
}

impl MemoryLiveState {
    /// An empty store.
    pub fn new(limits: LiveLimits) -> Self {
        Self {
            inner: RwLock::new(MemoryInner::default()),
            limits,
        }
    }

    async fn apply_event(&self, record: &EventRecord) -> ActorState {
        let mut inner = self.inner.write().await;
        let actor = inner
            .actors
            .entry(record.actor_id.clone())
            .or_insert_with(|| ActorState::first_seen(record.ts_ms));
        actor.last_seen_ms = record.ts_ms;
        if let Some(zone_id) = &record.zone_id {
            let flag = actor.zones.entry(zone_id.clone()).or_insert(false);
            *flag = record.transition().apply(*flag);
        }
        let updated = actor.clone();

        inner.events.push_back(record.clone());
        while inner.events.len() > self.limits.max_events {
            inner.events.pop_front();
        }
        updated
    }

    async fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read().await;
        let skip = inner.events.len().saturating_sub(self.limits.snapshot_recent);
        Snapshot {
            ts_ms: now_ms(),
            active_run_id: inner.active_run_id,
            actors: inner.actors.clone(),
            recent_events: inner.events.iter().skip(skip).cloned().collect(),
            blocked_zones: Vec::new(),
            blocked_nodes: Vec::new(),
        }
    }

    /// Number of events currently held in the ring buffer.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.events.len()
    }
}

// ---------------------------------------------------------------------------
// Shared backend
// ---------------------------------------------------------------------------

/// `Dragonfly`-backed live state.
///
/// Each event is applied in one `MULTI` transaction and a snapshot reads
/// actors, events and the active run in another, so snapshots never see an
/// event half-applied.
pub struct SharedLiveState {
    pool: DragonflyPool,
    keys: LiveKeys,
    limits: LiveLimits,
}

impl SharedLiveState {
    async fn snapshot(&self) -> Result<Snapshot, CoreError> {
        let view = self.pool.snapshot(&self.keys, self.limits.snapshot_recent).await?;
        Ok(Snapshot {
            ts_ms: now_ms(),
            active_run_id: view.active_run_id,
            actors: view.actors,
            recent_events: view.recent_events,
            blocked_zones: Vec::new(),
            blocked_nodes: Vec::new(),
        })
    }
}
