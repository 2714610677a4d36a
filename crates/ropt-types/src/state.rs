//! Live actor state, runs and point-in-time snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::event::EventRecord;
use crate::ids::RunId;

/// Last known state of one tracked actor.
///
/// A zone entry is created lazily the first time an event names that zone
/// and reads as `false` (outside) until an enter or exit is observed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ActorState {
    /// Edge timestamp of the most recent event for this actor.
    pub last_seen_ms: u64,
    /// Inside (`true`) / outside (`false`) flag per zone.
    pub zones: BTreeMap<String, bool>,
}

impl ActorState {
    /// A fresh actor first seen at `ts_ms`, outside every zone.
    pub const fn first_seen(ts_ms: u64) -> Self {
        Self {
            last_seen_ms: ts_ms,
            zones: BTreeMap::new(),
        }
    }

    /// Whether the actor is currently inside `zone_id`.
    pub fn is_inside(&self, zone_id: &str) -> bool {
        self.zones.get(zone_id).copied().unwrap_or(false)
    }
}

/// A labeled time window grouping events for replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Run {
    /// Run identifier.
    pub id: RunId,
    /// Start time in Unix milliseconds.
    pub started_at_ms: u64,
    /// Stop time in Unix milliseconds, absent while the run is open.
    pub ended_at_ms: Option<u64>,
    /// Operator notes.
    pub notes: Option<String>,
}

/// Read-only, point-in-time copy of the live state.
///
/// This is the `data` of every `snapshot` message and the body of
/// `GET /state`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Snapshot {
    /// Time the snapshot was assembled in Unix milliseconds.
    pub ts_ms: u64,
    /// Run new events are filed under, if any.
    pub active_run_id: Option<RunId>,
    /// Every actor ever seen, keyed by actor id.
    pub actors: BTreeMap<String, ActorState>,
    /// Bounded tail of the event ring buffer, oldest first.
    pub recent_events: Vec<EventRecord>,
    /// Zones currently blocked, sorted.
    pub blocked_zones: Vec<String>,
    /// Graph nodes inside blocked zones, sorted.
    pub blocked_nodes: Vec<String>,
}
