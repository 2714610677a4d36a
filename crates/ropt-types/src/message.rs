//! Messages delivered to live and replay viewers.
//!
//! Every message serializes as `{"type": ..., "data": ...}` so dashboards can
//! dispatch on `type` without knowing the payload shape up front.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::event::EventRecord;
use crate::ids::RunId;
use crate::state::Snapshot;

/// A message pushed to viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Notification {
    /// Full live state after an event was applied.
    Snapshot(Snapshot),
    /// Fleet route recomputed after a zone blocking change.
    RouteUpdate(RouteUpdate),
    /// One historical event during a replay session.
    ReplayEvent(EventRecord),
    /// End of a replay session.
    ReplayDone(ReplayDone),
}

/// Result of a reroute triggered by a zone enter/exit.
///
/// When the solver is unavailable the update is still sent with `ok: false`
/// and a `reason`, so dashboards never silently miss a reroute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RouteUpdate {
    /// Whether the solver produced a real (non-fallback) result.
    pub ok: bool,
    /// Why the result is degraded, when `ok` is false.
    pub reason: Option<String>,
    /// Whether the triggering event blocked a zone (an enter).
    pub is_reroute: bool,
    /// Zone whose blocking state changed.
    pub zone_id: Option<String>,
    /// Event type that triggered the reroute.
    pub event_type: String,
    /// Vehicle whose route is reported in `optimal_path`.
    pub vehicle_id: Option<String>,
    /// Selected vehicle route as ordered node ids.
    pub optimal_path: Vec<String>,
    /// Routes of the remaining vehicles.
    pub candidates: Vec<Vec<String>>,
    /// Nodes blocked at the time of the solve, sorted.
    pub blocked_nodes: Vec<String>,
}

/// Terminal message of a replay session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ReplayDone {
    /// Run that was replayed.
    pub run_id: RunId,
    /// Number of events emitted.
    pub count: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn notifications_are_adjacently_tagged() {
        let done = Notification::ReplayDone(ReplayDone {
            run_id: RunId::new(),
            count: 0,
        });
        let value = serde_json::to_value(&done).unwrap();
        assert_eq!(value["type"], "replay_done");
        assert_eq!(value["data"]["count"], 0);

        let snap = serde_json::to_value(Notification::Snapshot(Snapshot::default())).unwrap();
        assert_eq!(snap["type"], "snapshot");
        assert!(snap["data"]["actors"].is_object());
    }

    #[test]
    fn route_update_tag() {
        let update = Notification::RouteUpdate(RouteUpdate {
            ok: false,
            reason: Some("solver_timeout".to_owned()),
            is_reroute: true,
            ..RouteUpdate::default()
        });
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["type"], "route_update");
        assert_eq!(value["data"]["ok"], false);
        assert_eq!(value["data"]["is_reroute"], true);
    }
}
