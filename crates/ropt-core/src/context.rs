//! The application context shared by the consumer and every handler.
//!
//! [`AppContext`] is built once at startup and handed out as an
//! `Arc<AppContext>`. It owns the live state, the zone graph, the
//! persistence backend, the solver client, the fanout registry and the
//! producer side of the ingestion queue.
//!
//! An event's live-state update and its zone blocking change are made under
//! one write guard, and [`AppContext::snapshot`] holds the read side, so a
//! snapshot sees either all of an event or none of it.

use std::sync::Arc;

use ropt_planning::{CostMatrix, RefreshReport, WeightedGraph, ZoneGraph};
use ropt_types::{BaseGraph, EventRecord, Run, RunId, RouteUpdate, Snapshot, Transition, Zone};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::RoptConfig;
use crate::error::CoreError;
use crate::fanout::Fanout;
use crate::live_state::LiveState;
use crate::persistence::Persistence;
use crate::pipeline::{self, EventQueue, EventReceiver};
use crate::solver::{SolveResult, Solver, select_route};

/// Event type reported on route updates requested by an operator rather
/// than triggered by a zone event.
pub const PLAN_REQUEST_EVENT: &str = "PLAN_REQUEST";

/// Result of stopping a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunStopped {
    /// Whether the run was found in the registry.
    pub stopped: bool,
    /// Whether it was the active run (and is no longer).
    pub was_active: bool,
}

/// Graph state captured when an event flipped a zone's blocking, solved
/// after the apply guard is released.
#[derive(Debug, Clone)]
pub struct PendingReroute {
    /// Zone whose blocking changed.
    pub zone_id: String,
    /// Whether the zone is now blocked.
    pub blocked: bool,
    matrix: CostMatrix,
    blocked_nodes: Vec<String>,
    blocked_zones: Vec<String>,
}

/// Everything a handler or the consumer needs, constructed once.
pub struct AppContext {
    /// Loaded configuration.
    pub config: RoptConfig,
    /// Live actors, ring buffer and active run.
    pub live: LiveState,
    /// Base graph, zone index and blocking. Written only by the consumer
    /// and the operator endpoints.
    pub graph: RwLock<ZoneGraph>,
    /// Durable event log, zone store, run registry and graph storage.
    pub persistence: Persistence,
    /// Routing solver client.
    pub solver: Solver,
    /// Viewer registry.
    pub fanout: Arc<Fanout>,
    /// Producer side of the ingestion queue.
    pub queue: EventQueue,
    apply_guard: RwLock<()>,
}

impl AppContext {
    /// Assemble the context. The returned receiver goes to
    /// [`pipeline::spawn_consumer`].
    pub fn new(
        config: RoptConfig,
        live: LiveState,
        persistence: Persistence,
        fanout: Arc<Fanout>,
    ) -> (Arc<Self>, EventReceiver) {
        let (queue, events) = pipeline::channel(config.ingest.queue_capacity);
        let solver = Solver::new(&config.solver);
        let ctx = Self {
            config,
            live,
            graph: RwLock::new(ZoneGraph::new()),
            persistence,
            solver,
            fanout,
            queue,
            apply_guard: RwLock::new(()),
        };
        (Arc::new(ctx), events)
    }

    /// A context with in-memory live state and persistence and local fanout.
    pub fn in_memory(config: RoptConfig) -> (Arc<Self>, EventReceiver) {
        let live = LiveState::memory(config.ingest.live_limits());
        let fanout = Arc::new(Fanout::local(config.fanout.viewer_buffer));
        Self::new(config, live, Persistence::memory(), fanout)
    }

    /// Live state plus the current blocking, as one snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] if the live state backend fails.
    pub async fn snapshot(&self) -> Result<Snapshot, CoreError> {
        let _applied = self.apply_guard.read().await;
        let mut snapshot = self.live.snapshot().await?;
        let graph = self.graph.read().await;
        snapshot.blocked_zones = graph.blocked_zones();
        snapshot.blocked_nodes = graph.blocked_nodes();
        Ok(snapshot)
    }

    /// Load the stored base graph and zones into the zone graph.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] if either cannot be read.
    pub async fn load_planning_state(&self) -> Result<RefreshReport, CoreError> {
        let base = self.persistence.load_graph().await?;
        let zones = self.persistence.get_zones().await?;

        let mut graph = self.graph.write().await;
        if let Some(base) = base {
            graph.set_base_graph(base);
        }
        let report = graph.refresh_zone_index(zones);
        tracing::info!(
            nodes = graph.node_count(),
            zones = report.indexed,
            skipped = report.skipped.len(),
            "Planning state loaded"
        );
        Ok(report)
    }

    /// Store `zones`, then rebuild the zone index from the full stored set.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] if the zone store fails.
    pub async fn replace_zones(&self, zones: &[Zone]) -> Result<RefreshReport, CoreError> {
        let written = self.persistence.upsert_zones(zones).await?;
        let all = self.persistence.get_zones().await?;
        let report = self.graph.write().await.refresh_zone_index(all);
        tracing::info!(
            written,
            indexed = report.indexed,
            skipped = report.skipped.len(),
            "Zones updated"
        );
        Ok(report)
    }

    /// Store `base`, then swap it into the zone graph.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] if the graph cannot be saved; the in-memory
    /// graph is left unchanged in that case.
    pub async fn replace_base_graph(&self, base: BaseGraph) -> Result<RefreshReport, CoreError> {
        self.persistence.save_graph(&base).await?;
        let mut graph = self.graph.write().await;
        let report = graph.set_base_graph(base);
        tracing::info!(nodes = graph.node_count(), "Base graph replaced");
        Ok(report)
    }

    /// The base graph with current blocking applied.
    pub async fn weighted_graph(&self) -> WeightedGraph {
        self.graph.read().await.build_weighted_graph()
    }

    /// Register a run and make it active.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] if the run registry or live state fails.
    pub async fn start_run(&self, notes: Option<&str>) -> Result<Run, CoreError> {
        let run = self.persistence.start_run(notes).await?;
        self.live.set_active_run_id(Some(run.id)).await?;
        tracing::info!(run_id = %run.id, "Run started");
        Ok(run)
    }

    /// Close a run. The active run is cleared only if it is this one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] if the run registry or live state fails.
    pub async fn stop_run(&self, run_id: RunId, notes: Option<&str>) -> Result<RunStopped, CoreError> {
        let stopped = self.persistence.stop_run(run_id, notes).await?;
        let was_active = self.live.clear_active_run_if(run_id).await?;
        tracing::info!(%run_id, stopped, was_active, "Run stopped");
        Ok(RunStopped {
            stopped,
            was_active,
        })
    }

    /// Apply a logged event to live state and, for an enter or exit with a
    /// zone, block or unblock that zone. Both happen under the apply guard.
    ///
    /// Returns the graph state to re-solve when blocking was touched. A live
    /// state failure is logged and the blocking change still happens.
    pub async fn apply_event(&self, record: &EventRecord) -> Option<PendingReroute> {
        let _applying = self.apply_guard.write().await;

        if let Err(e) = self.live.apply_event(record).await {
            tracing::warn!(
                event_id = %record.id,
                actor_id = %record.actor_id,
                error = %e,
                "Failed to apply event to live state"
            );
        }

        if !record.transition().changes_membership() {
            return None;
        }
        let zone_id = record.zone_id.clone()?;
        let blocked = record.transition() == Transition::Enter;

        let mut graph = self.graph.write().await;
        graph.update_zone_block(&zone_id, blocked);
        Some(PendingReroute {
            zone_id,
            blocked,
            matrix: graph.cost_matrix(),
            blocked_nodes: graph.blocked_nodes(),
            blocked_zones: graph.blocked_zones(),
        })
    }

    /// Re-solve after `record` changed blocking.
    ///
    /// An enter is reported as a reroute; an exit is not.
    pub async fn reroute(&self, record: &EventRecord, pending: PendingReroute) -> RouteUpdate {
        let PendingReroute {
            zone_id,
            blocked,
            matrix,
            blocked_nodes,
            blocked_zones,
        } = pending;

        let constraints = serde_json::json!({
            "trigger": {
                "event_type": record.event_type,
                "actor_id": record.actor_id,
                "zone_id": zone_id,
                "ts_ms": record.ts_ms,
            },
            "blocked_nodes": blocked_nodes,
            "blocked_zones": blocked_zones,
        });

        let result = self.solver.solve(&matrix, &constraints).await;
        tracing::debug!(
            %zone_id,
            blocked,
            ok = result.ok,
            nodes = matrix.len(),
            "Reroute solved"
        );

        let mut update = self.route_update(&result, blocked_nodes);
        update.is_reroute = blocked;
        update.zone_id = Some(zone_id);
        update.event_type.clone_from(&record.event_type);
        update
    }

    /// Solve the current graph with caller-supplied constraints.
    pub async fn plan_route(&self, constraints: &serde_json::Value) -> RouteUpdate {
        let (matrix, blocked_nodes) = {
            let graph = self.graph.read().await;
            (graph.cost_matrix(), graph.blocked_nodes())
        };
        let result = self.solver.solve(&matrix, constraints).await;
        let mut update = self.route_update(&result, blocked_nodes);
        PLAN_REQUEST_EVENT.clone_into(&mut update.event_type);
        update
    }

    fn route_update(&self, result: &SolveResult, blocked_nodes: Vec<String>) -> RouteUpdate {
        let pick = select_route(result, self.solver.selection());
        RouteUpdate {
            ok: result.ok,
            reason: result.reason.clone(),
            vehicle_id: pick.vehicle_id,
            optimal_path: pick.optimal_path,
            candidates: pick.candidates,
            blocked_nodes,
            ..RouteUpdate::default()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use ropt_types::{GraphEdge, GraphNode};

    use super::*;

    fn site() -> BaseGraph {
        BaseGraph {
            nodes: vec![GraphNode::at("n1", 5.0, 5.0), GraphNode::at("n2", 20.0, 5.0)],
            edges: vec![GraphEdge::new("n1", "n2", 3.0)],
        }
    }

    fn zone_a() -> Zone {
        Zone::new("zone_A", vec![[0.0, 0.0], [0.0, 10.0], [10.0, 10.0], [10.0, 0.0]])
    }

    #[tokio::test]
    async fn zones_and_graph_survive_reload() {
        let (ctx, _rx) = AppContext::in_memory(RoptConfig::default());
        ctx.replace_base_graph(site()).await.unwrap();
        ctx.replace_zones(&[zone_a()]).await.unwrap();

        ctx.graph.write().await.update_zone_block("zone_A", true);
        let report = ctx.load_planning_state().await.unwrap();
        assert_eq!(report.indexed, 1);

        let graph = ctx.graph.read().await;
        assert_eq!(graph.nodes_in_zone("zone_A").unwrap(), ["n1".to_owned()]);
        assert_eq!(graph.blocked_nodes(), vec!["n1".to_owned()]);
    }

    #[tokio::test]
    async fn stop_clears_only_matching_active_run() {
        let (ctx, _rx) = AppContext::in_memory(RoptConfig::default());
        let first = ctx.start_run(Some("morning shift")).await.unwrap();
        let second = ctx.start_run(None).await.unwrap();

        let outcome = ctx.stop_run(first.id, None).await.unwrap();
        assert!(outcome.stopped);
        assert!(!outcome.was_active);
        assert_eq!(ctx.live.active_run_id().await.unwrap(), Some(second.id));

        let outcome = ctx.stop_run(second.id, None).await.unwrap();
        assert!(outcome.was_active);
        assert_eq!(ctx.live.active_run_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn only_enter_and_exit_touch_blocking() {
        let (ctx, _rx) = AppContext::in_memory(RoptConfig::default());
        let event = |event_type: &str, ts_ms| {
            EventRecord::from_ingested(
                ropt_types::EventIn::new(event_type, "p1", Some("zone_A"), ts_ms),
                RunId::new(),
                ts_ms,
            )
        };

        assert!(ctx.apply_event(&event("ZONE_OBSERVATION", 1)).await.is_none());
        let entered = ctx.apply_event(&event("ZONE_ENTER", 2)).await.unwrap();
        assert!(entered.blocked);
        assert_eq!(entered.zone_id, "zone_A");
        let exited = ctx.apply_event(&event("ZONE_EXIT", 3)).await.unwrap();
        assert!(!exited.blocked);

        let snapshot = ctx.snapshot().await.unwrap();
        assert_eq!(snapshot.recent_events.len(), 3);
        assert!(snapshot.blocked_zones.is_empty());
        assert!(!snapshot.actors["p1"].is_inside("zone_A"));
    }

    #[tokio::test]
    async fn snapshot_carries_blocking() {
        let (ctx, _rx) = AppContext::in_memory(RoptConfig::default());
        ctx.replace_base_graph(site()).await.unwrap();
        ctx.replace_zones(&[zone_a()]).await.unwrap();
        ctx.graph.write().await.update_zone_block("zone_A", true);

        let snapshot = ctx.snapshot().await.unwrap();
        assert_eq!(snapshot.blocked_zones, vec!["zone_A".to_owned()]);
        assert_eq!(snapshot.blocked_nodes, vec!["n1".to_owned()]);
    }
}
