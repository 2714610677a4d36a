//! Durable storage seam: event log, zone store, run registry, metrics and
//! base graph.
//!
//! [`Persistence`] uses enum dispatch over its two backends. The pipeline
//! treats every failure here as non-fatal; operator endpoints surface them.

use std::collections::BTreeMap;

use ropt_db::{EventQuery, EventStore, GraphStore, MetricStore, PostgresPool, RunStore, ZoneStore};
use ropt_types::{BaseGraph, EventId, EventRecord, MetricId, MetricRecord, Run, RunId, Zone, now_ms};
use tokio::sync::Mutex;

use crate::error::CoreError;

/// Durable store backend, selected at startup.
pub enum Persistence {
    /// `PostgreSQL` tables.
    Postgres(PostgresPool),
    /// Process-local, lost on exit.
    Memory(MemoryPersistence),
}

impl Persistence {
    /// A fresh in-memory store.
    pub fn memory() -> Self {
        Self::Memory(MemoryPersistence::default())
    }

    /// Backend name for logs and health output.
    pub const fn backend_name(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::Memory(_) => "memory",
        }
    }

    /// Check the backend answers.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the backend is unreachable.
    pub async fn ping(&self) -> Result<(), CoreError> {
        match self {
            Self::Postgres(pg) => Ok(pg.ping().await?),
            Self::Memory(_) => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Event log
    // -----------------------------------------------------------------------

    /// Append one event to the log.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the write fails.
    pub async fn insert_event(&self, record: &EventRecord) -> Result<EventId, CoreError> {
        match self {
            Self::Postgres(pg) => Ok(EventStore::new(pg.pool()).insert(record).await?),
            Self::Memory(mem) => {
                mem.inner.lock().await.events.push(record.clone());
                Ok(record.id)
            }
        }
    }

    /// Events matching `filter`, ordered by `ts_ms` ascending.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the read fails.
    pub async fn query_events(&self, filter: &EventQuery) -> Result<Vec<EventRecord>, CoreError> {
        match self {
            Self::Postgres(pg) => {
                let rows = EventStore::new(pg.pool()).query(filter).await?;
                Ok(rows.into_iter().map(EventRecord::from).collect())
            }
            Self::Memory(mem) => {
                let inner = mem.inner.lock().await;
                let mut out: Vec<EventRecord> = inner
                    .events
                    .iter()
                    .filter(|e| filter.matches(e))
                    .cloned()
                    .collect();
                out.sort_by_key(|e| e.ts_ms);
                out.truncate(filter.limit);
                Ok(out)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Zones
    // -----------------------------------------------------------------------

    /// All zones ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the read fails.
    pub async fn get_zones(&self) -> Result<Vec<Zone>, CoreError> {
        match self {
            Self::Postgres(pg) => Ok(ZoneStore::new(pg.pool()).list().await?),
            Self::Memory(mem) => Ok(mem.inner.lock().await.zones.values().cloned().collect()),
        }
    }

    /// Insert or replace zones by id. Returns the number written.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the write fails.
    pub async fn upsert_zones(&self, zones: &[Zone]) -> Result<usize, CoreError> {
        match self {
            Self::Postgres(pg) => Ok(ZoneStore::new(pg.pool()).upsert(zones).await?),
            Self::Memory(mem) => {
                let mut inner = mem.inner.lock().await;
                for zone in zones {
                    inner.zones.insert(zone.zone_id.clone(), zone.clone());
                }
                Ok(zones.len())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Register a new run starting now.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the write fails.
    pub async fn start_run(&self, notes: Option<&str>) -> Result<Run, CoreError> {
        match self {
            Self::Postgres(pg) => Ok(RunStore::new(pg.pool()).start(notes).await?),
            Self::Memory(mem) => {
                let run = Run {
                    id: RunId::new(),
                    started_at_ms: now_ms(),
                    ended_at_ms: None,
                    notes: notes.map(str::to_owned),
                };
                mem.inner.lock().await.runs.push(run.clone());
                Ok(run)
            }
        }
    }

    /// Mark a run ended. Returns `false` if the run is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the write fails.
    pub async fn stop_run(&self, run_id: RunId, notes: Option<&str>) -> Result<bool, CoreError> {
        match self {
            Self::Postgres(pg) => Ok(RunStore::new(pg.pool()).stop(run_id, notes).await?),
            Self::Memory(mem) => {
                let mut inner = mem.inner.lock().await;
                let Some(run) = inner.runs.iter_mut().find(|r| r.id == run_id) else {
                    return Ok(false);
                };
                run.ended_at_ms = Some(now_ms());
                if let Some(n) = notes {
                    run.notes = Some(n.to_owned());
                }
                Ok(true)
            }
        }
    }

    /// Most recent runs first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the read fails.
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<Run>, CoreError> {
        match self {
            Self::Postgres(pg) => Ok(RunStore::new(pg.pool()).list(limit).await?),
            Self::Memory(mem) => {
                let inner = mem.inner.lock().await;
                let mut runs = inner.runs.clone();
                runs.sort_by(|a, b| b.started_at_ms.cmp(&a.started_at_ms).then(b.id.0.cmp(&a.id.0)));
                runs.truncate(limit);
                Ok(runs)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Metrics
    // -----------------------------------------------------------------------

    /// Store one performance sample.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the write fails.
    pub async fn insert_metric(&self, record: &MetricRecord) -> Result<MetricId, CoreError> {
        match self {
            Self::Postgres(pg) => Ok(MetricStore::new(pg.pool()).insert(record).await?),
            Self::Memory(mem) => {
                mem.inner.lock().await.metrics.push(record.clone());
                Ok(record.id)
            }
        }
    }

    /// Samples ordered by `ts_ms` ascending, optionally for one run.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the read fails or a stored row is
    /// corrupt.
    pub async fn query_metrics(
        &self,
        run_id: Option<RunId>,
        limit: usize,
    ) -> Result<Vec<MetricRecord>, CoreError> {
        match self {
            Self::Postgres(pg) => {
                let rows = MetricStore::new(pg.pool()).query(run_id, limit).await?;
                Ok(rows
                    .into_iter()
                    .map(MetricRecord::try_from)
                    .collect::<Result<_, _>>()?)
            }
            Self::Memory(mem) => {
                let inner = mem.inner.lock().await;
                let mut out: Vec<MetricRecord> = inner
                    .metrics
                    .iter()
                    .filter(|m| run_id.is_none_or(|run| m.run_id == Some(run)))
                    .cloned()
                    .collect();
                out.sort_by_key(|m| m.ts_ms);
                out.truncate(limit);
                Ok(out)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Base graph
    // -----------------------------------------------------------------------

    /// The stored base graph, if one was saved.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the read fails.
    pub async fn load_graph(&self) -> Result<Option<BaseGraph>, CoreError> {
        match self {
            Self::Postgres(pg) => Ok(GraphStore::new(pg.pool()).load().await?),
            Self::Memory(mem) => Ok(mem.inner.lock().await.graph.clone()),
        }
    }

    /// Replace the stored base graph.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the write fails.
    pub async fn save_graph(&self, graph: &BaseGraph) -> Result<(), CoreError> {
        match self {
            Self::Postgres(pg) => Ok(GraphStore::new(pg.pool()).save(graph).await?),
            Self::Memory(mem) => {
                mem.inner.lock().await.graph = Some(graph.clone());
                Ok(())
            }
        }
    }
}

#[derive(Default)]
struct MemoryStore {
    events: Vec<EventRecord>,
    zones: BTreeMap<String, Zone>,
    runs: Vec<Run>,
    metrics: Vec<MetricRecord>,
    graph: Option<BaseGraph>,
}

/// In-memory durable store for development and tests.
#[derive(Default)]
pub struct MemoryPersistence {
    inner: Mutex<MemoryStore>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use ropt_types::{EventIn, GraphNode, MetricIn};

    use super::*;

    fn record(run: RunId, ts_ms: u64) -> EventRecord {
        EventRecord::from_ingested(EventIn::new("ZONE_ENTER", "p1", Some("zone_A"), ts_ms), run, ts_ms)
    }

    #[tokio::test]
    async fn memory_event_log_sorts_and_limits() {
        let store = Persistence::memory();
        let run = RunId::new();
        for ts in [30, 10, 20] {
            store.insert_event(&record(run, ts)).await.unwrap();
        }
        store.insert_event(&record(RunId::new(), 5)).await.unwrap();

        let events = store.query_events(&EventQuery::for_run(run, 2)).await.unwrap();
        let ts: Vec<u64> = events.iter().map(|e| e.ts_ms).collect();
        assert_eq!(ts, vec![10, 20]);
    }

    #[tokio::test]
    async fn memory_zones_upsert_by_id() {
        let store = Persistence::memory();
        let square = vec![[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0]];
        store
            .upsert_zones(&[Zone::new("zone_B", square.clone()), Zone::new("zone_A", square.clone())])
            .await
            .unwrap();
        let mut again = Zone::new("zone_A", square);
        again.severity = Some("high".to_owned());
        store.upsert_zones(&[again]).await.unwrap();

        let zones = store.get_zones().await.unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].zone_id, "zone_A");
        assert_eq!(zones[0].severity.as_deref(), Some("high"));
    }

    #[tokio::test]
    async fn memory_run_lifecycle() {
        let store = Persistence::memory();
        let run = store.start_run(Some("shift A")).await.unwrap();
        assert!(store.stop_run(run.id, Some("done")).await.unwrap());
        assert!(!store.stop_run(RunId::new(), None).await.unwrap());

        let runs = store.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].ended_at_ms.is_some());
        assert_eq!(runs[0].notes.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn memory_metrics_filter_by_run() {
        let store = Persistence::memory();
        let run = RunId::new();
        for (ts, run_id) in [(30, Some(run)), (10, Some(run)), (20, None)] {
            let mut metric = MetricIn::new("edge_cam_2", ts).with_value("fps", 30.0);
            metric.run_id = run_id;
            store
                .insert_metric(&MetricRecord::from_submitted(metric, ts))
                .await
                .unwrap();
        }

        let ts: Vec<u64> = store
            .query_metrics(Some(run), 10)
            .await
            .unwrap()
            .iter()
            .map(|m| m.ts_ms)
            .collect();
        assert_eq!(ts, vec![10, 30]);
        assert_eq!(store.query_metrics(None, 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn memory_graph_roundtrip() {
        let store = Persistence::memory();
        assert!(store.load_graph().await.unwrap().is_none());

        let graph = BaseGraph {
            nodes: vec![GraphNode::at("n1", 1.0, 2.0)],
            edges: Vec::new(),
        };
        store.save_graph(&graph).await.unwrap();
        assert_eq!(store.load_graph().await.unwrap(), Some(graph));
    }
}
