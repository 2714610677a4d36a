//! Shared type definitions for ROPT.
//!
//! This crate is the single source of truth for the data that flows between
//! the edge event source, the ingestion pipeline, the planning layer and the
//! live dashboards. Viewer-facing types are exported to `TypeScript` via
//! `ts-rs` for the dashboard.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for runs, logged events and metrics
//! - [`event`] -- Inbound zone events, logged event records, transitions
//! - [`zone`] -- Operator-defined zone polygons
//! - [`graph`] -- Base routing graph (nodes and weighted edges)
//! - [`state`] -- Actor state, runs and point-in-time snapshots
//! - [`metric`] -- Pipeline performance samples (FPS, latency, solve time)
//! - [`message`] -- Messages pushed to live and replay viewers
//! - [`time`] -- Millisecond wall-clock helper

pub mod event;
pub mod graph;
pub mod ids;
pub mod message;
pub mod metric;
pub mod state;
pub mod time;
pub mod zone;

// Re-export all public types at crate root for convenience.
pub use event::{EventIn, EventRecord, InvalidEvent, Transition};
pub use graph::{BaseGraph, GraphEdge, GraphNode};
pub use ids::{EventId, MetricId, RunId};
pub use message::{Notification, ReplayDone, RouteUpdate};
pub use metric::{InvalidMetric, MetricIn, MetricRecord};
pub use state::{ActorState, Run, Snapshot};
pub use time::now_ms;
pub use zone::Zone;
