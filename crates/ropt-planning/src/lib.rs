//! Zone geometry and routing-graph blocking for ROPT.
//!
//! This crate maps operator-drawn zone polygons onto the positioned nodes of
//! the fleet routing graph and turns "zone is blocked" into "these nodes and
//! edges are impassable" for the routing solver.
//!
//! # Modules
//!
//! - [`geometry`] -- Point-in-polygon containment (boundary counts as
//!   inside) and polygon validation.
//! - [`zone_graph`] -- [`ZoneGraph`], the owner of the base graph, the
//!   zone-to-node index, blocked zones and the derived blocked nodes; builds
//!   weighted graphs and dense cost matrices.
//! - [`error`] -- Error types for degenerate geometry input.
//!
//! Everything here is synchronous and pure. Callers wrap a [`ZoneGraph`] in a
//! lock and mutate it from a single writer.

pub mod error;
pub mod geometry;
pub mod zone_graph;

// Re-export primary types at crate root.
pub use error::PlanningError;
pub use zone_graph::{
    CostMatrix, RefreshReport, UNREACHABLE_COST, WeightedEdge, WeightedGraph, ZoneGraph,
};
