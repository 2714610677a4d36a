//! The zone/graph manager.
//!
//! [`ZoneGraph`] owns four pieces of state:
//!
//! 1. the base routing graph (nodes keyed by id, directed edges),
//! 2. the zone-to-node index derived from zone polygons,
//! 3. the set of blocked zones,
//! 4. the set of blocked nodes.
//!
//! Blocked nodes are never set directly. They are always the union of
//! `zone_to_nodes[z]` over every blocked zone `z`, and every mutating method
//! recomputes them before returning, so readers can never observe a stale
//! set.
//!
//! # Stable node order
//!
//! Nodes are kept in a [`BTreeMap`], so node iteration order (and therefore
//! cost-matrix index assignment) is the lexicographic order of node ids. The
//! same graph always produces the same matrix layout.

use std::collections::{BTreeMap, BTreeSet};

use ropt_types::{BaseGraph, GraphEdge, GraphNode, Zone};
use serde::Serialize;

use crate::error::PlanningError;
use crate::geometry;

/// Cost assigned to unconnected pairs and to edges touching blocked nodes.
///
/// A large finite value rather than infinity keeps the matrix acceptable to
/// solvers that reject non-finite input.
pub const UNREACHABLE_COST: f64 = 1_000_000.0;

/// Outcome of a zone index refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Number of zones that were indexed.
    pub indexed: usize,
    /// Zones skipped because their geometry was unusable.
    pub skipped: Vec<PlanningError>,
}

/// An edge as handed to the solver, with blocking applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightedEdge {
    /// Source node identifier.
    pub from: String,
    /// Destination node identifier.
    pub to: String,
    /// Effective weight; [`f64::INFINITY`] when `impassable`.
    pub weight: f64,
    /// Whether the edge touches a blocked node.
    ///
    /// JSON has no infinity, so serialized impassable weights read as
    /// `null`; this flag carries the same fact explicitly.
    pub impassable: bool,
}

/// The base graph with blocked edges marked impassable.
///
/// Impassable edges stay in the list so node/edge topology is stable across
/// blocking changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightedGraph {
    /// All nodes in id order.
    pub nodes: Vec<GraphNode>,
    /// All edges in declaration order.
    pub edges: Vec<WeightedEdge>,
    /// Blocked node ids, sorted.
    pub blocked_nodes: Vec<String>,
}

/// Dense all-pairs cost matrix over the current graph nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostMatrix {
    /// `matrix[i][j]` is the cost of travelling from node `i` to node `j`.
    pub matrix: Vec<Vec<f64>>,
    /// Node id to matrix index.
    pub node_map: BTreeMap<String, usize>,
    /// Matrix index to node id.
    pub node_ids: Vec<String>,
}

impl CostMatrix {
    /// Number of nodes (rows) in the matrix.
    pub const fn len(&self) -> usize {
        self.node_ids.len()
    }

    /// Whether the matrix is empty. An empty matrix means no route is
    /// possible; it is not an error.
    pub const fn is_empty(&self) -> bool {
        self.node_ids.is_empty()
    }

    /// Cost between two node ids, if both are in the matrix.
    pub fn cost(&self, from: &str, to: &str) -> Option<f64> {
        let i = *self.node_map.get(from)?;
        let j = *self.node_map.get(to)?;
        self.matrix.get(i)?.get(j).copied()
    }

    /// Node id at matrix index `index`.
    pub fn node_at(&self, index: usize) -> Option<&str> {
        self.node_ids.get(index).map(String::as_str)
    }
}

/// Base graph, zone index and blocking state.
#[derive(Debug, Clone, Default)]
pub struct ZoneGraph {
    nodes: BTreeMap<String, GraphNode>,
    edges: Vec<GraphEdge>,
    zones: Vec<Zone>,
    zone_to_nodes: BTreeMap<String, Vec<String>>,
    blocked_zones: BTreeSet<String>,
    blocked_nodes: BTreeSet<String>,
}

impl ZoneGraph {
    /// An empty manager: no nodes, no zones, nothing blocked.
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Replace the base graph wholesale.
    ///
    /// Duplicate node ids keep the last declaration. If zones have already
    /// been indexed, the index is rebuilt against the new nodes and blocked
    /// nodes are recomputed.
    pub fn set_base_graph(&mut self, graph: BaseGraph) -> RefreshReport {
        self.nodes = graph
            .nodes
            .into_iter()
            .map(|node| (node.id.clone(), node))
            .collect();
        self.edges = graph.edges;

        tracing::debug!(
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            "Base graph replaced"
        );

        let zones = std::mem::take(&mut self.zones);
        self.refresh_zone_index(zones)
    }

    /// Recompute which nodes lie inside each zone polygon.
    ///
    /// The index is replaced wholesale. Zones with unusable geometry are
    /// skipped and reported; the remaining zones are unaffected. Blocked
    /// nodes are recomputed afterwards. Running this twice on identical
    /// input yields an identical index.
    pub fn refresh_zone_index(&mut self, zones: Vec<Zone>) -> RefreshReport {
        let mut report = RefreshReport::default();
        let mut zone_to_nodes = BTreeMap::new();

        for zone in &zones {
            if let Err(e) = geometry::validate_polygon(&zone.zone_id, &zone.polygon) {
                tracing::warn!(zone_id = %zone.zone_id, error = %e, "Skipping zone with unusable polygon");
                report.skipped.push(e);
                continue;
            }

            let inside: Vec<String> = self
                .nodes
                .values()
                .filter(|node| {
                    node.position()
                        .is_some_and(|(x, y)| geometry::contains(&zone.polygon, x, y))
                })
                .map(|node| node.id.clone())
                .collect();

            if zone_to_nodes.insert(zone.zone_id.clone(), inside).is_some() {
                tracing::warn!(zone_id = %zone.zone_id, "Duplicate zone id, last definition wins");
            } else {
                report.indexed = report.indexed.saturating_add(1);
            }
        }

        self.zones = zones;
        self.zone_to_nodes = zone_to_nodes;
        self.recompute_blocked_nodes();
        report
    }

    /// Mark a zone blocked or unblocked, then recompute blocked nodes.
    ///
    /// Returns `true` if the blocked-zone set changed. Blocking a zone that
    /// has no index entry is recorded; it blocks no nodes until the zone is
    /// indexed.
    pub fn update_zone_block(&mut self, zone_id: &str, blocked: bool) -> bool {
        let changed = if blocked {
            self.blocked_zones.insert(zone_id.to_owned())
        } else {
            self.blocked_zones.remove(zone_id)
        };
        self.recompute_blocked_nodes();
        changed
    }

    fn recompute_blocked_nodes(&mut self) {
        self.blocked_nodes = self.derive_blocked_nodes();
    }

    /// Union of indexed nodes over every blocked zone.
    fn derive_blocked_nodes(&self) -> BTreeSet<String> {
        self.blocked_zones
            .iter()
            .filter_map(|zone_id| self.zone_to_nodes.get(zone_id))
            .flatten()
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Solver views
    // -----------------------------------------------------------------------

    /// The graph with every edge touching a blocked node set to infinity.
    pub fn build_weighted_graph(&self) -> WeightedGraph {
        let edges = self
            .edges
            .iter()
            .map(|edge| {
                let impassable = self.edge_is_blocked(edge);
                WeightedEdge {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    weight: if impassable { f64::INFINITY } else { edge.weight },
                    impassable,
                }
            })
            .collect();

        WeightedGraph {
            nodes: self.nodes.values().cloned().collect(),
            edges,
            blocked_nodes: self.blocked_nodes(),
        }
    }

    /// Dense cost matrix over all current nodes.
    ///
    /// The diagonal is 0. Unconnected pairs cost [`UNREACHABLE_COST`].
    /// Declared edges overwrite the default, except that edges touching a
    /// blocked node, self-loops and edges with a negative or non-finite
    /// weight never lower a cell below the sentinel. Edges naming unknown
    /// nodes are ignored. With zero nodes the matrix is empty.
    pub fn cost_matrix(&self) -> CostMatrix {
        let node_ids: Vec<String> = self.nodes.keys().cloned().collect();
        let node_map: BTreeMap<String, usize> = node_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        let n = node_ids.len();

        let mut matrix = vec![vec![UNREACHABLE_COST; n]; n];
        for (i, row) in matrix.iter_mut().enumerate() {
            if let Some(cell) = row.get_mut(i) {
                *cell = 0.0;
            }
        }

        for edge in &self.edges {
            let (Some(&u), Some(&v)) = (node_map.get(&edge.from), node_map.get(&edge.to)) else {
                continue;
            };
            if u == v {
                continue;
            }
            let usable = edge.weight.is_finite() && edge.weight >= 0.0;
            let weight = if self.edge_is_blocked(edge) || !usable {
                UNREACHABLE_COST
            } else {
                edge.weight
            };
            if let Some(cell) = matrix.get_mut(u).and_then(|row| row.get_mut(v)) {
                *cell = weight;
            }
        }

        CostMatrix {
            matrix,
            node_map,
            node_ids,
        }
    }

    fn edge_is_blocked(&self, edge: &GraphEdge) -> bool {
        self.blocked_nodes.iter().any(|node| edge.touches(node))
    }

    // -----------------------------------------------------------------------
    // Read accessors
    // -----------------------------------------------------------------------

    /// The base graph as last set.
    pub fn base_graph(&self) -> BaseGraph {
        BaseGraph {
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.clone(),
        }
    }

    /// Number of nodes in the base graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes indexed inside `zone_id`, in id order.
    pub fn nodes_in_zone(&self, zone_id: &str) -> Option<&[String]> {
        self.zone_to_nodes.get(zone_id).map(Vec::as_slice)
    }

    /// The full zone-to-node index.
    pub const fn zone_to_nodes(&self) -> &BTreeMap<String, Vec<String>> {
        &self.zone_to_nodes
    }

    /// Blocked zone ids, sorted.
    pub fn blocked_zones(&self) -> Vec<String> {
        self.blocked_zones.iter().cloned().collect()
    }

    /// Blocked node ids, sorted.
    pub fn blocked_nodes(&self) -> Vec<String> {
        self.blocked_nodes.iter().cloned().collect()
    }

    /// Whether `node_id` is currently blocked.
    pub fn is_node_blocked(&self, node_id: &str) -> bool {
        self.blocked_nodes.contains(node_id)
    }

    /// Whether the blocked-node set agrees with blocked zones and the index.
    pub fn is_consistent(&self) -> bool {
        self.blocked_nodes == self.derive_blocked_nodes()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::float_cmp)]
mod tests {
    use super::*;

    fn zone_a() -> Zone {
        Zone::new(
            "zone_A",
            vec![[0.0, 0.0], [0.0, 10.0], [10.0, 10.0], [10.0, 0.0]],
        )
    }

    fn zone_b() -> Zone {
        Zone::new(
            "zone_B",
            vec![[20.0, 0.0], [20.0, 10.0], [30.0, 10.0], [30.0, 0.0]],
        )
    }

    /// n1 in zone_A, n2 in zone_B, n3 outside both; a chain n1 -> n2 -> n3.
    fn site_graph() -> BaseGraph {
        BaseGraph {
            nodes: vec![
                GraphNode::at("n1", 5.0, 5.0),
                GraphNode::at("n2", 25.0, 5.0),
                GraphNode::at("n3", 50.0, 50.0),
            ],
            edges: vec![
                GraphEdge::new("n1", "n2", 3.0),
                GraphEdge::new("n2", "n3", 4.0),
                GraphEdge::new("n3", "n1", 7.0),
            ],
        }
    }

    fn loaded() -> ZoneGraph {
        let mut graph = ZoneGraph::new();
        graph.set_base_graph(site_graph());
        graph.refresh_zone_index(vec![zone_a(), zone_b()]);
        graph
    }

    #[test]
    fn zone_a_scenario() {
        let mut graph = ZoneGraph::new();
        graph.set_base_graph(BaseGraph {
            nodes: vec![GraphNode::at("n1", 5.0, 5.0)],
            edges: vec![GraphEdge::new("n1", "n1", 2.0)],
        });
        graph.refresh_zone_index(vec![zone_a()]);
        assert_eq!(graph.nodes_in_zone("zone_A"), Some(&["n1".to_owned()][..]));

        graph.update_zone_block("zone_A", true);
        assert_eq!(graph.blocked_nodes(), vec!["n1".to_owned()]);
        let weighted = graph.build_weighted_graph();
        assert!(weighted.edges.iter().all(|e| e.impassable));
        assert!(weighted.edges.iter().all(|e| e.weight.is_infinite()));
    }

    #[test]
    fn refresh_is_idempotent() {
        let mut graph = loaded();
        graph.update_zone_block("zone_B", true);
        let first_index = graph.zone_to_nodes().clone();
        let first_blocked = graph.blocked_nodes();

        graph.refresh_zone_index(vec![zone_a(), zone_b()]);
        assert_eq!(graph.zone_to_nodes(), &first_index);
        assert_eq!(graph.blocked_nodes(), first_blocked);
    }

    #[test]
    fn blocked_nodes_track_every_mutation() {
        let mut graph = ZoneGraph::new();
        assert!(graph.is_consistent());

        graph.update_zone_block("zone_A", true);
        assert!(graph.is_consistent());
        assert!(graph.blocked_nodes().is_empty(), "zone not indexed yet");

        graph.set_base_graph(site_graph());
        assert!(graph.is_consistent());

        graph.refresh_zone_index(vec![zone_a(), zone_b()]);
        assert!(graph.is_consistent());
        assert_eq!(graph.blocked_nodes(), vec!["n1".to_owned()]);

        graph.update_zone_block("zone_B", true);
        assert!(graph.is_consistent());
        assert_eq!(graph.blocked_nodes(), vec!["n1".to_owned(), "n2".to_owned()]);

        graph.update_zone_block("zone_A", false);
        assert!(graph.is_consistent());
        assert_eq!(graph.blocked_nodes(), vec!["n2".to_owned()]);

        graph.refresh_zone_index(vec![zone_a()]);
        assert!(graph.is_consistent());
        assert!(graph.blocked_nodes().is_empty(), "zone_B no longer indexed");
    }

    #[test]
    fn update_zone_block_reports_changes() {
        let mut graph = loaded();
        assert!(graph.update_zone_block("zone_A", true));
        assert!(!graph.update_zone_block("zone_A", true), "duplicate enter is a no-op");
        assert!(graph.update_zone_block("zone_A", false));
        assert!(!graph.update_zone_block("zone_A", false));
        assert!(graph.blocked_zones().is_empty());
    }

    #[test]
    fn new_base_graph_reindexes_existing_zones() {
        let mut graph = loaded();
        graph.update_zone_block("zone_A", true);
        assert!(graph.is_node_blocked("n1"));

        graph.set_base_graph(BaseGraph {
            nodes: vec![GraphNode::at("n1", 40.0, 40.0), GraphNode::at("n9", 1.0, 1.0)],
            edges: Vec::new(),
        });
        assert!(!graph.is_node_blocked("n1"), "n1 moved out of zone_A");
        assert!(graph.is_node_blocked("n9"));
        assert!(graph.is_consistent());
    }

    #[test]
    fn degenerate_zone_is_skipped_not_fatal() {
        let mut graph = ZoneGraph::new();
        graph.set_base_graph(site_graph());
        let broken = Zone::new("zone_bad", vec![[0.0, 0.0], [1.0, 1.0]]);
        let report = graph.refresh_zone_index(vec![broken, zone_a()]);

        assert_eq!(report.indexed, 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(graph.nodes_in_zone("zone_bad").is_none());
        assert_eq!(graph.nodes_in_zone("zone_A"), Some(&["n1".to_owned()][..]));
    }

    #[test]
    fn nodes_without_position_are_never_inside() {
        let mut graph = ZoneGraph::new();
        graph.set_base_graph(BaseGraph {
            nodes: vec![GraphNode {
                id: "dock".to_owned(),
                x: None,
                y: Some(5.0),
                label: None,
            }],
            edges: Vec::new(),
        });
        graph.refresh_zone_index(vec![zone_a()]);
        assert_eq!(graph.nodes_in_zone("zone_A"), Some(&[][..]));
    }

    #[test]
    fn cost_matrix_layout_and_defaults() {
        let graph = loaded();
        let cm = graph.cost_matrix();

        assert_eq!(cm.len(), 3);
        assert_eq!(cm.node_ids, vec!["n1", "n2", "n3"]);
        assert_eq!(cm.node_map["n2"], 1);
        for i in 0..cm.len() {
            assert!(cm.matrix[i][i].abs() < f64::EPSILON, "diagonal is zero");
        }
        assert_eq!(cm.cost("n1", "n2"), Some(3.0));
        assert_eq!(cm.cost("n2", "n1"), Some(UNREACHABLE_COST), "edges are directed");
        assert_eq!(cm.cost("n1", "n3"), Some(UNREACHABLE_COST));
        assert_eq!(cm.node_at(2), Some("n3"));
    }

    #[test]
    fn blocked_edges_get_the_sentinel() {
        let mut graph = loaded();
        graph.update_zone_block("zone_B", true);
        let cm = graph.cost_matrix();

        assert_eq!(cm.cost("n1", "n2"), Some(UNREACHABLE_COST));
        assert_eq!(cm.cost("n2", "n3"), Some(UNREACHABLE_COST));
        assert_eq!(cm.cost("n3", "n1"), Some(7.0));
        assert_eq!(cm.cost("n2", "n2"), Some(0.0), "diagonal stays zero when blocked");

        graph.update_zone_block("zone_B", false);
        assert_eq!(graph.cost_matrix().cost("n1", "n2"), Some(3.0));
    }

    #[test]
    fn self_loops_and_bad_weights_do_not_break_the_matrix() {
        let mut graph = ZoneGraph::new();
        graph.set_base_graph(BaseGraph {
            nodes: vec![GraphNode::at("a", 0.0, 0.0), GraphNode::at("b", 1.0, 1.0)],
            edges: vec![
                GraphEdge::new("a", "a", 9.0),
                GraphEdge::new("a", "b", f64::NAN),
                GraphEdge::new("b", "a", -2.0),
                GraphEdge::new("a", "ghost", 1.0),
            ],
        });
        let cm = graph.cost_matrix();
        assert_eq!(cm.cost("a", "a"), Some(0.0));
        assert_eq!(cm.cost("a", "b"), Some(UNREACHABLE_COST));
        assert_eq!(cm.cost("b", "a"), Some(UNREACHABLE_COST));
    }

    #[test]
    fn empty_graph_gives_empty_matrix() {
        let graph = ZoneGraph::new();
        let cm = graph.cost_matrix();
        assert!(cm.is_empty());
        assert!(cm.matrix.is_empty());
        assert!(cm.node_map.is_empty());
    }

    #[test]
    fn weighted_graph_keeps_topology() {
        let mut graph = loaded();
        let before = graph.build_weighted_graph();
        graph.update_zone_block("zone_A", true);
        let after = graph.build_weighted_graph();

        assert_eq!(before.edges.len(), after.edges.len());
        assert_eq!(before.nodes, after.nodes);
        let blocked: Vec<_> = after.edges.iter().filter(|e| e.impassable).collect();
        assert_eq!(blocked.len(), 2, "n1->n2 and n3->n1 touch n1");
        assert_eq!(after.blocked_nodes, vec!["n1".to_owned()]);
    }
}
