//! Base routing graph as stored and as edited by operators.
//!
//! The graph is directed: each [`GraphEdge`] is a one-way connection from
//! `from` to `to`. Bidirectional aisles are expressed as two edges.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Default traversal cost for an edge that does not declare one.
pub const DEFAULT_EDGE_WEIGHT: f64 = 1.0;

/// A positioned node of the routing graph.
///
/// Nodes without coordinates are valid routing waypoints but never fall
/// inside a zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GraphNode {
    /// Unique node identifier.
    pub id: String,
    /// X coordinate in the map frame.
    #[serde(default)]
    pub x: Option<f64>,
    /// Y coordinate in the map frame.
    #[serde(default)]
    pub y: Option<f64>,
    /// Optional human-readable label.
    #[serde(default)]
    pub label: Option<String>,
}

impl GraphNode {
    /// Build a positioned node.
    pub fn at(id: &str, x: f64, y: f64) -> Self {
        Self {
            id: id.to_owned(),
            x: Some(x),
            y: Some(y),
            label: None,
        }
    }

    /// The node position, if both coordinates are known.
    pub const fn position(&self) -> Option<(f64, f64)> {
        match (self.x, self.y) {
            (Some(x), Some(y)) => Some((x, y)),
            _ => None,
        }
    }
}

/// A directed, weighted edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GraphEdge {
    /// Source node identifier.
    pub from: String,
    /// Destination node identifier.
    pub to: String,
    /// Traversal cost.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl GraphEdge {
    /// Build an edge with an explicit weight.
    pub fn new(from: &str, to: &str, weight: f64) -> Self {
        Self {
            from: from.to_owned(),
            to: to.to_owned(),
            weight,
        }
    }

    /// Whether this edge starts or ends at `node_id`.
    pub fn touches(&self, node_id: &str) -> bool {
        self.from == node_id || self.to == node_id
    }
}

/// The whole base graph as persisted and as accepted by `PUT /planning/graph`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct BaseGraph {
    /// All nodes.
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    /// All directed edges.
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

const fn default_weight() -> f64 {
    DEFAULT_EDGE_WEIGHT
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn edge_weight_defaults_to_one() {
        let edge: GraphEdge =
            serde_json::from_value(serde_json::json!({ "from": "a", "to": "b" })).unwrap();
        assert!((edge.weight - DEFAULT_EDGE_WEIGHT).abs() < f64::EPSILON);
        assert!(edge.touches("a"));
        assert!(edge.touches("b"));
        assert!(!edge.touches("c"));
    }

    #[test]
    fn node_without_coordinates_has_no_position() {
        let node: GraphNode = serde_json::from_value(serde_json::json!({ "id": "dock" })).unwrap();
        assert!(node.position().is_none());
        assert_eq!(GraphNode::at("n1", 5.0, 5.0).position(), Some((5.0, 5.0)));
    }
}
