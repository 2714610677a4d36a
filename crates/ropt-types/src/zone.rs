//! Operator-defined zone polygons.
//!
//! The zone store owns the source of truth; the planning layer derives a
//! zone-to-node index from these polygons whenever zones or the base graph
//! change.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A named polygon region on the site map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Zone {
    /// Unique zone identifier, e.g. `"zone_A"`.
    pub zone_id: String,
    /// Ordered `[x, y]` vertices. At least three are needed to enclose area.
    pub polygon: Vec<[f64; 2]>,
    /// Coordinate frame the polygon is expressed in (camera or map frame).
    #[serde(default)]
    pub frame: Option<String>,
    /// Severity classification used by dashboards.
    #[serde(default)]
    pub severity: Option<String>,
    /// Free-form operator notes.
    #[serde(default)]
    pub notes: Option<String>,
}

impl Zone {
    /// Build a zone with only an identifier and polygon.
    pub fn new(zone_id: &str, polygon: Vec<[f64; 2]>) -> Self {
        Self {
            zone_id: zone_id.to_owned(),
            polygon,
            frame: None,
            severity: None,
            notes: None,
        }
    }
}
