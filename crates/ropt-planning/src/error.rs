//! Error types for the `ropt-planning` crate.
//!
//! Geometry errors are never fatal to an index refresh: the offending zone
//! is skipped and reported, the remaining zones are indexed normally.

/// Errors raised while validating zone geometry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanningError {
    /// The polygon has fewer than three vertices.
    #[error("zone {zone_id} polygon has {vertices} vertices, at least 3 are required")]
    DegeneratePolygon {
        /// The offending zone.
        zone_id: String,
        /// Number of vertices supplied.
        vertices: usize,
    },

    /// A vertex coordinate is NaN or infinite.
    #[error("zone {zone_id} polygon has a non-finite vertex")]
    NonFiniteVertex {
        /// The offending zone.
        zone_id: String,
    },

    /// All vertices are collinear, so the polygon encloses no area.
    #[error("zone {zone_id} polygon encloses no area")]
    ZeroArea {
        /// The offending zone.
        zone_id: String,
    },
}
