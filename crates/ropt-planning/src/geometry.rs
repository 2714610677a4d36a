//! Point-in-polygon containment for zone membership.
//!
//! Containment uses the even-odd (ray casting) rule with one fixed policy on
//! top: a point lying on an edge or vertex, within [`BOUNDARY_EPSILON`], is
//! **inside**. Nodes placed exactly on a zone edge therefore never flap
//! between blocked and unblocked because of rounding.
//!
//! Polygons are implicitly closed: the last vertex connects back to the
//! first. Repeating the first vertex at the end is allowed and harmless.

use crate::error::PlanningError;

/// Distance tolerance for the boundary-inclusion test.
pub const BOUNDARY_EPSILON: f64 = 1e-9;

/// Minimum number of vertices for a polygon to enclose area.
pub const MIN_POLYGON_VERTICES: usize = 3;

/// Check that a zone polygon can be used for containment tests.
///
/// # Errors
///
/// Returns [`PlanningError::DegeneratePolygon`] for fewer than three
/// vertices, [`PlanningError::NonFiniteVertex`] for NaN/infinite
/// coordinates and [`PlanningError::ZeroArea`] when all vertices are
/// collinear.
pub fn validate_polygon(zone_id: &str, polygon: &[[f64; 2]]) -> Result<(), PlanningError> {
    if polygon.len() < MIN_POLYGON_VERTICES {
        return Err(PlanningError::DegeneratePolygon {
            zone_id: zone_id.to_owned(),
            vertices: polygon.len(),
        });
    }
    if polygon
        .iter()
        .any(|[x, y]| !x.is_finite() || !y.is_finite())
    {
        return Err(PlanningError::NonFiniteVertex {
            zone_id: zone_id.to_owned(),
        });
    }
    if signed_area(polygon).abs() <= BOUNDARY_EPSILON {
        return Err(PlanningError::ZeroArea {
            zone_id: zone_id.to_owned(),
        });
    }
    Ok(())
}

/// Whether the point `(x, y)` lies inside or on the boundary of `polygon`.
///
/// Returns `false` for polygons with fewer than three vertices and for
/// non-finite points.
pub fn contains(polygon: &[[f64; 2]], x: f64, y: f64) -> bool {
    if polygon.len() < MIN_POLYGON_VERTICES || !x.is_finite() || !y.is_finite() {
        return false;
    }

    if edges(polygon).any(|(a, b)| on_segment(*a, *b, x, y)) {
        return true;
    }

    let mut inside = false;
    for (&[ax, ay], &[bx, by]) in edges(polygon) {
        // Only edges straddling the horizontal ray can cross it; this also
        // rules out division by zero for horizontal edges.
        if (ay > y) != (by > y) {
            let crossing_x = (bx - ax) * (y - ay) / (by - ay) + ax;
            if x < crossing_x {
                inside = !inside;
            }
        }
    }
    inside
}

/// Signed shoelace area. Positive for counter-clockwise vertex order.
pub fn signed_area(polygon: &[[f64; 2]]) -> f64 {
    let twice: f64 = edges(polygon)
        .map(|(&[ax, ay], &[bx, by])| ax * by - bx * ay)
        .sum();
    twice / 2.0
}

/// Consecutive vertex pairs including the closing edge.
fn edges(polygon: &[[f64; 2]]) -> impl Iterator<Item = (&[f64; 2], &[f64; 2])> {
    polygon.iter().zip(polygon.iter().cycle().skip(1))
}

/// Whether `(x, y)` lies on the segment `a`-`b` within tolerance.
fn on_segment([ax, ay]: [f64; 2], [bx, by]: [f64; 2], x: f64, y: f64) -> bool {
    let within_x = x >= ax.min(bx) - BOUNDARY_EPSILON && x <= ax.max(bx) + BOUNDARY_EPSILON;
    let within_y = y >= ay.min(by) - BOUNDARY_EPSILON && y <= ay.max(by) + BOUNDARY_EPSILON;
    if !within_x || !within_y {
        return false;
    }
    let cross = (bx - ax) * (y - ay) - (by - ay) * (x - ax);
    let length = (bx - ax).hypot(by - ay).max(1.0);
    cross.abs() <= BOUNDARY_EPSILON * length
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<[f64; 2]> {
        vec![[0.0, 0.0], [0.0, 10.0], [10.0, 10.0], [10.0, 0.0]]
    }

    /// An L-shaped (concave) polygon: the square minus its upper-right quarter.
    fn ell() -> Vec<[f64; 2]> {
        vec![
            [0.0, 0.0],
            [10.0, 0.0],
            [10.0, 5.0],
            [5.0, 5.0],
            [5.0, 10.0],
            [0.0, 10.0],
        ]
    }

    #[test]
    fn interior_point_is_inside() {
        assert!(contains(&square(), 5.0, 5.0));
        assert!(contains(&square(), 0.1, 9.9));
    }

    #[test]
    fn exterior_point_is_outside() {
        assert!(!contains(&square(), 15.0, 5.0));
        assert!(!contains(&square(), -0.1, 5.0));
        assert!(!contains(&square(), 5.0, 10.5));
    }

    #[test]
    fn boundary_points_are_inside() {
        let poly = square();
        assert!(contains(&poly, 0.0, 5.0), "left edge");
        assert!(contains(&poly, 10.0, 5.0), "right edge");
        assert!(contains(&poly, 5.0, 0.0), "bottom edge");
        assert!(contains(&poly, 5.0, 10.0), "top edge");
        assert!(contains(&poly, 0.0, 0.0), "vertex");
        assert!(contains(&poly, 10.0, 10.0), "opposite vertex");
    }

    #[test]
    fn concave_notch_is_outside() {
        let poly = ell();
        assert!(contains(&poly, 2.0, 8.0));
        assert!(contains(&poly, 8.0, 2.0));
        assert!(!contains(&poly, 8.0, 8.0));
        assert!(contains(&poly, 7.0, 5.0), "inner edge of the notch");
    }

    #[test]
    fn vertex_order_does_not_matter() {
        let mut reversed = square();
        reversed.reverse();
        assert!(contains(&reversed, 5.0, 5.0));
        assert!(!contains(&reversed, 11.0, 5.0));
        assert!(signed_area(&square()) < 0.0);
        assert!(signed_area(&reversed) > 0.0);
    }

    #[test]
    fn closed_ring_is_accepted() {
        let mut ring = square();
        ring.push([0.0, 0.0]);
        assert!(validate_polygon("z", &ring).is_ok());
        assert!(contains(&ring, 5.0, 5.0));
    }

    #[test]
    fn too_few_vertices_never_contain() {
        let line = vec![[0.0, 0.0], [10.0, 10.0]];
        assert!(!contains(&line, 5.0, 5.0));
        assert_eq!(
            validate_polygon("z", &line),
            Err(PlanningError::DegeneratePolygon {
                zone_id: "z".to_owned(),
                vertices: 2
            })
        );
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let poly = vec![[0.0, 0.0], [f64::NAN, 1.0], [1.0, 0.0]];
        assert!(matches!(
            validate_polygon("z", &poly),
            Err(PlanningError::NonFiniteVertex { .. })
        ));
        assert!(!contains(&square(), f64::NAN, 1.0));
    }

    #[test]
    fn collinear_polygon_has_zero_area() {
        let poly = vec![[0.0, 0.0], [5.0, 5.0], [10.0, 10.0]];
        assert!(matches!(
            validate_polygon("z", &poly),
            Err(PlanningError::ZeroArea { .. })
        ));
    }
}
