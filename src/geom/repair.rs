use geo::{Area, BooleanOps, Buffer, ConvexHull, MultiPolygon};

use super::validate::check_polygonal;

/// Offset used by the positive-then-negative buffer repair, in degrees.
const MICRO_BUFFER: f64 = 1e-4;

/// Zero-width buffer: re-nodes every ring through the boolean-ops engine,
/// which resolves self-intersections and normalizes ring orientation.
pub fn zero_buffer(mp: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    mp.union(&MultiPolygon::new(Vec::new()))
}

/// Grow (or shrink, for a negative `distance`) a geometry by `distance` degrees.
pub fn expand(mp: &MultiPolygon<f64>, distance: f64) -> MultiPolygon<f64> {
    Buffer::buffer(mp, distance)
}

/// Escalating buffer repair for a geometry that failed validation:
/// zero buffer, then a small outward-and-back buffer, then (single polygons
/// only) the convex hull if it keeps at least `min_hull_ratio` of the area.
pub fn buffer_repair(mp: &MultiPolygon<f64>, min_hull_ratio: f64) -> Option<MultiPolygon<f64>> {
    let repaired = zero_buffer(mp);
    if check_polygonal(&repaired).is_ok() {
        return Some(repaired);
    }

    let repaired = expand(&expand(mp, MICRO_BUFFER), -MICRO_BUFFER);
    if check_polygonal(&repaired).is_ok() {
        return Some(repaired);
    }

    if mp.0.len() == 1 {
        let hull = MultiPolygon::new(vec![mp.convex_hull()]);
        if check_polygonal(&hull).is_ok() && hull.unsigned_area() > mp.unsigned_area() * min_hull_ratio {
            return Some(hull);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use geo::{polygon, Area, MultiPolygon};

    use super::*;

    #[test]
    fn zero_buffer_keeps_valid_shape() {
        let mp = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 1.0), (x: 0.0, y: 1.0),
        ]]);
        let repaired = zero_buffer(&mp);
        assert!((repaired.unsigned_area() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn expand_grows_area() {
        let mp = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0),
        ]]);
        let grown = expand(&mp, 0.5);
        assert!(grown.unsigned_area() > 1.0 + 4.0 * 0.5 - 1e-9);
    }
}
