use geo::{Centroid, Distance, Euclidean, MultiPolygon};

/// Minimum planar distance between two multi-polygons (zero when they touch or overlap).
/// Infinite if either side is empty.
pub fn polygon_distance(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> f64 {
    a.0.iter()
        .flat_map(|pa| b.0.iter().map(move |pb| Euclidean.distance(pa, pb)))
        .fold(f64::INFINITY, f64::min)
}

/// Planar distance between centroids; infinite if either centroid is undefined.
pub fn centroid_distance(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> f64 {
    match (a.centroid(), b.centroid()) {
        (Some(ca), Some(cb)) => Euclidean.distance(ca, cb),
        _ => f64::INFINITY,
    }
}
