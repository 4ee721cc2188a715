use geo::{Area, Geometry, MultiPolygon, Validation};

use crate::error::GeometryError;
use super::repair::zero_buffer;

/// Pure validity predicate for boundary geometries.
///
/// False for null or empty geometries, anything that is not a polygon or
/// multi-polygon, topologically invalid shapes, and shapes with non-positive
/// area. With `lenient`, a zero-width buffer repair is tried before giving up.
pub fn validate(geometry: Option<&Geometry<f64>>, lenient: bool) -> bool {
    check(geometry, lenient).is_ok()
}

/// Like [`validate`], but returns the (possibly repaired) polygonal geometry,
/// or the reason it was rejected.
pub fn check(geometry: Option<&Geometry<f64>>, lenient: bool) -> Result<MultiPolygon<f64>, GeometryError> {
    let geometry = geometry.ok_or(GeometryError::Null)?;
    let polygonal = as_multipolygon(geometry)?;

    match check_polygonal(&polygonal) {
        Ok(()) => Ok(polygonal),
        Err(GeometryError::Empty) => Err(GeometryError::Empty),
        Err(err) if lenient => {
            let repaired = zero_buffer(&polygonal);
            check_polygonal(&repaired).map(|()| repaired).map_err(|_| err)
        }
        Err(err) => Err(err),
    }
}

/// Strict checks on an already polygonal geometry.
pub fn check_polygonal(mp: &MultiPolygon<f64>) -> Result<(), GeometryError> {
    if mp.0.iter().all(|p| p.exterior().0.is_empty()) {
        return Err(GeometryError::Empty);
    }
    if !mp.is_valid() {
        return Err(GeometryError::Invalid);
    }
    let area = mp.unsigned_area();
    if !(area > 0.0) {
        return Err(GeometryError::NonPositiveArea(area));
    }
    Ok(())
}

fn as_multipolygon(geometry: &Geometry<f64>) -> Result<MultiPolygon<f64>, GeometryError> {
    match geometry {
        Geometry::Polygon(p) => Ok(MultiPolygon::new(vec![p.clone()])),
        Geometry::MultiPolygon(mp) => Ok(mp.clone()),
        Geometry::Point(_) => Err(GeometryError::NotPolygonal("Point")),
        Geometry::MultiPoint(_) => Err(GeometryError::NotPolygonal("MultiPoint")),
        Geometry::Line(_) => Err(GeometryError::NotPolygonal("Line")),
        Geometry::LineString(_) => Err(GeometryError::NotPolygonal("LineString")),
        Geometry::MultiLineString(_) => Err(GeometryError::NotPolygonal("MultiLineString")),
        Geometry::GeometryCollection(_) => Err(GeometryError::NotPolygonal("GeometryCollection")),
        Geometry::Rect(_) => Err(GeometryError::NotPolygonal("Rect")),
        Geometry::Triangle(_) => Err(GeometryError::NotPolygonal("Triangle")),
    }
}
