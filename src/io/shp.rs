//! ESRI shapefile boundaries.

use std::path::Path;

use anyhow::{Context, Result};
use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use shapefile::{dbase::{FieldValue, Record}, Reader, Shape};
use tracing::debug;

use crate::config::FieldNames;
use crate::types::{ParentIds, RawFeature, UnitId};

use super::number_text;

/// Read every shape and record of a `.shp` file as raw boundary features.
/// `country` is used when a record carries no country name.
pub fn read_shapefile(path: &Path, fields: &FieldNames, country: &str) -> Result<Vec<RawFeature>> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("[io::shp] Failed to open shapefile: {}", path.display()))?;

    let mut features = Vec::new();
    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result
            .with_context(|| format!("[io::shp] Error reading shape+record from {}", path.display()))?;
        features.push(RawFeature {
            unit_id: field_text(&record, &fields.unit_id).map(UnitId::new),
            country: field_text(&record, &fields.country).unwrap_or_else(|| country.to_string()),
            country_code: field_text(&record, &fields.country_code),
            parents: ParentIds::new(field_text(&record, &fields.level1), field_text(&record, &fields.level2)),
            name: field_text(&record, &fields.name),
            geometry: shape_to_geo(shape),
        });
    }

    debug!(path = %path.display(), features = features.len(), "[io::shp] read");
    Ok(features)
}

/// Text of an attribute, whatever its dBase type; `None` for missing or blank values.
fn field_text(record: &Record, field: &str) -> Option<String> {
    let text = match record.get(field)? {
        FieldValue::Character(Some(s)) => s.trim().to_string(),
        FieldValue::Memo(s) => s.trim().to_string(),
        FieldValue::Numeric(Some(n)) => number_text(*n),
        FieldValue::Float(Some(n)) => number_text(*n as f64),
        FieldValue::Double(n) => number_text(*n),
        FieldValue::Integer(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn shape_to_geo(shape: Shape) -> Option<Geometry<f64>> {
    let xy = |x: f64, y: f64| Coord { x, y };
    match shape {
        Shape::NullShape => None,
        Shape::Point(p) => Some(Point::new(p.x, p.y).into()),
        Shape::PointM(p) => Some(Point::new(p.x, p.y).into()),
        Shape::PointZ(p) => Some(Point::new(p.x, p.y).into()),
        Shape::Multipoint(mp) => Some(MultiPoint::from(mp.points().iter().map(|p| (p.x, p.y)).collect::<Vec<_>>()).into()),
        Shape::MultipointM(mp) => Some(MultiPoint::from(mp.points().iter().map(|p| (p.x, p.y)).collect::<Vec<_>>()).into()),
        Shape::MultipointZ(mp) => Some(MultiPoint::from(mp.points().iter().map(|p| (p.x, p.y)).collect::<Vec<_>>()).into()),
        Shape::Polyline(l) => Some(lines(l.parts().iter().map(|part| part.iter().map(|p| xy(p.x, p.y)).collect())).into()),
        Shape::PolylineM(l) => Some(lines(l.parts().iter().map(|part| part.iter().map(|p| xy(p.x, p.y)).collect())).into()),
        Shape::PolylineZ(l) => Some(lines(l.parts().iter().map(|part| part.iter().map(|p| xy(p.x, p.y)).collect())).into()),
        Shape::Polygon(p) => Some(rings_to_multipolygon(p.rings().iter().map(|r| r.points().iter().map(|p| xy(p.x, p.y)).collect())).into()),
        Shape::PolygonM(p) => Some(rings_to_multipolygon(p.rings().iter().map(|r| r.points().iter().map(|p| xy(p.x, p.y)).collect())).into()),
        Shape::PolygonZ(p) => Some(rings_to_multipolygon(p.rings().iter().map(|r| r.points().iter().map(|p| xy(p.x, p.y)).collect())).into()),
        Shape::Multipatch(_) => None,
    }
}

fn lines(parts: impl Iterator<Item = Vec<Coord<f64>>>) -> MultiLineString<f64> {
    MultiLineString::new(parts.map(LineString::new).collect())
}

/// Group shapefile rings into polygons: each clockwise ring starts a new
/// polygon and the counter-clockwise rings after it are its holes.
pub(crate) fn rings_to_multipolygon(rings: impl Iterator<Item = Vec<Coord<f64>>>) -> MultiPolygon<f64> {
    /// Twice the signed area (negative for clockwise rings).
    fn signed_area(pts: &[Coord<f64>]) -> f64 {
        pts.windows(2).map(|w| w[0].x * w[1].y - w[1].x * w[0].y).sum()
    }

    let mut polygons = Vec::new();
    let mut exterior: Option<LineString<f64>> = None;
    let mut holes = Vec::new();

    for mut coords in rings {
        if coords.is_empty() { continue }
        if coords.first() != coords.last() {
            coords.push(coords[0]);
        }
        let is_exterior = signed_area(&coords) < 0.0;
        let ring = LineString::new(coords);

        if is_exterior {
            if let Some(ext) = exterior.replace(ring) {
                polygons.push(Polygon::new(ext, std::mem::take(&mut holes)));
            }
        } else {
            holes.push(ring);
        }
    }
    if let Some(ext) = exterior {
        polygons.push(Polygon::new(ext, holes));
    }

    MultiPolygon::new(polygons)
}

#[cfg(test)]
mod tests {
    use geo::Area;

    use super::*;

    fn ring(pts: &[(f64, f64)]) -> Vec<Coord<f64>> {
        pts.iter().map(|&(x, y)| Coord { x, y }).collect()
    }

    #[test]
    fn groups_holes_with_their_exterior() {
        let outer = ring(&[(0.0, 0.0), (0.0, 4.0), (4.0, 4.0), (4.0, 0.0), (0.0, 0.0)]); // clockwise
        let hole = ring(&[(1.0, 1.0), (2.0, 1.0), (2.0, 2.0), (1.0, 2.0)]); // counter-clockwise, open
        let island = ring(&[(10.0, 0.0), (10.0, 1.0), (11.0, 1.0), (11.0, 0.0)]);

        let mp = rings_to_multipolygon([outer, hole, island].into_iter());
        assert_eq!(mp.0.len(), 2);
        assert_eq!(mp.0[0].interiors().len(), 1);
        assert!((mp.unsigned_area() - 16.0).abs() < 1e-12);
    }
}
