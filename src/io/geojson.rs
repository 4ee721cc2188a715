//! GeoJSON FeatureCollections in and out.

use std::{fs, io::Write, path::Path};

use anyhow::{anyhow, bail, Context, Result};
use geo::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::boundary::BoundarySet;
use crate::config::FieldNames;
use crate::types::{ParentIds, RawFeature, UnitId};

use super::number_text;

/// Read a FeatureCollection file as raw boundary features.
pub fn read_geojson(path: &Path, fields: &FieldNames, country: &str) -> Result<Vec<RawFeature>> {
    let bytes = fs::read(path)
        .with_context(|| format!("[io::geojson] Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_slice(&bytes)
        .with_context(|| format!("[io::geojson] Failed to parse {}", path.display()))?;
    let features = parse_feature_collection(&value, fields, country)
        .with_context(|| format!("[io::geojson] Invalid FeatureCollection in {}", path.display()))?;
    debug!(path = %path.display(), features = features.len(), "[io::geojson] read");
    Ok(features)
}

pub fn parse_feature_collection(value: &Value, fields: &FieldNames, country: &str) -> Result<Vec<RawFeature>> {
    if value.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
        bail!("[io::geojson] Expected a FeatureCollection");
    }
    let features = value.get("features").and_then(Value::as_array)
        .ok_or_else(|| anyhow!("[io::geojson] FeatureCollection has no `features` array"))?;

    features.iter().enumerate().map(|(i, feature)| {
        let empty = Map::new();
        let props = feature.get("properties").and_then(Value::as_object).unwrap_or(&empty);
        let text = |field: &str| props.get(field).and_then(property_text);

        let geometry = match feature.get("geometry") {
            None | Some(Value::Null) => None,
            Some(g) => Some(parse_geometry(g).with_context(|| format!("[io::geojson] Bad geometry in feature {i}"))?),
        };

        Ok(RawFeature {
            unit_id: text(&fields.unit_id).map(UnitId::new),
            country: text(&fields.country).unwrap_or_else(|| country.to_string()),
            country_code: text(&fields.country_code),
            parents: ParentIds::new(text(&fields.level1), text(&fields.level2)),
            name: text(&fields.name),
            geometry,
        })
    }).collect()
}

fn property_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.as_i64().map(|i| i.to_string())
            .or_else(|| n.as_f64().map(number_text))?,
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn parse_geometry(value: &Value) -> Result<Geometry<f64>> {
    let kind = value.get("type").and_then(Value::as_str)
        .ok_or_else(|| anyhow!("geometry has no type"))?;

    if kind == "GeometryCollection" {
        let members = value.get("geometries").and_then(Value::as_array)
            .ok_or_else(|| anyhow!("GeometryCollection has no `geometries`"))?;
        let geoms = members.iter().map(parse_geometry).collect::<Result<Vec<_>>>()?;
        return Ok(Geometry::GeometryCollection(GeometryCollection::from(geoms)));
    }

    let coords = value.get("coordinates").ok_or_else(|| anyhow!("{kind} has no coordinates"))?;
    Ok(match kind {
        "Point" => Point::from(coord(coords)?).into(),
        "MultiPoint" => MultiPoint::new(array(coords)?.iter().map(|c| coord(c).map(Point::from)).collect::<Result<_>>()?).into(),
        "LineString" => line(coords)?.into(),
        "MultiLineString" => MultiLineString::new(array(coords)?.iter().map(line).collect::<Result<_>>()?).into(),
        "Polygon" => polygon(coords)?.into(),
        "MultiPolygon" => MultiPolygon::new(array(coords)?.iter().map(polygon).collect::<Result<_>>()?).into(),
        other => bail!("unsupported geometry type `{other}`"),
    })
}

fn array(value: &Value) -> Result<&Vec<Value>> {
    value.as_array().ok_or_else(|| anyhow!("expected an array, got {value}"))
}

fn coord(value: &Value) -> Result<Coord<f64>> {
    match array(value)?.as_slice() {
        [x, y, ..] => Ok(Coord {
            x: x.as_f64().ok_or_else(|| anyhow!("non-numeric x"))?,
            y: y.as_f64().ok_or_else(|| anyhow!("non-numeric y"))?,
        }),
        _ => bail!("position needs two numbers"),
    }
}

fn line(value: &Value) -> Result<LineString<f64>> {
    Ok(LineString::new(array(value)?.iter().map(coord).collect::<Result<_>>()?))
}

/// First ring is the exterior, the rest are holes.
fn polygon(value: &Value) -> Result<Polygon<f64>> {
    let mut rings = array(value)?.iter().map(line);
    let exterior = rings.next().transpose()?.unwrap_or_else(|| LineString::new(Vec::new()));
    Ok(Polygon::new(exterior, rings.collect::<Result<_>>()?))
}

fn ring_coords(ring: &LineString<f64>) -> Value {
    Value::Array(ring.coords().map(|c| json!([c.x, c.y])).collect())
}

/// GeoJSON `MultiPolygon` coordinates: per polygon, the exterior followed by its holes.
fn multipolygon_coords(mp: &MultiPolygon<f64>) -> Value {
    Value::Array(mp.0.iter().map(|poly| {
        Value::Array(std::iter::once(poly.exterior()).chain(poly.interiors()).map(ring_coords).collect())
    }).collect())
}

/// Export a cleaned boundary set as a FeatureCollection carrying the same
/// attribute names it was read with.
pub fn boundaries_to_geojson(boundaries: &BoundarySet, fields: &FieldNames) -> Value {
    let features: Vec<Value> = boundaries.features().iter().map(|f| {
        let mut properties = Map::new();
        properties.insert(fields.unit_id.clone(), json!(f.unit_id.as_str()));
        properties.insert(fields.country.clone(), json!(f.country));
        properties.insert(fields.country_code.clone(), json!(f.country_code));
        properties.insert(fields.level1.clone(), json!(f.parents.level1));
        properties.insert(fields.level2.clone(), json!(f.parents.level2));
        properties.insert(fields.name.clone(), json!(f.name));

        json!({
            "type": "Feature",
            "geometry": { "type": "MultiPolygon", "coordinates": multipolygon_coords(&f.geometry) },
            "properties": Value::Object(properties),
        })
    }).collect();

    json!({ "type": "FeatureCollection", "features": features })
}

pub fn write_geojson(value: &Value, writer: impl Write) -> Result<()> {
    serde_json::to_writer(writer, value).context("[io::geojson] Failed to write GeoJSON")
}
