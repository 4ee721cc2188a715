use geo::{Area, Geometry, MultiPolygon};

use super::UnitId;

/// Identifiers of the coarser administrative levels a unit nests in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentIds {
    pub level1: Option<String>, // e.g. GEOLEV1
    pub level2: Option<String>, // e.g. GEOLEV2
}

impl ParentIds {
    pub fn new(level1: Option<String>, level2: Option<String>) -> Self {
        Self { level1, level2 }
    }

    /// The finest coarser-level identifier that is present.
    pub fn finest(&self) -> Option<&str> {
        self.level2.as_deref().or(self.level1.as_deref())
    }

    #[inline] pub fn is_empty(&self) -> bool { self.level1.is_none() && self.level2.is_none() }
}

/// A boundary feature as delivered by a loader, before any cleaning.
/// Geometry may be null or non-areal, and the unit id may be missing.
#[derive(Debug, Clone)]
pub struct RawFeature {
    pub unit_id: Option<UnitId>,
    pub country: String,
    pub country_code: Option<String>,
    pub parents: ParentIds,
    pub name: Option<String>,
    pub geometry: Option<Geometry<f64>>,
}

impl RawFeature {
    /// Convenience constructor for a polygonal feature with only an id and country.
    pub fn new(unit_id: impl Into<UnitId>, country: impl Into<String>, geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            unit_id: Some(unit_id.into()),
            country: country.into(),
            country_code: None,
            parents: ParentIds::default(),
            name: None,
            geometry: Some(geometry.into()),
        }
    }

    pub fn with_country_code(mut self, code: impl Into<String>) -> Self {
        self.country_code = Some(code.into());
        self
    }

    pub fn with_parents(mut self, parents: ParentIds) -> Self {
        self.parents = parents;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A cleaned administrative unit with polygonal geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryFeature {
    pub unit_id: UnitId,
    pub country: String,
    pub country_code: Option<String>,
    pub parents: ParentIds,
    pub name: Option<String>,
    pub geometry: MultiPolygon<f64>,
}

impl BoundaryFeature {
    pub fn new(unit_id: impl Into<UnitId>, country: impl Into<String>, geometry: MultiPolygon<f64>) -> Self {
        Self {
            unit_id: unit_id.into(),
            country: country.into(),
            country_code: None,
            parents: ParentIds::default(),
            name: None,
            geometry,
        }
    }

    /// Carry the attributes of a raw feature over to a validated geometry.
    pub(crate) fn from_raw(raw: RawFeature, unit_id: UnitId, geometry: MultiPolygon<f64>) -> Self {
        Self {
            unit_id,
            country: raw.country,
            country_code: raw.country_code,
            parents: raw.parents,
            name: raw.name,
            geometry,
        }
    }

    /// Same attributes, different geometry.
    pub fn with_geometry(&self, geometry: MultiPolygon<f64>) -> Self {
        Self { geometry, ..self.clone() }
    }

    #[inline] pub fn area(&self) -> f64 { self.geometry.unsigned_area() }
}
