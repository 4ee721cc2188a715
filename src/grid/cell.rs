use geo::{Area, Coord, Polygon, Rect};

/// Number of decimals grid coordinates are rounded to.
///
/// Both the weight table and the measurement join key coordinates through the
/// same precision, so a mismatch silently drops every row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoordPrecision {
    decimals: u32,
}

impl Default for CoordPrecision {
    fn default() -> Self { Self::new(3) }
}

impl CoordPrecision {
    pub fn new(decimals: u32) -> Self { Self { decimals } }

    #[inline] pub fn decimals(&self) -> u32 { self.decimals }

    #[inline] fn scale(&self) -> f64 { 10f64.powi(self.decimals as i32) }

    /// Rounded coordinate as a scaled integer.
    #[inline] pub fn key(&self, value: f64) -> i64 { (value * self.scale()).round() as i64 }

    /// Coordinate value of a scaled integer.
    #[inline] pub fn value(&self, key: i64) -> f64 { key as f64 / self.scale() }

    #[inline] pub fn round(&self, value: f64) -> f64 { self.value(self.key(value)) }

    #[inline] pub fn cell_id(&self, latitude: f64, longitude: f64) -> Option<GridCellId> {
        (latitude.is_finite() && longitude.is_finite())
            .then(|| GridCellId { lat: self.key(latitude), lon: self.key(longitude) })
    }
}

/// Center of a grid cell, rounded and scaled by a [`CoordPrecision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GridCellId {
    pub lat: i64,
    pub lon: i64,
}

impl GridCellId {
    pub fn latitude(&self, precision: CoordPrecision) -> f64 { precision.value(self.lat) }

    pub fn longitude(&self, precision: CoordPrecision) -> f64 { precision.value(self.lon) }
}

/// A grid cell: its id and the rectangle it covers (x = longitude, y = latitude).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridCell {
    pub id: GridCellId,
    pub rect: Rect<f64>,
}

impl GridCell {
    pub fn new(id: GridCellId, lon: (f64, f64), lat: (f64, f64)) -> Self {
        Self {
            id,
            rect: Rect::new(Coord { x: lon.0, y: lat.0 }, Coord { x: lon.1, y: lat.1 }),
        }
    }

    #[inline] pub fn polygon(&self) -> Polygon<f64> { self.rect.to_polygon() }

    #[inline] pub fn area(&self) -> f64 { self.rect.unsigned_area() }
}
