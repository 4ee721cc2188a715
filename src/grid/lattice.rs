use std::collections::BTreeSet;

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::GridConfig;
use crate::error::GridError;
use crate::stream::MeasurementSource;

use super::{CoordPrecision, GridCell, GridCellId};

/// Cell geometry for the distinct coordinates of a measurement lattice.
///
/// Cell edges are the midpoints between consecutive coordinates on each axis;
/// the outermost cells extend by half of the adjacent gap. An axis with a
/// single coordinate uses `default_step`.
#[derive(Debug, Clone)]
pub struct GridLattice {
    precision: CoordPrecision,
    cells: Vec<GridCell>, // Sorted by (lat, lon)
}

impl GridLattice {
    pub fn from_coordinates(
        coordinates: impl IntoIterator<Item = (f64, f64)>,
        precision: CoordPrecision,
        default_step: f64,
    ) -> Result<Self, GridError> {
        let ids: BTreeSet<GridCellId> = coordinates.into_iter()
            .filter_map(|(lat, lon)| precision.cell_id(lat, lon))
            .collect();
        Self::from_ids(ids, precision, default_step)
            .ok_or_else(|| GridError::EmptyLattice("coordinate list".into()))
    }

    /// Read every batch of `source` and build the lattice from its coordinates.
    pub fn from_source<S: MeasurementSource + ?Sized>(source: &mut S, grid: &GridConfig) -> Result<Self> {
        let precision = CoordPrecision::new(grid.precision);
        let mut ids = BTreeSet::new();
        while let Some(batch) = source.next_batch()
            .with_context(|| format!("[grid::lattice] Failed to read {}", source.name()))?
        {
            ids.extend(batch.coordinates().filter_map(|(lat, lon)| precision.cell_id(lat, lon)));
        }

        let lattice = Self::from_ids(ids, precision, grid.default_step)
            .ok_or_else(|| GridError::EmptyLattice(source.name().to_string()))?;
        debug!(source = source.name(), cells = lattice.len(), "[grid::lattice] built");
        Ok(lattice)
    }

    fn from_ids(ids: BTreeSet<GridCellId>, precision: CoordPrecision, default_step: f64) -> Option<Self> {
        if ids.is_empty() { return None }

        let lats: BTreeSet<i64> = ids.iter().map(|id| id.lat).collect();
        let lons: BTreeSet<i64> = ids.iter().map(|id| id.lon).collect();
        let lat_edges = AxisEdges::new(&lats, precision, default_step);
        let lon_edges = AxisEdges::new(&lons, precision, default_step);

        let cells = ids.into_iter()
            .filter_map(|id| Some(GridCell::new(id, lon_edges.span(id.lon)?, lat_edges.span(id.lat)?)))
            .collect();

        Some(Self { precision, cells })
    }

    #[inline] pub fn precision(&self) -> CoordPrecision { self.precision }

    #[inline] pub fn cells(&self) -> &[GridCell] { &self.cells }

    #[inline] pub fn len(&self) -> usize { self.cells.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.cells.is_empty() }

    pub fn cell(&self, id: &GridCellId) -> Option<&GridCell> {
        self.cells.binary_search_by(|c| c.id.cmp(id)).ok().map(|i| &self.cells[i])
    }
}

/// Lower and upper edge of each distinct coordinate on one axis.
struct AxisEdges {
    keys: Vec<i64>,
    bounds: Vec<(f64, f64)>,
}

impl AxisEdges {
    fn new(keys: &BTreeSet<i64>, precision: CoordPrecision, default_step: f64) -> Self {
        let keys: Vec<i64> = keys.iter().copied().collect();
        let values: Vec<f64> = keys.iter().map(|&k| precision.value(k)).collect();

        let bounds = match values.len() {
            1 => vec![(values[0] - default_step / 2.0, values[0] + default_step / 2.0)],
            n => (0..n).map(|k| {
                let lower = if k == 0 { values[0] - (values[1] - values[0]) / 2.0 } else { (values[k - 1] + values[k]) / 2.0 };
                let upper = if k == n - 1 { values[k] + (values[k] - values[k - 1]) / 2.0 } else { (values[k] + values[k + 1]) / 2.0 };
                (lower, upper)
            }).collect(),
        };

        Self { keys, bounds }
    }

    fn span(&self, key: i64) -> Option<(f64, f64)> {
        self.keys.binary_search(&key).ok().map(|i| self.bounds[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regular_lattice_has_equal_cells() {
        let coords = [(0.0, 0.0), (0.0, 0.25), (0.25, 0.0), (0.25, 0.25)];
        let lattice = GridLattice::from_coordinates(coords, CoordPrecision::default(), 0.25).unwrap();
        assert_eq!(lattice.len(), 4);
        for cell in lattice.cells() {
            assert!((cell.area() - 0.0625).abs() < 1e-12);
        }
        let first = lattice.cells()[0];
        assert_eq!(first.rect.min().x, -0.125);
        assert_eq!(first.rect.max().y, 0.125);
    }

    #[test]
    fn single_point_uses_default_step() {
        let lattice = GridLattice::from_coordinates([(6.5, 2.5)], CoordPrecision::default(), 0.25).unwrap();
        let cell = lattice.cells()[0];
        assert_eq!(cell.rect.min().x, 2.375);
        assert_eq!(cell.rect.max().y, 6.625);
    }

    #[test]
    fn duplicates_collapse_and_lookup_works() {
        let coords = [(1.0, 1.0), (1.0001, 1.0), (1.0, 2.0)];
        let precision = CoordPrecision::new(3);
        let lattice = GridLattice::from_coordinates(coords, precision, 0.25).unwrap();
        assert_eq!(lattice.len(), 2);
        let id = precision.cell_id(1.0, 2.0).unwrap();
        assert_eq!(lattice.cell(&id).map(|c| c.id), Some(id));
    }

    #[test]
    fn empty_is_an_error() {
        let err = GridLattice::from_coordinates(Vec::new(), CoordPrecision::default(), 0.25).unwrap_err();
        assert!(matches!(err, GridError::EmptyLattice(_)));
    }
}
