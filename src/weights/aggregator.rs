use ahash::AHashSet;
use geo::{Area, BooleanOps, Intersects, MultiPolygon, Polygon, Relate};
use tracing::{info, warn};

use crate::boundary::BoundarySet;
use crate::error::JoinEmptyError;
use crate::grid::{CoordPrecision, GridLattice};
use crate::types::UnitId;

use super::{WeightEntry, WeightTable};

/// Spatial predicate deciding whether a cell is joined to a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinPredicate {
    /// Cell and unit share any point.
    Intersects,
    /// Interiors intersect and neither contains the other.
    Overlaps,
    /// Cell lies entirely inside the unit.
    Within,
}

impl JoinPredicate {
    /// Predicates in the order they are tried.
    pub const FALLBACK_ORDER: [JoinPredicate; 3] = [JoinPredicate::Intersects, JoinPredicate::Overlaps, JoinPredicate::Within];

    pub fn as_str(&self) -> &'static str {
        match self {
            JoinPredicate::Intersects => "intersects",
            JoinPredicate::Overlaps => "overlaps",
            JoinPredicate::Within => "within",
        }
    }

    pub fn matches(&self, cell: &Polygon<f64>, unit: &MultiPolygon<f64>) -> bool {
        match self {
            JoinPredicate::Intersects => cell.intersects(unit),
            JoinPredicate::Overlaps => cell.relate(unit).is_overlaps(),
            JoinPredicate::Within => cell.relate(unit).is_within(),
        }
    }
}

/// Maps grid cells onto the units of a boundary set by area of intersection.
#[derive(Debug, Clone, Copy)]
pub struct SpatialAggregator<'a> {
    boundaries: &'a BoundarySet,
    precision: CoordPrecision,
}

impl<'a> SpatialAggregator<'a> {
    pub fn new(boundaries: &'a BoundarySet, precision: CoordPrecision) -> Self {
        Self { boundaries, precision }
    }

    /// Build the weight table, falling back through [`JoinPredicate::FALLBACK_ORDER`]
    /// until a predicate yields at least one positive-area match.
    pub fn build(&self, lattice: &GridLattice) -> Result<WeightTable, JoinEmptyError> {
        let country = self.boundaries.country();

        for predicate in JoinPredicate::FALLBACK_ORDER {
            let entries = self.join(lattice, predicate);
            if entries.is_empty() {
                warn!(country, predicate = predicate.as_str(), "[weights] join produced no matches");
                continue;
            }

            let matched: AHashSet<&UnitId> = entries.iter().map(|e| &e.unit).collect();
            let unmatched: Vec<UnitId> = self.boundaries.unit_ids()
                .filter(|u| !matched.contains(u))
                .cloned()
                .collect();

            let table = WeightTable::new(country, self.precision, predicate, entries, unmatched);
            let covered = table.cells().filter(|c| table.cell_share_sum(c) >= 1.0 - 1e-9).count();
            info!(
                country, predicate = predicate.as_str(), entries = table.len(), cells = table.cell_count(),
                covered, unmatched = table.unmatched_units().len(), "[weights] built weight table",
            );
            return Ok(table);
        }

        Err(JoinEmptyError {
            country: country.to_string(),
            tried: JoinPredicate::FALLBACK_ORDER.map(|p| p.as_str()).join(", "),
        })
    }

    /// Weight entries for every (cell, unit) pair accepted by `predicate`
    /// whose intersection has positive area.
    ///
    /// A cell's shares are normalized by the larger of its own area and the
    /// total area matched to it, so they never sum past one.
    pub fn join(&self, lattice: &GridLattice, predicate: JoinPredicate) -> Vec<WeightEntry> {
        let features = self.boundaries.features();
        let mut entries = Vec::new();

        for cell in lattice.cells() {
            let polygon = cell.polygon();
            let cell_shape = MultiPolygon::new(vec![polygon.clone()]);

            let matches: Vec<(usize, f64)> = self.boundaries.query(&cell.rect).into_iter()
                .filter(|&i| predicate.matches(&polygon, &features[i].geometry))
                .map(|i| (i, cell_shape.intersection(&features[i].geometry).unsigned_area()))
                .filter(|&(_, area)| area > 0.0)
                .collect();
            if matches.is_empty() { continue }

            let cell_area = cell.area();
            let denominator = cell_area.max(matches.iter().map(|&(_, a)| a).sum());
            entries.extend(matches.into_iter().map(|(i, area)| WeightEntry {
                cell: cell.id,
                unit: features[i].unit_id.clone(),
                share: (area / denominator).min(1.0),
                intersection_area: area,
                cell_area,
            }));
        }

        entries
    }
}
