//! Values for units that ended up without measurements: units no grid cell
//! was matched to, and matched units whose cells only carried nulls.

mod report;

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::boundary::BoundarySet;
use crate::config::{InterpolationConfig, InterpolationMethod};
use crate::error::InterpolationFailure;
use crate::geom::{centroid_distance, check_polygonal, expand, polygon_distance};
use crate::grid::GridLattice;
use crate::stream::{AggregateTable, UnitSeries};
use crate::types::{BoundaryFeature, UnitId};
use crate::weights::{JoinPredicate, SpatialAggregator, WeightEntry, WeightTable};

pub use report::{InterpolationReport, ResolvedUnit, UnresolvedUnit};

/// Supplemental weights for buffered unmatched units, to be streamed separately.
#[derive(Debug, Clone)]
pub struct BufferPlan {
    /// Entries of every buffered unit that reached at least one cell.
    pub weights: Option<WeightTable>,
    /// Units covered by `weights`.
    pub units: Vec<UnitId>,
    pub failures: Vec<UnresolvedUnit>,
}

/// Fills the series of units without measurements from their measured
/// neighbors, or records why it could not.
#[derive(Debug, Clone)]
pub struct MissingUnitInterpolator<'a> {
    boundaries: &'a BoundarySet,
    weights: &'a WeightTable,
    config: InterpolationConfig,
}

impl<'a> MissingUnitInterpolator<'a> {
    pub fn new(boundaries: &'a BoundarySet, weights: &'a WeightTable, config: &InterpolationConfig) -> Self {
        Self { boundaries, weights, config: config.clone() }
    }

    #[inline] pub fn method(&self) -> InterpolationMethod { self.config.method }

    /// Units the weight table could not match to any cell.
    #[inline] pub fn unmatched(&self) -> &[UnitId] { self.weights.unmatched_units() }

    /// Every boundary unit without a single non-null value in `table`, in
    /// unit id order. Covers unmatched units as well as matched units whose
    /// cells carried only nulls (sea cells along a coast, for one).
    pub fn missing(&self, table: &AggregateTable) -> Vec<UnitId> {
        let mut missing: Vec<UnitId> = self.boundaries.unit_ids()
            .filter(|u| !table.has_values(u))
            .cloned()
            .collect();
        missing.sort();

        let matched_empty = missing.len().saturating_sub(self.unmatched().len());
        if matched_empty > 0 {
            warn!(country = self.boundaries.country(), units = matched_empty, "[interpolate] matched units without values");
        }
        missing
    }

    /// Fill units without values in `table` using the configured method.
    ///
    /// The buffer method needs a second pass over the measurements; use
    /// [`buffer_plan`](Self::buffer_plan) and [`absorb_buffered`](Self::absorb_buffered) for it.
    /// Called with it here, every such unit is reported unresolved.
    pub fn fill(&self, table: &mut AggregateTable) -> InterpolationReport {
        let method = self.config.method;
        let mut report = InterpolationReport::new(method);
        let missing = self.missing(table);

        match method {
            InterpolationMethod::None => {
                for unit in &missing {
                    report.unresolve(unit.clone(), InterpolationFailure::Disabled);
                }
            }
            InterpolationMethod::Buffer => {
                for unit in &missing {
                    report.unresolve(unit.clone(), InterpolationFailure::RequiresRestream);
                }
            }
            InterpolationMethod::NearestNeighbor | InterpolationMethod::Idw => {
                let candidates = self.candidates(table);
                for unit in &missing {
                    let filled = self.boundaries.find(unit).and_then(|feature| match method {
                        InterpolationMethod::Idw => self.inverse_distance(feature, &candidates, table),
                        _ => self.nearest_neighbor(feature, &candidates, table),
                    });
                    match filled {
                        Some((series, sources)) => {
                            debug!(unit = %unit, sources = sources.len(), "[interpolate] filled");
                            table.insert_series(unit.clone(), series, true);
                            report.resolve(unit.clone(), method, sources);
                        }
                        None => report.unresolve(unit.clone(), InterpolationFailure::NoCandidates),
                    }
                }
            }
        }

        report.log(self.boundaries.country());
        report
    }

    /// Units with a measured (not interpolated) series holding at least one
    /// value, in unit id order.
    fn candidates(&self, table: &AggregateTable) -> Vec<&'a BoundaryFeature> {
        let boundaries: &'a BoundarySet = self.boundaries;
        table.units()
            .filter(|u| !table.is_interpolated(u) && table.has_values(u))
            .filter_map(|u| boundaries.find(u))
            .collect()
    }

    /// Series of the closest candidate by polygon distance; ties go to the lowest unit id.
    fn nearest_neighbor(
        &self,
        feature: &BoundaryFeature,
        candidates: &[&BoundaryFeature],
        table: &AggregateTable,
    ) -> Option<(UnitSeries, Vec<UnitId>)> {
        let (_, nearest) = candidates.iter()
            .map(|c| (polygon_distance(&feature.geometry, &c.geometry), *c))
            .filter(|(d, _)| d.is_finite())
            .min_by(|(da, a), (db, b)| da.total_cmp(db).then_with(|| a.unit_id.cmp(&b.unit_id)))?;

        let series = table.series(&nearest.unit_id)?.clone();
        Some((series, vec![nearest.unit_id.clone()]))
    }

    /// Inverse-distance blend of the nearest candidates by centroid distance.
    /// A coincident centroid takes that neighbor's series unchanged.
    fn inverse_distance(
        &self,
        feature: &BoundaryFeature,
        candidates: &[&BoundaryFeature],
        table: &AggregateTable,
    ) -> Option<(UnitSeries, Vec<UnitId>)> {
        let mut neighbors: Vec<(f64, &BoundaryFeature)> = candidates.iter()
            .map(|c| (centroid_distance(&feature.geometry, &c.geometry), *c))
            .filter(|(d, _)| d.is_finite())
            .collect();
        neighbors.sort_by(|(da, a), (db, b)| da.total_cmp(db).then_with(|| a.unit_id.cmp(&b.unit_id)));
        neighbors.truncate(self.config.max_neighbors);

        let (first_distance, first) = *neighbors.first()?;
        if first_distance == 0.0 {
            let series = table.series(&first.unit_id)?.clone();
            return Some((series, vec![first.unit_id.clone()]));
        }

        let weighted: Vec<(f64, &UnitSeries)> = neighbors.iter()
            .filter_map(|(d, n)| Some((d.powf(self.config.idw_power).recip(), table.series(&n.unit_id)?)))
            .collect();
        if weighted.is_empty() { return None }

        let width = table.variables().len();
        let dates: BTreeSet<_> = weighted.iter().flat_map(|(_, s)| s.keys().copied()).collect();
        let series: UnitSeries = dates.into_iter()
            .map(|date| {
                let values: Vec<Option<f64>> = (0..width).map(|k| {
                    let (num, den) = weighted.iter()
                        .filter_map(|(w, s)| Some((*w, s.get(&date)?.get(k).copied().flatten()?)))
                        .fold((0.0, 0.0), |(num, den), (w, v)| (num + w * v, den + w));
                    (den > 0.0).then(|| num / den)
                }).collect();
                (date, values)
            })
            .collect::<BTreeMap<_, _>>();

        Some((series, neighbors.iter().map(|(_, n)| n.unit_id.clone()).collect()))
    }

    /// Buffer every unit without values in `table` outward by the configured
    /// radius and join each buffered shape to `lattice` on its own.
    ///
    /// Shares are computed per unit, so cells may carry a total share above one
    /// across the supplemental table.
    pub fn buffer_plan(&self, lattice: &GridLattice, table: &AggregateTable) -> BufferPlan {
        let radius = self.config.buffer_radius_deg();
        let precision = self.weights.precision();
        let mut entries: Vec<WeightEntry> = Vec::new();
        let mut units = Vec::new();
        let mut failures = Vec::new();

        for unit in self.missing(table) {
            let Some(feature) = self.boundaries.find(&unit) else {
                failures.push(UnresolvedUnit { unit, reason: InterpolationFailure::NoCandidates });
                continue;
            };

            let buffered = expand(&feature.geometry, radius);
            if check_polygonal(&buffered).is_err() {
                failures.push(UnresolvedUnit { unit, reason: InterpolationFailure::BufferInvalid });
                continue;
            }

            let single = BoundarySet::new(self.boundaries.country(), vec![feature.with_geometry(buffered)]);
            match SpatialAggregator::new(&single, precision).build(lattice) {
                Ok(table) => {
                    entries.extend(table.entries().iter().cloned());
                    units.push(unit);
                }
                Err(_) => failures.push(UnresolvedUnit { unit, reason: InterpolationFailure::BufferEmpty }),
            }
        }

        info!(
            country = self.boundaries.country(), buffered = units.len(), failed = failures.len(),
            radius_deg = radius, "[interpolate] buffer plan",
        );

        let weights = (!entries.is_empty())
            .then(|| WeightTable::new(self.boundaries.country(), precision, JoinPredicate::Intersects, entries, Vec::new()));
        BufferPlan { weights, units, failures }
    }

    /// Move the series of buffered units (aggregated with the plan's weights)
    /// into `table`.
    pub fn absorb_buffered(&self, table: &mut AggregateTable, plan: BufferPlan, buffered: &AggregateTable) -> InterpolationReport {
        let mut report = InterpolationReport::new(InterpolationMethod::Buffer);
        for failure in plan.failures {
            report.unresolve(failure.unit, failure.reason);
        }

        for unit in plan.units {
            let has_values = buffered.series(&unit)
                .is_some_and(|s| s.values().any(|values| values.iter().any(Option::is_some)));
            match buffered.series(&unit) {
                Some(series) if has_values => {
                    table.insert_series(unit.clone(), series.clone(), true);
                    report.resolve(unit, InterpolationMethod::Buffer, Vec::new());
                }
                _ => report.unresolve(unit, InterpolationFailure::NoMeasurements),
            }
        }

        report.log(self.boundaries.country());
        report
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use geo::{polygon, MultiPolygon};

    use super::*;
    use crate::config::VariableSpec;
    use crate::grid::{CoordPrecision, GridCellId};
    use crate::stream::{ChunkedStreamAggregator, MeasurementRecord, MemorySource};

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]])
    }

    fn day(d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(2020, 1, d).unwrap() }

    /// `a` and `b` matched, `c` unmatched, equidistant from both by centroid.
    fn fixture() -> (BoundarySet, WeightTable, AggregateTable) {
        let set = BoundarySet::new("X", vec![
            BoundaryFeature::new("a", "X", rect(0.0, 0.0, 1.0, 1.0)),
            BoundaryFeature::new("b", "X", rect(4.0, 0.0, 5.0, 1.0)),
            BoundaryFeature::new("c", "X", rect(2.0, 0.0, 3.0, 1.0)),
        ]);
        let weights = WeightTable::new("X", CoordPrecision::default(), JoinPredicate::Intersects, vec![
            WeightEntry { cell: GridCellId { lat: 500, lon: 500 }, unit: "a".into(), share: 1.0, intersection_area: 1.0, cell_area: 1.0 },
            WeightEntry { cell: GridCellId { lat: 500, lon: 4500 }, unit: "b".into(), share: 1.0, intersection_area: 1.0, cell_area: 1.0 },
        ], vec!["c".into()]);

        let mut table = AggregateTable::new(vec![VariableSpec::mean("t")]);
        table.insert_series("a".into(), BTreeMap::from([(day(1), vec![Some(10.0)]), (day(2), vec![Some(12.0)])]), false);
        table.insert_series("b".into(), BTreeMap::from([(day(1), vec![Some(20.0)]), (day(2), vec![None])]), false);
        (set, weights, table)
    }

    #[test]
    fn nearest_neighbor_breaks_ties_by_id() {
        let (set, weights, mut table) = fixture();
        let interpolator = MissingUnitInterpolator::new(&set, &weights, &InterpolationConfig::default());
        let report = interpolator.fill(&mut table);

        assert_eq!(report.resolved.len(), 1);
        assert_eq!(report.resolved[0].sources, vec![UnitId::from("a")]);
        assert_eq!(table.series(&"c".into()), table.series(&"a".into()));
        assert!(table.is_interpolated(&"c".into()));
    }

    #[test]
    fn idw_with_equal_distances_is_the_mean() {
        let (set, weights, mut table) = fixture();
        let config = InterpolationConfig { method: InterpolationMethod::Idw, ..Default::default() };
        let report = MissingUnitInterpolator::new(&set, &weights, &config).fill(&mut table);

        assert!(report.unresolved.is_empty());
        let c = UnitId::from("c");
        assert!((table.value(&c, day(1), "t").unwrap() - 15.0).abs() < 1e-12);
        assert!((table.value(&c, day(2), "t").unwrap() - 12.0).abs() < 1e-12);
    }

    #[test]
    fn none_and_buffer_leave_units_unresolved() {
        let (set, weights, mut table) = fixture();
        for (method, reason) in [
            (InterpolationMethod::None, InterpolationFailure::Disabled),
            (InterpolationMethod::Buffer, InterpolationFailure::RequiresRestream),
        ] {
            let config = InterpolationConfig { method, ..Default::default() };
            let report = MissingUnitInterpolator::new(&set, &weights, &config).fill(&mut table);
            assert_eq!(report.unresolved, vec![UnresolvedUnit { unit: "c".into(), reason }]);
            assert!(!table.contains_unit(&"c".into()));
        }
    }

    #[test]
    fn no_candidates_is_unresolved() {
        let (set, weights, _) = fixture();
        let mut empty = AggregateTable::new(vec![VariableSpec::mean("t")]);
        let report = MissingUnitInterpolator::new(&set, &weights, &InterpolationConfig::default()).fill(&mut empty);
        assert!(report.unresolved.iter().all(|u| u.reason == InterpolationFailure::NoCandidates));
        assert_eq!(report.to_audit().len(), 3);
    }

    #[test]
    fn buffer_plan_reaches_nearby_cells() {
        let config = InterpolationConfig { method: InterpolationMethod::Buffer, buffer_radius_km: 111.32, ..Default::default() };
        let lattice = GridLattice::from_coordinates([(0.5, 0.5), (0.5, 4.5)], CoordPrecision::default(), 1.0).unwrap();

        let (set, weights, table) = fixture();
        let plan = MissingUnitInterpolator::new(&set, &weights, &config).buffer_plan(&lattice, &table);
        assert_eq!(plan.units, vec![UnitId::from("c")]);
        let supplemental = plan.weights.unwrap();
        assert!(supplemental.for_unit(&"c".into()).count() >= 1);
    }

    #[test]
    fn matched_unit_with_only_nan_cells_is_filled() {
        let (set, weights, _) = fixture();
        let vars = vec![VariableSpec::mean("t")];
        let records = vec![
            MeasurementRecord::new(0.5, 0.5, "2020-01-01", "t", Some(f64::NAN)),
            MeasurementRecord::new(0.5, 4.5, "2020-01-01", "t", Some(20.0)),
        ];
        let source = MemorySource::from_records("mem", &records, &vars, 10);
        let mut table = ChunkedStreamAggregator::new(&weights, &vars).aggregate([source]).unwrap().table;
        assert!(!table.has_values(&"a".into()));

        let interpolator = MissingUnitInterpolator::new(&set, &weights, &InterpolationConfig::default());
        assert_eq!(interpolator.missing(&table), vec![UnitId::from("a"), UnitId::from("c")]);

        let report = interpolator.fill(&mut table);
        assert!(report.is_complete());
        assert_eq!(report.to_audit().len(), 2);
        for unit in ["a", "c"] {
            assert!(table.is_interpolated(&unit.into()));
            assert_eq!(table.value(&unit.into(), day(1), "t"), Some(20.0));
        }
    }

    #[test]
    fn matched_unit_without_values_is_reported_when_disabled() {
        let (set, weights, mut table) = fixture();
        table.insert_series("b".into(), BTreeMap::from([(day(1), vec![None])]), false);
        let config = InterpolationConfig { method: InterpolationMethod::None, ..Default::default() };
        let report = MissingUnitInterpolator::new(&set, &weights, &config).fill(&mut table);

        let units: Vec<&str> = report.unresolved.iter().map(|u| u.unit.as_str()).collect();
        assert_eq!(units, ["b", "c"]);
    }
}
