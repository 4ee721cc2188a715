use geo::{Area, BooleanOps, MultiPolygon};
use tracing::{debug, info, warn};

use crate::audit::{AuditLog, AuditOperation};
use crate::config::CleaningConfig;
use crate::error::OverlapUnresolved;
use crate::geom::{check_polygonal, zero_buffer};
use crate::types::{BoundaryFeature, UnitId};

use super::BoundarySet;

/// How large an overlap is relative to the smaller of the two polygons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapSeverity {
    Sliver,
    Major,
}

impl OverlapSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlapSeverity::Sliver => "sliver",
            OverlapSeverity::Major => "major",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStrategy {
    /// Cut the intersection out of the feature with the smaller original area.
    Difference,
    /// Cut the intersection out of the feature losing the smaller share of its area.
    SmallestRelativeLoss,
    /// Zero-buffer both features, then retry the difference.
    BufferRepair,
}

impl RepairStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairStrategy::Difference => "difference",
            RepairStrategy::SmallestRelativeLoss => "smallest_relative_loss",
            RepairStrategy::BufferRepair => "buffer_repair",
        }
    }
}

/// Two overlapping features as seen by a repair strategy.
/// `first` always precedes `second` in the boundary set.
#[derive(Debug, Clone)]
pub struct OverlapPair<'a> {
    pub first: &'a MultiPolygon<f64>,
    pub second: &'a MultiPolygon<f64>,
    pub first_original_area: f64,
    pub second_original_area: f64,
    pub intersection_area: f64,
    pub epsilon: f64,
}

/// Replacement geometries for both members of a pair.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub strategy: RepairStrategy,
    pub first: MultiPolygon<f64>,
    pub second: MultiPolygon<f64>,
}

/// A repair strategy: `None` when it cannot produce two valid, disjoint geometries.
pub type Strategy = fn(&OverlapPair<'_>) -> Option<Resolution>;

/// Strategies in the order they are attempted. An overlap no strategy resolves is dropped.
pub const REPAIR_CHAIN: [Strategy; 3] = [difference, smallest_relative_loss, buffer_then_difference];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    First,
    Second,
}

/// The later feature loses ties.
fn smaller(first: f64, second: f64) -> Side {
    if first < second { Side::First } else { Side::Second }
}

/// Subtract the winner from the loser; accept only a valid result disjoint from the winner.
fn carve(first: &MultiPolygon<f64>, second: &MultiPolygon<f64>, loser: Side, epsilon: f64) -> Option<(MultiPolygon<f64>, MultiPolygon<f64>)> {
    let (cut, winner) = match loser {
        Side::First => (first.difference(second), second),
        Side::Second => (second.difference(first), first),
    };

    check_polygonal(&cut).ok()?;
    if cut.intersection(winner).unsigned_area() > epsilon { return None }

    Some(match loser {
        Side::First => (cut, second.clone()),
        Side::Second => (first.clone(), cut),
    })
}

pub fn difference(pair: &OverlapPair<'_>) -> Option<Resolution> {
    let loser = smaller(pair.first_original_area, pair.second_original_area);
    let (first, second) = carve(pair.first, pair.second, loser, pair.epsilon)?;
    Some(Resolution { strategy: RepairStrategy::Difference, first, second })
}

pub fn smallest_relative_loss(pair: &OverlapPair<'_>) -> Option<Resolution> {
    let first_loss = pair.intersection_area / pair.first.unsigned_area();
    let second_loss = pair.intersection_area / pair.second.unsigned_area();
    let (first, second) = carve(pair.first, pair.second, smaller(first_loss, second_loss), pair.epsilon)?;
    Some(Resolution { strategy: RepairStrategy::SmallestRelativeLoss, first, second })
}

pub fn buffer_then_difference(pair: &OverlapPair<'_>) -> Option<Resolution> {
    let first = zero_buffer(pair.first);
    let second = zero_buffer(pair.second);
    if check_polygonal(&first).is_err() || check_polygonal(&second).is_err() { return None }

    let loser = smaller(pair.first_original_area, pair.second_original_area);
    let (first, second) = carve(&first, &second, loser, pair.epsilon)?;
    Some(Resolution { strategy: RepairStrategy::BufferRepair, first, second })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlapStats {
    pub candidate_pairs: usize,
    pub slivers: usize,
    pub major: usize,
    pub repaired: usize,
    pub dropped: usize,
}

impl OverlapStats {
    #[inline] pub fn overlaps(&self) -> usize { self.slivers + self.major }
}

#[derive(Debug, Clone)]
pub struct OverlapOutcome {
    pub boundaries: BoundarySet,
    pub audit: AuditLog,
    pub unresolved: Vec<OverlapUnresolved>,
    pub stats: OverlapStats,
}

/// Removes pairwise overlaps from a boundary set while keeping every unit
/// that can be kept, recording each change in an audit log.
#[derive(Debug, Clone, Copy)]
pub struct OverlapResolver {
    sliver_threshold: f64,
    epsilon: f64,
}

impl Default for OverlapResolver {
    fn default() -> Self { Self::from_config(&CleaningConfig::default()) }
}

impl OverlapResolver {
    pub fn new(sliver_threshold: f64, epsilon: f64) -> Self {
        Self { sliver_threshold, epsilon }
    }

    pub fn from_config(config: &CleaningConfig) -> Self {
        Self::new(config.sliver_threshold, config.overlap_epsilon)
    }

    #[inline] pub fn epsilon(&self) -> f64 { self.epsilon }

    pub fn severity(&self, intersection_area: f64, smaller_area: f64) -> OverlapSeverity {
        if intersection_area < self.sliver_threshold * smaller_area { OverlapSeverity::Sliver } else { OverlapSeverity::Major }
    }

    /// Pairs `(i, j, area)` whose intersection area exceeds epsilon.
    pub fn overlapping_pairs(&self, set: &BoundarySet) -> Vec<(usize, usize, f64)> {
        let features = set.features();
        set.candidate_pairs().into_iter()
            .filter_map(|(i, j)| {
                let area = features[i].geometry.intersection(&features[j].geometry).unsigned_area();
                (area > self.epsilon).then_some((i, j, area))
            })
            .collect()
    }

    /// Produce an overlap-free copy of `set`.
    ///
    /// Candidate pairs are visited in index order and each is tested against
    /// the current (already repaired) geometries. Geometries only shrink, so no
    /// new candidate pairs can appear along the way.
    pub fn resolve(&self, set: &BoundarySet) -> OverlapOutcome {
        let features = set.features();
        let original_areas: Vec<f64> = features.iter().map(BoundaryFeature::area).collect();
        let mut current: Vec<Option<MultiPolygon<f64>>> = features.iter().map(|f| Some(f.geometry.clone())).collect();

        let mut audit = AuditLog::new();
        let mut unresolved = Vec::new();
        let mut stats = OverlapStats::default();

        let pairs = set.candidate_pairs();
        stats.candidate_pairs = pairs.len();

        for (i, j) in pairs {
            let (Some(gi), Some(gj)) = (current[i].as_ref(), current[j].as_ref()) else { continue };

            let intersection_area = gi.intersection(gj).unsigned_area();
            if intersection_area <= self.epsilon { continue }

            let (ui, uj) = (&features[i].unit_id, &features[j].unit_id);
            let smaller_area = gi.unsigned_area().min(gj.unsigned_area());
            let severity = self.severity(intersection_area, smaller_area);
            match severity {
                OverlapSeverity::Sliver => {
                    stats.slivers += 1;
                    debug!(first = %ui, second = %uj, area = intersection_area, "[overlap] sliver");
                }
                OverlapSeverity::Major => {
                    stats.major += 1;
                    warn!(first = %ui, second = %uj, area = intersection_area,
                        pct = 100.0 * intersection_area / smaller_area, "[overlap] major overlap");
                }
            }

            let pair = OverlapPair {
                first: gi,
                second: gj,
                first_original_area: original_areas[i],
                second_original_area: original_areas[j],
                intersection_area,
                epsilon: self.epsilon,
            };

            match REPAIR_CHAIN.iter().find_map(|strategy| strategy(&pair)) {
                Some(resolution) => {
                    let reason = |other: &UnitId| format!(
                        "{} overlap with {other} ({intersection_area:.3e}) resolved by {}",
                        severity.as_str(), resolution.strategy.as_str(),
                    );
                    for (idx, other, geometry) in [(i, uj, &resolution.first), (j, ui, &resolution.second)] {
                        let Some(before) = current[idx].as_ref() else { continue };
                        if before == geometry { continue }
                        audit.record(
                            features[idx].unit_id.clone(),
                            AuditOperation::Repaired,
                            reason(other),
                            geometry.unsigned_area() - before.unsigned_area(),
                        );
                        stats.repaired += 1;
                    }
                    current[i] = Some(resolution.first);
                    current[j] = Some(resolution.second);
                }
                None => {
                    let drop = match smaller(original_areas[i], original_areas[j]) {
                        Side::First => i,
                        Side::Second => j,
                    };
                    let keep = if drop == i { j } else { i };
                    let failure = OverlapUnresolved {
                        kept: features[keep].unit_id.clone(),
                        dropped: features[drop].unit_id.clone(),
                        overlap_area: intersection_area,
                    };
                    warn!(kept = %failure.kept, dropped = %failure.dropped, "[overlap] no repair strategy succeeded");

                    let lost = current[drop].take().map_or(0.0, |g| g.unsigned_area());
                    audit.record(failure.dropped.clone(), AuditOperation::Dropped, failure.to_string(), -lost);
                    unresolved.push(failure);
                    stats.dropped += 1;
                }
            }
        }

        let kept = features.iter().zip(current)
            .filter_map(|(feature, geometry)| geometry.map(|g| {
                if g == feature.geometry { feature.clone() } else { feature.with_geometry(g) }
            }))
            .collect();

        info!(
            country = set.country(), overlaps = stats.overlaps(), slivers = stats.slivers,
            repaired = stats.repaired, dropped = stats.dropped, "[overlap] resolved",
        );

        OverlapOutcome { boundaries: BoundarySet::new(set.country(), kept), audit, unresolved, stats }
    }
}

#[cfg(test)]
mod tests {
    use geo::polygon;

    use super::*;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]])
    }

    fn pair<'a>(a: &'a MultiPolygon<f64>, b: &'a MultiPolygon<f64>) -> OverlapPair<'a> {
        OverlapPair {
            first: a,
            second: b,
            first_original_area: a.unsigned_area(),
            second_original_area: b.unsigned_area(),
            intersection_area: a.intersection(b).unsigned_area(),
            epsilon: 1e-10,
        }
    }

    #[test]
    fn difference_cuts_the_smaller_feature() {
        let (a, b) = (rect(0.0, 0.0, 4.0, 4.0), rect(3.0, 0.0, 5.0, 4.0));
        let res = difference(&pair(&a, &b)).unwrap();
        assert_eq!(res.first, a);
        assert!((res.second.unsigned_area() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn difference_fails_on_containment() {
        let (outer, inner) = (rect(0.0, 0.0, 4.0, 4.0), rect(1.0, 1.0, 2.0, 2.0));
        assert!(difference(&pair(&outer, &inner)).is_none());
        let res = smallest_relative_loss(&pair(&outer, &inner)).unwrap();
        assert_eq!(res.second, inner);
        assert!((res.first.unsigned_area() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn identical_geometries_cannot_be_repaired() {
        let (a, b) = (rect(0.0, 0.0, 1.0, 1.0), rect(0.0, 0.0, 1.0, 1.0));
        let p = pair(&a, &b);
        assert!(REPAIR_CHAIN.iter().all(|s| s(&p).is_none()));
    }

    #[test]
    fn severity_threshold() {
        let resolver = OverlapResolver::new(0.05, 1e-10);
        assert_eq!(resolver.severity(4.0, 100.0), OverlapSeverity::Sliver);
        assert_eq!(resolver.severity(5.0, 100.0), OverlapSeverity::Major);
    }
}
