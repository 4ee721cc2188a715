use ahash::AHashSet;
use geo::{Area, Geometry, MultiPolygon};
use tracing::{info, warn};

use crate::audit::{AuditLog, AuditOperation};
use crate::config::CleaningConfig;
use crate::error::CleaningError;
use crate::geom::{buffer_repair, check, check_polygonal};
use crate::types::{BoundaryFeature, RawFeature, UnitId};

use super::overlap::{OverlapResolver, OverlapStats};
use super::BoundarySet;

/// A convex hull replaces an invalid polygon only if it keeps this share of its area.
const HULL_MIN_KEEP: f64 = 0.5;

/// One pass of the cleaner.
#[derive(Debug, Clone, PartialEq)]
pub struct CleaningStep {
    pub name: &'static str,
    pub removed: usize,
    pub remaining: usize,
    pub details: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleaningReport {
    pub initial: usize,
    pub steps: Vec<CleaningStep>,
    pub overlap: OverlapStats,
}

impl CleaningReport {
    fn push(&mut self, name: &'static str, removed: usize, remaining: usize, details: impl Into<String>) {
        let details = details.into();
        info!(step = name, removed, remaining, "[clean] {details}");
        self.steps.push(CleaningStep { name, removed, remaining, details });
    }

    /// Features left after the last step.
    pub fn remaining(&self) -> usize {
        self.steps.last().map_or(self.initial, |s| s.remaining)
    }

    pub fn total_removed(&self) -> usize {
        self.steps.iter().map(|s| s.removed).sum()
    }

    pub fn step(&self, name: &str) -> Option<&CleaningStep> {
        self.steps.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct CleanedBoundaries {
    pub boundaries: BoundarySet,
    pub audit: AuditLog,
    pub report: CleaningReport,
}

/// A feature that has passed the identifier checks.
struct Identified {
    unit_id: UnitId,
    raw: RawFeature,
}

/// Turns raw boundary features for one country into a valid, overlap-free,
/// uniquely identified boundary set.
#[derive(Debug, Clone)]
pub struct BoundaryCleaner {
    config: CleaningConfig,
}

impl BoundaryCleaner {
    pub fn new(config: &CleaningConfig) -> Self {
        Self { config: config.clone() }
    }

    pub fn clean(&self, country: &str, country_code: Option<&str>, raw: Vec<RawFeature>) -> Result<CleanedBoundaries, CleaningError> {
        if raw.is_empty() {
            return Err(CleaningError::NoInput { country: country.to_string() });
        }

        let mut audit = AuditLog::new();
        let mut report = CleaningReport { initial: raw.len(), ..Default::default() };

        // Null geometries
        let before = raw.len();
        let mut features = Vec::with_capacity(before);
        for (idx, feature) in raw.into_iter().enumerate() {
            if feature.geometry.is_some() {
                features.push((idx, feature));
            } else {
                audit.record(label(idx, &feature), AuditOperation::Dropped, "null geometry", 0.0);
            }
        }
        report.push("null_geometry", before - features.len(), features.len(), "removed features without geometry");

        // Identifiers, falling back to the finest coarser-level id
        let before = features.len();
        let mut recovered = 0;
        let mut identified = Vec::with_capacity(before);
        for (idx, feature) in features {
            match feature.unit_id.clone().or_else(|| feature.parents.finest().map(UnitId::new)) {
                Some(unit_id) if !unit_id.as_str().is_empty() => {
                    if feature.unit_id.is_none() { recovered += 1 }
                    identified.push(Identified { unit_id, raw: feature });
                }
                _ => audit.record(label(idx, &feature), AuditOperation::Dropped, "no unit identifier at any level", -raw_area(feature.geometry.as_ref())),
            }
        }
        report.push("missing_id", before - identified.len(), identified.len(),
            format!("removed unidentifiable features; {recovered} ids taken from a coarser level"));

        // Country-code prefix
        if self.config.require_country_prefix {
            let before = identified.len();
            identified.retain(|f| {
                let Some(code) = f.raw.country_code.as_deref().or(country_code) else { return true };
                let ok = f.unit_id.has_prefix(code);
                if !ok {
                    audit.record(f.unit_id.clone(), AuditOperation::Dropped, format!("unit id does not start with country code {code}"), -raw_area(f.raw.geometry.as_ref()));
                }
                ok
            });
            report.push("country_code", before - identified.len(), identified.len(), "removed ids with a foreign country prefix");
        }

        // Duplicates (first occurrence wins)
        let before = identified.len();
        let mut seen = AHashSet::with_capacity(before);
        identified.retain(|f| {
            let first = seen.insert(f.unit_id.clone());
            if !first {
                audit.record(f.unit_id.clone(), AuditOperation::Dropped, "duplicate unit id", -raw_area(f.raw.geometry.as_ref()));
            }
            first
        });
        report.push("duplicate_id", before - identified.len(), identified.len(), "removed repeated unit ids");

        // Lenient validation
        let before = identified.len();
        let mut repaired = 0;
        let mut valid = Vec::with_capacity(before);
        for Identified { unit_id, raw } in identified {
            let before_area = raw_area(raw.geometry.as_ref());
            match check(raw.geometry.as_ref(), false) {
                Ok(geometry) => valid.push(BoundaryFeature::from_raw(raw, unit_id, geometry)),
                Err(strict) => match check(raw.geometry.as_ref(), true) {
                    Ok(geometry) => {
                        repaired += 1;
                        audit.record(unit_id.clone(), AuditOperation::Repaired, format!("{strict}; zero-width buffer repair"),
                            geometry.unsigned_area() - before_area);
                        valid.push(BoundaryFeature::from_raw(raw, unit_id, geometry));
                    }
                    Err(err) => match escalated_repair(raw.geometry.as_ref()) {
                        Some(geometry) => {
                            repaired += 1;
                            audit.record(unit_id.clone(), AuditOperation::Repaired, format!("{err}; buffer repair"),
                                geometry.unsigned_area() - before_area);
                            valid.push(BoundaryFeature::from_raw(raw, unit_id, geometry));
                        }
                        None => {
                            warn!(unit = %unit_id, "[clean] dropping geometry: {err}");
                            audit.record(unit_id, AuditOperation::Dropped, err.to_string(), -before_area);
                        }
                    },
                },
            }
        }
        report.push("invalid_geometry", before - valid.len(), valid.len(), format!("{repaired} geometries repaired"));

        // Small areas
        if let Some(percentile) = self.config.min_area_percentile {
            let before = valid.len();
            let mut areas: Vec<f64> = valid.iter().map(BoundaryFeature::area).collect();
            let threshold = quantile(&mut areas, percentile / 100.0);
            valid.retain(|f| {
                let area = f.area();
                let keep = area >= threshold;
                if !keep {
                    audit.record(f.unit_id.clone(), AuditOperation::Dropped, format!("area below {percentile}th percentile ({threshold:.3e})"), -area);
                }
                keep
            });
            report.push("small_area", before - valid.len(), valid.len(), format!("threshold {threshold:.3e}"));
        }

        // Overlaps
        let set = BoundarySet::new(country, valid);
        let resolver = OverlapResolver::from_config(&self.config);
        let outcome = resolver.resolve(&set);
        report.overlap = outcome.stats;
        report.push("overlap", set.len() - outcome.boundaries.len(), outcome.boundaries.len(),
            format!("{} overlaps, {} repairs", outcome.stats.overlaps(), outcome.stats.repaired));
        audit.extend(outcome.audit);

        // Final validation
        let before = outcome.boundaries.len();
        let mut survivors: Vec<BoundaryFeature> = Vec::with_capacity(before);
        for feature in outcome.boundaries.features() {
            match check_polygonal(&feature.geometry) {
                Ok(()) => survivors.push(feature.clone()),
                Err(err) => audit.record(feature.unit_id.clone(), AuditOperation::Dropped, format!("invalid after repair: {err}"), -feature.area()),
            }
        }
        let boundaries = if survivors.len() == before { outcome.boundaries } else { BoundarySet::new(country, survivors) };

        let residual = resolver.overlapping_pairs(&boundaries);
        if !residual.is_empty() {
            warn!(country, pairs = residual.len(), "[clean] overlaps remain after resolution");
        }
        report.push("final_validation", before - boundaries.len(), boundaries.len(),
            format!("{} residual overlaps, total area {:.6}", residual.len(), boundaries.total_area()));

        if boundaries.is_empty() {
            return Err(CleaningError::Empty { country: country.to_string() });
        }

        Ok(CleanedBoundaries { boundaries, audit, report })
    }
}

/// Audit label for a feature that may lack an id.
fn label(idx: usize, feature: &RawFeature) -> UnitId {
    feature.unit_id.clone().unwrap_or_else(|| UnitId::new(format!("<unidentified #{idx}>")))
}

/// Area of polygonal input; zero for anything else.
fn raw_area(geometry: Option<&Geometry<f64>>) -> f64 {
    match geometry {
        Some(g @ (Geometry::Polygon(_) | Geometry::MultiPolygon(_))) => g.unsigned_area(),
        _ => 0.0,
    }
}

/// Micro-buffer and convex-hull repair for polygonal input that a zero-width
/// buffer could not fix.
fn escalated_repair(geometry: Option<&Geometry<f64>>) -> Option<MultiPolygon<f64>> {
    let polygonal = match geometry? {
        Geometry::Polygon(p) => MultiPolygon::new(vec![p.clone()]),
        Geometry::MultiPolygon(mp) => mp.clone(),
        _ => return None,
    };
    if polygonal.0.iter().all(|p| p.exterior().0.is_empty()) { return None }
    buffer_repair(&polygonal, HULL_MIN_KEEP)
}

/// Linearly interpolated quantile, `q` in `[0, 1]`.
fn quantile(values: &mut [f64], q: f64) -> f64 {
    if values.is_empty() { return 0.0 }
    values.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let (lo, hi) = (pos.floor() as usize, pos.ceil() as usize);
    values[lo] + (values[hi] - values[lo]) * (pos - lo as f64)
}
