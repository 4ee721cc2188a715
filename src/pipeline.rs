//! One country, end to end: clean boundaries, build weights, stream
//! measurements, fill unmatched units and write the outputs.
//!
//! Nothing is written until every step has succeeded, and the outputs are
//! committed together, so a failed country leaves its output directory as it
//! was.

use std::{path::{Path, PathBuf}, time::Instant};

use anyhow::{bail, Context, Result};
use tracing::{error, info, info_span};

use crate::audit::AuditLog;
use crate::boundary::{BoundaryCleaner, BoundarySet, CleaningReport};
use crate::config::{Config, InterpolationMethod};
use crate::grid::GridLattice;
use crate::interpolate::{InterpolationReport, MissingUnitInterpolator};
use crate::io::{
    aggregate_frame, audit_frame, boundaries_to_geojson, cleaning_report_frame, read_boundaries, weights_frame,
    write_csv, write_geojson, StagedOutputs,
};
use crate::stream::{AggregateTable, ChunkedStreamAggregator, CsvMeasurementSource, StreamStats};
use crate::types::{RawFeature, UnitId};
use crate::weights::{JoinPredicate, SpatialAggregator, WeightTable};

/// Where a country's raw boundaries come from.
#[derive(Debug, Clone)]
pub enum BoundaryInput {
    /// A shapefile or GeoJSON file.
    Path(PathBuf),
    Features(Vec<RawFeature>),
}

#[derive(Debug, Clone)]
pub struct CountryInputs {
    /// Country code, also the output subdirectory name.
    pub code: String,
    pub boundaries: BoundaryInput,
    /// Measurement CSV files; the grid lattice is taken from the first.
    pub measurements: Vec<PathBuf>,
}

impl CountryInputs {
    pub fn new(code: impl Into<String>, boundaries: BoundaryInput, measurements: Vec<PathBuf>) -> Self {
        Self { code: code.into(), boundaries, measurements }
    }
}

/// Output files of one country.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub boundaries: PathBuf,
    pub audit: PathBuf,
    pub cleaning_report: PathBuf,
    pub aggregates: PathBuf,
    pub weights: PathBuf,
}

impl OutputPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            boundaries: dir.join("boundaries.geojson"),
            audit: dir.join("audit.csv"),
            cleaning_report: dir.join("cleaning_report.csv"),
            aggregates: dir.join("aggregates.csv"),
            weights: dir.join("weights.csv"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub code: String,
    pub country: String,
    pub cleaning: CleaningReport,
    pub predicate: JoinPredicate,
    pub weight_entries: usize,
    pub matched_units: usize,
    pub unmatched_units: usize,
    pub stream: StreamStats,
    pub interpolation: InterpolationReport,
    pub aggregate_rows: usize,
    pub audit_entries: usize,
}

#[derive(Debug, Clone)]
pub struct CountryOutputs {
    pub paths: OutputPaths,
    pub summary: RunSummary,
}

/// Run every step for one country and write its outputs.
pub fn run_country(config: &Config, inputs: CountryInputs) -> Result<CountryOutputs> {
    let start = Instant::now();
    let CountryInputs { code, boundaries, measurements } = inputs;
    let country = config.country_name(&code).to_string();
    let _span = info_span!("country", code = %code).entered();

    config.validate().context("[pipeline::run_country] Invalid configuration")?;

    let raw = match boundaries {
        BoundaryInput::Path(path) => read_boundaries(&path, &config.fields, &country)?,
        BoundaryInput::Features(features) => features,
    };
    let cleaned = BoundaryCleaner::new(&config.cleaning).clean(&country, Some(&code), raw)
        .with_context(|| format!("[pipeline::run_country] Cleaning failed for {code}"))?;
    let boundaries = cleaned.boundaries;
    let mut audit = cleaned.audit;

    let Some(first) = measurements.first() else {
        bail!("[pipeline::run_country] No measurement files for {code}");
    };
    let lattice = {
        let mut source = CsvMeasurementSource::open(first, &config.stream)?;
        GridLattice::from_source(&mut source, &config.grid)
            .with_context(|| format!("[pipeline::run_country] Failed to build grid from {}", first.display()))?
    };

    let weights = SpatialAggregator::new(&boundaries, lattice.precision()).build(&lattice)
        .inspect_err(|err| error!(country = %country, "[pipeline] {err}"))?;

    let stream = ChunkedStreamAggregator::new(&weights, &config.stream.variables)
        .aggregate(open_sources(&measurements, config)?)?;
    let mut table = stream.table;

    let interpolator = MissingUnitInterpolator::new(&boundaries, &weights, &config.interpolation);
    let interpolation = match interpolator.method() {
        InterpolationMethod::Buffer => {
            let plan = interpolator.buffer_plan(&lattice, &table);
            let buffered = match &plan.weights {
                Some(buffer_weights) => ChunkedStreamAggregator::new(buffer_weights, &config.stream.variables)
                    .aggregate(open_sources(&measurements, config)?)?
                    .table,
                None => AggregateTable::new(config.stream.variables.clone()),
            };
            interpolator.absorb_buffered(&mut table, plan, &buffered)
        }
        _ => interpolator.fill(&mut table),
    };
    audit.extend(interpolation.to_audit());

    let paths = OutputPaths::in_dir(&config.country_output_dir(&code));
    write_outputs(config, &paths, &country, &boundaries, &cleaned.report, &weights, &table, &audit)?;

    let summary = RunSummary {
        code,
        country,
        cleaning: cleaned.report,
        predicate: weights.predicate(),
        weight_entries: weights.len(),
        matched_units: weights.matched_units().len(),
        unmatched_units: weights.unmatched_units().len(),
        stream: stream.stats,
        interpolation,
        aggregate_rows: table.len(),
        audit_entries: audit.len(),
    };
    info!(
        units = boundaries.len(), predicate = summary.predicate.as_str(), rows = summary.aggregate_rows,
        audit = summary.audit_entries, elapsed_ms = start.elapsed().as_millis() as u64, "[pipeline] country done",
    );
    Ok(CountryOutputs { paths, summary })
}

/// Run countries one after another. A failure is logged and returned for
/// that country only; the others still run.
pub fn run_countries(config: &Config, countries: Vec<CountryInputs>) -> Vec<(String, Result<CountryOutputs>)> {
    countries.into_iter().map(|inputs| {
        let code = inputs.code.clone();
        let result = run_country(config, inputs);
        if let Err(err) = &result {
            error!(code = %code, "[pipeline] country failed: {err:#}");
        }
        (code, result)
    }).collect()
}

fn open_sources(paths: &[PathBuf], config: &Config) -> Result<Vec<CsvMeasurementSource>> {
    paths.iter()
        .map(|p| CsvMeasurementSource::open(p, &config.stream))
        .collect()
}

fn write_outputs(
    config: &Config,
    paths: &OutputPaths,
    country: &str,
    boundaries: &BoundarySet,
    cleaning: &CleaningReport,
    weights: &WeightTable,
    table: &AggregateTable,
    audit: &AuditLog,
) -> Result<()> {
    let all_units: Vec<UnitId> = boundaries.unit_ids().cloned().collect();
    let mut aggregates = aggregate_frame(table, country, &all_units, config.stream.complete_date_index)?;
    let mut audit = audit_frame(audit)?;
    let mut cleaning = cleaning_report_frame(cleaning)?;
    let mut weights = weights_frame(weights)?;
    let geojson = boundaries_to_geojson(boundaries, &config.fields);

    let mut staged = StagedOutputs::new();
    staged.stage(&paths.boundaries, |w| write_geojson(&geojson, w))?;
    staged.stage(&paths.audit, |w| write_csv(&mut audit, w))?;
    staged.stage(&paths.cleaning_report, |w| write_csv(&mut cleaning, w))?;
    staged.stage(&paths.aggregates, |w| write_csv(&mut aggregates, w))?;
    staged.stage(&paths.weights, |w| write_csv(&mut weights, w))?;
    staged.commit().context("[pipeline::write_outputs] Failed to commit outputs")?;
    Ok(())
}
