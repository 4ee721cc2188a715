use std::fs;

use chrono::NaiveDate;
use geo::{polygon, MultiPolygon};

use climagg::boundary::BoundarySet;
use climagg::config::{InterpolationConfig, InterpolationMethod, StreamConfig, VariableSpec};
use climagg::error::SchemaError;
use climagg::grid::{CoordPrecision, GridLattice};
use climagg::interpolate::MissingUnitInterpolator;
use climagg::stream::{AggregateTable, ChunkedStreamAggregator, CsvMeasurementSource, MeasurementRecord, MemorySource};
use climagg::types::{BoundaryFeature, UnitId};
use climagg::weights::{SpatialAggregator, WeightTable};

fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]])
}

/// Units `a` and `b` each cover grid cells; `c` lies far north of the lattice.
fn fixture() -> (BoundarySet, GridLattice, WeightTable) {
    let boundaries = BoundarySet::new("X", vec![
        BoundaryFeature::new("a", "X", rect(0.0, 0.0, 1.0, 1.0)),
        BoundaryFeature::new("b", "X", rect(3.0, 0.0, 4.0, 1.0)),
        BoundaryFeature::new("c", "X", rect(0.0, 5.0, 1.0, 6.0)),
    ]);
    let lattice = GridLattice::from_coordinates([(0.5, 0.5), (0.5, 3.5)], CoordPrecision::default(), 0.25).unwrap();
    let weights = SpatialAggregator::new(&boundaries, lattice.precision()).build(&lattice).unwrap();
    (boundaries, lattice, weights)
}

fn records() -> Vec<MeasurementRecord> {
    let mut records = Vec::new();
    for d in 1..=5 {
        let ts = format!("2021-03-{d:02} 06:00:00");
        for (k, &(lat, lon)) in [(0.5, 0.5), (0.5, 3.5)].iter().enumerate() {
            let x = (d * 7 + k * 3) as f64;
            records.push(MeasurementRecord::new(lat, lon, ts.clone(), "t", Some(x / 3.0 + 0.1)));
            records.push(MeasurementRecord::new(lat, lon, ts.clone(), "tx", Some(x.sqrt())));
        }
    }
    records
}

fn aggregate(weights: &WeightTable, batch_size: usize) -> AggregateTable {
    let vars = vec![VariableSpec::mean("t"), VariableSpec::max("tx")];
    ChunkedStreamAggregator::new(weights, &vars)
        .aggregate([MemorySource::from_records("mem", &records(), &vars, batch_size)])
        .unwrap()
        .table
}

fn bits(table: &AggregateTable) -> Vec<(UnitId, NaiveDate, Vec<Option<u64>>)> {
    table.rows()
        .map(|(unit, date, values)| (unit.clone(), date, values.iter().map(|v| v.map(f64::to_bits)).collect()))
        .collect()
}

#[test]
fn batch_size_does_not_change_a_single_bit() {
    let (_, _, weights) = fixture();
    let whole = aggregate(&weights, 10);
    let half = aggregate(&weights, 5);
    let single = aggregate(&weights, 1);

    assert_eq!(whole.len(), 10);
    assert_eq!(bits(&whole), bits(&half));
    assert_eq!(bits(&whole), bits(&single));
}

#[test]
fn missing_variable_column_leaves_the_others_intact() {
    let (_, _, weights) = fixture();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("era5.csv");
    fs::write(&path, "latitude,longitude,valid_time,temp_mean\n\
        0.5,0.5,2021-03-01 00:00:00,10.0\n\
        0.5,0.5,2021-03-01 12:00:00,14.0\n\
        0.5,3.5,2021-03-01 00:00:00,20.0\n").unwrap();

    let config = StreamConfig { batch_size: 2, ..StreamConfig::default() };
    let source = CsvMeasurementSource::open(&path, &config).unwrap();
    assert_eq!(source.rows(), 3);

    let outcome = ChunkedStreamAggregator::new(&weights, &config.variables).aggregate([source]).unwrap();
    let day = NaiveDate::from_ymd_opt(2021, 3, 1).unwrap();

    assert!((outcome.table.value(&"a".into(), day, "temp_mean").unwrap() - 12.0).abs() < 1e-12);
    assert!((outcome.table.value(&"b".into(), day, "temp_mean").unwrap() - 20.0).abs() < 1e-12);
    assert_eq!(outcome.table.value(&"a".into(), day, "temp_max"), None);
    assert_eq!(outcome.stats.batches, 2);
    assert_eq!(outcome.stats.schema_errors, vec![
        SchemaError::MissingVariable { variable: "temp_max".into(), source_name: "era5.csv".into() },
        SchemaError::MissingVariable { variable: "precip".into(), source_name: "era5.csv".into() },
    ]);
}

#[test]
fn missing_time_column_rejects_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.csv");
    fs::write(&path, "latitude,longitude,temp_mean\n0.5,0.5,1.0\n").unwrap();

    let err = CsvMeasurementSource::open(&path, &StreamConfig::default()).unwrap_err();
    assert_eq!(
        err.downcast_ref::<SchemaError>(),
        Some(&SchemaError::MissingRequired { column: "valid_time".into(), source_name: "broken.csv".into() }),
    );
}

#[test]
fn nearest_neighbor_copies_the_neighbor_series_exactly() {
    let (boundaries, _, weights) = fixture();
    assert_eq!(weights.unmatched_units(), [UnitId::new("c")]);

    let mut table = aggregate(&weights, 4);
    let config = InterpolationConfig { method: InterpolationMethod::NearestNeighbor, ..InterpolationConfig::default() };
    let report = MissingUnitInterpolator::new(&boundaries, &weights, &config).fill(&mut table);

    assert!(report.is_complete());
    assert_eq!(report.resolved[0].sources, vec![UnitId::new("a")]);
    assert_eq!(table.series(&"c".into()), table.series(&"a".into()));
    assert!(table.is_interpolated(&"c".into()));
    assert!(!table.is_interpolated(&"a".into()));
}

#[test]
fn buffer_method_fills_from_a_second_pass() {
    let (boundaries, lattice, weights) = fixture();
    let mut table = aggregate(&weights, 4);
    // 5 degrees of buffer reaches the cell under `a`.
    let config = InterpolationConfig {
        method: InterpolationMethod::Buffer,
        buffer_radius_km: 5.0,
        km_per_degree: 1.0,
        ..InterpolationConfig::default()
    };
    let interpolator = MissingUnitInterpolator::new(&boundaries, &weights, &config);

    let plan = interpolator.buffer_plan(&lattice, &table);
    assert_eq!(plan.units, vec![UnitId::new("c")]);
    let buffered = aggregate(plan.weights.as_ref().unwrap(), 3);
    let report = interpolator.absorb_buffered(&mut table, plan, &buffered);

    assert!(report.is_complete());
    assert!(table.is_interpolated(&"c".into()));
    assert_eq!(table.series(&"c".into()).map(|s| s.len()), Some(5));
}
