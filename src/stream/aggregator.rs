use ahash::AHashMap;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::config::VariableSpec;
use crate::error::SchemaError;
use crate::weights::WeightTable;

use super::{parse_timestamp, AggregateTable, MeasurementBatch, MeasurementSource, PartialAggregates, SourceSchema};

/// Counters for one streaming run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamStats {
    pub sources: usize,
    pub batches: usize,
    pub rows_read: usize,
    /// Rows whose cell has at least one weight entry.
    pub rows_matched: usize,
    pub rows_unmatched: usize,
    pub bad_timestamps: usize,
    pub schema_errors: Vec<SchemaError>,
}

impl StreamStats {
    pub fn absorb(&mut self, other: StreamStats) {
        self.sources += other.sources;
        self.batches += other.batches;
        self.rows_read += other.rows_read;
        self.rows_matched += other.rows_matched;
        self.rows_unmatched += other.rows_unmatched;
        self.bad_timestamps += other.bad_timestamps;
        self.schema_errors.extend(other.schema_errors);
    }
}

#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub table: AggregateTable,
    pub stats: StreamStats,
}

/// Joins measurement batches to a weight table and reduces them to one row
/// per unit and day, holding at most one batch of raw rows at a time.
#[derive(Debug, Clone)]
pub struct ChunkedStreamAggregator<'a> {
    weights: &'a WeightTable,
    variables: Vec<VariableSpec>,
}

impl<'a> ChunkedStreamAggregator<'a> {
    pub fn new(weights: &'a WeightTable, variables: &[VariableSpec]) -> Self {
        Self { weights, variables: variables.to_vec() }
    }

    #[inline] pub fn variables(&self) -> &[VariableSpec] { &self.variables }

    /// Stream every source to exhaustion and return the merged aggregates.
    ///
    /// Partial sums are exact, so the result does not depend on the batch size
    /// or on the order in which batches arrive.
    pub fn aggregate<S: MeasurementSource>(&self, sources: impl IntoIterator<Item = S>) -> Result<StreamOutcome> {
        let mut totals = PartialAggregates::new(&self.variables);
        let mut stats = StreamStats::default();

        for mut source in sources {
            self.aggregate_source(&mut source, &mut totals, &mut stats)?;
        }

        let table = totals.into_table(&self.variables);
        info!(
            country = self.weights.country(), sources = stats.sources, batches = stats.batches,
            rows = stats.rows_read, matched = stats.rows_matched, units = table.unit_count(), "[stream] aggregated",
        );
        Ok(StreamOutcome { table, stats })
    }

    /// Stream one source into `totals`.
    pub fn aggregate_source<S: MeasurementSource + ?Sized>(
        &self,
        source: &mut S,
        totals: &mut PartialAggregates,
        stats: &mut StreamStats,
    ) -> Result<()> {
        stats.sources += 1;
        for err in source.schema().errors(source.name()) {
            warn!(source = source.name(), "[stream] {err}; variable skipped for this source");
            stats.schema_errors.push(err);
        }

        let mut index = 0;
        while let Some(batch) = source.next_batch()
            .with_context(|| format!("[stream::aggregate] Failed to read batch {index} of {}", source.name()))?
        {
            let partial = self.aggregate_batch(&batch, source.schema(), stats);
            debug!(source = source.name(), batch = index, rows = batch.len(), groups = partial.len(), "[stream] batch");
            totals.merge(partial);
            stats.batches += 1;
            index += 1;
        }
        Ok(())
    }

    /// Aggregate a single batch into a partial result.
    pub fn aggregate_batch(&self, batch: &MeasurementBatch, schema: &SourceSchema, stats: &mut StreamStats) -> PartialAggregates {
        let precision = self.weights.precision();
        let columns: Vec<(usize, usize)> = self.variables.iter().enumerate()
            .filter_map(|(k, v)| schema.position(&v.name).map(|col| (k, col)))
            .filter(|&(_, col)| batch.variables.get(col).is_some_and(|c| c.is_present()))
            .collect();

        let mut partial = PartialAggregates::new(&self.variables);
        let mut dates: AHashMap<&str, Option<NaiveDate>> = AHashMap::new();

        for row in 0..batch.len() {
            stats.rows_read += 1;

            let date = *dates.entry(batch.timestamps[row].as_str())
                .or_insert_with_key(|text| parse_timestamp(text));
            let Some(date) = date else {
                stats.bad_timestamps += 1;
                continue;
            };

            let Some(cell) = precision.cell_id(batch.latitude[row], batch.longitude[row]) else {
                stats.rows_unmatched += 1;
                continue;
            };
            let mut entries = self.weights.for_cell(&cell).peekable();
            if entries.peek().is_none() {
                stats.rows_unmatched += 1;
                continue;
            }
            stats.rows_matched += 1;

            for entry in entries {
                for &(k, col) in &columns {
                    if let Some(value) = batch.variables[col].get(row) {
                        partial.add(&entry.unit, date, k, value, entry.share);
                    }
                }
            }
        }

        partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::CoordPrecision;
    use crate::stream::{MeasurementRecord, MemorySource};
    use crate::weights::{JoinPredicate, WeightEntry};

    fn weights() -> WeightTable {
        let p = CoordPrecision::default();
        let entry = |lat: f64, lon: f64, unit: &str, share: f64| WeightEntry {
            cell: p.cell_id(lat, lon).unwrap(), unit: unit.into(), share, intersection_area: share, cell_area: 1.0,
        };
        WeightTable::new("X", p, JoinPredicate::Intersects, vec![
            entry(0.0, 0.0, "a", 0.7),
            entry(0.0, 0.0, "b", 0.3),
            entry(0.0, 1.0, "b", 0.5),
        ], Vec::new())
    }

    #[test]
    fn weighted_mean_and_max() {
        let weights = weights();
        let vars = vec![VariableSpec::mean("t"), VariableSpec::max("tx")];
        let records = vec![
            MeasurementRecord::new(0.0, 0.0, "2020-01-01 00:00:00", "t", Some(10.0)),
            MeasurementRecord::new(0.0, 0.0, "2020-01-01 00:00:00", "tx", Some(12.0)),
            MeasurementRecord::new(0.0, 1.0, "2020-01-01 12:00:00", "t", Some(20.0)),
            MeasurementRecord::new(0.0, 1.0, "2020-01-01 12:00:00", "tx", Some(25.0)),
            MeasurementRecord::new(5.0, 5.0, "2020-01-01 00:00:00", "t", Some(99.0)),
            MeasurementRecord::new(0.0, 0.0, "not a date", "t", Some(99.0)),
        ];
        let source = MemorySource::from_records("mem", &records, &vars, 2);
        let outcome = ChunkedStreamAggregator::new(&weights, &vars).aggregate([source]).unwrap();

        let day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let t = &outcome.table;
        assert!((t.value(&"a".into(), day, "t").unwrap() - 10.0).abs() < 1e-12);
        assert!((t.value(&"b".into(), day, "t").unwrap() - (0.3 * 10.0 + 0.5 * 20.0) / 0.8).abs() < 1e-12);
        assert_eq!(t.value(&"b".into(), day, "tx"), Some(25.0));
        assert_eq!(outcome.stats.rows_read, 4);
        assert_eq!(outcome.stats.rows_matched, 2);
        assert_eq!(outcome.stats.rows_unmatched, 1);
        assert_eq!(outcome.stats.bad_timestamps, 1);
        assert_eq!(outcome.stats.batches, 2);
    }

    #[test]
    fn absent_variable_is_reported_and_others_proceed() {
        let weights = weights();
        let vars = vec![VariableSpec::mean("t"), VariableSpec::mean("precip")];
        let records = vec![MeasurementRecord::new(0.0, 0.0, "2020-01-01", "t", Some(4.0))];
        let source = MemorySource::from_records("mem", &records, &vars, 10);
        let outcome = ChunkedStreamAggregator::new(&weights, &vars).aggregate([source]).unwrap();

        let day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert!((outcome.table.value(&"a".into(), day, "t").unwrap() - 4.0).abs() < 1e-12);
        assert_eq!(outcome.table.value(&"a".into(), day, "precip"), None);
        assert_eq!(outcome.stats.schema_errors, vec![SchemaError::MissingVariable {
            variable: "precip".into(), source_name: "mem".into(),
        }]);
    }
}
