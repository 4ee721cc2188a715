//! Bounded-memory aggregation of gridded measurements onto administrative units.

mod accumulate;
mod aggregator;
mod batch;
mod source;
mod table;

pub use accumulate::{ExactSum, PartialAggregates, VariableAccumulator};
pub use aggregator::{ChunkedStreamAggregator, StreamOutcome, StreamStats};
pub use batch::{parse_timestamp, MeasurementBatch, MeasurementRecord, VariableColumn};
pub use source::{CsvMeasurementSource, MeasurementSource, MemorySource, SourceSchema};
pub use table::{AggregateRecord, AggregateTable, UnitSeries};
