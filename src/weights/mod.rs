mod aggregator;
mod table;

pub use aggregator::{JoinPredicate, SpatialAggregator};
pub use table::{WeightEntry, WeightTable};
