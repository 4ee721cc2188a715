mod clean;
mod overlap;
mod set;

pub use clean::{BoundaryCleaner, CleanedBoundaries, CleaningReport, CleaningStep};
pub use overlap::{
    buffer_then_difference, difference, smallest_relative_loss,
    OverlapOutcome, OverlapPair, OverlapResolver, OverlapSeverity, OverlapStats,
    RepairStrategy, Resolution, Strategy, REPAIR_CHAIN,
};
pub use set::BoundarySet;
