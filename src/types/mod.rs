mod feature;
mod unit_id;

pub use feature::{BoundaryFeature, ParentIds, RawFeature};
pub use unit_id::UnitId;
