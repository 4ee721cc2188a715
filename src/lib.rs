#![doc = "climagg: clean administrative boundaries and aggregate gridded climate data onto them"]
pub mod audit;
pub mod boundary;
pub mod config;
pub mod error;
pub mod geom;
pub mod grid;
pub mod interpolate;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod stream;
pub mod types;
pub mod weights;

#[doc(inline)]
pub use audit::{AuditEntry, AuditLog, AuditOperation};

#[doc(inline)]
pub use boundary::{BoundaryCleaner, BoundarySet, OverlapResolver};

#[doc(inline)]
pub use config::Config;

#[doc(inline)]
pub use interpolate::{InterpolationReport, MissingUnitInterpolator};

#[doc(inline)]
pub use pipeline::{run_countries, run_country, BoundaryInput, CountryInputs, CountryOutputs};

#[doc(inline)]
pub use stream::{AggregateTable, ChunkedStreamAggregator, CsvMeasurementSource, MeasurementSource};

#[doc(inline)]
pub use types::{BoundaryFeature, RawFeature, UnitId};

#[doc(inline)]
pub use weights::{JoinPredicate, SpatialAggregator, WeightTable};
