//! Error taxonomy.
//!
//! Local failures (`GeometryError`, `OverlapUnresolved`, `InterpolationFailure`,
//! `SchemaError`) are recorded and processing continues. Structural failures
//! (`JoinEmptyError`, `CleaningError`, `GridError`, `ConfigError`) abort the
//! affected country's run.

use crate::types::UnitId;

/// Why a geometry was rejected by the validator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("geometry is null")]
    Null,
    #[error("geometry is empty")]
    Empty,
    #[error("geometry is not polygonal ({0})")]
    NotPolygonal(&'static str),
    #[error("geometry is topologically invalid")]
    Invalid,
    #[error("geometry has non-positive area ({0:e})")]
    NonPositiveArea(f64),
}

/// No repair strategy could separate two overlapping units; `dropped` is removed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("overlap with {kept} unresolved after all repair strategies (overlap area {overlap_area:e}); dropped {dropped}")]
pub struct OverlapUnresolved {
    pub kept: UnitId,
    pub dropped: UnitId,
    pub overlap_area: f64,
}

/// Every join predicate produced zero matches for a country.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("spatial join for {country} produced no matches under any predicate (tried: {tried})")]
pub struct JoinEmptyError {
    pub country: String,
    pub tried: String,
}

/// An expected column is absent from a measurement source.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("variable column `{variable}` is missing from {source_name}")]
    MissingVariable { variable: String, source_name: String },
    #[error("required column `{column}` is missing from {source_name}")]
    MissingRequired { column: String, source_name: String },
}

/// Why an unmatched unit could not be given values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InterpolationFailure {
    #[error("no matched unit with data is available")]
    NoCandidates,
    #[error("buffered boundary could not be constructed")]
    BufferInvalid,
    #[error("buffered boundary intersects no grid cell")]
    BufferEmpty,
    #[error("buffered grid cells carried no measurements")]
    NoMeasurements,
    #[error("buffer interpolation requires a second measurement pass")]
    RequiresRestream,
    #[error("interpolation disabled")]
    Disabled,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CleaningError {
    #[error("no boundary features supplied for {country}")]
    NoInput { country: String },
    #[error("no boundary features remain for {country} after cleaning")]
    Empty { country: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GridError {
    #[error("measurement source {0} contains no grid coordinates")]
    EmptyLattice(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);
