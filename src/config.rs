//! Run configuration.
//!
//! A `Config` is built once at startup (usually from a JSON file) and passed by
//! reference into every component; nothing reads process state on its own.

use std::{collections::{BTreeMap, BTreeSet}, fs, path::{Path, PathBuf}};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Country code -> country name.
    pub countries: BTreeMap<String, String>,
    pub paths: PathsConfig,
    pub fields: FieldNames,
    pub cleaning: CleaningConfig,
    pub grid: GridConfig,
    pub stream: StreamConfig,
    pub interpolation: InterpolationConfig,
    /// Log filter directive (`"info"`, `"climagg=debug,warn"`). `RUST_LOG` overrides it.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            countries: BTreeMap::new(),
            paths: PathsConfig::default(),
            fields: FieldNames::default(),
            cleaning: CleaningConfig::default(),
            grid: GridConfig::default(),
            stream: StreamConfig::default(),
            interpolation: InterpolationConfig::default(),
            log_level: "info".into(),
        }
    }
}

impl Config {
    /// Read and validate a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("[config] Failed to read {}", path.display()))?;
        let config: Config = serde_json::from_slice(&bytes)
            .with_context(|| format!("[config] Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Install the process-wide log subscriber at the configured level.
    pub fn init_logging(&self) {
        crate::logging::init(&self.log_level);
    }

    /// Name for a country code, falling back to the code itself.
    pub fn country_name<'a>(&'a self, code: &'a str) -> &'a str {
        self.countries.get(code).map(String::as_str).unwrap_or(code)
    }

    /// Directory receiving the outputs of one country.
    pub fn country_output_dir(&self, code: &str) -> PathBuf {
        self.paths.output_dir.join(code)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if EnvFilter::try_new(&self.log_level).is_err() {
            return Err(ConfigError(format!("log_level `{}` is not a valid filter", self.log_level)));
        }
        let c = &self.cleaning;
        if !(c.sliver_threshold > 0.0 && c.sliver_threshold < 1.0) {
            return Err(ConfigError(format!("sliver_threshold must be in (0, 1), got {}", c.sliver_threshold)));
        }
        if !(c.overlap_epsilon >= 0.0) {
            return Err(ConfigError(format!("overlap_epsilon must be >= 0, got {}", c.overlap_epsilon)));
        }
        if let Some(p) = c.min_area_percentile {
            if !(0.0..100.0).contains(&p) {
                return Err(ConfigError(format!("min_area_percentile must be in [0, 100), got {p}")));
            }
        }
        if self.grid.precision > 9 {
            return Err(ConfigError(format!("grid precision must be <= 9 decimals, got {}", self.grid.precision)));
        }
        if !(self.grid.default_step > 0.0) {
            return Err(ConfigError(format!("default grid step must be positive, got {}", self.grid.default_step)));
        }
        if self.stream.batch_size == 0 {
            return Err(ConfigError("batch_size must be positive".into()));
        }
        if self.stream.variables.is_empty() {
            return Err(ConfigError("at least one measurement variable is required".into()));
        }
        let mut seen = BTreeSet::new();
        for var in &self.stream.variables {
            if !seen.insert(var.name.as_str()) {
                return Err(ConfigError(format!("duplicate variable `{}`", var.name)));
            }
        }
        let i = &self.interpolation;
        if !(i.buffer_radius_km > 0.0) || !(i.km_per_degree > 0.0) {
            return Err(ConfigError("buffer radius and km_per_degree must be positive".into()));
        }
        if i.max_neighbors == 0 {
            return Err(ConfigError("max_neighbors must be at least 1".into()));
        }
        if !(i.idw_power > 0.0) {
            return Err(ConfigError(format!("idw_power must be positive, got {}", i.idw_power)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self { output_dir: PathBuf::from("output") }
    }
}

/// Attribute names used by the boundary loaders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldNames {
    pub unit_id: String,
    pub country: String,
    pub country_code: String,
    pub level1: String,
    pub level2: String,
    pub name: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            unit_id: "SMALLEST".into(),
            country: "COUNTRY".into(),
            country_code: "CNTRY_CD".into(),
            level1: "GEOLEV1".into(),
            level2: "GEOLEV2".into(),
            name: "BPL_NAME".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    /// Overlaps below this fraction of the smaller polygon are slivers.
    pub sliver_threshold: f64,
    /// Intersection areas at or below this (squared degrees) are not overlaps.
    pub overlap_epsilon: f64,
    /// Drop units whose area falls below this percentile of the country's areas.
    pub min_area_percentile: Option<f64>,
    /// Drop units whose id does not start with their country code.
    pub require_country_prefix: bool,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            sliver_threshold: 0.05,
            overlap_epsilon: 1e-10,
            min_area_percentile: None,
            require_country_prefix: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Decimal places grid coordinates are rounded to on both sides of the join.
    pub precision: u32,
    /// Cell size (degrees) used when an axis has a single coordinate.
    pub default_step: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { precision: 3, default_step: 0.25 }
    }
}

/// How a variable is combined within one unit/day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    /// Weight-normalized mean across matched cells.
    Mean,
    /// Maximum across matched cells.
    Max,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    pub kind: AggregationKind,
}

impl VariableSpec {
    pub fn mean(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: AggregationKind::Mean }
    }

    pub fn max(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: AggregationKind::Max }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub batch_size: usize,
    pub variables: Vec<VariableSpec>,
    pub latitude_column: String,
    pub longitude_column: String,
    pub time_column: String,
    /// Emit every unit for every date in the observed range, with nulls where missing.
    pub complete_date_index: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            batch_size: 100_000,
            variables: vec![
                VariableSpec::mean("temp_mean"),
                VariableSpec::max("temp_max"),
                VariableSpec::mean("precip"),
            ],
            latitude_column: "latitude".into(),
            longitude_column: "longitude".into(),
            time_column: "valid_time".into(),
            complete_date_index: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMethod {
    NearestNeighbor,
    Buffer,
    Idw,
    None,
}

impl InterpolationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterpolationMethod::NearestNeighbor => "nearest_neighbor",
            InterpolationMethod::Buffer => "buffer",
            InterpolationMethod::Idw => "idw",
            InterpolationMethod::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationConfig {
    pub method: InterpolationMethod,
    pub buffer_radius_km: f64,
    pub km_per_degree: f64,
    pub max_neighbors: usize,
    pub idw_power: f64,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            method: InterpolationMethod::NearestNeighbor,
            buffer_radius_km: 50.0,
            km_per_degree: 111.32,
            max_neighbors: 5,
            idw_power: 2.0,
        }
    }
}

impl InterpolationConfig {
    /// Buffer radius converted to degrees.
    #[inline] pub fn buffer_radius_deg(&self) -> f64 { self.buffer_radius_km / self.km_per_degree }
}
