//! Boundary readers and the atomic output writers.
//!
//! Readers return [`RawFeature`](crate::types::RawFeature)s for the cleaner;
//! writers stage every file of a country through [`StagedOutputs`] so that a
//! failed run leaves nothing behind.

mod atomic;
mod csv;
mod geojson;
mod shp;

use std::path::Path;

use anyhow::{bail, Result};

pub use atomic::{PendingWrite, StagedOutputs};
pub use csv::{aggregate_frame, audit_frame, cleaning_report_frame, weights_frame, write_csv};
pub use geojson::{boundaries_to_geojson, parse_feature_collection, read_geojson, write_geojson};
pub use shp::read_shapefile;

use crate::config::FieldNames;
use crate::types::RawFeature;

/// Read boundaries, picking the format from the file extension.
pub fn read_boundaries(path: &Path, fields: &FieldNames, country: &str) -> Result<Vec<RawFeature>> {
    let ext = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("shp") => read_shapefile(path, fields, country),
        Some("geojson") | Some("json") => read_geojson(path, fields, country),
        _ => bail!("[io::read_boundaries] Unsupported boundary format: {}", path.display()),
    }
}

/// Integral numbers print without a fractional part, so numeric ids stay ids.
pub(crate) fn number_text(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 { format!("{}", n as i64) } else { n.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_numbers_print_as_integers() {
        assert_eq!(number_text(204001.0), "204001");
        assert_eq!(number_text(2.5), "2.5");
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = read_boundaries(Path::new("units.kml"), &FieldNames::default(), "X").unwrap_err();
        assert!(err.to_string().contains("Unsupported boundary format"));
    }
}
