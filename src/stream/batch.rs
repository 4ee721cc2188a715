use ahash::AHashMap;
use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::config::VariableSpec;

/// One measured value in long form.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: String,
    pub variable: String,
    pub value: Option<f64>,
}

impl MeasurementRecord {
    pub fn new(latitude: f64, longitude: f64, timestamp: impl Into<String>, variable: impl Into<String>, value: Option<f64>) -> Self {
        Self { latitude, longitude, timestamp: timestamp.into(), variable: variable.into(), value }
    }
}

/// Values of one expected variable within a batch.
/// Whether a variable is present is fixed when its source is opened.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableColumn {
    Present(Vec<Option<f64>>),
    Absent,
}

impl VariableColumn {
    #[inline] pub fn is_present(&self) -> bool { matches!(self, VariableColumn::Present(_)) }

    #[inline]
    pub fn get(&self, row: usize) -> Option<f64> {
        match self {
            VariableColumn::Present(values) => values.get(row).copied().flatten(),
            VariableColumn::Absent => None,
        }
    }

    fn slice(&self, start: usize, end: usize) -> Self {
        match self {
            VariableColumn::Present(values) => VariableColumn::Present(values[start..end].to_vec()),
            VariableColumn::Absent => VariableColumn::Absent,
        }
    }
}

/// A bounded chunk of measurements in wide, columnar form.
/// `variables` is aligned with the variable list of the source's schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementBatch {
    pub latitude: Vec<f64>,
    pub longitude: Vec<f64>,
    pub timestamps: Vec<String>,
    pub variables: Vec<VariableColumn>,
}

impl MeasurementBatch {
    #[inline] pub fn len(&self) -> usize { self.latitude.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.latitude.is_empty() }

    pub fn coordinates(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.latitude.iter().copied().zip(self.longitude.iter().copied())
    }

    /// Pivot long-form records into one wide batch, one row per distinct
    /// (latitude, longitude, timestamp) in first-seen order. Variables no
    /// record mentions are `Absent`; records for unknown variables are ignored.
    pub fn from_records(records: &[MeasurementRecord], variables: &[VariableSpec]) -> Self {
        let mentioned: Vec<bool> = variables.iter()
            .map(|v| records.iter().any(|r| r.variable == v.name))
            .collect();
        let position: AHashMap<&str, usize> = variables.iter().enumerate()
            .map(|(i, v)| (v.name.as_str(), i))
            .collect();

        let mut rows: AHashMap<(u64, u64, &str), usize> = AHashMap::new();
        let mut batch = MeasurementBatch::default();
        let mut values: Vec<Vec<Option<f64>>> = vec![Vec::new(); variables.len()];

        for record in records {
            let key = (record.latitude.to_bits(), record.longitude.to_bits(), record.timestamp.as_str());
            let row = *rows.entry(key).or_insert_with(|| {
                batch.latitude.push(record.latitude);
                batch.longitude.push(record.longitude);
                batch.timestamps.push(record.timestamp.clone());
                values.iter_mut().for_each(|column| column.push(None));
                batch.latitude.len() - 1
            });
            if let Some(&k) = position.get(record.variable.as_str()) {
                values[k][row] = record.value;
            }
        }

        batch.variables = values.into_iter().zip(mentioned)
            .map(|(column, present)| if present { VariableColumn::Present(column) } else { VariableColumn::Absent })
            .collect();
        batch
    }

    /// Rows `start..end` as a new batch.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.len());
        let start = start.min(end);
        Self {
            latitude: self.latitude[start..end].to_vec(),
            longitude: self.longitude[start..end].to_vec(),
            timestamps: self.timestamps[start..end].to_vec(),
            variables: self.variables.iter().map(|c| c.slice(start, end)).collect(),
        }
    }
}

/// Calendar date of a timestamp. Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`
/// (also with a `T` separator), and bare `YYYY-MM-DD`.
pub fn parse_timestamp(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}
