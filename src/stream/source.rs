use std::{collections::VecDeque, fs::File, io::{BufRead, BufReader, Cursor}, path::{Path, PathBuf}, sync::Arc};

use anyhow::{bail, ensure, Context, Result};
use polars::{io::SerReader, prelude::{CsvReadOptions, CsvReader, DataType, Field, Schema}};

use crate::config::{StreamConfig, VariableSpec};
use crate::error::SchemaError;

use super::{MeasurementBatch, MeasurementRecord, VariableColumn};

/// Which expected variables a source carries. Fixed when the source is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSchema {
    variables: Vec<VariableSpec>,
    present: Vec<bool>,
}

impl SourceSchema {
    pub fn new(variables: Vec<VariableSpec>, present: Vec<bool>) -> Self {
        debug_assert_eq!(variables.len(), present.len());
        Self { variables, present }
    }

    #[inline] pub fn variables(&self) -> &[VariableSpec] { &self.variables }

    /// Column index of a variable, if the source carries it.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.variables.iter().zip(&self.present)
            .position(|(v, &present)| present && v.name == name)
    }

    pub fn missing(&self) -> impl Iterator<Item = &VariableSpec> {
        self.variables.iter().zip(&self.present)
            .filter(|&(_, &present)| !present)
            .map(|(v, _)| v)
    }

    pub fn errors(&self, source_name: &str) -> Vec<SchemaError> {
        self.missing()
            .map(|v| SchemaError::MissingVariable { variable: v.name.clone(), source_name: source_name.to_string() })
            .collect()
    }
}

/// A stream of measurement batches, each at most a configured number of rows.
pub trait MeasurementSource {
    /// Label used in logs and errors, e.g. a file name.
    fn name(&self) -> &str;

    fn schema(&self) -> &SourceSchema;

    /// The next batch, or `None` once the source is exhausted.
    fn next_batch(&mut self) -> Result<Option<MeasurementBatch>>;
}

impl<S: MeasurementSource + ?Sized> MeasurementSource for Box<S> {
    fn name(&self) -> &str { (**self).name() }

    fn schema(&self) -> &SourceSchema { (**self).schema() }

    fn next_batch(&mut self) -> Result<Option<MeasurementBatch>> { (**self).next_batch() }
}

/// Measurements held in memory, served in fixed-size batches.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    schema: SourceSchema,
    batches: VecDeque<MeasurementBatch>,
}

impl MemorySource {
    pub fn from_records(name: impl Into<String>, records: &[MeasurementRecord], variables: &[VariableSpec], batch_size: usize) -> Self {
        Self::from_batch(name, MeasurementBatch::from_records(records, variables), variables, batch_size)
    }

    /// Split a wide batch (aligned with `variables`) into batches of `batch_size` rows.
    pub fn from_batch(name: impl Into<String>, batch: MeasurementBatch, variables: &[VariableSpec], batch_size: usize) -> Self {
        let present = batch.variables.iter().map(VariableColumn::is_present).collect();
        let step = batch_size.max(1);
        let batches = (0..batch.len()).step_by(step)
            .map(|start| batch.slice(start, start + step))
            .collect();

        Self { name: name.into(), schema: SourceSchema::new(variables.to_vec(), present), batches }
    }
}

impl MeasurementSource for MemorySource {
    fn name(&self) -> &str { &self.name }

    fn schema(&self) -> &SourceSchema { &self.schema }

    fn next_batch(&mut self) -> Result<Option<MeasurementBatch>> {
        Ok(self.batches.pop_front())
    }
}

/// A CSV measurement file read through polars in bounded row windows.
///
/// The header is read once at open time to fix the schema. The file stays
/// open for the life of the source: each batch takes the next `batch_size`
/// lines from the same reader and parses only those, so a file is scanned once
/// however many batches it yields. Quoted fields may not span lines.
#[derive(Debug)]
pub struct CsvMeasurementSource {
    path: PathBuf,
    name: String,
    schema: SourceSchema,
    latitude: String,
    longitude: String,
    time: String,
    batch_size: usize,
    rows: usize,
    offset: usize,
    header: String,
    reader: BufReader<File>,
    /// Header plus the current window of data lines.
    buffer: Vec<u8>,
    line: String,
}

impl CsvMeasurementSource {
    pub fn open(path: &Path, config: &StreamConfig) -> Result<Self> {
        let name = path.file_name().map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        let (header, rows) = read_header(path)?;
        let columns = header_columns(&header);

        for column in [&config.latitude_column, &config.longitude_column, &config.time_column] {
            if !columns.iter().any(|h| h == column) {
                bail!(SchemaError::MissingRequired { column: column.clone(), source_name: name.clone() });
            }
        }

        let present = config.variables.iter()
            .map(|v| columns.iter().any(|h| h == &v.name))
            .collect();
        ensure!(config.batch_size > 0, "[stream::source] batch size must be positive");

        let mut reader = BufReader::new(File::open(path)
            .with_context(|| format!("[stream::source] Failed to open {}", path.display()))?);
        let mut skipped = String::new();
        reader.read_line(&mut skipped)
            .with_context(|| format!("[stream::source] Failed to read header of {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            name,
            schema: SourceSchema::new(config.variables.clone(), present),
            latitude: config.latitude_column.clone(),
            longitude: config.longitude_column.clone(),
            time: config.time_column.clone(),
            batch_size: config.batch_size,
            rows,
            offset: 0,
            header,
            reader,
            buffer: Vec::new(),
            line: String::new(),
        })
    }

    #[inline] pub fn path(&self) -> &Path { &self.path }

    /// Data rows in the file.
    #[inline] pub fn rows(&self) -> usize { self.rows }

    /// Data rows handed out so far.
    #[inline] pub fn offset(&self) -> usize { self.offset }

    fn polars_schema(&self) -> Schema {
        let present = self.schema.variables().iter()
            .filter(|v| self.schema.position(&v.name).is_some())
            .map(|v| Field::new(v.name.as_str().into(), DataType::Float64));

        Schema::from_iter([
            Field::new(self.latitude.as_str().into(), DataType::Float64),
            Field::new(self.longitude.as_str().into(), DataType::Float64),
            Field::new(self.time.as_str().into(), DataType::String),
        ].into_iter().chain(present))
    }

    /// Fill `buffer` with the header and up to `batch_size` non-blank lines.
    /// Returns the number of data lines taken.
    fn fill_window(&mut self) -> Result<usize> {
        self.buffer.clear();
        self.buffer.extend_from_slice(self.header.as_bytes());
        self.buffer.push(b'\n');

        let mut taken = 0;
        while taken < self.batch_size {
            self.line.clear();
            let read = self.reader.read_line(&mut self.line)
                .with_context(|| format!("[stream::source] Failed to read {}", self.path.display()))?;
            if read == 0 { break }
            let line = self.line.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() { continue }
            self.buffer.extend_from_slice(line.as_bytes());
            self.buffer.push(b'\n');
            taken += 1;
        }
        Ok(taken)
    }
}

impl MeasurementSource for CsvMeasurementSource {
    fn name(&self) -> &str { &self.name }

    fn schema(&self) -> &SourceSchema { &self.schema }

    fn next_batch(&mut self) -> Result<Option<MeasurementBatch>> {
        if self.fill_window()? == 0 { return Ok(None) }

        let options = CsvReadOptions::default()
            .with_has_header(true)
            .with_schema_overwrite(Some(Arc::new(self.polars_schema())));
        let df = CsvReader::new(Cursor::new(self.buffer.as_slice()))
            .with_options(options)
            .finish()
            .with_context(|| format!("[stream::source] Failed to read rows {}.. of {}", self.offset, self.path.display()))?;
        self.offset += df.height();

        let float_column = |name: &str| -> Result<Vec<Option<f64>>> {
            let column = df.column(name)?.cast(&DataType::Float64)?;
            Ok(column.f64()?.into_iter().collect())
        };

        let latitude = float_column(&self.latitude)?.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        let longitude = float_column(&self.longitude)?.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        let time = df.column(&self.time)?.cast(&DataType::String)?;
        let timestamps = time.str()?.into_iter().map(|t| t.unwrap_or_default().to_string()).collect();

        let variables = self.schema.variables().iter()
            .map(|v| match self.schema.position(&v.name) {
                Some(_) => float_column(&v.name).map(VariableColumn::Present),
                None => Ok(VariableColumn::Absent),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(MeasurementBatch { latitude, longitude, timestamps, variables }))
    }
}

/// The header line (BOM and line ending stripped), and the number of non-blank data rows.
fn read_header(path: &Path) -> Result<(String, usize)> {
    let file = File::open(path)
        .with_context(|| format!("[stream::source] Failed to open {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();

    let header = lines.next()
        .transpose()
        .with_context(|| format!("[stream::source] Failed to read header of {}", path.display()))?
        .with_context(|| format!("[stream::source] {} is empty", path.display()))?;

    let mut rows = 0;
    for line in lines {
        let line = line.with_context(|| format!("[stream::source] Failed to read {}", path.display()))?;
        if !line.trim().is_empty() { rows += 1 }
    }

    let header = header.trim_start_matches('\u{feff}').trim_end_matches('\r').to_string();
    Ok((header, rows))
}

fn header_columns(header: &str) -> Vec<String> {
    header.split(',')
        .map(|h| h.trim().trim_matches('"').to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn config(batch_size: usize) -> StreamConfig {
        StreamConfig { batch_size, ..Default::default() }
    }

    #[test]
    fn reads_csv_in_batches() {
        let file = write_csv("latitude,longitude,valid_time,temp_mean,temp_max,precip\n\
            0.0,0.0,2020-01-01,1.0,2.0,0.0\n\
            0.0,0.25,2020-01-01,3.0,4.0,\n\
            0.25,0.0,2020-01-02,5.0,6.0,1.5\n");
        let mut source = CsvMeasurementSource::open(file.path(), &config(2)).unwrap();
        assert_eq!(source.rows(), 3);
        assert_eq!(source.schema().missing().count(), 0);

        let first = source.next_batch().unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first.variables[2], VariableColumn::Present(vec![Some(0.0), None]));

        let second = source.next_batch().unwrap().unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second.timestamps, vec!["2020-01-02".to_string()]);
        assert_eq!(second.variables[0].get(0), Some(5.0));

        assert!(source.next_batch().unwrap().is_none());
    }

    #[test]
    fn windows_follow_one_another_and_skip_blank_lines() {
        let mut contents = String::from("\u{feff}latitude,longitude,valid_time,temp_mean\r\n");
        for i in 0..5 {
            contents.push_str(&format!("{i}.0,0.0,2020-01-01,{i}.5\r\n"));
            if i == 2 { contents.push_str("\r\n") }
        }
        let file = write_csv(&contents);
        let mut source = CsvMeasurementSource::open(file.path(), &config(2)).unwrap();
        assert_eq!(source.rows(), 5);

        let batches: Vec<MeasurementBatch> = std::iter::from_fn(|| source.next_batch().unwrap()).collect();
        let starts: Vec<f64> = batches.iter().map(|b| b.latitude[0]).collect();
        assert_eq!(batches.iter().map(MeasurementBatch::len).collect::<Vec<_>>(), vec![2, 2, 1]);
        assert_eq!(starts, vec![0.0, 2.0, 4.0]);
        assert_eq!(batches[2].variables[0].get(0), Some(4.5));
        assert_eq!(source.offset(), 5);
    }

    #[cfg(unix)]
    #[test]
    fn keeps_reading_from_the_handle_opened_once() {
        let file = write_csv("latitude,longitude,valid_time,temp_mean\n\
            0.0,0.0,2020-01-01,1.0\n\
            1.0,0.0,2020-01-01,2.0\n\
            2.0,0.0,2020-01-01,3.0\n");
        let mut source = CsvMeasurementSource::open(file.path(), &config(1)).unwrap();
        let path = file.path().to_path_buf();
        file.close().unwrap();
        assert!(!path.exists());

        let values: Vec<Option<f64>> = std::iter::from_fn(|| source.next_batch().unwrap())
            .map(|b| b.variables[0].get(0))
            .collect();
        assert_eq!(values, vec![Some(1.0), Some(2.0), Some(3.0)]);
    }

    #[test]
    fn missing_variable_is_absent() {
        let file = write_csv("latitude,longitude,valid_time,temp_mean\n0.0,0.0,2020-01-01,1.0\n");
        let mut source = CsvMeasurementSource::open(file.path(), &config(10)).unwrap();
        let missing: Vec<_> = source.schema().missing().map(|v| v.name.as_str()).collect();
        assert_eq!(missing, vec!["temp_max", "precip"]);
        assert_eq!(source.schema().errors("f.csv").len(), 2);

        let batch = source.next_batch().unwrap().unwrap();
        assert_eq!(batch.variables[1], VariableColumn::Absent);
        assert_eq!(batch.variables[0].get(0), Some(1.0));
    }

    #[test]
    fn missing_coordinates_are_fatal() {
        let file = write_csv("lat,longitude,valid_time,temp_mean\n0.0,0.0,2020-01-01,1.0\n");
        let err = CsvMeasurementSource::open(file.path(), &config(10)).unwrap_err();
        assert!(err.downcast_ref::<SchemaError>().is_some());
    }

    #[test]
    fn memory_source_splits_batches() {
        let records: Vec<_> = (0..5)
            .map(|i| MeasurementRecord::new(0.0, i as f64, "2020-01-01", "precip", Some(1.0)))
            .collect();
        let mut source = MemorySource::from_records("mem", &records, &StreamConfig::default().variables, 2);
        let sizes: Vec<usize> = std::iter::from_fn(|| source.next_batch().unwrap()).map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(source.schema().position("precip"), Some(2));
        assert_eq!(source.schema().position("temp_mean"), None);
    }
}
