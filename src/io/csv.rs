//! CSV outputs: audit log, cleaning report, weight table and per-unit/day aggregates.

use std::{collections::BTreeSet, io::Write};

use anyhow::{Context, Result};
use chrono::Datelike;
use polars::{frame::DataFrame, io::SerWriter, prelude::{Column, CsvWriter, NamedFrom}, series::Series};

use crate::audit::AuditLog;
use crate::boundary::CleaningReport;
use crate::stream::AggregateTable;
use crate::types::UnitId;
use crate::weights::WeightTable;

/// Write a DataFrame as CSV with a header row.
pub fn write_csv(df: &mut DataFrame, writer: impl Write) -> Result<()> {
    CsvWriter::new(writer)
        .finish(df)
        .context("[io::csv::write_csv] Failed to write CSV")
}

/// `unit_id, operation, reason, area_delta`, one row per audit entry.
pub fn audit_frame(audit: &AuditLog) -> Result<DataFrame> {
    let entries = audit.entries();
    let df = DataFrame::new(vec![
        Series::new("unit_id".into(), entries.iter().map(|e| e.unit_id.as_str()).collect::<Vec<_>>()).into(),
        Series::new("operation".into(), entries.iter().map(|e| e.operation.as_str()).collect::<Vec<_>>()).into(),
        Series::new("reason".into(), entries.iter().map(|e| e.reason.as_str()).collect::<Vec<_>>()).into(),
        Series::new("area_delta".into(), entries.iter().map(|e| e.area_delta).collect::<Vec<_>>()).into(),
    ]).context("[io::csv::audit_frame] Failed to build audit frame")?;
    Ok(df)
}

/// `step, removed, remaining, details`: an `input` row with the raw feature
/// count, then one row per cleaning step.
pub fn cleaning_report_frame(report: &CleaningReport) -> Result<DataFrame> {
    let steps = report.steps.iter().map(|s| (s.name, s.removed as u64, s.remaining as u64, s.details.as_str()));
    let rows: Vec<(&str, u64, u64, &str)> = std::iter::once(("input", 0, report.initial as u64, ""))
        .chain(steps)
        .collect();

    let df = DataFrame::new(vec![
        Series::new("step".into(), rows.iter().map(|r| r.0).collect::<Vec<_>>()).into(),
        Series::new("removed".into(), rows.iter().map(|r| r.1).collect::<Vec<_>>()).into(),
        Series::new("remaining".into(), rows.iter().map(|r| r.2).collect::<Vec<_>>()).into(),
        Series::new("details".into(), rows.iter().map(|r| r.3).collect::<Vec<_>>()).into(),
    ]).context("[io::csv::cleaning_report_frame] Failed to build cleaning report frame")?;
    Ok(df)
}

/// One row per (cell, unit) weight.
pub fn weights_frame(weights: &WeightTable) -> Result<DataFrame> {
    let p = weights.precision();
    let entries = weights.entries();
    let df = DataFrame::new(vec![
        Series::new("latitude".into(), entries.iter().map(|e| e.cell.latitude(p)).collect::<Vec<_>>()).into(),
        Series::new("longitude".into(), entries.iter().map(|e| e.cell.longitude(p)).collect::<Vec<_>>()).into(),
        Series::new("unit_id".into(), entries.iter().map(|e| e.unit.as_str()).collect::<Vec<_>>()).into(),
        Series::new("share".into(), entries.iter().map(|e| e.share).collect::<Vec<_>>()).into(),
        Series::new("intersection_area".into(), entries.iter().map(|e| e.intersection_area).collect::<Vec<_>>()).into(),
        Series::new("cell_area".into(), entries.iter().map(|e| e.cell_area).collect::<Vec<_>>()).into(),
    ]).context("[io::csv::weights_frame] Failed to build weights frame")?;
    Ok(df)
}

/// `unit_id, country, year, month, day, <variables...>, interpolated`.
///
/// With `complete` set, every unit of `all_units` (plus any unit already in
/// the table) gets a row for every day between the first and last observed
/// date; values that were never produced stay null.
pub fn aggregate_frame<'a>(table: &'a AggregateTable, country: &str, all_units: &'a [UnitId], complete: bool) -> Result<DataFrame> {
    let n_vars = table.variables().len();
    let mut unit_col: Vec<&str> = Vec::new();
    let mut year: Vec<i32> = Vec::new();
    let mut month: Vec<u32> = Vec::new();
    let mut day: Vec<u32> = Vec::new();
    let mut values: Vec<Vec<Option<f64>>> = vec![Vec::new(); n_vars];
    let mut interpolated: Vec<bool> = Vec::new();

    let mut push = |unit: &'a UnitId, date: chrono::NaiveDate, row: Option<&[Option<f64>]>| {
        unit_col.push(unit.as_str());
        year.push(date.year());
        month.push(date.month());
        day.push(date.day());
        for (k, column) in values.iter_mut().enumerate() {
            column.push(row.and_then(|r| r.get(k).copied().flatten()));
        }
        interpolated.push(table.is_interpolated(unit));
    };

    let dates = table.dates();
    match (complete, dates.first(), dates.last()) {
        (true, Some(&first), Some(&last)) => {
            let units: BTreeSet<&UnitId> = table.units().chain(all_units).collect();
            for unit in units {
                let series = table.series(unit);
                for date in first.iter_days().take_while(|d| *d <= last) {
                    push(unit, date, series.and_then(|s| s.get(&date)).map(Vec::as_slice));
                }
            }
        }
        _ => {
            for (unit, date, row) in table.rows() {
                push(unit, date, Some(row));
            }
        }
    }

    let mut columns: Vec<Column> = vec![
        Series::new("unit_id".into(), &unit_col).into(),
        Series::new("country".into(), vec![country; unit_col.len()]).into(),
        Series::new("year".into(), year).into(),
        Series::new("month".into(), month).into(),
        Series::new("day".into(), day).into(),
    ];
    for (spec, column) in table.variables().iter().zip(values) {
        columns.push(Series::new(spec.name.as_str().into(), column).into());
    }
    columns.push(Series::new("interpolated".into(), interpolated).into());

    DataFrame::new(columns).context("[io::csv::aggregate_frame] Failed to build aggregate frame")
}
