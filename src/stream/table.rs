use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::config::VariableSpec;
use crate::types::UnitId;

/// Daily values of one unit, aligned with the table's variables.
pub type UnitSeries = BTreeMap<NaiveDate, Vec<Option<f64>>>;

/// One aggregated value in long form.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRecord {
    pub unit_id: UnitId,
    pub date: NaiveDate,
    pub variable: String,
    pub value: f64,
}

/// Per-unit, per-day aggregates for one country.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateTable {
    variables: Vec<VariableSpec>,
    rows: BTreeMap<UnitId, UnitSeries>,
    interpolated: BTreeSet<UnitId>,
}

impl AggregateTable {
    pub fn new(variables: Vec<VariableSpec>) -> Self {
        Self { variables, rows: BTreeMap::new(), interpolated: BTreeSet::new() }
    }

    #[inline] pub fn variables(&self) -> &[VariableSpec] { &self.variables }

    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v.name == name)
    }

    /// Replace the whole series of a unit.
    pub fn insert_series(&mut self, unit: UnitId, series: UnitSeries, interpolated: bool) {
        if interpolated {
            self.interpolated.insert(unit.clone());
        } else {
            self.interpolated.remove(&unit);
        }
        self.rows.insert(unit, series);
    }

    pub fn series(&self, unit: &UnitId) -> Option<&UnitSeries> { self.rows.get(unit) }

    pub fn value(&self, unit: &UnitId, date: NaiveDate, variable: &str) -> Option<f64> {
        let k = self.variable_index(variable)?;
        self.rows.get(unit)?.get(&date)?.get(k).copied().flatten()
    }

    pub fn contains_unit(&self, unit: &UnitId) -> bool { self.rows.contains_key(unit) }

    /// Whether `unit` has at least one non-null value on any day.
    pub fn has_values(&self, unit: &UnitId) -> bool {
        self.rows.get(unit)
            .is_some_and(|s| s.values().any(|values| values.iter().any(Option::is_some)))
    }

    pub fn units(&self) -> impl Iterator<Item = &UnitId> { self.rows.keys() }

    #[inline] pub fn unit_count(&self) -> usize { self.rows.len() }

    /// Number of (unit, date) rows.
    pub fn len(&self) -> usize { self.rows.values().map(BTreeMap::len).sum() }

    #[inline] pub fn is_empty(&self) -> bool { self.rows.is_empty() }

    #[inline] pub fn is_interpolated(&self, unit: &UnitId) -> bool { self.interpolated.contains(unit) }

    /// Every date any unit has a row for.
    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        self.rows.values().flat_map(|s| s.keys().copied()).collect()
    }

    /// Rows as `(unit, date, values)` in unit then date order.
    pub fn rows(&self) -> impl Iterator<Item = (&UnitId, NaiveDate, &[Option<f64>])> {
        self.rows.iter().flat_map(|(unit, series)| {
            series.iter().map(move |(date, values)| (unit, *date, values.as_slice()))
        })
    }

    /// Non-null values in long form.
    pub fn records(&self) -> impl Iterator<Item = AggregateRecord> + '_ {
        self.rows().flat_map(move |(unit, date, values)| {
            self.variables.iter().zip(values).filter_map(move |(var, value)| {
                value.map(|value| AggregateRecord { unit_id: unit.clone(), date, variable: var.name.clone(), value })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(2020, 1, d).unwrap() }

    fn table() -> AggregateTable {
        let mut table = AggregateTable::new(vec![VariableSpec::mean("t"), VariableSpec::max("tx")]);
        table.insert_series("a".into(), BTreeMap::from([(day(1), vec![Some(1.0), None]), (day(2), vec![Some(2.0), Some(3.0)])]), false);
        table
    }

    #[test]
    fn lookup_and_records() {
        let table = table();
        assert_eq!(table.value(&"a".into(), day(2), "tx"), Some(3.0));
        assert_eq!(table.value(&"a".into(), day(1), "tx"), None);
        assert_eq!(table.value(&"a".into(), day(1), "missing"), None);
        assert_eq!(table.len(), 2);
        assert_eq!(table.records().count(), 3);
        assert_eq!(table.dates().len(), 2);
        assert!(table.has_values(&"a".into()));
    }

    #[test]
    fn all_null_series_has_no_values() {
        let mut table = table();
        table.insert_series("b".into(), BTreeMap::from([(day(1), vec![None, None])]), false);
        assert!(table.contains_unit(&"b".into()));
        assert!(!table.has_values(&"b".into()));
        assert!(!table.has_values(&"c".into()));
    }
}
