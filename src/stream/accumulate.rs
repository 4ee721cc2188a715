use ahash::AHashMap;
use chrono::NaiveDate;

use crate::config::{AggregationKind, VariableSpec};
use crate::types::UnitId;

use super::{AggregateTable, UnitSeries};

/// Error-free floating point sum.
///
/// Keeps the running total as non-overlapping partials (Shewchuk) and rounds
/// once on read, so the value is the correctly rounded exact sum no matter in
/// which order terms were added or partial sums were merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExactSum {
    partials: Vec<f64>, // Increasing magnitude
}

impl ExactSum {
    pub fn new() -> Self { Self::default() }

    /// Add a finite value.
    pub fn add(&mut self, value: f64) {
        let mut x = value;
        let mut i = 0;
        for j in 0..self.partials.len() {
            let mut y = self.partials[j];
            if x.abs() < y.abs() {
                std::mem::swap(&mut x, &mut y);
            }
            let hi = x + y;
            let lo = y - (hi - x);
            if lo != 0.0 {
                self.partials[i] = lo;
                i += 1;
            }
            x = hi;
        }
        self.partials.truncate(i);
        self.partials.push(x);
    }

    pub fn merge(&mut self, other: &ExactSum) {
        for &p in &other.partials {
            self.add(p);
        }
    }

    /// The exact sum, rounded half-to-even to the nearest `f64`.
    pub fn value(&self) -> f64 {
        let p = &self.partials;
        let Some(&last) = p.last() else { return 0.0 };

        let mut n = p.len() - 1;
        let mut hi = last;
        let mut lo = 0.0;
        while n > 0 {
            let x = hi;
            n -= 1;
            let y = p[n];
            hi = x + y;
            lo = y - (hi - x);
            if lo != 0.0 { break }
        }

        if n > 0 && ((lo < 0.0 && p[n - 1] < 0.0) || (lo > 0.0 && p[n - 1] > 0.0)) {
            let y = lo * 2.0;
            let x = hi + y;
            if y == x - hi {
                hi = x;
            }
        }
        hi
    }
}

/// Running aggregate of one variable for one unit and day.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableAccumulator {
    Mean { weighted: ExactSum, weight: ExactSum },
    Max(Option<f64>),
}

impl VariableAccumulator {
    pub fn new(kind: AggregationKind) -> Self {
        match kind {
            AggregationKind::Mean => VariableAccumulator::Mean { weighted: ExactSum::new(), weight: ExactSum::new() },
            AggregationKind::Max => VariableAccumulator::Max(None),
        }
    }

    /// Add one cell's value with its share of the unit; non-finite values and
    /// non-positive shares are ignored.
    pub fn add(&mut self, value: f64, share: f64) {
        if !value.is_finite() || !(share > 0.0) { return }
        match self {
            VariableAccumulator::Mean { weighted, weight } => {
                weighted.add(share * value);
                weight.add(share);
            }
            VariableAccumulator::Max(max) => {
                *max = Some(max.map_or(value, |m| m.max(value)));
            }
        }
    }

    pub fn merge(&mut self, other: &VariableAccumulator) {
        match (self, other) {
            (VariableAccumulator::Mean { weighted, weight }, VariableAccumulator::Mean { weighted: w2, weight: s2 }) => {
                weighted.merge(w2);
                weight.merge(s2);
            }
            (VariableAccumulator::Max(max), VariableAccumulator::Max(Some(other))) => {
                *max = Some(max.map_or(*other, |m| m.max(*other)));
            }
            _ => {}
        }
    }

    /// Weighted mean (Σ share·value / Σ share) or maximum; `None` when nothing was added.
    pub fn value(&self) -> Option<f64> {
        match self {
            VariableAccumulator::Mean { weighted, weight } => {
                let weight = weight.value();
                (weight > 0.0).then(|| weighted.value() / weight)
            }
            VariableAccumulator::Max(max) => *max,
        }
    }
}

/// Accumulators keyed by (unit, date), one per configured variable.
#[derive(Debug, Clone)]
pub struct PartialAggregates {
    kinds: Vec<AggregationKind>,
    groups: AHashMap<(UnitId, NaiveDate), Vec<VariableAccumulator>>,
}

impl PartialAggregates {
    pub fn new(variables: &[VariableSpec]) -> Self {
        Self { kinds: variables.iter().map(|v| v.kind).collect(), groups: AHashMap::new() }
    }

    #[inline] pub fn len(&self) -> usize { self.groups.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.groups.is_empty() }

    pub fn add(&mut self, unit: &UnitId, date: NaiveDate, variable: usize, value: f64, share: f64) {
        let kinds = &self.kinds;
        let group = self.groups.entry((unit.clone(), date))
            .or_insert_with(|| kinds.iter().copied().map(VariableAccumulator::new).collect());
        if let Some(acc) = group.get_mut(variable) {
            acc.add(value, share);
        }
    }

    pub fn get(&self, unit: &UnitId, date: NaiveDate) -> Option<&[VariableAccumulator]> {
        self.groups.get(&(unit.clone(), date)).map(Vec::as_slice)
    }

    /// Fold another partial result into this one.
    pub fn merge(&mut self, other: PartialAggregates) {
        for (key, accs) in other.groups {
            match self.groups.get_mut(&key) {
                Some(mine) => mine.iter_mut().zip(&accs).for_each(|(a, b)| a.merge(b)),
                None => { self.groups.insert(key, accs); }
            }
        }
    }

    /// Final values, one row per (unit, date).
    pub fn into_table(self, variables: &[VariableSpec]) -> AggregateTable {
        let mut table = AggregateTable::new(variables.to_vec());
        let mut series: AHashMap<UnitId, UnitSeries> = AHashMap::new();
        for ((unit, date), accs) in self.groups {
            series.entry(unit).or_default().insert(date, accs.iter().map(VariableAccumulator::value).collect());
        }
        for (unit, s) in series {
            table.insert_series(unit, s, false);
        }
        table
    }
}
