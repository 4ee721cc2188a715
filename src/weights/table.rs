use std::collections::BTreeSet;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::grid::{CoordPrecision, GridCellId};
use crate::types::UnitId;

use super::JoinPredicate;

/// Area weight of one grid cell for one administrative unit.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightEntry {
    pub cell: GridCellId,
    pub unit: UnitId,
    /// Fraction of the cell attributed to the unit, in `(0, 1]`.
    pub share: f64,
    pub intersection_area: f64,
    pub cell_area: f64,
}

/// Grid cell to unit weights for one country, indexed by cell.
/// Read-only once built.
#[derive(Debug, Clone)]
pub struct WeightTable {
    country: String,
    precision: CoordPrecision,
    predicate: JoinPredicate,
    entries: Vec<WeightEntry>,
    by_cell: AHashMap<GridCellId, SmallVec<[usize; 4]>>,
    unmatched: Vec<UnitId>,
}

impl WeightTable {
    pub fn new(
        country: impl Into<String>,
        precision: CoordPrecision,
        predicate: JoinPredicate,
        mut entries: Vec<WeightEntry>,
        unmatched: Vec<UnitId>,
    ) -> Self {
        entries.sort_by(|a, b| a.cell.cmp(&b.cell).then_with(|| a.unit.cmp(&b.unit)));

        let mut by_cell: AHashMap<GridCellId, SmallVec<[usize; 4]>> = AHashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            by_cell.entry(entry.cell).or_default().push(i);
        }

        Self { country: country.into(), precision, predicate, entries, by_cell, unmatched }
    }

    #[inline] pub fn country(&self) -> &str { &self.country }

    /// Coordinate precision measurement rows must be rounded to before lookup.
    #[inline] pub fn precision(&self) -> CoordPrecision { self.precision }

    /// The join predicate that produced this table.
    #[inline] pub fn predicate(&self) -> JoinPredicate { self.predicate }

    #[inline] pub fn entries(&self) -> &[WeightEntry] { &self.entries }

    #[inline] pub fn len(&self) -> usize { self.entries.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    #[inline] pub fn cell_count(&self) -> usize { self.by_cell.len() }

    /// Units of the boundary set that no grid cell was matched to.
    #[inline] pub fn unmatched_units(&self) -> &[UnitId] { &self.unmatched }

    /// Every cell with at least one entry, in no particular order.
    pub fn cells(&self) -> impl Iterator<Item = &GridCellId> { self.by_cell.keys() }

    pub fn for_cell(&self, cell: &GridCellId) -> impl Iterator<Item = &WeightEntry> {
        self.by_cell.get(cell).into_iter().flatten().map(|&i| &self.entries[i])
    }

    pub fn get(&self, cell: &GridCellId, unit: &UnitId) -> Option<&WeightEntry> {
        self.for_cell(cell).find(|e| &e.unit == unit)
    }

    pub fn cell_share_sum(&self, cell: &GridCellId) -> f64 {
        self.for_cell(cell).map(|e| e.share).sum()
    }

    /// Units with at least one matched cell.
    pub fn matched_units(&self) -> BTreeSet<&UnitId> {
        self.entries.iter().map(|e| &e.unit).collect()
    }

    /// Entries of one unit, in cell order.
    pub fn for_unit<'a>(&'a self, unit: &'a UnitId) -> impl Iterator<Item = &'a WeightEntry> {
        self.entries.iter().filter(move |e| &e.unit == unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(lat: i64, lon: i64, unit: &str, share: f64) -> WeightEntry {
        WeightEntry { cell: GridCellId { lat, lon }, unit: unit.into(), share, intersection_area: share, cell_area: 1.0 }
    }

    #[test]
    fn indexes_entries_by_cell() {
        let table = WeightTable::new(
            "X", CoordPrecision::default(), JoinPredicate::Intersects,
            vec![entry(0, 0, "b", 0.3), entry(0, 0, "a", 0.7), entry(1, 0, "a", 1.0)],
            vec!["c".into()],
        );
        let cell = GridCellId { lat: 0, lon: 0 };
        let units: Vec<&str> = table.for_cell(&cell).map(|e| e.unit.as_str()).collect();
        assert_eq!(units, vec!["a", "b"]);
        assert!((table.cell_share_sum(&cell) - 1.0).abs() < 1e-12);
        assert_eq!(table.get(&cell, &"b".into()).map(|e| e.share), Some(0.3));
        assert_eq!(table.cell_count(), 2);
        assert_eq!(table.matched_units().len(), 2);
        assert_eq!(table.for_unit(&"a".into()).count(), 2);
        assert_eq!(table.for_cell(&GridCellId { lat: 5, lon: 5 }).count(), 0);
    }
}
