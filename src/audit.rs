use crate::types::UnitId;

/// What happened to a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AuditOperation {
    /// Geometry replaced by a repaired one.
    Repaired,
    /// Unit removed from the boundary set.
    Dropped,
    /// Values copied or blended from other units.
    Interpolated,
    /// Unit kept in the boundary set but left without values.
    Unresolved,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::Repaired => "repaired",
            AuditOperation::Dropped => "dropped",
            AuditOperation::Interpolated => "interpolated",
            AuditOperation::Unresolved => "unresolved",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub unit_id: UnitId,
    pub operation: AuditOperation,
    pub reason: String,
    /// Change in area (squared degrees); negative for losses.
    pub area_delta: f64,
}

/// Append-only record of every destructive or value-producing change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self { Self::default() }

    pub fn record(&mut self, unit_id: UnitId, operation: AuditOperation, reason: impl Into<String>, area_delta: f64) {
        self.entries.push(AuditEntry { unit_id, operation, reason: reason.into(), area_delta });
    }

    pub fn extend(&mut self, other: AuditLog) {
        self.entries.extend(other.entries);
    }

    #[inline] pub fn entries(&self) -> &[AuditEntry] { &self.entries }

    #[inline] pub fn len(&self) -> usize { self.entries.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Number of entries with the given operation.
    pub fn count(&self, operation: AuditOperation) -> usize {
        self.entries.iter().filter(|e| e.operation == operation).count()
    }

    /// Units removed from the boundary set, in the order they were removed.
    pub fn dropped_units(&self) -> impl Iterator<Item = &UnitId> {
        self.entries.iter()
            .filter(|e| e.operation == AuditOperation::Dropped)
            .map(|e| &e.unit_id)
    }

    /// Entries concerning one unit.
    pub fn for_unit<'a>(&'a self, unit: &'a UnitId) -> impl Iterator<Item = &'a AuditEntry> {
        self.entries.iter().filter(move |e| &e.unit_id == unit)
    }
}
