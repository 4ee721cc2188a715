use tracing::{info, warn};

use crate::audit::{AuditLog, AuditOperation};
use crate::config::InterpolationMethod;
use crate::error::InterpolationFailure;
use crate::types::UnitId;

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUnit {
    pub unit: UnitId,
    pub method: InterpolationMethod,
    /// Units whose series were copied or blended; empty for buffer joins.
    pub sources: Vec<UnitId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedUnit {
    pub unit: UnitId,
    pub reason: InterpolationFailure,
}

/// Outcome of one interpolation pass. Every unmatched unit appears exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolationReport {
    pub method: InterpolationMethod,
    pub resolved: Vec<ResolvedUnit>,
    pub unresolved: Vec<UnresolvedUnit>,
}

impl InterpolationReport {
    pub fn new(method: InterpolationMethod) -> Self {
        Self { method, resolved: Vec::new(), unresolved: Vec::new() }
    }

    pub(crate) fn resolve(&mut self, unit: UnitId, method: InterpolationMethod, sources: Vec<UnitId>) {
        self.resolved.push(ResolvedUnit { unit, method, sources });
    }

    pub(crate) fn unresolve(&mut self, unit: UnitId, reason: InterpolationFailure) {
        self.unresolved.push(UnresolvedUnit { unit, reason });
    }

    #[inline] pub fn is_complete(&self) -> bool { self.unresolved.is_empty() }

    /// One `Interpolated` or `Unresolved` entry per unit.
    pub fn to_audit(&self) -> AuditLog {
        let mut audit = AuditLog::new();
        for r in &self.resolved {
            let from = r.sources.iter().map(UnitId::as_str).collect::<Vec<_>>().join(" ");
            let reason = if from.is_empty() { r.method.as_str().to_string() } else { format!("{} from {from}", r.method.as_str()) };
            audit.record(r.unit.clone(), AuditOperation::Interpolated, reason, 0.0);
        }
        for u in &self.unresolved {
            audit.record(u.unit.clone(), AuditOperation::Unresolved, u.reason.to_string(), 0.0);
        }
        audit
    }

    pub(crate) fn log(&self, country: &str) {
        for u in &self.unresolved {
            warn!(country, unit = %u.unit, "[interpolate] unresolved: {}", u.reason);
        }
        info!(
            country, method = self.method.as_str(), resolved = self.resolved.len(),
            unresolved = self.unresolved.len(), "[interpolate] done",
        );
    }
}
