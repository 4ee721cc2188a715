use std::{fmt, sync::Arc};

/// Stable key for an administrative unit at the finest level.
/// Keeps the original identifier text (with leading zeros) but avoids repeated owned Strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(Arc<str>);

impl UnitId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref().trim()))
    }

    #[inline] pub fn as_str(&self) -> &str { &self.0 }

    /// True if the identifier starts with `prefix`, e.g. its country code.
    #[inline] pub fn has_prefix(&self, prefix: &str) -> bool { self.0.starts_with(prefix.trim()) }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(id: &str) -> Self { Self::new(id) }
}

impl From<String> for UnitId {
    fn from(id: String) -> Self { Self::new(id) }
}

#[cfg(test)]
mod tests {
    use super::UnitId;

    #[test]
    fn trims_and_keeps_leading_zeros() {
        let id = UnitId::new(" 004001 ");
        assert_eq!(id.as_str(), "004001");
        assert_eq!(id.to_string(), "004001");
    }

    #[test]
    fn prefix_check() {
        let id = UnitId::from("204001002");
        assert!(id.has_prefix("204"));
        assert!(!id.has_prefix("728"));
    }

    #[test]
    fn ordering_is_lexicographic() {
        assert!(UnitId::from("100") < UnitId::from("20"));
    }
}
