use std::fmt;

use serde::{Deserialize, Serialize};

/// Zero-based index of a row within a rowset, stable for the rowset's
/// lifetime.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RowId(pub u32);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A hybrid logical clock value. Totally ordered; `Timestamp::MIN` is a
/// sentinel meaning "no value".
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const MIN: Timestamp = Timestamp(0);
    pub const MAX: Timestamp = Timestamp(u64::MAX);
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a column within a table schema.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ColumnId(pub u32);

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sentinel for "no log index". Valid indexes are positive.
pub const INVALID_LOG_INDEX: i64 = -1;

/// Identifies an entry in the replicated log. `index` is strictly
/// increasing within a term; `term` is non-decreasing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpId {
    pub term: u64,
    pub index: i64,
}

impl OpId {
    pub fn new(term: u64, index: i64) -> Self {
        Self { term, index }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.term, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_ordering() {
        assert!(Timestamp::MIN < Timestamp(1));
        assert!(Timestamp(1) < Timestamp(2));
        assert!(Timestamp(2) < Timestamp::MAX);
    }

    #[test]
    fn test_opid_ordering() {
        // Term dominates, then index.
        assert!(OpId::new(1, 100) < OpId::new(2, 1));
        assert!(OpId::new(2, 1) < OpId::new(2, 2));
    }
}
