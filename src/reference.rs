//! Exact ground truth for a trial.

use std::collections::HashSet;

use crate::codec::{compress, decompress, SNAPSHOT_LEVEL};
use crate::error::EstimatorError;

/// Every distinct item inserted in one trial. Memory grows with the trial size.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReferenceSet {
    items: HashSet<String>,
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `item` was not present.
    #[inline]
    pub fn insert(&mut self, item: &str) -> bool {
        if self.items.contains(item) {
            return false;
        }
        self.items.insert(item.to_string())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, item: &str) -> bool {
        self.items.contains(item)
    }

    /// Add every item of `other`.
    pub fn union(&mut self, other: &ReferenceSet) {
        self.items.extend(other.items.iter().cloned());
    }

    /// Compressed bincode list of the items in sorted order, so equal sets give equal bytes.
    pub fn snapshot(&self) -> Result<Vec<u8>, EstimatorError> {
        let mut items: Vec<&str> = self.items.iter().map(String::as_str).collect();
        items.sort_unstable();
        let raw = bincode::serde::encode_to_vec(&items, bincode::config::standard())?;
        Ok(compress(&raw, SNAPSHOT_LEVEL)?)
    }

    /// Reverse of [`ReferenceSet::snapshot`].
    pub fn restore(bytes: &[u8]) -> Result<Self, EstimatorError> {
        let corrupt = |e: &dyn std::fmt::Display| EstimatorError::CorruptSnapshot(e.to_string());
        let raw = decompress(bytes).map_err(|e| corrupt(&e))?;
        let (items, _): (Vec<String>, usize) =
            bincode::serde::decode_from_slice(&raw, bincode::config::standard())
                .map_err(|e| corrupt(&e))?;
        Ok(Self {
            items: items.into_iter().collect(),
        })
    }
}

impl<S: AsRef<str>> FromIterator<S> for ReferenceSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_counts_distinct() {
        let mut set = ReferenceSet::new();
        assert!(set.is_empty());
        assert!(set.insert("abc"));
        assert!(!set.insert("abc"));
        assert!(set.insert("abd"));
        assert_eq!(set.len(), 2);
        assert!(set.contains("abd"));
    }

    #[test]
    fn test_union() {
        let mut lhs: ReferenceSet = ["a", "b", "c"].into_iter().collect();
        let rhs: ReferenceSet = ["c", "d"].into_iter().collect();
        lhs.union(&rhs);
        assert_eq!(lhs.len(), 4);
        assert_eq!(rhs.len(), 2);
    }

    #[test]
    fn test_snapshot_restore() {
        let set: ReferenceSet = (0..1000).map(|i| format!("k{i}")).collect();
        let bytes = set.snapshot().unwrap();
        assert_eq!(ReferenceSet::restore(&bytes).unwrap(), set);
        assert_eq!(set.clone().snapshot().unwrap(), bytes);
    }

    #[test]
    fn test_restore_garbage() {
        assert!(matches!(
            ReferenceSet::restore(b"not a snapshot"),
            Err(EstimatorError::CorruptSnapshot(_))
        ));
    }
}
