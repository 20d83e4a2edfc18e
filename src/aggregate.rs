//! Error samples and their aggregation across trials and workers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sampler::RoundedError;

/// Where in a trial a sample was taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Checkpoint {
    /// Number of inserted items, rounded down to the configured granularity.
    Items(u64),
    /// 1-based number of estimators merged so far.
    Merges(u32),
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checkpoint::Items(n) => write!(f, "{n} items"),
            Checkpoint::Merges(n) => write!(f, "{n} merges"),
        }
    }
}

/// One observed error. Also the key of [`ErrorAggregate`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ErrorSample {
    pub variant: String,
    pub checkpoint: Checkpoint,
    pub error: RoundedError,
}

/// `(variant, checkpoint, rounded error) -> occurrences`.
///
/// Combining aggregates sums occurrences, so the result does not depend on the order in which
/// partial aggregates arrive.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorAggregate {
    counts: HashMap<ErrorSample, u64>,
}

impl ErrorAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one occurrence of `sample`.
    #[inline]
    pub fn record(&mut self, sample: ErrorSample) {
        self.add(sample, 1);
    }

    pub fn add(&mut self, sample: ErrorSample, occurrences: u64) {
        *self.counts.entry(sample).or_insert(0) += occurrences;
    }

    /// Sum `other` into `self`.
    pub fn absorb(&mut self, other: ErrorAggregate) {
        if self.counts.is_empty() {
            self.counts = other.counts;
            return;
        }
        for (sample, occurrences) in other.counts {
            self.add(sample, occurrences);
        }
    }

    pub fn get(&self, sample: &ErrorSample) -> u64 {
        self.counts.get(sample).copied().unwrap_or(0)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of all occurrences.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ErrorSample, u64)> {
        self.counts.iter().map(|(sample, &n)| (sample, n))
    }

    /// Entries in key order.
    pub fn sorted(&self) -> Vec<(&ErrorSample, u64)> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

impl FromIterator<ErrorSample> for ErrorAggregate {
    fn from_iter<I: IntoIterator<Item = ErrorSample>>(iter: I) -> Self {
        let mut aggregate = Self::new();
        for sample in iter {
            aggregate.record(sample);
        }
        aggregate
    }
}

/// Serialized estimator paired with the serialized reference set it was built from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Snapshot<'a> {
    pub estimator: &'a [u8],
    pub reference: &'a [u8],
}

/// Snapshots captured during insertion trials, grouped by variant identity.
///
/// A reference set snapshot is shared by all variants captured at the same moment, so it is
/// stored once and referenced by index.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSet {
    references: Vec<Vec<u8>>,
    estimators: BTreeMap<String, Vec<(Vec<u8>, usize)>>,
}

impl SnapshotSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a reference set snapshot, returning its handle for [`SnapshotSet::push`].
    pub fn add_reference(&mut self, bytes: Vec<u8>) -> usize {
        self.references.push(bytes);
        self.references.len() - 1
    }

    /// Record an estimator snapshot of `variant` paired with reference `reference`.
    pub fn push(&mut self, variant: &str, estimator: Vec<u8>, reference: usize) {
        debug_assert!(reference < self.references.len());
        self.estimators
            .entry(variant.to_string())
            .or_default()
            .push((estimator, reference));
    }

    /// Append all snapshots of `other` after the ones already held.
    pub fn absorb(&mut self, other: SnapshotSet) {
        let offset = self.references.len();
        self.references.extend(other.references);
        for (variant, entries) in other.estimators {
            self.estimators
                .entry(variant)
                .or_default()
                .extend(entries.into_iter().map(|(e, r)| (e, r + offset)));
        }
    }

    /// Variant identities in sorted order.
    pub fn variants(&self) -> impl Iterator<Item = &str> {
        self.estimators.keys().map(String::as_str)
    }

    /// Number of snapshots of `variant`.
    pub fn count(&self, variant: &str) -> usize {
        self.estimators.get(variant).map_or(0, Vec::len)
    }

    /// Number of snapshots over all variants.
    pub fn len(&self) -> usize {
        self.estimators.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `idx`-th snapshot of `variant`.
    pub fn get(&self, variant: &str, idx: usize) -> Option<Snapshot<'_>> {
        let (estimator, reference) = self.estimators.get(variant)?.get(idx)?;
        Some(Snapshot {
            estimator,
            reference: self.references.get(*reference)?,
        })
    }
}

/// Result of one worker task.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialOutcome {
    pub aggregate: ErrorAggregate,
    pub snapshots: SnapshotSet,
    /// Number of complete trials behind this outcome.
    pub trials: usize,
}

impl TrialOutcome {
    pub fn absorb(&mut self, other: TrialOutcome) {
        self.aggregate.absorb(other.aggregate);
        self.snapshots.absorb(other.snapshots);
        self.trials += other.trials;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(variant: &str, items: u64, error: f64) -> ErrorSample {
        ErrorSample {
            variant: variant.to_string(),
            checkpoint: Checkpoint::Items(items),
            error: RoundedError::new(error, 3),
        }
    }

    #[test]
    fn test_record_and_absorb() {
        let mut lhs: ErrorAggregate = [
            sample("HLL:13", 10, 0.0),
            sample("HLL:13", 10, 0.0),
            sample("HLL:13", 20, 0.001),
        ]
        .into_iter()
        .collect();
        let rhs: ErrorAggregate = [sample("HLL:13", 10, 0.0), sample("hllpp:14", 10, 0.0)]
            .into_iter()
            .collect();
        lhs.absorb(rhs);
        assert_eq!(lhs.get(&sample("HLL:13", 10, 0.0)), 3);
        assert_eq!(lhs.get(&sample("HLL:13", 20, 0.001)), 1);
        assert_eq!(lhs.get(&sample("hllpp:14", 10, 0.0)), 1);
        assert_eq!(lhs.get(&sample("hllpp:14", 20, 0.0)), 0);
        assert_eq!(lhs.len(), 3);
        assert_eq!(lhs.total(), 5);
    }

    #[test]
    fn test_absorb_is_order_independent() {
        let parts: Vec<ErrorAggregate> = (0..4)
            .map(|i| (0..10).map(|j| sample("HLL:15", j * 10, f64::from(i) / 1000.0)).collect())
            .collect();
        let mut forward = ErrorAggregate::new();
        for part in parts.iter().cloned() {
            forward.absorb(part);
        }
        let mut backward = ErrorAggregate::new();
        for part in parts.into_iter().rev() {
            backward.absorb(part);
        }
        assert_eq!(forward, backward);
        assert_eq!(forward.sorted(), backward.sorted());
    }

    #[test]
    fn test_snapshot_set_absorb_rebases_references() {
        let mut lhs = SnapshotSet::new();
        let r = lhs.add_reference(vec![1]);
        lhs.push("HLL:13", vec![10], r);

        let mut rhs = SnapshotSet::new();
        let r0 = rhs.add_reference(vec![2]);
        let r1 = rhs.add_reference(vec![3]);
        rhs.push("HLL:13", vec![20], r0);
        rhs.push("HLL:13", vec![30], r1);
        rhs.push("hllpp:14", vec![40], r1);

        lhs.absorb(rhs);
        assert_eq!(lhs.len(), 4);
        assert_eq!(lhs.count("HLL:13"), 3);
        assert_eq!(lhs.variants().collect::<Vec<_>>(), vec!["HLL:13", "hllpp:14"]);
        let expected = [(10, 1), (20, 2), (30, 3)];
        for (idx, (e, r)) in expected.into_iter().enumerate() {
            let snapshot = lhs.get("HLL:13", idx).unwrap();
            assert_eq!(snapshot.estimator, [e]);
            assert_eq!(snapshot.reference, [r]);
        }
        assert_eq!(lhs.get("hllpp:14", 0).unwrap().reference, [3]);
        assert!(lhs.get("hllpp:14", 1).is_none());
        assert!(lhs.get("HLL:15", 0).is_none());
    }
}
