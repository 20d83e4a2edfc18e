//! Estimator capability shared by every benchmarked variant.
//!
//! [`EstimatorTrait`] is the contract the benchmark engine drives: `add`, `count`, `merge`,
//! `serialize`, `deserialize` and `identity`. [`Estimator`] implements it for the closed set of
//! families in [`Variant`], dispatching to the family sketch underneath.
//!
//! # Reported count
//! `count()` returns `max(high_water, estimate)`. After every `add` and every `merge`,
//! `high_water` is raised to the current estimate; a merge also takes the other side's mark.
//! Representation switches (sparse to dense, linear counting to HyperLogLog) may move the raw
//! estimate down by a few items, and the mark keeps the reported count from following it, also
//! on the first `add` after a merge. The merged mark is the maximum of both marks and of the
//! estimate of the merged registers, none of which depends on merge order.
//!
//! # Snapshot format
//! `serialize()` produces zlib-compressed bincode of
//! `(format version, variant identity, high water mark, sketch state)`.
//! `deserialize()` rejects unknown versions, states that do not belong to the variant named in
//! the snapshot, internally inconsistent states, and high water marks far above what the
//! registers estimate.

use serde::{Deserialize, Serialize};

use crate::codec::{compress, decompress, SNAPSHOT_LEVEL};
use crate::error::EstimatorError;
use crate::families::{hash_item, Sketch, SketchTrait};
use crate::variant::Variant;

/// Longest item any variant accepts.
pub const MAX_ITEM_LEN: usize = 64 * 1024;
/// Current snapshot layout.
const FORMAT_VERSION: u8 = 1;
/// Absolute part of the tolerance in [`high_water_limit`].
const HIGH_WATER_SLACK: u64 = 16;

/// Capability contract every cardinality estimator variant satisfies.
pub trait EstimatorTrait: Sized {
    /// Incorporate one element.
    fn add(&mut self, item: &[u8]) -> Result<(), EstimatorError>;
    /// Current cardinality estimate.
    fn count(&self) -> u64;
    /// Incorporate all elements of `other`, leaving `other` untouched.
    fn merge(&mut self, other: &Self) -> Result<(), EstimatorError>;
    /// Compact, compressed, self-describing encoding of the current state.
    fn serialize(&self) -> Result<Vec<u8>, EstimatorError>;
    /// Reconstruct a fresh instance from [`EstimatorTrait::serialize`] output.
    fn deserialize(bytes: &[u8]) -> Result<Self, EstimatorError>;
    /// Stable name encoding family and precision.
    fn identity(&self) -> String;
}

/// Cardinality estimator of one configured variant.
#[derive(Clone, Debug, PartialEq)]
pub struct Estimator {
    variant: Variant,
    sketch: Sketch,
    high_water: u64,
}

/// Wire layout of a snapshot, before compression.
#[derive(Serialize, Deserialize)]
struct SnapshotState {
    version: u8,
    variant: Variant,
    high_water: u64,
    sketch: Sketch,
}

impl Estimator {
    /// Creates new empty instance of `variant`.
    pub fn new(variant: Variant) -> Result<Self, EstimatorError> {
        variant.validate()?;
        Ok(Self {
            variant,
            sketch: Sketch::new(variant),
            high_water: 0,
        })
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Raw estimate of the underlying sketch, without the high water mark.
    pub fn estimate(&self) -> u64 {
        self.sketch.estimate()
    }

    /// Approximate memory held by the estimator.
    pub fn size_of(&self) -> usize {
        std::mem::size_of::<Variant>() + std::mem::size_of::<u64>() + self.sketch.size_of()
    }

    /// Snapshot size before and after compression.
    pub fn snapshot_sizes(&self) -> Result<(usize, usize), EstimatorError> {
        let raw = self.encode()?;
        let packed = compress(&raw, SNAPSHOT_LEVEL)?;
        Ok((raw.len(), packed.len()))
    }

    fn encode(&self) -> Result<Vec<u8>, EstimatorError> {
        let state = SnapshotState {
            version: FORMAT_VERSION,
            variant: self.variant,
            high_water: self.high_water,
            sketch: self.sketch.clone(),
        };
        Ok(bincode::serde::encode_to_vec(&state, bincode::config::standard())?)
    }
}

/// Largest high water mark a snapshot may carry for a sketch estimating `estimate`.
///
/// Registers only grow, so earlier estimates exceed the current one by no more than a
/// representation switch moves it.
#[inline]
fn high_water_limit(estimate: u64) -> u64 {
    estimate
        .saturating_add(estimate / 4)
        .saturating_add(HIGH_WATER_SLACK)
}

impl EstimatorTrait for Estimator {
    #[inline]
    fn add(&mut self, item: &[u8]) -> Result<(), EstimatorError> {
        if item.len() > MAX_ITEM_LEN {
            return Err(EstimatorError::InvalidItem {
                variant: self.identity(),
                len: item.len(),
            });
        }
        self.sketch.insert_hash(hash_item(item));
        self.high_water = self.high_water.max(self.sketch.estimate());
        Ok(())
    }

    #[inline]
    fn count(&self) -> u64 {
        self.high_water.max(self.sketch.estimate())
    }

    fn merge(&mut self, other: &Self) -> Result<(), EstimatorError> {
        if self.variant != other.variant || !self.sketch.merge(&other.sketch) {
            return Err(EstimatorError::IncompatibleVariant {
                expected: self.identity(),
                found: other.identity(),
            });
        }
        self.high_water = self
            .high_water
            .max(other.high_water)
            .max(self.sketch.estimate());
        Ok(())
    }

    fn serialize(&self) -> Result<Vec<u8>, EstimatorError> {
        Ok(compress(&self.encode()?, SNAPSHOT_LEVEL)?)
    }

    fn deserialize(bytes: &[u8]) -> Result<Self, EstimatorError> {
        let corrupt = |e: &dyn std::fmt::Display| EstimatorError::CorruptSnapshot(e.to_string());
        let raw = decompress(bytes).map_err(|e| corrupt(&e))?;
        let (state, read): (SnapshotState, usize) =
            bincode::serde::decode_from_slice(&raw, bincode::config::standard())
                .map_err(|e| corrupt(&e))?;
        if read != raw.len() {
            return Err(corrupt(&format!("{} trailing bytes", raw.len() - read)));
        }
        if state.version != FORMAT_VERSION {
            return Err(corrupt(&format!("unsupported format version {}", state.version)));
        }
        state.variant.validate()?;
        if !state.sketch.matches(&state.variant) {
            return Err(corrupt(&format!("state does not belong to {}", state.variant)));
        }
        state.sketch.check().map_err(|e| corrupt(&e))?;
        let estimate = state.sketch.estimate();
        if state.high_water > high_water_limit(estimate) {
            return Err(corrupt(&format!(
                "high water mark {} is implausible for estimate {estimate}",
                state.high_water
            )));
        }
        Ok(Self {
            variant: state.variant,
            sketch: state.sketch,
            high_water: state.high_water.max(estimate),
        })
    }

    fn identity(&self) -> String {
        self.variant.identity()
    }
}
