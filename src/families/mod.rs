//! Reference estimator families driven by the benchmark engine.
//!
//! Each family implements [`SketchTrait`] over a 64-bit item hash. All of them hash with the
//! same seed, so instances built independently (or in different processes) are mergeable.

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

use crate::variant::Variant;

mod beta;
pub(crate) mod classic;
pub(crate) mod packed;
pub(crate) mod plusplus;

use classic::ClassicHll;
use packed::PackedHll;
use plusplus::HllPlusPlus;

/// Seed shared by every estimator instance.
const HASH_SEED: u64 = 0x5eed_c0de_1009_2015;

/// Hash an item the way every family expects it.
#[inline]
pub(crate) fn hash_item(item: &[u8]) -> u64 {
    wyhash::wyhash(item, HASH_SEED)
}

/// Sketch state of one of the supported families.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[enum_dispatch]
pub(crate) enum Sketch {
    Classic(ClassicHll),
    Packed(PackedHll),
    PlusPlus(HllPlusPlus),
}

/// Operations every family must provide.
#[enum_dispatch(Sketch)]
pub(crate) trait SketchTrait {
    fn insert_hash(&mut self, hash: u64);
    fn estimate(&self) -> u64;
    fn precision(&self) -> u8;
    fn size_of(&self) -> usize;
    /// Verify internal consistency of a decoded state.
    fn check(&self) -> Result<(), String>;
}

impl Sketch {
    /// Create an empty sketch for `variant`.
    pub(crate) fn new(variant: Variant) -> Self {
        match variant {
            Variant::Classic { error_rate } => Sketch::Classic(ClassicHll::new(error_rate)),
            Variant::Packed { precision } => Sketch::Packed(PackedHll::new(precision)),
            Variant::PlusPlus { precision } => Sketch::PlusPlus(HllPlusPlus::new(precision)),
        }
    }

    /// Whether this state belongs to `variant`.
    pub(crate) fn matches(&self, variant: &Variant) -> bool {
        match (self, variant) {
            (Sketch::Classic(s), Variant::Classic { error_rate }) => {
                s.precision() == classic::precision_for(*error_rate)
            }
            (Sketch::Packed(s), Variant::Packed { precision }) => s.precision() == *precision,
            (Sketch::PlusPlus(s), Variant::PlusPlus { precision }) => s.precision() == *precision,
            _ => false,
        }
    }

    /// Merge `rhs` into `self`. Returns false when families or precisions differ.
    pub(crate) fn merge(&mut self, rhs: &Sketch) -> bool {
        if self.precision() != rhs.precision() {
            return false;
        }
        match (self, rhs) {
            (Sketch::Classic(lhs), Sketch::Classic(rhs)) => lhs.merge(rhs),
            (Sketch::Packed(lhs), Sketch::Packed(rhs)) => lhs.merge(rhs),
            (Sketch::PlusPlus(lhs), Sketch::PlusPlus(rhs)) => lhs.merge(rhs),
            _ => return false,
        }
        true
    }
}

/// Dense byte-per-register HyperLogLog state with incrementally maintained zero count and
/// harmonic sum.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct ByteRegisters {
    values: Vec<u8>,
    zeros: u32,
    sum: f64,
}

impl ByteRegisters {
    pub(crate) fn new(precision: u8) -> Self {
        let m = 1usize << precision;
        Self {
            values: vec![0; m],
            zeros: 1 << precision,
            sum: f64::from(1u32 << precision),
        }
    }

    #[inline]
    pub(crate) fn m(&self) -> f64 {
        self.values.len() as f64
    }

    #[inline]
    pub(crate) fn zeros(&self) -> u32 {
        self.zeros
    }

    #[inline]
    pub(crate) fn sum(&self) -> f64 {
        self.sum
    }

    /// Raise register `idx` to `rank` if it is larger.
    #[inline]
    pub(crate) fn update(&mut self, idx: usize, rank: u8) {
        let old = self.values[idx];
        if rank > old {
            self.values[idx] = rank;
            self.zeros -= u32::from(old == 0);
            self.sum += inv_pow2(rank) - inv_pow2(old);
        }
    }

    /// Register-wise maximum. The sum is recomputed so the result only depends on registers.
    pub(crate) fn merge(&mut self, rhs: &ByteRegisters) {
        for (lhs, &rhs) in self.values.iter_mut().zip(rhs.values.iter()) {
            *lhs = (*lhs).max(rhs);
        }
        self.recompute();
    }

    pub(crate) fn recompute(&mut self) {
        self.zeros = self.values.iter().filter(|&&v| v == 0).count() as u32;
        self.sum = self.values.iter().map(|&v| inv_pow2(v)).sum();
    }

    /// Raw HyperLogLog estimate.
    #[inline]
    pub(crate) fn raw_estimate(&self) -> f64 {
        let m = self.m();
        alpha(self.values.len()) * m * m / self.sum
    }

    /// Linear counting estimate; only meaningful while some registers are zero.
    #[inline]
    pub(crate) fn linear_count(&self) -> f64 {
        let m = self.m();
        m * (m / f64::from(self.zeros)).ln()
    }

    pub(crate) fn size_of(&self) -> usize {
        std::mem::size_of::<Self>() + self.values.len()
    }

    pub(crate) fn check(&self, precision: u8, max_rank: u8) -> Result<(), String> {
        if self.values.len() != 1 << precision {
            return Err(format!(
                "expected {} registers, found {}",
                1usize << precision,
                self.values.len()
            ));
        }
        if let Some(rank) = self.values.iter().find(|&&v| v > max_rank) {
            return Err(format!("register rank {rank} exceeds {max_rank}"));
        }
        let zeros = self.values.iter().filter(|&&v| v == 0).count() as u32;
        if zeros != self.zeros {
            return Err(format!("zero count {} does not match registers", self.zeros));
        }
        let expected: f64 = self.values.iter().map(|&v| inv_pow2(v)).sum();
        check_sum(self.sum, expected)
    }
}

/// Incrementally maintained harmonic sum must match the one derived from registers.
pub(crate) fn check_sum(sum: f64, expected: f64) -> Result<(), String> {
    if (sum - expected).abs() <= 1e-6 * expected {
        Ok(())
    } else {
        Err(format!("harmonic sum {sum} does not match registers ({expected})"))
    }
}

/// Computes 2^-n by directly subtracting from the IEEE754 double exponent.
#[inline]
pub(crate) fn inv_pow2(n: u8) -> f64 {
    let base = f64::to_bits(1.0);
    f64::from_bits(base - (u64::from(n) << 52))
}

/// Parameter for bias correction
#[inline]
pub(crate) fn alpha(m: usize) -> f64 {
    match m {
        16 => 0.673,
        32 => 0.697,
        64 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / (m as f64)),
    }
}

/// Round a non-negative float estimate to the reported integer count.
#[inline]
pub(crate) fn round_estimate(estimate: f64) -> u64 {
    if estimate.is_finite() && estimate > 0.0 {
        (estimate + 0.5) as u64
    } else {
        0
    }
}
