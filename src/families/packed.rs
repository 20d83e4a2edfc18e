//! ## Bit-packed HyperLogLog
//! Uses `M = 2^P` registers of `W = 6` bits packed into a `u32` slice, with LogLog-Beta
//! bias correction over the whole cardinality range.
//!
//! Slice encoding:
//! - data[0..]     - register ranks using `W` bits per register, little-endian within words.
//! - data[last]    - one extra word for branchless two-word register access.
//!
//! Number of zero registers and the registers' harmonic sum are kept next to the slice and
//! updated on every register change, so `estimate` is constant time.
//!
//! [LogLog-Beta paper](https://arxiv.org/pdf/1612.02284.pdf)

use serde::{Deserialize, Serialize};

use super::beta::beta;
use super::{alpha, check_sum, inv_pow2, round_estimate, SketchTrait};
use crate::variant::{MAX_PRECISION, MIN_PRECISION};

/// Register width in bits.
const W: usize = 6;
/// Largest representable rank.
const MAX_RANK: u32 = (1 << W) - 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct PackedHll {
    precision: u8,
    data: Vec<u32>,
    zeros: u32,
    sum: f64,
}

impl PackedHll {
    pub(crate) fn new(precision: u8) -> Self {
        Self {
            precision,
            data: vec![0; Self::slice_len(precision)],
            zeros: 1 << precision,
            sum: f64::from(1u32 << precision),
        }
    }

    /// Number of registers
    #[inline]
    fn m(&self) -> usize {
        1 << self.precision
    }

    /// Slice length for `precision` registers plus the trailing spare word.
    #[inline]
    fn slice_len(precision: u8) -> usize {
        (1usize << precision) * W / 32 + 1
    }

    /// Split a hash into register index (low `P` bits) and rank (trailing zeros of the rest, plus one).
    #[inline]
    fn decode_hash(&self, hash: u64) -> (usize, u32) {
        let p = u32::from(self.precision);
        let idx = (hash & ((1 << p) - 1)) as usize;
        let guarded = (hash >> p) | (1 << (64 - p));
        let rank = (guarded.trailing_zeros() + 1).min(MAX_RANK);
        (idx, rank)
    }

    /// Get `idx` register
    #[inline]
    fn get_register(&self, idx: usize) -> u32 {
        let bit_idx = idx * W;
        let u32_idx = bit_idx / 32;
        let bit_pos = bit_idx % 32;
        let bits_1 = W.min(32 - bit_pos);
        let bits_2 = W - bits_1;
        let mask_1 = (1u32 << bits_1) - 1;
        let mask_2 = (1u32 << bits_2) - 1;

        ((self.data[u32_idx] >> bit_pos) & mask_1) | ((self.data[u32_idx + 1] & mask_2) << bits_1)
    }

    /// Set `idx` register from `old_rank` to `new_rank`, keeping zero count and sum current.
    #[inline]
    fn set_register(&mut self, idx: usize, old_rank: u32, new_rank: u32) {
        let bit_idx = idx * W;
        let u32_idx = bit_idx / 32;
        let bit_pos = bit_idx % 32;
        let bits_1 = W.min(32 - bit_pos);
        let bits_2 = W - bits_1;
        let mask_1 = (1u32 << bits_1) - 1;
        let mask_2 = (1u32 << bits_2) - 1;

        // Unconditionally update both words based on `new_rank` bits and masks
        let bits = &mut self.data[u32_idx..u32_idx + 2];
        bits[0] &= !(mask_1 << bit_pos);
        bits[0] |= (new_rank & mask_1) << bit_pos;
        bits[1] &= !mask_2;
        bits[1] |= (new_rank >> bits_1) & mask_2;

        self.zeros -= u32::from(old_rank == 0 && self.zeros > 0);
        self.sum += inv_pow2(new_rank as u8) - inv_pow2(old_rank as u8);
    }

    #[inline]
    fn update_rank(&mut self, idx: usize, new_rank: u32) {
        let old_rank = self.get_register(idx);
        if new_rank > old_rank {
            self.set_register(idx, old_rank, new_rank);
        }
    }

    /// Register-wise maximum of two packed sketches.
    pub(crate) fn merge(&mut self, rhs: &PackedHll) {
        for idx in 0..self.m() {
            self.update_rank(idx, rhs.get_register(idx));
        }
        self.recompute();
    }

    /// Zero count and harmonic sum derived from registers alone.
    fn derived(&self) -> (u32, f64) {
        (0..self.m())
            .map(|idx| self.get_register(idx))
            .fold((0u32, 0.0f64), |(zeros, sum), rank| {
                (zeros + u32::from(rank == 0), sum + inv_pow2(rank as u8))
            })
    }

    fn recompute(&mut self) {
        (self.zeros, self.sum) = self.derived();
    }
}

impl SketchTrait for PackedHll {
    #[inline]
    fn insert_hash(&mut self, hash: u64) {
        let (idx, rank) = self.decode_hash(hash);
        self.update_rank(idx, rank);
    }

    #[inline]
    fn estimate(&self) -> u64 {
        let m = self.m();
        let estimate = alpha(m) * ((m * (m - self.zeros as usize)) as f64)
            / (self.sum + beta(f64::from(self.zeros), self.precision));
        round_estimate(estimate)
    }

    #[inline]
    fn precision(&self) -> u8 {
        self.precision
    }

    /// The slice, plus precision, zero count and sum.
    fn size_of(&self) -> usize {
        std::mem::size_of::<Self>() + std::mem::size_of_val(self.data.as_slice())
    }

    fn check(&self) -> Result<(), String> {
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&self.precision) {
            return Err(format!("packed precision {} out of range", self.precision));
        }
        if self.data.len() != Self::slice_len(self.precision) {
            return Err(format!(
                "expected {} words, found {}",
                Self::slice_len(self.precision),
                self.data.len()
            ));
        }
        let (zeros, sum) = self.derived();
        if zeros != self.zeros {
            return Err(format!("zero count {} does not match registers", self.zeros));
        }
        check_sum(self.sum, sum)
    }
}
