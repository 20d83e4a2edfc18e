//! ## Classic HyperLogLog
//! Flajolet et al. HyperLogLog over a 32-bit hash space, one byte per register.
//! The number of registers is derived from the requested relative error `e`
//! as `m = 2^ceil(log2((1.04 / e)^2))`.
//!
//! Range corrections:
//! - `E <= 2.5m` with empty registers: linear counting.
//! - `E > 2^32 / 30`: large range correction for hash collisions.

use serde::{Deserialize, Serialize};

use super::{round_estimate, ByteRegisters, SketchTrait};

/// Bounds of the derived precision.
const MIN_PRECISION: u8 = 4;
const MAX_PRECISION: u8 = 16;
/// Size of the hash space in which ranks are counted.
const TWO_32: f64 = 4_294_967_296.0;

/// Precision yielding the requested standard error.
pub(crate) fn precision_for(error_rate: f64) -> u8 {
    let p = (1.04 / error_rate).powi(2).log2().ceil();
    if p.is_nan() {
        return MAX_PRECISION;
    }
    (p.max(f64::from(MIN_PRECISION)) as u8).clamp(MIN_PRECISION, MAX_PRECISION)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct ClassicHll {
    precision: u8,
    registers: ByteRegisters,
}

impl ClassicHll {
    pub(crate) fn new(error_rate: f64) -> Self {
        let precision = precision_for(error_rate);
        Self {
            precision,
            registers: ByteRegisters::new(precision),
        }
    }

    /// Largest rank a register can hold.
    #[inline]
    fn max_rank(&self) -> u8 {
        32 - self.precision + 1
    }

    pub(crate) fn merge(&mut self, rhs: &ClassicHll) {
        self.registers.merge(&rhs.registers);
    }
}

impl SketchTrait for ClassicHll {
    #[inline]
    fn insert_hash(&mut self, hash: u64) {
        let x = (hash >> 32) as u32;
        let idx = (x >> (32 - self.precision)) as usize;
        let w = x << self.precision;
        let rank = (w.leading_zeros() + 1).min(u32::from(self.max_rank())) as u8;
        self.registers.update(idx, rank);
    }

    fn estimate(&self) -> u64 {
        let m = self.registers.m();
        let e = self.registers.raw_estimate();
        let estimate = if e <= 2.5 * m {
            if self.registers.zeros() > 0 {
                self.registers.linear_count()
            } else {
                e
            }
        } else if e <= TWO_32 / 30.0 {
            e
        } else {
            -TWO_32 * (1.0 - (e / TWO_32).min(1.0 - f64::EPSILON)).ln()
        };
        round_estimate(estimate)
    }

    #[inline]
    fn precision(&self) -> u8 {
        self.precision
    }

    fn size_of(&self) -> usize {
        std::mem::size_of::<u8>() + self.registers.size_of()
    }

    fn check(&self) -> Result<(), String> {
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&self.precision) {
            return Err(format!("classic precision {} out of range", self.precision));
        }
        self.registers.check(self.precision, self.max_rank())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::families::hash_item;
    use test_case::test_case;

    #[test_case(0.1 => 7)]
    #[test_case(0.05 => 9)]
    #[test_case(0.03 => 11)]
    #[test_case(0.01 => 14)]
    #[test_case(0.5 => 4)]
    #[test_case(0.0001 => 16)]
    fn test_precision_for(error_rate: f64) -> u8 {
        precision_for(error_rate)
    }

    #[test_case(0 => 0)]
    #[test_case(1 => 1)]
    #[test_case(2 => 2)]
    #[test_case(20 => 20)]
    fn test_small_cardinality_is_exact(n: u64) -> u64 {
        let mut hll = ClassicHll::new(0.01);
        for i in 0..n {
            hll.insert_hash(hash_item(format!("item{i}").as_bytes()));
        }
        hll.estimate()
    }

    #[test]
    fn test_large_cardinality_within_error() {
        let mut hll = ClassicHll::new(0.01);
        let n = 200_000u64;
        for i in 0..n {
            hll.insert_hash(hash_item(&i.to_le_bytes()));
        }
        let err = (hll.estimate() as f64 - n as f64).abs() / n as f64;
        assert!(err < 0.03, "relative error {err}");
    }
}
