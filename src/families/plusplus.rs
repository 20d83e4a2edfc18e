//! ## HyperLogLog++
//! Starts in a sparse representation at precision `P' = 25` and converts to a dense one at the
//! configured precision `P` once the sparse entries would exceed 3/4 of the dense size.
//!
//! Sparse representation stores `sparse index -> rank'` where `rank'` counts leading zeros
//! after the first `P'` hash bits. That is enough to reproduce the dense index and rank
//! during conversion:
//! - if the `P' - P` bits following the dense index are non-zero, the dense rank is
//!   determined by them;
//! - otherwise the dense rank is `P' - P + rank'`.
//!
//! Estimates use linear counting in the sparse representation, and in the dense one while
//! the linear count stays below the empirical threshold for `P`. Above the threshold the raw
//! estimate is bias corrected with LogLog-Beta instead of the empirical bias tables.
//!
//! [Original HyperLogLog++ paper](https://static.googleusercontent.com/media/research.google.com/en//pubs/archive/40671.pdf)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::beta::beta;
use super::{alpha, round_estimate, ByteRegisters, SketchTrait};
use crate::variant::{MAX_PRECISION, MIN_PRECISION};

/// Precision of the sparse representation.
const SPARSE_PRECISION: u8 = 25;

/// Linear counting thresholds for precision in [4..18] range.
const THRESHOLDS: [f64; 15] = [
    10.0, 20.0, 40.0, 80.0, 220.0, 400.0, 900.0, 1800.0, 3100.0, 6500.0, 11500.0, 20000.0,
    50000.0, 120000.0, 350000.0,
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
enum Representation {
    Sparse(BTreeMap<u32, u8>),
    Dense(ByteRegisters),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct HllPlusPlus {
    precision: u8,
    repr: Representation,
}

impl HllPlusPlus {
    pub(crate) fn new(precision: u8) -> Self {
        Self {
            precision,
            repr: Representation::Sparse(BTreeMap::new()),
        }
    }

    /// Return whether sparse representation is used
    pub(crate) fn is_sparse(&self) -> bool {
        matches!(self.repr, Representation::Sparse(_))
    }

    /// Largest dense rank.
    #[inline]
    fn max_rank(&self) -> u8 {
        64 - self.precision + 1
    }

    /// Sparse entries allowed before converting to dense registers.
    #[inline]
    fn sparse_limit(&self) -> usize {
        (3usize << self.precision) / 16
    }

    /// Dense index and rank for a sparse entry.
    #[inline]
    fn to_dense_entry(&self, sparse_idx: u32, sparse_rank: u8) -> (usize, u8) {
        let extra_bits = u32::from(SPARSE_PRECISION - self.precision);
        let idx = (sparse_idx >> extra_bits) as usize;
        let extra = sparse_idx & ((1 << extra_bits) - 1);
        let rank = if extra != 0 {
            (extra.leading_zeros() - (32 - extra_bits) + 1) as u8
        } else {
            (extra_bits as u8).saturating_add(sparse_rank)
        };
        (idx, rank.min(self.max_rank()))
    }

    fn convert_to_dense(&mut self) {
        if let Representation::Sparse(entries) = &self.repr {
            let mut registers = ByteRegisters::new(self.precision);
            for (&idx, &rank) in entries {
                let (idx, rank) = self.to_dense_entry(idx, rank);
                registers.update(idx, rank);
            }
            registers.recompute();
            self.repr = Representation::Dense(registers);
        }
    }

    fn convert_if_full(&mut self) {
        if let Representation::Sparse(entries) = &self.repr {
            if entries.len() > self.sparse_limit() {
                self.convert_to_dense();
            }
        }
    }

    pub(crate) fn merge(&mut self, rhs: &HllPlusPlus) {
        if !self.is_sparse() || !rhs.is_sparse() {
            self.convert_to_dense();
        }
        match &rhs.repr {
            Representation::Sparse(rhs_entries) => {
                let dense: Vec<(usize, u8)> = rhs_entries
                    .iter()
                    .map(|(&idx, &rank)| self.to_dense_entry(idx, rank))
                    .collect();
                match &mut self.repr {
                    Representation::Sparse(entries) => {
                        for (&idx, &rank) in rhs_entries {
                            let slot = entries.entry(idx).or_insert(0);
                            *slot = (*slot).max(rank);
                        }
                    }
                    Representation::Dense(registers) => {
                        for (idx, rank) in dense {
                            registers.update(idx, rank);
                        }
                        registers.recompute();
                    }
                }
                self.convert_if_full();
            }
            Representation::Dense(rhs_registers) => {
                if let Representation::Dense(registers) = &mut self.repr {
                    registers.merge(rhs_registers);
                }
            }
        }
    }
}

impl SketchTrait for HllPlusPlus {
    #[inline]
    fn insert_hash(&mut self, hash: u64) {
        match &mut self.repr {
            Representation::Sparse(entries) => {
                let idx = (hash >> (64 - SPARSE_PRECISION)) as u32;
                let w = hash << SPARSE_PRECISION;
                let rank = (w.leading_zeros() + 1).min(u32::from(64 - SPARSE_PRECISION + 1)) as u8;
                let slot = entries.entry(idx).or_insert(0);
                *slot = (*slot).max(rank);
                self.convert_if_full();
            }
            Representation::Dense(registers) => {
                let p = u32::from(self.precision);
                let idx = (hash >> (64 - p)) as usize;
                let w = hash << p;
                let rank = (w.leading_zeros() + 1).min(65 - p) as u8;
                registers.update(idx, rank);
            }
        }
    }

    fn estimate(&self) -> u64 {
        let estimate = match &self.repr {
            Representation::Sparse(entries) => {
                let m = f64::from(1u32 << SPARSE_PRECISION);
                let zeros = m - entries.len() as f64;
                m * (m / zeros).ln()
            }
            Representation::Dense(registers) => {
                let threshold = THRESHOLDS[usize::from(self.precision - MIN_PRECISION)];
                let linear = if registers.zeros() > 0 {
                    Some(registers.linear_count())
                } else {
                    None
                };
                match linear {
                    Some(linear) if linear <= threshold => linear,
                    _ => {
                        let m = registers.m();
                        let zeros = f64::from(registers.zeros());
                        alpha(1 << self.precision) * m * (m - zeros)
                            / (registers.sum() + beta(zeros, self.precision))
                    }
                }
            }
        };
        round_estimate(estimate)
    }

    #[inline]
    fn precision(&self) -> u8 {
        self.precision
    }

    fn size_of(&self) -> usize {
        std::mem::size_of::<Self>()
            + match &self.repr {
                Representation::Sparse(entries) => {
                    entries.len() * (std::mem::size_of::<u32>() + std::mem::size_of::<u8>())
                }
                Representation::Dense(registers) => registers.size_of(),
            }
    }

    fn check(&self) -> Result<(), String> {
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&self.precision) {
            return Err(format!("hllpp precision {} out of range", self.precision));
        }
        match &self.repr {
            Representation::Sparse(entries) => {
                if entries.len() > self.sparse_limit() {
                    return Err(format!("{} sparse entries exceed the limit", entries.len()));
                }
                let max_rank = 64 - SPARSE_PRECISION + 1;
                let bad = entries
                    .iter()
                    .find(|(&idx, &rank)| idx >> SPARSE_PRECISION != 0 || rank == 0 || rank > max_rank);
                match bad {
                    Some((idx, rank)) => Err(format!("invalid sparse entry {idx} -> {rank}")),
                    None => Ok(()),
                }
            }
            Representation::Dense(registers) => registers.check(self.precision, self.max_rank()),
        }
    }
}
