//! Relative error at sampling points.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::aggregate::{Checkpoint, ErrorSample};
use crate::estimator::EstimatorTrait;

/// Decimal places kept for insertion samples.
pub const ITEM_PLACES: u8 = 3;
/// Decimal places kept for merge samples.
pub const MERGE_PLACES: u8 = 6;

/// `(estimate - actual) / actual`, or 0 for an empty reference.
#[inline]
pub fn relative_error(estimate: u64, actual: usize) -> f64 {
    if actual == 0 {
        return 0.0;
    }
    let actual = actual as f64;
    (estimate as f64 - actual) / actual
}

/// Relative error rounded to a fixed number of decimal places.
///
/// Stored as a scaled integer so it can be hashed and compared exactly; `value()` gives back the
/// rounded float written to the error log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoundedError {
    scaled: i64,
    places: u8,
}

impl RoundedError {
    pub fn new(error: f64, places: u8) -> Self {
        let scale = 10f64.powi(i32::from(places));
        let scaled = if error.is_finite() {
            (error * scale).round() as i64
        } else {
            0
        };
        Self { scaled, places }
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.scaled as f64 / 10f64.powi(i32::from(self.places))
    }

    pub fn places(&self) -> u8 {
        self.places
    }
}

impl fmt::Display for RoundedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.*}", usize::from(self.places), self.value())
    }
}

/// Produces [`ErrorSample`]s for one rounding policy.
#[derive(Clone, Copy, Debug)]
pub struct ErrorSampler {
    places: u8,
}

impl ErrorSampler {
    /// Sampler for per-item checkpoints.
    pub fn items() -> Self {
        Self { places: ITEM_PLACES }
    }

    /// Sampler for per-merge checkpoints.
    pub fn merges() -> Self {
        Self {
            places: MERGE_PLACES,
        }
    }

    pub fn with_places(places: u8) -> Self {
        Self { places }
    }

    /// Rounded relative error of `estimate` against `actual`.
    #[inline]
    pub fn error(&self, estimate: u64, actual: usize) -> RoundedError {
        RoundedError::new(relative_error(estimate, actual), self.places)
    }

    /// Sample `estimator`, known by `identity`, against the exact cardinality `actual`.
    #[inline]
    pub fn sample<E: EstimatorTrait>(
        &self,
        identity: &str,
        estimator: &E,
        checkpoint: Checkpoint,
        actual: usize,
    ) -> ErrorSample {
        debug_assert_eq!(identity, estimator.identity());
        ErrorSample {
            variant: identity.to_string(),
            checkpoint,
            error: self.error(estimator.count(), actual),
        }
    }
}

/// Insertion checkpoint for the `n`-th inserted item (0-based), rounded down to `granularity`.
#[inline]
pub fn item_checkpoint(n: usize, granularity: u64) -> Checkpoint {
    let count = n as u64 + 1;
    let granularity = granularity.max(1);
    Checkpoint::Items(count / granularity * granularity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::Estimator;
    use crate::variant::Variant;
    use test_case::test_case;

    #[test_case(105, 100 => 0.05)]
    #[test_case(95, 100 => -0.05)]
    #[test_case(0, 10 => -1.0)]
    #[test_case(7, 0 => 0.0; "empty reference")]
    #[test_case(0, 0 => 0.0; "both empty")]
    fn test_relative_error(estimate: u64, actual: usize) -> f64 {
        relative_error(estimate, actual)
    }

    #[test_case(0.012_345, 3 => 0.012)]
    #[test_case(0.012_5, 3 => 0.013)]
    #[test_case(-0.012_5, 3 => -0.013)]
    #[test_case(0.012_345_678, 6 => 0.012_346)]
    #[test_case(f64::NAN, 3 => 0.0)]
    fn test_rounding(error: f64, places: u8) -> f64 {
        RoundedError::new(error, places).value()
    }

    #[test]
    fn test_rounded_keys_collapse() {
        assert_eq!(RoundedError::new(0.0101, 3), RoundedError::new(0.0099, 3));
        assert_ne!(RoundedError::new(0.0101, 3), RoundedError::new(0.0101, 6));
        assert_eq!(RoundedError::new(0.25, 3).to_string(), "0.250");
    }

    #[test]
    fn test_sample() {
        let variant = Variant::PlusPlus { precision: 12 };
        let mut estimator = Estimator::new(variant).unwrap();
        for i in 0..100 {
            estimator.add(format!("{i}").as_bytes()).unwrap();
        }
        let sample = ErrorSampler::merges().sample(
            &variant.identity(),
            &estimator,
            Checkpoint::Merges(2),
            80,
        );
        assert_eq!(sample.variant, "hllpp:12");
        assert_eq!(sample.checkpoint, Checkpoint::Merges(2));
        assert_eq!(sample.error, ErrorSampler::merges().error(estimator.count(), 80));
        assert_eq!(sample.error.places(), MERGE_PLACES);
    }

    #[test_case(0, 10 => Checkpoint::Items(0))]
    #[test_case(8, 10 => Checkpoint::Items(0))]
    #[test_case(9, 10 => Checkpoint::Items(10))]
    #[test_case(4998, 10 => Checkpoint::Items(4990))]
    #[test_case(4, 1 => Checkpoint::Items(5))]
    #[test_case(4, 0 => Checkpoint::Items(5); "zero granularity")]
    fn test_item_checkpoint(n: usize, granularity: u64) -> Checkpoint {
        item_checkpoint(n, granularity)
    }
}
