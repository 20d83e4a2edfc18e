#![no_main]

use hll_error_bench::{Estimator, EstimatorTrait};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(mut estimator) = Estimator::deserialize(data) {
        let bytes = estimator.serialize().unwrap();
        assert_eq!(Estimator::deserialize(&bytes).unwrap(), estimator);

        let before = estimator.count();
        estimator.add(b"1").unwrap();
        assert!(estimator.count() >= before.max(1));
    }
});
