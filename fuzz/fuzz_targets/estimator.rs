#![no_main]

use hll_error_bench::variant::default_variants;
use hll_error_bench::{Estimator, EstimatorTrait};
use libfuzzer_sys::fuzz_target;
use wyhash::wyhash;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let split_index = wyhash(data, 0) as usize % data.len();
    let (first_half, second_half) = data.split_at(split_index);

    for spec in default_variants() {
        let mut estimator1 = Estimator::new(spec.variant).unwrap();
        let mut previous = 0;
        for chunk in first_half.chunks(4) {
            estimator1.add(chunk).unwrap();
            assert!(estimator1.count() > 0);
            assert!(estimator1.count() >= previous);
            previous = estimator1.count();
        }

        let mut estimator2 = Estimator::new(spec.variant).unwrap();
        for chunk in second_half.chunks(4) {
            estimator2.add(chunk).unwrap();
            assert!(estimator2.count() > 0);
        }

        let mut forward = estimator1.clone();
        forward.merge(&estimator2).unwrap();
        let mut backward = estimator2.clone();
        backward.merge(&estimator1).unwrap();
        assert_eq!(forward.count(), backward.count());
        assert!(forward.count() >= estimator1.count().max(estimator2.count()));
    }
});
