//! Insertion benchmark.
//!
//! One trial inserts `item_count` random items into a fresh instance of every configured variant
//! and into an exact reference set, sampling the relative error of each variant every
//! `sample_every` items. Variants with an insertion cap stop receiving items (and stop being
//! sampled) once the cap is reached.
//!
//! Snapshots of every variant, paired with the reference set they were built from, are taken at
//! random points with probability `snapshot_probability` per item and always at the end of a
//! trial. A capped variant is paired with the reference set as it was when the cap was reached.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregate::{ErrorAggregate, SnapshotSet, TrialOutcome};
use crate::error::BenchError;
use crate::estimator::{Estimator, EstimatorTrait};
use crate::item::{ItemGenerator, ITEM_LEN};
use crate::reference::ReferenceSet;
use crate::sampler::{item_checkpoint, ErrorSampler};
use crate::variant::VariantSpec;

/// Parameters of one insertion task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsertionConfig {
    /// Trials per task.
    pub runs: usize,
    /// Items inserted per trial.
    pub item_count: usize,
    /// Every run inserts one trial per key length, in order.
    pub key_lengths: Vec<usize>,
    /// Sample every N-th insertion.
    pub sample_every: usize,
    /// Item checkpoints are rounded down to a multiple of this.
    pub granularity: u64,
    /// Per-item probability of a mid-trial snapshot.
    pub snapshot_probability: f64,
}

impl InsertionConfig {
    /// Copy of this configuration sweeping only `key_lengths`.
    pub fn with_key_lengths(&self, key_lengths: Vec<usize>) -> Self {
        Self {
            key_lengths,
            ..self.clone()
        }
    }
}

impl Default for InsertionConfig {
    fn default() -> Self {
        Self {
            runs: 10,
            item_count: 5000,
            key_lengths: vec![4, 5, ITEM_LEN],
            sample_every: 1,
            granularity: 10,
            snapshot_probability: 0.001,
        }
    }
}

/// Per-variant trial state.
struct Lane {
    identity: String,
    estimator: Estimator,
    budget: usize,
    /// Reference set snapshot taken when the insertion cap was reached.
    capped_reference: Option<usize>,
}

/// Run `config.runs` passes over `config.key_lengths` of insertion trials over `variants`.
pub fn run_insertion(
    variants: &[VariantSpec],
    config: &InsertionConfig,
    seed: u64,
) -> Result<TrialOutcome, BenchError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut outcome = TrialOutcome::default();
    for run in 0..config.runs {
        for &key_length in &config.key_lengths {
            let items = ItemGenerator::new(rng.gen()).truncate(key_length);
            run_trial(
                variants,
                config,
                items,
                &mut rng,
                &mut outcome.aggregate,
                &mut outcome.snapshots,
            )?;
            outcome.trials += 1;
            debug!(run, key_length, seed, "insertion trial done");
        }
    }
    Ok(outcome)
}

fn run_trial(
    variants: &[VariantSpec],
    config: &InsertionConfig,
    items: ItemGenerator,
    rng: &mut StdRng,
    aggregate: &mut ErrorAggregate,
    snapshots: &mut SnapshotSet,
) -> Result<(), BenchError> {
    let sampler = ErrorSampler::items();
    let sample_every = config.sample_every.max(1);
    let mut reference = ReferenceSet::new();
    let mut lanes = variants
        .iter()
        .map(|spec| {
            Ok(Lane {
                identity: spec.identity(),
                estimator: Estimator::new(spec.variant)?,
                budget: spec.budget(config.item_count),
                capped_reference: None,
            })
        })
        .collect::<Result<Vec<_>, BenchError>>()?;

    for (n, item) in items.take(config.item_count).enumerate() {
        reference.insert(&item);
        let sample = n % sample_every == 0;
        for lane in lanes.iter_mut().filter(|lane| n < lane.budget) {
            lane.estimator.add(item.as_bytes())?;
            if sample {
                let checkpoint = item_checkpoint(n, config.granularity);
                aggregate.record(sampler.sample(
                    &lane.identity,
                    &lane.estimator,
                    checkpoint,
                    reference.len(),
                ));
            }
            if n + 1 == lane.budget && lane.budget < config.item_count {
                lane.capped_reference = Some(snapshots.add_reference(reference.snapshot()?));
            }
        }

        if rng.gen_bool(config.snapshot_probability.clamp(0.0, 1.0)) {
            capture(&lanes, &reference, snapshots)?;
        }
    }
    capture(&lanes, &reference, snapshots)
}

/// Snapshot every lane against the current reference set.
fn capture(
    lanes: &[Lane],
    reference: &ReferenceSet,
    snapshots: &mut SnapshotSet,
) -> Result<(), BenchError> {
    let mut current = None;
    for lane in lanes {
        let handle = match lane.capped_reference {
            Some(handle) => handle,
            None => match current {
                Some(handle) => handle,
                None => {
                    let handle = snapshots.add_reference(reference.snapshot()?);
                    current = Some(handle);
                    handle
                }
            },
        };
        snapshots.push(&lane.identity, lane.estimator.serialize()?, handle);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Checkpoint;
    use crate::variant::Variant;

    fn config(item_count: usize, snapshot_probability: f64) -> InsertionConfig {
        InsertionConfig {
            runs: 2,
            item_count,
            key_lengths: vec![ITEM_LEN],
            snapshot_probability,
            ..Default::default()
        }
    }

    #[test]
    fn test_samples_every_item() {
        let variants = vec![
            VariantSpec::new(Variant::Packed { precision: 13 }),
            VariantSpec::new(Variant::PlusPlus { precision: 14 }),
        ];
        let outcome = run_insertion(&variants, &config(500, 0.0), 1).unwrap();
        assert_eq!(outcome.trials, 2);
        assert_eq!(outcome.aggregate.total(), 2 * 2 * 500);
        for (sample, _) in outcome.aggregate.iter() {
            match sample.checkpoint {
                Checkpoint::Items(n) => assert!(n % 10 == 0 && n <= 500),
                Checkpoint::Merges(_) => panic!("unexpected merge checkpoint"),
            }
        }
        // End of trial snapshots only.
        assert_eq!(outcome.snapshots.count("HLL:13"), 2);
        assert_eq!(outcome.snapshots.count("hllpp:14"), 2);
    }

    #[test]
    fn test_capped_variant_stops_early() {
        let variants = vec![
            VariantSpec::new(Variant::Classic { error_rate: 0.01 }).with_cap(100),
            VariantSpec::new(Variant::Packed { precision: 13 }),
        ];
        let outcome = run_insertion(&variants, &config(300, 0.0), 2).unwrap();
        let per_variant = |name: &str| {
            outcome
                .aggregate
                .iter()
                .filter(|(s, _)| s.variant == name)
                .map(|(_, n)| n)
                .sum::<u64>()
        };
        assert_eq!(per_variant("hyperloglog:0.01"), 2 * 100);
        assert_eq!(per_variant("HLL:13"), 2 * 300);

        // The capped variant is paired with the reference set at the cap.
        let snapshot = outcome.snapshots.get("hyperloglog:0.01", 0).unwrap();
        let estimator = Estimator::deserialize(snapshot.estimator).unwrap();
        let reference = ReferenceSet::restore(snapshot.reference).unwrap();
        assert_eq!(reference.len(), 100);
        assert!(estimator.count().abs_diff(100) <= 3);
        let full = outcome.snapshots.get("HLL:13", 0).unwrap();
        assert_eq!(ReferenceSet::restore(full.reference).unwrap().len(), 300);
    }

    #[test]
    fn test_mid_trial_snapshots() {
        let variants = vec![VariantSpec::new(Variant::PlusPlus { precision: 12 })];
        let outcome = run_insertion(&variants, &config(50, 1.0), 3).unwrap();
        // One per item plus one at the end, for each run.
        assert_eq!(outcome.snapshots.count("hllpp:12"), 2 * 51);
    }

    #[test]
    fn test_same_seed_same_outcome() {
        let variants = vec![VariantSpec::new(Variant::Packed { precision: 10 })];
        let a = run_insertion(&variants, &config(200, 0.01), 9).unwrap();
        let b = run_insertion(&variants, &config(200, 0.01), 9).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_length_sweep() {
        let variants = vec![VariantSpec::new(Variant::PlusPlus { precision: 12 })];
        let config = InsertionConfig {
            key_lengths: vec![2, 4, 6],
            ..config(400, 0.0)
        };
        let outcome = run_insertion(&variants, &config, 4).unwrap();
        assert_eq!(outcome.trials, 2 * 3);
        assert_eq!(outcome.aggregate.total(), 2 * 3 * 400);
        assert_eq!(outcome.snapshots.count("hllpp:12"), 2 * 3);

        // 2-symbol keys have 3844 values, so 400 draws repeat some of them.
        let short = (0..outcome.snapshots.count("hllpp:12"))
            .filter_map(|idx| outcome.snapshots.get("hllpp:12", idx))
            .map(|s| ReferenceSet::restore(s.reference).unwrap().len())
            .min()
            .unwrap();
        assert!(short < 400, "{short}");
    }
}
