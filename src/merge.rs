//! Merge benchmarks.
//!
//! The sweep builds `merge_count` independent estimators over random batches and merges them one
//! by one into an accumulator, sampling the accumulator's error after every merge.
//!
//! The replay draws snapshots captured by insertion trials at random, merges the reconstructed
//! estimators into an accumulator and unions their reference sets, sampling the error after every
//! merge up to the configured depth.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregate::{Checkpoint, ErrorSample, SnapshotSet, TrialOutcome};
use crate::error::{BenchError, EstimatorError};
use crate::estimator::{Estimator, EstimatorTrait};
use crate::item::ItemGenerator;
use crate::reference::ReferenceSet;
use crate::runner::ParallelRunner;
use crate::sampler::ErrorSampler;
use crate::variant::{Variant, VariantSpec};

/// Smallest batch built for the sweep.
pub const MIN_BATCH: usize = 10;

/// Parameters of the merge sweep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Upper bounds of the batch size.
    pub sizes: Vec<usize>,
    pub key_lengths: Vec<usize>,
    pub min_merges: u32,
    pub max_merges: u32,
    /// Number of passes over the whole grid.
    pub rounds: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            sizes: vec![1000, 5000, 10_000, 50_000],
            key_lengths: vec![3, 4, 5, 6],
            min_merges: 1,
            max_merges: 49,
            rounds: 1,
        }
    }
}

impl MergeConfig {
    /// Every `(size, key length, merge count)` combination, `rounds` times over.
    pub fn trials(&self) -> Vec<MergeTrial> {
        let mut trials = Vec::new();
        for _ in 0..self.rounds {
            for &size in &self.sizes {
                for &key_length in &self.key_lengths {
                    for merge_count in self.min_merges..=self.max_merges {
                        trials.push(MergeTrial {
                            size,
                            key_length,
                            merge_count,
                        });
                    }
                }
            }
        }
        trials
    }
}

/// One point of the merge sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeTrial {
    /// Batch sizes are drawn from `[MIN_BATCH, size)`.
    pub size: usize,
    pub key_length: usize,
    pub merge_count: u32,
}

/// Run one merge trial for every variant, all variants seeing the same batches.
pub fn run_merge_trial(
    variants: &[VariantSpec],
    trial: &MergeTrial,
    seed: u64,
) -> Result<TrialOutcome, BenchError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut items = ItemGenerator::new(rng.gen()).truncate(trial.key_length);
    let upper = trial.size.max(MIN_BATCH + 1);
    let batches: Vec<Vec<String>> = (0..trial.merge_count)
        .map(|_| {
            let len = rng.gen_range(MIN_BATCH..upper);
            items.batch(len)
        })
        .collect();

    let sampler = ErrorSampler::merges();
    let mut outcome = TrialOutcome::default();
    for spec in variants {
        let identity = spec.identity();
        let mut accumulator = Estimator::new(spec.variant)?;
        let mut reference = ReferenceSet::new();
        for (n, batch) in batches.iter().enumerate() {
            let mut scratch = Estimator::new(spec.variant)?;
            for item in &batch[..spec.budget(batch.len())] {
                scratch.add(item.as_bytes())?;
                reference.insert(item);
            }
            accumulator.merge(&scratch)?;
            let checkpoint = Checkpoint::Merges(n as u32 + 1);
            outcome
                .aggregate
                .record(sampler.sample(&identity, &accumulator, checkpoint, reference.len()));
        }
    }
    outcome.trials = 1;
    debug!(?trial, seed, "merge trial done");
    Ok(outcome)
}

/// Parameters of the snapshot replay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub min_depth: u32,
    pub max_depth: u32,
    /// Replay runs per depth.
    pub runs: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            min_depth: 2,
            max_depth: 50,
            runs: 1000,
        }
    }
}

/// Totals of a replay.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReplayReport {
    pub runs: usize,
    /// Runs abandoned because a snapshot could not be restored or merged.
    pub failed: usize,
    pub samples: usize,
}

/// Samples of one `(variant, depth)` replay unit.
struct ReplayBatch {
    samples: Vec<ErrorSample>,
    failed: usize,
}

/// Replay snapshots of every variant in `snapshots`, handing the raw samples of each
/// `(variant, depth)` unit to `sink` as soon as it completes.
///
/// Units run on `runner`'s worker pool. A run whose snapshot fails to restore contributes no
/// samples and is counted in [`ReplayReport::failed`]; the other runs are unaffected.
pub fn replay<S>(
    runner: &ParallelRunner,
    snapshots: &SnapshotSet,
    config: &ReplayConfig,
    mut sink: S,
) -> Result<ReplayReport, BenchError>
where
    S: FnMut(&[ErrorSample]) -> Result<(), BenchError>,
{
    let mut units = Vec::new();
    for name in snapshots.variants() {
        let variant: Variant = name.parse()?;
        info!(variant = name, snapshots = snapshots.count(name), "replaying merges");
        for depth in config.min_depth..=config.max_depth {
            units.push((name, variant, depth));
        }
    }

    let mut report = ReplayReport::default();
    let mut sink_error = None;
    runner.for_each(
        units.len(),
        |unit, seed| {
            let (name, variant, depth) = units[unit];
            Ok(replay_unit(snapshots, name, variant, depth, config.runs, seed))
        },
        |unit, result: Result<ReplayBatch, BenchError>| match result {
            Ok(batch) => {
                report.runs += config.runs;
                report.failed += batch.failed;
                report.samples += batch.samples.len();
                if sink_error.is_none() {
                    if let Err(e) = sink(&batch.samples) {
                        sink_error = Some(e);
                    }
                }
            }
            Err(e) => {
                let (name, _, depth) = units[unit];
                warn!(variant = name, depth, error = %e, "replay unit failed");
                report.runs += config.runs;
                report.failed += config.runs;
            }
        },
    );
    match sink_error {
        Some(e) => Err(e),
        None => Ok(report),
    }
}

fn replay_unit(
    snapshots: &SnapshotSet,
    name: &str,
    variant: Variant,
    depth: u32,
    runs: usize,
    seed: u64,
) -> ReplayBatch {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut batch = ReplayBatch {
        samples: Vec::with_capacity(runs * depth as usize),
        failed: 0,
    };
    for run in 0..runs {
        match replay_run(snapshots, name, variant, depth, &mut rng) {
            Ok(samples) => batch.samples.extend(samples),
            Err(e) => {
                warn!(variant = name, depth, run, error = %e, "replay run failed");
                batch.failed += 1;
            }
        }
    }
    debug!(variant = name, depth, failed = batch.failed, "replay depth done");
    batch
}

/// Merge `depth` randomly drawn snapshots of `name` into a fresh accumulator.
pub fn replay_run(
    snapshots: &SnapshotSet,
    name: &str,
    variant: Variant,
    depth: u32,
    rng: &mut StdRng,
) -> Result<Vec<ErrorSample>, EstimatorError> {
    let available = snapshots.count(name);
    if available == 0 {
        return Err(EstimatorError::CorruptSnapshot(format!("no snapshots of {name}")));
    }
    let sampler = ErrorSampler::merges();
    let mut accumulator = Estimator::new(variant)?;
    let mut reference = ReferenceSet::new();
    let mut samples = Vec::with_capacity(depth as usize);
    for set_count in 1..=depth {
        let idx = rng.gen_range(0..available);
        let snapshot = snapshots
            .get(name, idx)
            .ok_or_else(|| EstimatorError::CorruptSnapshot(format!("missing snapshot {idx}")))?;
        let part = Estimator::deserialize(snapshot.estimator)?;
        let part_reference = ReferenceSet::restore(snapshot.reference)?;
        accumulator.merge(&part)?;
        reference.union(&part_reference);
        let checkpoint = Checkpoint::Merges(set_count);
        samples.push(sampler.sample(name, &accumulator, checkpoint, reference.len()));
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::Launcher;

    fn variants() -> Vec<VariantSpec> {
        vec![
            VariantSpec::new(Variant::Classic { error_rate: 0.01 }).with_cap(50),
            VariantSpec::new(Variant::PlusPlus { precision: 14 }),
        ]
    }

    #[test]
    fn test_default_grid() {
        let trials = MergeConfig::default().trials();
        assert_eq!(trials.len(), 4 * 4 * 49);
        assert_eq!(
            trials[0],
            MergeTrial {
                size: 1000,
                key_length: 3,
                merge_count: 1
            }
        );
    }

    #[test]
    fn test_merge_trial_samples_every_merge() {
        let trial = MergeTrial {
            size: 200,
            key_length: 6,
            merge_count: 12,
        };
        let outcome = run_merge_trial(&variants(), &trial, 5).unwrap();
        assert_eq!(outcome.trials, 1);
        assert_eq!(outcome.aggregate.total(), 2 * 12);
        let mut depths: Vec<u32> = outcome
            .aggregate
            .iter()
            .filter(|(s, _)| s.variant == "hllpp:14")
            .map(|(s, _)| match s.checkpoint {
                Checkpoint::Merges(depth) => depth,
                Checkpoint::Items(_) => panic!("unexpected item checkpoint"),
            })
            .collect();
        depths.sort_unstable();
        assert_eq!(depths, (1..=12).collect::<Vec<_>>());
        for (sample, _) in outcome.aggregate.iter() {
            assert_eq!(sample.error.places(), 6);
        }
    }

    #[test]
    fn test_merge_trial_is_accurate() {
        let trial = MergeTrial {
            size: 500,
            key_length: 6,
            merge_count: 10,
        };
        let outcome = run_merge_trial(&variants()[1..], &trial, 11).unwrap();
        for (sample, _) in outcome.aggregate.iter() {
            assert!(sample.error.value().abs() < 0.05, "{sample:?}");
        }
    }

    fn snapshots() -> SnapshotSet {
        let mut set = SnapshotSet::new();
        let mut items = ItemGenerator::new(1);
        for _ in 0..5 {
            let batch = items.batch(300);
            let reference: ReferenceSet = batch.iter().collect();
            let mut estimator = Estimator::new(Variant::Packed { precision: 12 }).unwrap();
            for item in &batch {
                estimator.add(item.as_bytes()).unwrap();
            }
            let handle = set.add_reference(reference.snapshot().unwrap());
            set.push("HLL:12", estimator.serialize().unwrap(), handle);
        }
        set
    }

    #[test]
    fn test_replay_run() {
        let set = snapshots();
        let mut rng = StdRng::seed_from_u64(3);
        let samples =
            replay_run(&set, "HLL:12", Variant::Packed { precision: 12 }, 8, &mut rng).unwrap();
        assert_eq!(samples.len(), 8);
        for (n, sample) in samples.iter().enumerate() {
            assert_eq!(sample.checkpoint, Checkpoint::Merges(n as u32 + 1));
            assert!(sample.error.value().abs() < 0.1);
        }
    }

    #[test]
    fn test_replay_collects_every_depth() {
        let runner = ParallelRunner::new(2).with_launcher(Launcher::InProcess).with_seed(1);
        let config = ReplayConfig {
            min_depth: 2,
            max_depth: 4,
            runs: 3,
        };
        let mut written = Vec::new();
        let report = replay(&runner, &snapshots(), &config, |samples| {
            written.extend_from_slice(samples);
            Ok(())
        })
        .unwrap();
        assert_eq!(report.runs, 9);
        assert_eq!(report.failed, 0);
        assert_eq!(report.samples, 3 * (2 + 3 + 4));
        assert_eq!(written.len(), report.samples);
    }

    #[test]
    fn test_corrupt_snapshot_fails_only_its_run() {
        let mut set = snapshots();
        let handle = set.add_reference(ReferenceSet::new().snapshot().unwrap());
        set.push("HLL:12", b"garbage".to_vec(), handle);
        let runner = ParallelRunner::new(1).with_launcher(Launcher::InProcess).with_seed(2);
        let config = ReplayConfig {
            min_depth: 3,
            max_depth: 3,
            runs: 200,
        };
        let report = replay(&runner, &set, &config, |_| Ok(())).unwrap();
        assert_eq!(report.runs, 200);
        assert!(report.failed > 0 && report.failed < 200, "{report:?}");
        assert_eq!(report.samples, (200 - report.failed) * 3);
    }
}
