//! Benchmark configuration.
//!
//! Every field has a default, so a TOML file only needs to name what it changes:
//!
//! ```toml
//! variants = ["HLL:13", "hllpp:14"]
//! insertion_tasks = 16
//!
//! [insertion]
//! runs = 2
//! item_count = 10000
//! key_lengths = [4, 6]
//!
//! [insert_caps]
//! "hyperloglog:" = 1000
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::BenchError;
use crate::insertion::InsertionConfig;
use crate::item::ITEM_LEN;
use crate::merge::{MergeConfig, ReplayConfig, MIN_BATCH};
use crate::runner::WorkerTask;
use crate::variant::{default_insert_caps, default_variant_names, resolve_variants, VariantSpec};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Variant identities, in benchmark order.
    pub variants: Vec<String>,
    /// Worker pool size; defaults to the number of CPUs.
    pub workers: Option<usize>,
    /// Base seed; drawn from entropy when absent.
    pub seed: Option<u64>,
    /// Error log path.
    pub output: PathBuf,
    /// Scheduling priority increment applied before a parallel run.
    pub nice: i32,
    /// Number of insertion tasks, each running `insertion.runs` trials.
    pub insertion_tasks: usize,
    /// Items inserted per variant by the self-check.
    pub check_items: usize,
    /// Insertion caps by variant name prefix.
    pub insert_caps: BTreeMap<String, usize>,
    pub insertion: InsertionConfig,
    pub merge: MergeConfig,
    pub replay: ReplayConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            variants: default_variant_names(),
            workers: None,
            seed: None,
            output: PathBuf::from("errors.jsonl"),
            nice: 10,
            insertion_tasks: 200,
            check_items: 100_000,
            insert_caps: default_insert_caps(),
            insertion: InsertionConfig::default(),
            merge: MergeConfig::default(),
            replay: ReplayConfig::default(),
        }
    }
}

impl BenchConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, BenchError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| BenchError::Config(format!("{}: {e}", path.display())))?;
        content.parse()
    }

    pub fn validate(&self) -> Result<(), BenchError> {
        let invalid = |field: &str, value: &dyn std::fmt::Display| {
            Err(BenchError::Config(format!("invalid {field}: {value}")))
        };
        if self.variants.is_empty() {
            return invalid("variants", &"empty list");
        }
        self.variant_specs()?;
        if self.workers == Some(0) {
            return invalid("workers", &0);
        }

        let insertion = &self.insertion;
        if insertion.item_count == 0 {
            return invalid("insertion.item_count", &0);
        }
        if insertion.sample_every == 0 {
            return invalid("insertion.sample_every", &0);
        }
        if insertion.granularity == 0 {
            return invalid("insertion.granularity", &0);
        }
        if !(0.0..=1.0).contains(&insertion.snapshot_probability) {
            return invalid("insertion.snapshot_probability", &insertion.snapshot_probability);
        }
        if insertion.key_lengths.is_empty() {
            return invalid("insertion.key_lengths", &"empty list");
        }
        if let Some(len) = insertion
            .key_lengths
            .iter()
            .find(|&&l| !(1..=ITEM_LEN).contains(&l))
        {
            return invalid("insertion.key_lengths", len);
        }

        let merge = &self.merge;
        if let Some(size) = merge.sizes.iter().find(|&&s| s <= MIN_BATCH) {
            return invalid("merge.sizes", size);
        }
        if let Some(len) = merge.key_lengths.iter().find(|&&l| !(1..=ITEM_LEN).contains(&l)) {
            return invalid("merge.key_lengths", len);
        }
        if merge.min_merges == 0 || merge.min_merges > merge.max_merges {
            return invalid(
                "merge.min_merges",
                &format!("{}..={}", merge.min_merges, merge.max_merges),
            );
        }

        let replay = &self.replay;
        if replay.min_depth == 0 || replay.min_depth > replay.max_depth {
            return invalid(
                "replay.min_depth",
                &format!("{}..={}", replay.min_depth, replay.max_depth),
            );
        }
        Ok(())
    }

    /// The fixed variant list, with insertion caps resolved.
    pub fn variant_specs(&self) -> Result<Vec<VariantSpec>, BenchError> {
        Ok(resolve_variants(&self.variants, &self.insert_caps)?)
    }

    pub fn insertion_tasks(&self) -> Result<Vec<WorkerTask>, BenchError> {
        let variants = self.variant_specs()?;
        let key_lengths = &self.insertion.key_lengths;
        if key_lengths.is_empty() {
            return Err(BenchError::Config("no insertion key lengths".to_string()));
        }
        Ok((0..self.insertion_tasks)
            .map(|task| WorkerTask::Insertion {
                variants: variants.clone(),
                config: self
                    .insertion
                    .with_key_lengths(vec![key_lengths[task % key_lengths.len()]]),
            })
            .collect())
    }

    pub fn merge_tasks(&self) -> Result<Vec<WorkerTask>, BenchError> {
        let variants = self.variant_specs()?;
        Ok(self
            .merge
            .trials()
            .into_iter()
            .map(|trial| WorkerTask::Merge {
                variants: variants.clone(),
                trial,
            })
            .collect())
    }
}

impl std::str::FromStr for BenchConfig {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: BenchConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_defaults() {
        let config = BenchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.insertion_tasks().unwrap().len(), 200);
        assert_eq!(config.merge_tasks().unwrap().len(), 4 * 4 * 49);
        let specs = config.variant_specs().unwrap();
        assert_eq!(specs[0].insert_cap, Some(1000));
    }

    #[test]
    fn test_insertion_tasks_cycle_key_lengths() {
        let config = BenchConfig {
            insertion_tasks: 7,
            ..Default::default()
        };
        let lengths: Vec<Vec<usize>> = config
            .insertion_tasks()
            .unwrap()
            .into_iter()
            .map(|task| match task {
                WorkerTask::Insertion { config, .. } => config.key_lengths,
                WorkerTask::Merge { .. } => panic!("unexpected merge task"),
            })
            .collect();
        assert_eq!(
            lengths,
            vec![vec![4], vec![5], vec![6], vec![4], vec![5], vec![6], vec![4]]
        );
    }

    #[test]
    fn test_partial_file() {
        let config: BenchConfig = r#"
            variants = ["HLL:13", "hllpp:14"]
            insertion_tasks = 4
            seed = 42

            [insertion]
            runs = 2

            [insert_caps]
            "hllpp:" = 300
        "#
        .parse()
        .unwrap();
        assert_eq!(config.variants.len(), 2);
        assert_eq!(config.insertion.runs, 2);
        assert_eq!(config.insertion.item_count, 5000);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.replay, ReplayConfig::default());
        let specs = config.variant_specs().unwrap();
        assert_eq!(specs[0].insert_cap, None);
        assert_eq!(specs[1].insert_cap, Some(300));
    }

    #[test]
    fn test_round_trip() {
        let config = BenchConfig {
            seed: Some(7),
            ..Default::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert_eq!(text.parse::<BenchConfig>().unwrap(), config);
    }

    #[test_case("variants = []"; "no variants")]
    #[test_case(r#"variants = ["HLL:99"]"#; "unknown precision")]
    #[test_case("workers = 0"; "no workers")]
    #[test_case("[insertion]\nsnapshot_probability = 1.5"; "probability")]
    #[test_case("[insertion]\nkey_lengths = [0]"; "key length")]
    #[test_case("[insertion]\nkey_lengths = [4, 7]"; "long key length")]
    #[test_case("[insertion]\nkey_lengths = []"; "no key lengths")]
    #[test_case("[merge]\nsizes = [10]"; "batch size")]
    #[test_case("[merge]\nmin_merges = 5\nmax_merges = 4"; "merge range")]
    #[test_case("[replay]\nmin_depth = 0"; "replay depth")]
    #[test_case("insertion_tasks = \"many\""; "type mismatch")]
    fn test_invalid(text: &str) {
        assert!(matches!(
            text.parse::<BenchConfig>(),
            Err(BenchError::Config(_)) | Err(BenchError::Estimator(_))
        ));
    }
}
