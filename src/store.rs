//! Append-only error log.
//!
//! One JSON object per line, in one of two shapes:
//!
//! ```text
//! {"add":{"error":0.012,"item_count":4990,"occurrences":17,"w_name":"hllpp:14"}}
//! {"merge":{"error":-0.003215,"occurrences":1,"set_count":7,"w_name":"HLL:13"}}
//! ```
//!
//! Field names and key order are consumed by the plotting step and must stay as they are.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aggregate::{Checkpoint, ErrorAggregate, ErrorSample};
use crate::error::BenchError;
use crate::sampler::{RoundedError, ITEM_PLACES, MERGE_PLACES};

/// Line limit applied by `summary --debug`.
pub const DEBUG_LINE_LIMIT: usize = 1_000_000;

/// One line of the error log. Fields are declared in the order they are written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorRecord {
    Add {
        error: f64,
        item_count: u64,
        occurrences: u64,
        w_name: String,
    },
    Merge {
        error: f64,
        occurrences: u64,
        set_count: u32,
        w_name: String,
    },
}

impl ErrorRecord {
    pub fn new(sample: &ErrorSample, occurrences: u64) -> Self {
        let error = sample.error.value();
        let w_name = sample.variant.clone();
        match sample.checkpoint {
            Checkpoint::Items(item_count) => ErrorRecord::Add {
                error,
                item_count,
                occurrences,
                w_name,
            },
            Checkpoint::Merges(set_count) => ErrorRecord::Merge {
                error,
                occurrences,
                set_count,
                w_name,
            },
        }
    }

    pub fn w_name(&self) -> &str {
        match self {
            ErrorRecord::Add { w_name, .. } | ErrorRecord::Merge { w_name, .. } => w_name,
        }
    }

    pub fn occurrences(&self) -> u64 {
        match self {
            ErrorRecord::Add { occurrences, .. } | ErrorRecord::Merge { occurrences, .. } => {
                *occurrences
            }
        }
    }

    pub fn error(&self) -> f64 {
        match self {
            ErrorRecord::Add { error, .. } | ErrorRecord::Merge { error, .. } => *error,
        }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        match self {
            ErrorRecord::Add { item_count, .. } => Checkpoint::Items(*item_count),
            ErrorRecord::Merge { set_count, .. } => Checkpoint::Merges(*set_count),
        }
    }

    /// Sample key of the record, with the rounding of its record kind.
    pub fn sample(&self) -> ErrorSample {
        let places = match self {
            ErrorRecord::Add { .. } => ITEM_PLACES,
            ErrorRecord::Merge { .. } => MERGE_PLACES,
        };
        ErrorSample {
            variant: self.w_name().to_string(),
            checkpoint: self.checkpoint(),
            error: RoundedError::new(self.error(), places),
        }
    }
}

/// Appending writer of the error log.
pub struct ErrorLog {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl ErrorLog {
    /// Open `path` for appending, creating it if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BenchError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "opened error log");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this handle.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn append(&mut self, record: &ErrorRecord) -> Result<(), BenchError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    /// Append one record per aggregate key, in key order, and flush.
    pub fn append_aggregate(&mut self, aggregate: &ErrorAggregate) -> Result<usize, BenchError> {
        let entries = aggregate.sorted();
        for (sample, occurrences) in &entries {
            self.append(&ErrorRecord::new(sample, *occurrences))?;
        }
        self.flush()?;
        info!(records = entries.len(), path = %self.path.display(), "appended aggregate");
        Ok(entries.len())
    }

    /// Append raw samples, one occurrence each, and flush.
    pub fn append_samples(&mut self, samples: &[ErrorSample]) -> Result<usize, BenchError> {
        for sample in samples {
            self.append(&ErrorRecord::new(sample, 1))?;
        }
        self.flush()?;
        Ok(samples.len())
    }

    pub fn flush(&mut self) -> Result<(), BenchError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Read records from `path`, up to `limit` lines when given. Blank lines are skipped.
pub fn read_records<P: AsRef<Path>>(
    path: P,
    limit: Option<usize>,
) -> Result<Vec<ErrorRecord>, BenchError> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let mut records = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        if limit.is_some_and(|limit| n >= limit) {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

/// Rebuild the aggregate described by `records`.
pub fn to_aggregate(records: &[ErrorRecord]) -> ErrorAggregate {
    let mut aggregate = ErrorAggregate::new();
    for record in records {
        aggregate.add(record.sample(), record.occurrences());
    }
    aggregate
}

/// Occurrence-weighted error statistics of one variant and record kind.
#[derive(Clone, Debug, PartialEq)]
pub struct VariantSummary {
    pub w_name: String,
    /// `add` or `merge`.
    pub kind: &'static str,
    /// Distinct checkpoints seen.
    pub checkpoints: usize,
    pub occurrences: u64,
    pub mean_error: f64,
    pub mean_abs_error: f64,
    pub max_abs_error: f64,
}

#[derive(Default)]
struct Accumulator {
    checkpoints: BTreeMap<Checkpoint, u64>,
    occurrences: u64,
    sum: f64,
    abs_sum: f64,
    max_abs: f64,
}

/// Group `records` by variant and record kind.
pub fn summarize(records: &[ErrorRecord]) -> Vec<VariantSummary> {
    let mut groups: BTreeMap<(&str, &'static str), Accumulator> = BTreeMap::new();
    for record in records {
        let kind = match record {
            ErrorRecord::Add { .. } => "add",
            ErrorRecord::Merge { .. } => "merge",
        };
        let acc = groups.entry((record.w_name(), kind)).or_default();
        let n = record.occurrences();
        let error = record.error();
        *acc.checkpoints.entry(record.checkpoint()).or_insert(0) += n;
        acc.occurrences += n;
        acc.sum += error * n as f64;
        acc.abs_sum += error.abs() * n as f64;
        acc.max_abs = acc.max_abs.max(error.abs());
    }
    groups
        .into_iter()
        .map(|((w_name, kind), acc)| {
            let total = acc.occurrences.max(1) as f64;
            VariantSummary {
                w_name: w_name.to_string(),
                kind,
                checkpoints: acc.checkpoints.len(),
                occurrences: acc.occurrences,
                mean_error: acc.sum / total,
                mean_abs_error: acc.abs_sum / total,
                max_abs_error: acc.max_abs,
            }
        })
        .collect()
}

/// Mean error of `w_name` per checkpoint.
pub fn error_by_checkpoint(records: &[ErrorRecord], w_name: &str) -> BTreeMap<Checkpoint, f64> {
    let mut sums: BTreeMap<Checkpoint, (f64, u64)> = BTreeMap::new();
    for record in records.iter().filter(|r| r.w_name() == w_name) {
        let entry = sums.entry(record.checkpoint()).or_insert((0.0, 0));
        entry.0 += record.error() * record.occurrences() as f64;
        entry.1 += record.occurrences();
    }
    sums.into_iter()
        .map(|(checkpoint, (sum, n))| (checkpoint, sum / n.max(1) as f64))
        .collect()
}
