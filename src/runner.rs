//! Parallel trial execution.
//!
//! A fixed pool of worker slots pulls task indices from a shared counter. Each task runs either
//! on the slot's thread ([`Launcher::InProcess`]) or in a child process running the `worker`
//! subcommand of the current executable ([`Launcher::Subprocess`]), which reports its
//! [`TrialOutcome`] as bincode on stdout.
//!
//! Results are reduced on the calling thread in completion order. Aggregates are summed, which
//! does not depend on order; snapshot sets are concatenated in task order once every task is
//! done. A failing or panicking task is reported in [`RunReport::failures`] and does not affect
//! the others.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregate::TrialOutcome;
use crate::error::BenchError;
use crate::insertion::{run_insertion, InsertionConfig};
use crate::merge::{run_merge_trial, MergeTrial};
use crate::variant::VariantSpec;

/// Self-contained unit of work a worker executes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WorkerTask {
    Insertion {
        variants: Vec<VariantSpec>,
        config: InsertionConfig,
    },
    Merge {
        variants: Vec<VariantSpec>,
        trial: MergeTrial,
    },
}

impl WorkerTask {
    pub fn execute(&self, seed: u64) -> Result<TrialOutcome, BenchError> {
        match self {
            WorkerTask::Insertion { variants, config } => run_insertion(variants, config, seed),
            WorkerTask::Merge { variants, trial } => run_merge_trial(variants, trial, seed),
        }
    }
}

/// How a task is started.
#[derive(Clone, Debug, PartialEq)]
pub enum Launcher {
    InProcess,
    Subprocess { program: PathBuf },
}

impl Launcher {
    /// Subprocess launcher re-executing the current binary.
    pub fn current_exe() -> Result<Self, BenchError> {
        Ok(Launcher::Subprocess {
            program: std::env::current_exe()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskFailure {
    pub task: usize,
    pub reason: String,
}

/// Reduced result of a parallel run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcome: TrialOutcome,
    pub completed: usize,
    /// Failed tasks in task order.
    pub failures: Vec<TaskFailure>,
}

/// Fixed-size pool running independent tasks.
#[derive(Clone, Debug)]
pub struct ParallelRunner {
    workers: usize,
    launcher: Launcher,
    seed: u64,
}

impl Default for ParallelRunner {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

impl ParallelRunner {
    /// Runner with `workers` slots running tasks in-process, seeded from entropy.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            launcher: Launcher::InProcess,
            seed: rand::random(),
        }
    }

    pub fn with_launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = launcher;
        self
    }

    /// Base seed all task seeds are derived from.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    /// Seed of task `task`.
    #[inline]
    pub fn task_seed(&self, task: usize) -> u64 {
        // splitmix64 finalizer over the base seed and task index
        let mut z = self
            .seed
            .wrapping_add((task as u64 + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15));
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    /// Run `tasks` with the configured launcher.
    pub fn run(&self, tasks: &[WorkerTask]) -> Result<RunReport, BenchError> {
        info!(
            tasks = tasks.len(),
            workers = self.workers,
            launcher = ?self.launcher,
            "starting parallel run"
        );
        match &self.launcher {
            Launcher::InProcess => self.run_jobs(tasks.len(), |task, seed| tasks[task].execute(seed)),
            Launcher::Subprocess { program } => self.run_jobs(tasks.len(), |task, seed| {
                spawn_worker(program, task, &tasks[task], seed)
            }),
        }
    }

    /// Run `task_count` jobs on the pool and reduce their outcomes.
    pub fn run_jobs<J>(&self, task_count: usize, job: J) -> Result<RunReport, BenchError>
    where
        J: Fn(usize, u64) -> Result<TrialOutcome, BenchError> + Sync,
    {
        let mut report = RunReport::default();
        let mut snapshots = BTreeMap::new();
        self.for_each(task_count, job, |task, result| match result {
            Ok(outcome) => {
                report.outcome.aggregate.absorb(outcome.aggregate);
                report.outcome.trials += outcome.trials;
                snapshots.insert(task, outcome.snapshots);
                report.completed += 1;
                debug!(task, completed = report.completed, task_count, "task done");
            }
            Err(e) => {
                warn!(task, error = %e, "task failed");
                report.failures.push(TaskFailure {
                    task,
                    reason: e.to_string(),
                });
            }
        });
        for (_, set) in snapshots {
            report.outcome.snapshots.absorb(set);
        }
        report.failures.sort_by_key(|f| f.task);

        if task_count > 0 && report.completed == 0 {
            return Err(BenchError::AllTasksFailed(task_count));
        }
        info!(
            completed = report.completed,
            failed = report.failures.len(),
            trials = report.outcome.trials,
            keys = report.outcome.aggregate.len(),
            "parallel run done"
        );
        Ok(report)
    }

    /// Run `task_count` jobs on the pool, handing every result to `on_result` on the calling
    /// thread as it completes. Panics inside a job are reported as that job's error.
    pub fn for_each<T, J, S>(&self, task_count: usize, job: J, mut on_result: S)
    where
        T: Send,
        J: Fn(usize, u64) -> Result<T, BenchError> + Sync,
        S: FnMut(usize, Result<T, BenchError>),
    {
        let workers = self.workers.min(task_count).max(1);
        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel();
        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let (next, job) = (&next, &job);
                scope.spawn(move || loop {
                    let task = next.fetch_add(1, Ordering::Relaxed);
                    if task >= task_count {
                        break;
                    }
                    let seed = self.task_seed(task);
                    let result = panic::catch_unwind(AssertUnwindSafe(|| job(task, seed)))
                        .unwrap_or_else(|payload| {
                            Err(BenchError::Worker {
                                task,
                                reason: panic_message(payload.as_ref()),
                            })
                        });
                    if tx.send((task, result)).is_err() {
                        break;
                    }
                });
            }
            drop(tx);
            for (task, result) in rx {
                on_result(task, result);
            }
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Run `task` in a child process and decode its outcome from stdout.
fn spawn_worker(
    program: &Path,
    index: usize,
    task: &WorkerTask,
    seed: u64,
) -> Result<TrialOutcome, BenchError> {
    let output = Command::new(program)
        .arg("worker")
        .arg("--task")
        .arg(serde_json::to_string(task)?)
        .arg("--task-seed")
        .arg(seed.to_string())
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()?;
    if !output.status.success() {
        return Err(BenchError::Worker {
            task: index,
            reason: format!("worker exited with {}", output.status),
        });
    }
    decode_outcome(&output.stdout)
}

/// Encoding of a [`TrialOutcome`] on a worker's stdout.
pub fn encode_outcome(outcome: &TrialOutcome) -> Result<Vec<u8>, BenchError> {
    Ok(bincode::serde::encode_to_vec(
        outcome,
        bincode::config::standard(),
    )?)
}

pub fn decode_outcome(bytes: &[u8]) -> Result<TrialOutcome, BenchError> {
    let (outcome, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(outcome)
}

/// Lower the scheduling priority of this process and the workers it spawns.
#[cfg(unix)]
pub fn lower_priority(increment: i32) {
    // SAFETY: nice(2) only changes the scheduling priority of the calling process.
    let priority = unsafe { libc::nice(increment) };
    debug!(priority, "lowered process priority");
}

#[cfg(not(unix))]
pub fn lower_priority(_increment: i32) {}
