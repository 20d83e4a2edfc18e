//! `hll-error-bench` command line interface.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hll_error_bench::config::BenchConfig;
use hll_error_bench::merge::replay;
use hll_error_bench::report::{check_table, self_check, summary_table};
use hll_error_bench::runner::{
    encode_outcome, lower_priority, Launcher, ParallelRunner, RunReport, WorkerTask,
};
use hll_error_bench::store::{read_records, summarize, ErrorLog, DEBUG_LINE_LIMIT};
use hll_error_bench::BenchError;

/// Measure estimation error of HyperLogLog-family estimators under insertion and merging
#[derive(Parser)]
#[command(name = "hll-error-bench", version)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Error log path
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Number of parallel workers
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Run trials on threads of this process instead of worker processes
    #[arg(long, global = true)]
    in_process: bool,

    /// Base seed for reproducible runs
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run insertion trials, then replay merges of the captured snapshots
    Benchmark {
        /// Do not replay merges
        #[arg(long)]
        skip_replay: bool,
    },

    /// Run the merge sweep
    Merge,

    /// Insert items into every variant and report time, error and snapshot size
    Check {
        /// Items per variant
        #[arg(short = 'n', long)]
        items: Option<usize>,
    },

    /// Summarize the error log per variant
    Summary {
        /// Read at most the first million lines
        #[arg(long)]
        debug: bool,
    },

    /// Execute one task and write its outcome to stdout
    #[command(hide = true)]
    Worker {
        /// Task as JSON
        #[arg(long)]
        task: String,

        #[arg(long)]
        task_seed: u64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    initialize_logging();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "failed");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr; a worker's stdout carries its outcome.
fn initialize_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn run(cli: &Cli) -> Result<(), BenchError> {
    match &cli.command {
        Commands::Worker { task, task_seed } => run_worker(task, *task_seed),
        Commands::Benchmark { skip_replay } => {
            run_benchmark(cli, &load_configuration(cli)?, *skip_replay)
        }
        Commands::Merge => run_merge(cli, &load_configuration(cli)?),
        Commands::Check { items } => {
            let config = load_configuration(cli)?;
            let records = self_check(
                &config.variant_specs()?,
                items.unwrap_or(config.check_items),
            )?;
            println!("{}", check_table(records));
            Ok(())
        }
        Commands::Summary { debug } => {
            let config = load_configuration(cli)?;
            let records = read_records(&config.output, debug.then_some(DEBUG_LINE_LIMIT))?;
            info!(records = records.len(), "read error log");
            println!("{}", summary_table(&summarize(&records)));
            Ok(())
        }
    }
}

fn run_benchmark(cli: &Cli, config: &BenchConfig, skip_replay: bool) -> Result<(), BenchError> {
    let runner = build_runner(cli, config)?;
    lower_priority(config.nice);
    let report = runner.run(&config.insertion_tasks()?)?;
    warn_failures(&report);
    let mut log = ErrorLog::open(&config.output)?;
    log.append_aggregate(&report.outcome.aggregate)?;

    if !skip_replay {
        let replayed = replay(
            &runner,
            &report.outcome.snapshots,
            &config.replay,
            |samples| log.append_samples(samples).map(|_| ()),
        )?;
        info!(
            runs = replayed.runs,
            failed = replayed.failed,
            samples = replayed.samples,
            "replay done"
        );
    }
    info!(records = log.written(), path = %log.path().display(), "benchmark done");
    Ok(())
}

fn run_merge(cli: &Cli, config: &BenchConfig) -> Result<(), BenchError> {
    let runner = build_runner(cli, config)?;
    lower_priority(config.nice);
    let report = runner.run(&config.merge_tasks()?)?;
    warn_failures(&report);
    let mut log = ErrorLog::open(&config.output)?;
    log.append_aggregate(&report.outcome.aggregate)?;
    Ok(())
}

/// Load configuration from file or defaults, then apply command line overrides.
fn load_configuration(cli: &Cli) -> Result<BenchConfig, BenchError> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            BenchConfig::from_file(path)?
        }
        None => BenchConfig::default(),
    };
    if let Some(output) = &cli.output {
        config.output = output.clone();
    }
    if cli.workers.is_some() {
        config.workers = cli.workers;
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    config.validate()?;
    Ok(config)
}

fn build_runner(cli: &Cli, config: &BenchConfig) -> Result<ParallelRunner, BenchError> {
    let launcher = if cli.in_process {
        Launcher::InProcess
    } else {
        Launcher::current_exe()?
    };
    let runner = ParallelRunner::new(config.workers.unwrap_or_else(num_cpus::get))
        .with_launcher(launcher);
    Ok(match config.seed {
        Some(seed) => runner.with_seed(seed),
        None => runner,
    })
}

fn warn_failures(report: &RunReport) {
    if !report.failures.is_empty() {
        let tasks: Vec<usize> = report.failures.iter().map(|f| f.task).collect();
        warn!(
            failed = report.failures.len(),
            ?tasks,
            "results of failed tasks are not included"
        );
    }
}

fn run_worker(task: &str, seed: u64) -> Result<(), BenchError> {
    let task: WorkerTask = serde_json::from_str(task)?;
    let outcome = task.execute(seed)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&encode_outcome(&outcome)?)?;
    stdout.flush()?;
    Ok(())
}
