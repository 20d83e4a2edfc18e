use std::path::Path;
use std::process::{Command, Output};

use hll_error_bench::aggregate::Checkpoint;
use hll_error_bench::store::read_records;
use tempfile::tempdir;

const CONFIG: &str = r#"
variants = ["HLL:10", "hllpp:12", "hyperloglog:0.05"]
workers = 2
seed = 11
nice = 0
insertion_tasks = 3
check_items = 2000

[insert_caps]
"hyperloglog:" = 300

[insertion]
runs = 2
item_count = 500
snapshot_probability = 0.01

[merge]
sizes = [50]
key_lengths = [6]
min_merges = 1
max_merges = 4

[replay]
min_depth = 2
max_depth = 4
runs = 5
"#;

fn bench(dir: &Path, args: &[&str]) -> Output {
    let config = dir.join("bench.toml");
    std::fs::write(&config, CONFIG).unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_hll-error-bench"))
        .arg("--config")
        .arg(&config)
        .arg("--output")
        .arg(dir.join("errors.jsonl"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{args:?}: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

#[test]
fn test_benchmark_writes_insertion_and_replay_records() {
    let dir = tempdir().unwrap();
    bench(dir.path(), &["benchmark"]);

    let records = read_records(dir.path().join("errors.jsonl"), None).unwrap();
    let adds = records
        .iter()
        .filter(|r| matches!(r.checkpoint(), Checkpoint::Items(_)));
    // 3 tasks x 2 runs, 500 samples per uncapped variant and 300 for the capped one
    let add_occurrences: u64 = adds.map(|r| r.occurrences()).sum();
    assert_eq!(add_occurrences, 6 * (500 + 500 + 300));

    let merges: Vec<_> = records
        .iter()
        .filter(|r| matches!(r.checkpoint(), Checkpoint::Merges(_)))
        .collect();
    // 3 variants x (2 + 3 + 4 samples per run) x 5 runs
    assert_eq!(merges.len(), 3 * 9 * 5);
    assert!(merges.iter().all(|r| r.occurrences() == 1));
}

#[test]
fn test_skip_replay_and_summary() {
    let dir = tempdir().unwrap();
    bench(dir.path(), &["--in-process", "benchmark", "--skip-replay"]);
    let records = read_records(dir.path().join("errors.jsonl"), None).unwrap();
    assert!(records
        .iter()
        .all(|r| matches!(r.checkpoint(), Checkpoint::Items(_))));

    let output = bench(dir.path(), &["summary"]);
    let table = String::from_utf8(output.stdout).unwrap();
    for name in ["HLL:10", "hllpp:12", "hyperloglog:0.05"] {
        assert!(table.contains(name), "{table}");
    }
}

#[test]
fn test_merge_sweep_appends_to_log() {
    let dir = tempdir().unwrap();
    bench(dir.path(), &["merge"]);
    let first = read_records(dir.path().join("errors.jsonl"), None).unwrap();
    bench(dir.path(), &["merge"]);
    let second = read_records(dir.path().join("errors.jsonl"), None).unwrap();

    assert_eq!(second.len(), 2 * first.len());
    // 4 trials, one sample per merge and variant
    let occurrences: u64 = first.iter().map(|r| r.occurrences()).sum();
    assert_eq!(occurrences, 3 * (1 + 2 + 3 + 4));
}

#[test]
fn test_check_prints_every_variant() {
    let dir = tempdir().unwrap();
    let output = bench(dir.path(), &["check", "-n", "1000"]);
    let table = String::from_utf8(output.stdout).unwrap();
    assert!(table.contains("| variant"));
    assert!(table.contains("hyperloglog:0.05"));
    assert!(table.contains("| 1000"));
}

#[test]
fn test_invalid_config_fails() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("bench.toml");
    std::fs::write(&config, "variants = [\"HLL:99\"]\n").unwrap();
    let status = Command::new(env!("CARGO_BIN_EXE_hll-error-bench"))
        .arg("--config")
        .arg(&config)
        .arg("check")
        .env("RUST_LOG", "off")
        .status()
        .unwrap();
    assert!(!status.success());
}
