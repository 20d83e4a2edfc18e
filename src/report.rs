//! Tabular reports printed by the CLI.

use std::time::Instant;

use tabled::settings::{Settings, Style};
use tabled::{Table, Tabled};
use tracing::info;

use crate::error::BenchError;
use crate::estimator::{Estimator, EstimatorTrait};
use crate::store::VariantSummary;
use crate::variant::VariantSpec;

/// Result of the self-check of one variant.
#[derive(Clone, Debug, PartialEq, Tabled)]
pub struct CheckRecord {
    pub variant: String,
    pub additions: usize,
    #[tabled(display_with = "format_seconds")]
    pub seconds: f64,
    pub difference: i64,
    #[tabled(display_with = "format_percent")]
    pub relative: f64,
    pub compressed: usize,
    pub uncompressed: usize,
}

/// Insert `items` hex strings into a fresh instance of every variant, timing the insertions and
/// measuring the final error and snapshot size. Insertion caps do not apply here.
pub fn self_check(variants: &[VariantSpec], items: usize) -> Result<Vec<CheckRecord>, BenchError> {
    variants
        .iter()
        .map(|spec| {
            let mut estimator = Estimator::new(spec.variant)?;
            if estimator.count() != 0 {
                return Err(BenchError::Config(format!(
                    "{} is not empty when created",
                    spec.identity()
                )));
            }
            let start = Instant::now();
            for i in 0..items {
                estimator.add(format!("{i:#x}").as_bytes())?;
            }
            let seconds = start.elapsed().as_secs_f64();
            let count = estimator.count();
            let (uncompressed, compressed) = estimator.snapshot_sizes()?;
            let record = CheckRecord {
                variant: spec.identity(),
                additions: items,
                seconds,
                difference: count as i64 - items as i64,
                relative: count.abs_diff(items as u64) as f64 / items.max(1) as f64,
                compressed,
                uncompressed,
            };
            info!(
                variant = %record.variant,
                seconds = record.seconds,
                difference = record.difference,
                "self-check done"
            );
            Ok(record)
        })
        .collect()
}

#[derive(Tabled)]
struct SummaryRow {
    w_name: String,
    kind: &'static str,
    checkpoints: usize,
    occurrences: u64,
    #[tabled(display_with = "format_error")]
    mean_error: f64,
    #[tabled(display_with = "format_error")]
    mean_abs_error: f64,
    #[tabled(display_with = "format_error")]
    max_abs_error: f64,
}

/// Markdown table of self-check results.
pub fn check_table(records: Vec<CheckRecord>) -> String {
    render(records)
}

/// Markdown table of per-variant summaries.
pub fn summary_table(summaries: &[VariantSummary]) -> String {
    let rows: Vec<SummaryRow> = summaries
        .iter()
        .map(|s| SummaryRow {
            w_name: s.w_name.clone(),
            kind: s.kind,
            checkpoints: s.checkpoints,
            occurrences: s.occurrences,
            mean_error: s.mean_error,
            mean_abs_error: s.mean_abs_error,
            max_abs_error: s.max_abs_error,
        })
        .collect();
    render(rows)
}

fn render<T: Tabled>(rows: Vec<T>) -> String {
    let table_config = Settings::default().with(Style::markdown());
    Table::new(rows).with(table_config).to_string()
}

fn format_seconds(seconds: &f64) -> String {
    format!("{seconds:.3} s")
}

fn format_percent(relative: &f64) -> String {
    format!("{:.2} %", relative * 100.0)
}

fn format_error(error: &f64) -> String {
    if error.abs() < 1.0 {
        format!("{:.4}", error)
    } else {
        format!("{:.2e}", error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::{default_variants, Variant};

    #[test]
    fn test_self_check() {
        let records = self_check(&default_variants(), 20_000).unwrap();
        assert_eq!(records.len(), 8);
        for record in &records {
            assert_eq!(record.additions, 20_000);
            assert!(record.relative < 0.05, "{record:?}");
            assert!(record.compressed > 0 && record.uncompressed > 0);
        }
        let table = check_table(records);
        assert!(table.contains("hllpp:17"));
        assert!(table.contains("| variant"));
    }

    #[test]
    fn test_empty_check() {
        let variants = vec![VariantSpec::new(Variant::Packed { precision: 10 })];
        let records = self_check(&variants, 0).unwrap();
        assert_eq!(records[0].difference, 0);
        assert_eq!(records[0].relative, 0.0);
    }

    #[test]
    fn test_summary_table() {
        let table = summary_table(&[VariantSummary {
            w_name: "HLL:13".to_string(),
            kind: "add",
            checkpoints: 3,
            occurrences: 10,
            mean_error: 0.001,
            mean_abs_error: 0.002,
            max_abs_error: 2.5,
        }]);
        assert!(table.contains("HLL:13"));
        assert!(table.contains("0.0010"));
        assert!(table.contains("2.50e0"));
    }
}
