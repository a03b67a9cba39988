//! Output formatting and persistence for pipeline reports.
//!
//! Supports pretty-printing, JSON serialization, plain-text tables, and CSV export.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Result;
use csv::WriterBuilder;
use serde::Serialize;
use tracing::{debug, info};

use crate::pipeline::PipelineSummary;
use crate::pipeline::aggregate::{AggregateTable, KeyValue, StatValue};
use crate::reports::{AnomalyReport, Report};

/// Logs any value using Rust's debug pretty-print format.
pub fn print_pretty(value: &impl std::fmt::Debug) {
    debug!("{:#?}", value);
}

/// Logs a value as pretty-printed JSON.
pub fn print_json(value: &impl Serialize) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn key_cell(value: &KeyValue) -> String {
    match value {
        KeyValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn stat_cell(value: &StatValue) -> String {
    match value {
        StatValue::Count(n) => n.to_string(),
        StatValue::Number(v) => v.to_string(),
        StatValue::Null => String::new(),
    }
}

fn display_stat(value: &StatValue) -> String {
    match value {
        StatValue::Count(n) => n.to_string(),
        StatValue::Number(v) => format!("{v:.4}"),
        StatValue::Null => "null".to_string(),
    }
}

/// Renders an aggregate table as aligned plain text.
pub fn render_table(table: &AggregateTable) -> String {
    let headers = table.headers();
    let cells: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|row| {
            row.key
                .iter()
                .map(KeyValue::to_string)
                .chain(row.values.iter().map(display_stat))
                .collect()
        })
        .collect();

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, header)| {
            cells
                .iter()
                .map(|row| row[i].len())
                .chain(std::iter::once(header.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";

    let mut out = separator.clone();
    let line = |out: &mut String, values: &[&str]| {
        for (value, width) in values.iter().zip(widths.iter().copied()) {
            let _ = write!(out, "| {value:>width$} ");
        }
        out.push_str("|\n");
    };

    line(&mut out, &headers);
    out.push_str(&separator);
    for row in &cells {
        let values: Vec<&str> = row.iter().map(String::as_str).collect();
        line(&mut out, &values);
    }
    out.push_str(&separator);
    out
}

/// Renders the before/after cleaning counters.
pub fn render_summary(summary: &PipelineSummary) -> String {
    let fraction = summary
        .removed_fraction
        .map_or_else(|| "undefined".to_string(), |f| format!("{:.2}%", f * 100.0));

    let mut out = String::new();
    let _ = writeln!(out, "Rows before cleaning: {}", summary.input_count);
    let _ = writeln!(out, "Rows after cleaning: {}", summary.retained_count);
    let _ = writeln!(
        out,
        "Removed {} bad records ({fraction})",
        summary.removed_count
    );
    let _ = writeln!(
        out,
        "Schema violations: {}, non-finite values: {}, malformed timestamps: {}",
        summary.rejections.schema_violations,
        summary.rejections.non_finite,
        summary.malformed_timestamps
    );
    if let Some(anomalies) = summary.anomaly_count {
        let _ = writeln!(out, "Anomalies found: {anomalies} trips (unusual fares)");
    }
    out
}

/// Renders the anomaly count and sample trips.
pub fn render_anomalies(report: &AnomalyReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Anomalies found: {} trips across {} hour partitions",
        report.anomaly_count, report.partition_count
    );
    for sample in &report.sample {
        let _ = writeln!(
            out,
            "  hour {:>2}  total_amount {:>10.2}  trip_distance {:>7.2}",
            sample.hour_of_day, sample.total_amount, sample.trip_distance
        );
    }
    out
}

/// Writes a report's rows to a CSV file with a header line, replacing any
/// existing file. Missing values are written as empty cells.
pub fn write_report_csv(path: impl AsRef<Path>, report: &Report) -> Result<()> {
    let path = path.as_ref();
    debug!(path = %path.display(), title = %report.title, "Writing report CSV");

    let mut writer = WriterBuilder::new().has_headers(false).from_path(path)?;

    writer.write_record(report.table.headers())?;
    for row in &report.table.rows {
        let record: Vec<String> = row
            .key
            .iter()
            .map(key_cell)
            .chain(row.values.iter().map(stat_cell))
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Stage;
    use crate::pipeline::aggregate::{AggregateRow, Dimension};
    use crate::pipeline::clean::RejectionCounts;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    fn sample_report() -> Report {
        Report {
            title: "Payment methods".to_string(),
            source: Stage::Enriched,
            table: AggregateTable {
                group_by: vec![Dimension::PaymentType],
                aliases: vec!["transaction_count".to_string(), "fare_std_dev".to_string()],
                rows: vec![
                    AggregateRow {
                        key: vec![KeyValue::Null],
                        values: vec![StatValue::Count(1), StatValue::Null],
                    },
                    AggregateRow {
                        key: vec![KeyValue::Int(1)],
                        values: vec![StatValue::Count(12), StatValue::Number(3.5)],
                    },
                ],
            },
        }
    }

    fn summary(input: usize, retained: usize) -> PipelineSummary {
        PipelineSummary {
            input_count: input,
            retained_count: retained,
            removed_count: input - retained,
            removed_fraction: (input > 0).then(|| (input - retained) as f64 / input as f64),
            rejections: RejectionCounts::default(),
            malformed_timestamps: 0,
            enriched_count: retained,
            anomaly_count: None,
        }
    }

    #[test]
    fn test_print_pretty_does_not_panic() {
        print_pretty(&sample_report());
    }

    #[test]
    fn test_print_json_does_not_panic() {
        print_json(&sample_report()).unwrap();
    }

    #[test]
    fn test_render_table_aligns_columns() {
        let text = render_table(&sample_report().table);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 6);
        assert!(lines[1].contains("payment_type"));
        assert!(lines[3].contains("null"));
        assert!(lines[4].contains("3.5000"));
        assert!(lines.iter().all(|l| l.len() == lines[0].len()));
    }

    #[test]
    fn test_render_summary_percent() {
        let text = render_summary(&summary(100, 99));
        assert!(text.contains("Removed 1 bad records (1.00%)"));
    }

    #[test]
    fn test_render_summary_empty_input_is_undefined() {
        let text = render_summary(&summary(0, 0));
        assert!(text.contains("(undefined)"));
    }

    #[test]
    fn test_write_report_csv() {
        let path = temp_path("trip_analytics_test_report.csv");
        let _ = fs::remove_file(&path);

        write_report_csv(&path, &sample_report()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines, vec!["payment_type,transaction_count,fare_std_dev", ",1,", "1,12,3.5"]);

        fs::remove_file(&path).unwrap();
    }
}
