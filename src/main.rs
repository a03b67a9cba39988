//! CLI entry point for the trip analytics tool.
//!
//! Provides subcommands for analyzing a batch of trip records and for
//! printing the default pipeline configuration.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use trip_analytics::{
    config::PipelineConfig,
    output::{print_json, render_anomalies, render_summary, render_table, write_report_csv},
    parser::read_trips,
    pipeline::TripPipeline,
    reports::{ReportKind, run_reports},
};

#[derive(Parser)]
#[command(name = "trip_analytics")]
#[command(about = "Batch analytics over ride-hailing trip records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean, enrich and analyze a CSV file of trip records
    Analyze {
        /// Path to the trip CSV file
        #[arg(value_name = "INPUT")]
        input: String,

        /// JSON config file overriding the default thresholds
        #[arg(short, long)]
        config: Option<String>,

        /// Reports to produce (repeatable)
        #[arg(short, long, value_enum, default_values_t = [ReportArg::All])]
        report: Vec<ReportArg>,

        /// Emit the full result as JSON instead of tables
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Directory to write one CSV file per report into
        #[arg(long)]
        csv_dir: Option<PathBuf>,

        /// Number of anomalous trips to list
        #[arg(long, default_value_t = 10)]
        anomaly_sample: usize,
    },
    /// Print the default configuration as JSON
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportArg {
    All,
    Summary,
    Anomalies,
    Segments,
    Temporal,
    Payments,
    Distance,
    PeakHours,
}

impl ReportArg {
    fn kinds(self) -> &'static [ReportKind] {
        match self {
            ReportArg::All => &ReportKind::ALL,
            ReportArg::Summary => &[ReportKind::Summary],
            ReportArg::Anomalies => &[ReportKind::Anomalies],
            ReportArg::Segments => &[ReportKind::Segments],
            ReportArg::Temporal => &[ReportKind::Temporal],
            ReportArg::Payments => &[ReportKind::Payments],
            ReportArg::Distance => &[ReportKind::Distance],
            ReportArg::PeakHours => &[ReportKind::PeakHours],
        }
    }
}

/// Expands the requested report flags, dropping repeats but keeping order.
fn selected_kinds(args: &[ReportArg]) -> Vec<ReportKind> {
    let mut kinds = Vec::new();
    for kind in args.iter().flat_map(|arg| arg.kinds()) {
        if !kinds.contains(kind) {
            kinds.push(*kind);
        }
    }
    kinds
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/trip_analytics.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("trip_analytics.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("RUST_LOG")
                .from_env_lossy(),
        );

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::DEBUG.into())
                .with_env_var("RUST_LOG_JSON")
                .from_env_lossy(),
        );

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            input,
            config,
            report,
            json,
            csv_dir,
            anomaly_sample,
        } => {
            let config = match config {
                Some(path) => PipelineConfig::load(&path)?,
                None => PipelineConfig::default(),
            };
            analyze(&input, config, &selected_kinds(&report), json, csv_dir, anomaly_sample)?;
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&PipelineConfig::default())?);
        }
    }

    Ok(())
}

/// Runs the pipeline over one input file and emits the selected reports.
#[tracing::instrument(skip(input, config, kinds, csv_dir), fields(input = %input))]
fn analyze(
    input: &str,
    config: PipelineConfig,
    kinds: &[ReportKind],
    json: bool,
    csv_dir: Option<PathBuf>,
    anomaly_sample: usize,
) -> Result<()> {
    let ingest = read_trips(input)?;
    let pipeline = TripPipeline::new(&ingest.records, config)?;
    let batch = run_reports(&pipeline, kinds, anomaly_sample)?;

    info!(
        unreadable_rows = ingest.unreadable_rows,
        before = batch.summary.input_count,
        after = batch.summary.retained_count,
        removed = batch.summary.removed_count,
        malformed_timestamps = batch.summary.malformed_timestamps,
        anomalies = ?batch.summary.anomaly_count,
        "Analysis complete"
    );

    if let Some(dir) = &csv_dir {
        std::fs::create_dir_all(dir)?;
        for report in &batch.reports {
            let file_name = format!("{}.csv", slug(&report.title));
            write_report_csv(dir.join(file_name), report)?;
        }
        info!(dir = %dir.display(), files = batch.reports.len(), "Report CSVs written");
    }

    if json {
        print_json(&batch)?;
        return Ok(());
    }

    print!("{}", render_summary(&batch.summary));
    if let Some(anomalies) = &batch.anomalies {
        println!();
        print!("{}", render_anomalies(anomalies));
    }
    for report in &batch.reports {
        println!("\n{}", report.title);
        print!("{}", render_table(&report.table));
    }

    Ok(())
}

/// Lower-case file-name form of a report title.
fn slug(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_expands_to_every_report() {
        assert_eq!(selected_kinds(&[ReportArg::All]), ReportKind::ALL.to_vec());
    }

    #[test]
    fn test_repeated_reports_deduplicated() {
        let kinds = selected_kinds(&[ReportArg::Payments, ReportArg::Summary, ReportArg::Payments]);
        assert_eq!(kinds, vec![ReportKind::Payments, ReportKind::Summary]);
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Aggregated summary (by hour and day)"), "aggregated_summary_by_hour_and_day");
        assert_eq!(slug("Peak hours"), "peak_hours");
    }

    #[test]
    fn test_cli_parses_report_flags() {
        let cli = Cli::try_parse_from([
            "trip_analytics",
            "analyze",
            "trips.csv",
            "--report",
            "peak-hours",
            "--report",
            "anomalies",
            "--json",
        ])
        .unwrap();

        match cli.command {
            Commands::Analyze { report, json, .. } => {
                assert_eq!(report, vec![ReportArg::PeakHours, ReportArg::Anomalies]);
                assert!(json);
            }
            Commands::Config => panic!("expected analyze"),
        }
    }
}
