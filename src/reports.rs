//! The standard analyses run over a trip batch.

use serde::Serialize;
use tracing::info;

use crate::error::PipelineError;
use crate::pipeline::aggregate::{AggregateTable, AggregationRequest, Dimension, Measure};
use crate::pipeline::{PipelineSummary, Stage, TripPipeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    Summary,
    Anomalies,
    Segments,
    Temporal,
    Payments,
    Distance,
    PeakHours,
}

impl ReportKind {
    pub const ALL: [ReportKind; 7] = [
        ReportKind::Summary,
        ReportKind::Anomalies,
        ReportKind::Segments,
        ReportKind::Temporal,
        ReportKind::Payments,
        ReportKind::Distance,
        ReportKind::PeakHours,
    ];

    pub fn title(self) -> &'static str {
        match self {
            ReportKind::Summary => "Aggregated summary (by hour and day)",
            ReportKind::Anomalies => "Anomalous fares",
            ReportKind::Segments => "Trip segmentation",
            ReportKind::Temporal => "Temporal patterns",
            ReportKind::Payments => "Payment methods",
            ReportKind::Distance => "Distance distribution",
            ReportKind::PeakHours => "Peak hours",
        }
    }

    /// The aggregation behind this report. Anomalies are listed rather than
    /// aggregated, so they have none.
    pub fn request(self) -> Option<(Stage, AggregationRequest)> {
        let request = match self {
            ReportKind::Summary => (
                Stage::Enriched,
                AggregationRequest::group_by([Dimension::HourOfDay, Dimension::DayOfWeek])
                    .mean("avg_distance", Measure::TripDistance)
                    .mean("avg_fare", Measure::TotalAmount)
                    .mean("avg_duration", Measure::TripDurationMin)
                    .count("trip_count"),
            ),
            ReportKind::Anomalies => return None,
            ReportKind::Segments => (
                Stage::Segmented,
                AggregationRequest::group_by([Dimension::TripType])
                    .count("trip_count")
                    .mean("avg_fare", Measure::TotalAmount)
                    .mean("avg_distance", Measure::TripDistance)
                    .order_by("trip_count", true),
            ),
            ReportKind::Temporal => (
                Stage::Segmented,
                AggregationRequest::group_by([Dimension::TimePeriod])
                    .count("trips")
                    .mean("avg_fare", Measure::TotalAmount)
                    .stddev("fare_std_dev", Measure::TotalAmount)
                    .max("max_fare", Measure::TotalAmount),
            ),
            ReportKind::Payments => (
                Stage::Enriched,
                AggregationRequest::group_by([Dimension::PaymentType])
                    .count("transaction_count")
                    .mean("avg_fare", Measure::TotalAmount)
                    .mean("avg_distance", Measure::TripDistance),
            ),
            ReportKind::Distance => (
                Stage::Segmented,
                AggregationRequest::group_by([Dimension::DistanceBucket])
                    .count("trip_count")
                    .mean("avg_fare", Measure::TotalAmount),
            ),
            ReportKind::PeakHours => (
                Stage::Enriched,
                AggregationRequest::group_by([Dimension::HourOfDay])
                    .count("trip_count")
                    .mean("avg_fare", Measure::TotalAmount)
                    .order_by("trip_count", true)
                    .limit(10),
            ),
        };
        Some(request)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub title: String,
    pub source: Stage,
    pub table: AggregateTable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalySample {
    pub hour_of_day: u32,
    pub total_amount: f64,
    pub trip_distance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyReport {
    pub anomaly_count: usize,
    pub partition_count: usize,
    /// The first anomalous trips in input order.
    pub sample: Vec<AnomalySample>,
}

/// Everything one run produced, ready for an output adapter.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub summary: PipelineSummary,
    pub anomalies: Option<AnomalyReport>,
    pub reports: Vec<Report>,
}

pub fn anomaly_report(pipeline: &TripPipeline<'_>, sample_size: usize) -> AnomalyReport {
    let outcome = pipeline.annotated();
    AnomalyReport {
        anomaly_count: outcome.anomaly_count,
        partition_count: outcome.partition_count,
        sample: outcome
            .anomalies()
            .take(sample_size)
            .map(|annotated| AnomalySample {
                hour_of_day: annotated.trip.hour_of_day,
                total_amount: annotated.trip.total_amount,
                trip_distance: annotated.trip.trip_distance,
            })
            .collect(),
    }
}

/// Runs the selected standard reports followed by every custom report in
/// the pipeline's configuration.
#[tracing::instrument(skip_all, fields(kinds = kinds.len()))]
pub fn run_reports(
    pipeline: &TripPipeline<'_>,
    kinds: &[ReportKind],
    anomaly_sample: usize,
) -> Result<BatchReport, PipelineError> {
    let mut reports = Vec::new();
    let mut anomalies = None;

    for &kind in kinds {
        match kind.request() {
            Some((source, request)) => reports.push(Report {
                title: kind.title().to_string(),
                source,
                table: pipeline.aggregate(source, &request)?,
            }),
            None => anomalies = Some(anomaly_report(pipeline, anomaly_sample)),
        }
    }

    for custom in &pipeline.config().reports {
        reports.push(Report {
            title: custom.name.clone(),
            source: custom.source,
            table: pipeline.aggregate(custom.source, &custom.request)?,
        });
    }

    info!(reports = reports.len(), "Reports complete");

    Ok(BatchReport {
        summary: pipeline.summary(),
        anomalies,
        reports,
    })
}
