//! Lazily evaluated pipeline over one batch of raw trips.

use std::sync::OnceLock;

use serde::Serialize;
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::Stage;
use crate::pipeline::aggregate::{AggregateTable, AggregationRequest, aggregate};
use crate::pipeline::anomaly::{AnomalyOutcome, detect_anomalies};
use crate::pipeline::clean::{CleanOutcome, RejectionCounts, clean_records};
use crate::pipeline::enrich::{EnrichOutcome, enrich_records};
use crate::pipeline::segment::segment_trips;
use crate::records::{RawTripRecord, SegmentedTrip};

/// Counters reported by each stage, for auditing a run.
///
/// `removed_fraction` is `None` when the input was empty; `anomaly_count` is
/// `None` until anomaly detection has run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub input_count: usize,
    pub retained_count: usize,
    pub removed_count: usize,
    pub removed_fraction: Option<f64>,
    pub rejections: RejectionCounts,
    pub malformed_timestamps: usize,
    pub enriched_count: usize,
    pub anomaly_count: Option<usize>,
}

/// The stage chain for one batch. Nothing runs at construction; each stage
/// is computed on first access and reused afterwards.
pub struct TripPipeline<'a> {
    raw: &'a [RawTripRecord],
    config: PipelineConfig,
    cleaned: OnceLock<CleanOutcome>,
    enriched: OnceLock<EnrichOutcome>,
    annotated: OnceLock<AnomalyOutcome>,
    segmented: OnceLock<Vec<SegmentedTrip>>,
}

impl<'a> TripPipeline<'a> {
    /// Fails only if `config` is malformed.
    pub fn new(raw: &'a [RawTripRecord], config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            raw,
            config,
            cleaned: OnceLock::new(),
            enriched: OnceLock::new(),
            annotated: OnceLock::new(),
            segmented: OnceLock::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cleaned(&self) -> &CleanOutcome {
        self.cleaned
            .get_or_init(|| clean_records(self.raw, &self.config.validity))
    }

    pub fn enriched(&self) -> &EnrichOutcome {
        self.enriched
            .get_or_init(|| enrich_records(&self.cleaned().records))
    }

    pub fn annotated(&self) -> &AnomalyOutcome {
        self.annotated
            .get_or_init(|| detect_anomalies(&self.enriched().records, &self.config.anomaly))
    }

    pub fn segmented(&self) -> &[SegmentedTrip] {
        self.segmented
            .get_or_init(|| segment_trips(&self.enriched().records, &self.config.segmentation))
    }

    /// Whether `stage` has already been computed.
    pub fn is_materialized(&self, stage: Stage) -> bool {
        match stage {
            Stage::Enriched => self.enriched.get().is_some(),
            Stage::Annotated => self.annotated.get().is_some(),
            Stage::Segmented => self.segmented.get().is_some(),
        }
    }

    /// Runs `request` against the records of `source`, computing that stage
    /// and its upstream stages if needed.
    pub fn aggregate(
        &self,
        source: Stage,
        request: &AggregationRequest,
    ) -> Result<AggregateTable, PipelineError> {
        match source {
            Stage::Enriched => aggregate(&self.enriched().records, request),
            Stage::Annotated => aggregate(&self.annotated().records, request),
            Stage::Segmented => aggregate(self.segmented(), request),
        }
    }

    /// Collects the counters of every stage up to enrichment, plus the
    /// anomaly count if detection has run.
    pub fn summary(&self) -> PipelineSummary {
        let cleaned = self.cleaned();
        let enriched = self.enriched();

        let summary = PipelineSummary {
            input_count: cleaned.input_count,
            retained_count: cleaned.retained_count(),
            removed_count: cleaned.removed_count(),
            removed_fraction: cleaned.removed_fraction().ok(),
            rejections: cleaned.rejections,
            malformed_timestamps: enriched.malformed_timestamps,
            enriched_count: enriched.records.len(),
            anomaly_count: self.annotated.get().map(|outcome| outcome.anomaly_count),
        };

        info!(
            before = summary.input_count,
            after = summary.retained_count,
            enriched = summary.enriched_count,
            "Pipeline summary collected"
        );
        summary
    }
}
