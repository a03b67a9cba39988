//! Trip transformation and analytics stages.
//!
//! Cleaning, enrichment, and segmentation are per-record maps. Anomaly
//! detection and aggregation regroup records by key and therefore need the
//! whole input before producing results. [`TripPipeline`] chains the stages
//! and runs each one only when its output is first requested.

pub mod aggregate;
pub mod anomaly;
pub mod clean;
pub mod enrich;
pub mod plan;
pub mod segment;
pub mod utility;

use serde::{Deserialize, Serialize};

use crate::pipeline::aggregate::{Dimension, Measure};

pub use plan::{PipelineSummary, TripPipeline};

/// A pipeline stage whose records can be aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Enriched,
    Annotated,
    Segmented,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Enriched => "enriched",
            Stage::Annotated => "annotated",
            Stage::Segmented => "segmented",
        }
    }

    pub fn has_dimension(self, dimension: Dimension) -> bool {
        match dimension {
            Dimension::HourOfDay
            | Dimension::DayOfWeek
            | Dimension::PaymentType
            | Dimension::PassengerCount => true,
            Dimension::IsAnomaly => self == Stage::Annotated,
            Dimension::TripType | Dimension::TimePeriod | Dimension::DistanceBucket => {
                self == Stage::Segmented
            }
        }
    }

    pub fn has_measure(self, measure: Measure) -> bool {
        match measure {
            Measure::FarePercentile => self == Stage::Annotated,
            _ => true,
        }
    }
}
