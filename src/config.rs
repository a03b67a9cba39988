//! Pipeline configuration.
//!
//! Every threshold the stages use lives here. The configuration is stored as
//! a JSON object on disk; any omitted section falls back to its default:
//!
//! ```json
//! {
//!   "validity": { "min_amount": 3.0 },
//!   "anomaly": { "low": 0.01, "high": 0.99, "ties": "shared" }
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::pipeline::Stage;
use crate::pipeline::aggregate::AggregationRequest;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub validity: ValidityThresholds,
    pub anomaly: AnomalyConfig,
    pub segmentation: SegmentationConfig,
    /// Extra aggregation requests run alongside the standard reports.
    pub reports: Vec<CustomReport>,
}

/// Bounds a raw trip must satisfy to survive cleaning.
///
/// `min_distance` and `max_distance` are exclusive, `min_amount` and
/// `min_passengers` inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidityThresholds {
    pub min_passengers: i64,
    pub min_distance: f64,
    pub max_distance: f64,
    pub min_amount: f64,
}

impl Default for ValidityThresholds {
    fn default() -> Self {
        Self {
            min_passengers: 1,
            min_distance: 0.0,
            max_distance: 100.0,
            min_amount: 2.50,
        }
    }
}

/// How tied fares are ranked inside an hour partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieRule {
    /// Ties keep input order and receive consecutive ranks.
    #[default]
    Sequential,
    /// Ties share the lowest rank of their run.
    Shared,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub low: f64,
    pub high: f64,
    pub ties: TieRule,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            low: 0.05,
            high: 0.95,
            ties: TieRule::Sequential,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub trip_type: TripTypeThresholds,
    pub time_period: TimePeriodStarts,
    pub distance_buckets: DistanceEdges,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TripTypeThresholds {
    pub short_max_distance: f64,
    pub short_max_amount: f64,
    pub medium_max_distance: f64,
    pub medium_max_amount: f64,
    pub long_max_distance: f64,
}

impl Default for TripTypeThresholds {
    fn default() -> Self {
        Self {
            short_max_distance: 1.0,
            short_max_amount: 10.0,
            medium_max_distance: 5.0,
            medium_max_amount: 20.0,
            long_max_distance: 15.0,
        }
    }
}

/// First hour (inclusive) of each period. Hours outside `[morning, night)`
/// are night.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimePeriodStarts {
    pub morning: u32,
    pub afternoon: u32,
    pub evening: u32,
    pub night: u32,
}

impl Default for TimePeriodStarts {
    fn default() -> Self {
        Self {
            morning: 5,
            afternoon: 12,
            evening: 17,
            night: 21,
        }
    }
}

/// Inclusive upper edges of the first four distance buckets, in miles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceEdges {
    pub up_to_one: f64,
    pub one_to_two: f64,
    pub two_to_five: f64,
    pub five_to_ten: f64,
}

impl Default for DistanceEdges {
    fn default() -> Self {
        Self {
            up_to_one: 1.0,
            one_to_two: 2.0,
            two_to_five: 5.0,
            five_to_ten: 10.0,
        }
    }
}

/// A user-defined aggregation over one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomReport {
    pub name: String,
    pub source: Stage,
    #[serde(flatten)]
    pub request: AggregationRequest,
}

impl PipelineConfig {
    /// Loads and validates the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{path}'"))?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config file '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects thresholds the stages cannot evaluate consistently.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));

        let v = &self.validity;
        if !(v.min_distance.is_finite() && v.max_distance.is_finite() && v.min_amount.is_finite())
        {
            return invalid("validity thresholds must be finite".into());
        }
        if v.min_distance >= v.max_distance {
            return invalid(format!(
                "validity.min_distance ({}) must be below validity.max_distance ({})",
                v.min_distance, v.max_distance
            ));
        }
        if v.min_distance < 0.0 {
            return invalid("validity.min_distance must not be negative".into());
        }

        let a = &self.anomaly;
        if !(0.0..=1.0).contains(&a.low) || !(0.0..=1.0).contains(&a.high) {
            return invalid(format!(
                "anomaly cutoffs must lie in [0, 1], got low={} high={}",
                a.low, a.high
            ));
        }
        if a.low >= a.high {
            return invalid(format!(
                "anomaly.low ({}) must be below anomaly.high ({})",
                a.low, a.high
            ));
        }

        let t = &self.segmentation.trip_type;
        if !(t.short_max_distance <= t.medium_max_distance
            && t.medium_max_distance <= t.long_max_distance)
        {
            return invalid("trip_type distance thresholds must be ascending".into());
        }

        let p = &self.segmentation.time_period;
        if !(p.morning <= p.afternoon && p.afternoon <= p.evening && p.evening <= p.night)
            || p.night > 24
        {
            return invalid("time_period starts must be ascending hours within 0..=24".into());
        }

        let d = &self.segmentation.distance_buckets;
        if !(d.up_to_one <= d.one_to_two && d.one_to_two <= d.two_to_five && d.two_to_five <= d.five_to_ten)
        {
            return invalid("distance bucket edges must be ascending".into());
        }

        for report in &self.reports {
            if report.name.trim().is_empty() {
                return invalid("custom reports need a non-empty name".into());
            }
            report.request.check_against(report.source)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_other_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "validity": { "min_amount": 3.0 } }"#).unwrap();

        assert_eq!(config.validity.min_amount, 3.0);
        assert_eq!(config.validity.max_distance, 100.0);
        assert_eq!(config.anomaly, AnomalyConfig::default());
        assert_eq!(config.segmentation.time_period.morning, 5);
    }

    #[test]
    fn test_tie_rule_parses_snake_case() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "anomaly": { "ties": "shared" } }"#).unwrap();
        assert_eq!(config.anomaly.ties, TieRule::Shared);
    }

    #[test]
    fn test_inverted_cutoffs_rejected() {
        let mut config = PipelineConfig::default();
        config.anomaly.low = 0.9;
        config.anomaly.high = 0.1;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_out_of_range_cutoff_rejected() {
        let mut config = PipelineConfig::default();
        config.anomaly.high = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_distance_window_rejected_when_empty() {
        let mut config = PipelineConfig::default();
        config.validity.min_distance = 100.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unordered_time_periods_rejected() {
        let mut config = PipelineConfig::default();
        config.segmentation.time_period.afternoon = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_custom_report_checked_against_stage() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{
                "reports": [{
                    "name": "bad",
                    "source": "enriched",
                    "group_by": ["trip_type"],
                    "aggregates": [{ "alias": "n", "stat": "count" }]
                }]
            }"#,
        )
        .unwrap();

        assert!(matches!(
            config.validate(),
            Err(PipelineError::UnsupportedDimension { .. })
        ));
    }
}
