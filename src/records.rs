//! Trip record types flowing between pipeline stages.
//!
//! Each stage produces a new record type that wraps or extends the previous
//! one; no stage mutates its input.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};

/// A trip exactly as it came from storage. Nothing is guaranteed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTripRecord {
    #[serde(rename = "tpep_pickup_datetime", default)]
    pub pickup: Option<String>,
    #[serde(rename = "tpep_dropoff_datetime", default)]
    pub dropoff: Option<String>,
    #[serde(default, deserialize_with = "integral")]
    pub passenger_count: Option<i64>,
    #[serde(default)]
    pub trip_distance: Option<f64>,
    #[serde(default)]
    pub total_amount: Option<f64>,
    #[serde(default, deserialize_with = "integral")]
    pub payment_type: Option<i64>,
}

/// Columnar exports often write integer columns as `1.0`.
fn integral<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        // magnitudes from 2^63 up would saturate on the cast
        Some(v) if v.fract() == 0.0 && v.abs() < 2f64.powi(63) => Ok(Some(v as i64)),
        Some(v) => Err(serde::de::Error::custom(format!(
            "expected an integer, found {v}"
        ))),
    }
}

/// A trip that passed every validity predicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanTripRecord {
    pub pickup: String,
    pub dropoff: String,
    pub passenger_count: i64,
    pub trip_distance: f64,
    pub total_amount: f64,
    pub payment_type: Option<i64>,
}

/// A clean trip with parsed timestamps and derived features.
///
/// `day_of_week` runs from 1 (Sunday) to 7 (Saturday). `trip_duration_min`
/// is left negative when dropoff precedes pickup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnrichedTripRecord {
    pub pickup_time: NaiveDateTime,
    pub dropoff_time: NaiveDateTime,
    pub passenger_count: i64,
    pub trip_distance: f64,
    pub total_amount: f64,
    pub payment_type: Option<i64>,
    pub trip_duration_min: f64,
    pub hour_of_day: u32,
    pub day_of_week: u32,
    pub fare_per_mile: f64,
}

/// An enriched trip ranked against the other trips of its pickup hour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnnotatedTrip {
    #[serde(flatten)]
    pub trip: EnrichedTripRecord,
    pub fare_percentile: f64,
    pub is_anomaly: bool,
}

/// An enriched trip with one label from each segmentation cascade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SegmentedTrip {
    #[serde(flatten)]
    pub trip: EnrichedTripRecord,
    pub trip_type: TripType,
    pub time_period: TimePeriod,
    pub distance_bucket: DistanceBucket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TripType {
    #[serde(rename = "Short Local")]
    ShortLocal,
    #[serde(rename = "Medium Local")]
    MediumLocal,
    #[serde(rename = "Long Distance")]
    LongDistance,
    #[serde(rename = "Very Long")]
    VeryLong,
}

impl TripType {
    pub fn label(self) -> &'static str {
        match self {
            TripType::ShortLocal => "Short Local",
            TripType::MediumLocal => "Medium Local",
            TripType::LongDistance => "Long Distance",
            TripType::VeryLong => "Very Long",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TimePeriod {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimePeriod {
    pub fn label(self) -> &'static str {
        match self {
            TimePeriod::Morning => "Morning",
            TimePeriod::Afternoon => "Afternoon",
            TimePeriod::Evening => "Evening",
            TimePeriod::Night => "Night",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DistanceBucket {
    #[serde(rename = "0-1 mi")]
    UpToOne,
    #[serde(rename = "1-2 mi")]
    OneToTwo,
    #[serde(rename = "2-5 mi")]
    TwoToFive,
    #[serde(rename = "5-10 mi")]
    FiveToTen,
    #[serde(rename = "10+ mi")]
    OverTen,
}

impl DistanceBucket {
    pub fn label(self) -> &'static str {
        match self {
            DistanceBucket::UpToOne => "0-1 mi",
            DistanceBucket::OneToTwo => "1-2 mi",
            DistanceBucket::TwoToFive => "2-5 mi",
            DistanceBucket::FiveToTen => "5-10 mi",
            DistanceBucket::OverTen => "10+ mi",
        }
    }
}

macro_rules! display_label {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        })*
    };
}

display_label!(TripType, TimePeriod, DistanceBucket);
