//! Grouped aggregation over any pipeline stage.
//!
//! A request names grouping dimensions, a list of aliased statistics, an
//! ordering, and an optional row limit. Groups are materialized in full
//! (index lists keyed by the group key) before any statistic is computed.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;

use crate::error::PipelineError;
use crate::pipeline::Stage;
use crate::pipeline::utility::{max, mean, stddev};
use crate::records::{AnnotatedTrip, EnrichedTripRecord, SegmentedTrip};

/// A field records can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    HourOfDay,
    DayOfWeek,
    PaymentType,
    PassengerCount,
    TripType,
    TimePeriod,
    DistanceBucket,
    IsAnomaly,
}

impl Dimension {
    pub fn name(self) -> &'static str {
        match self {
            Dimension::HourOfDay => "hour_of_day",
            Dimension::DayOfWeek => "day_of_week",
            Dimension::PaymentType => "payment_type",
            Dimension::PassengerCount => "passenger_count",
            Dimension::TripType => "trip_type",
            Dimension::TimePeriod => "time_period",
            Dimension::DistanceBucket => "distance_bucket",
            Dimension::IsAnomaly => "is_anomaly",
        }
    }
}

/// A numeric field statistics can be computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    TripDistance,
    TotalAmount,
    TripDurationMin,
    FarePerMile,
    PassengerCount,
    FarePercentile,
}

impl Measure {
    pub fn name(self) -> &'static str {
        match self {
            Measure::TripDistance => "trip_distance",
            Measure::TotalAmount => "total_amount",
            Measure::TripDurationMin => "trip_duration_min",
            Measure::FarePerMile => "fare_per_mile",
            Measure::PassengerCount => "passenger_count",
            Measure::FarePercentile => "fare_percentile",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    Count,
    Mean,
    #[serde(rename = "stddev")]
    StdDev,
    Max,
}

/// One output column: `stat(field) AS alias`. `count` needs no field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub alias: String,
    pub stat: Statistic,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<Measure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Order {
    /// Ascending by group key.
    #[default]
    Key,
    /// By an aggregate column; ties fall back to key order, nulls last.
    Aggregate {
        alias: String,
        #[serde(default)]
        descending: bool,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationRequest {
    #[serde(default)]
    pub group_by: Vec<Dimension>,
    pub aggregates: Vec<Aggregate>,
    #[serde(default)]
    pub order: Order,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl AggregationRequest {
    pub fn group_by(dimensions: impl IntoIterator<Item = Dimension>) -> Self {
        Self {
            group_by: dimensions.into_iter().collect(),
            ..Default::default()
        }
    }

    fn with(mut self, alias: &str, stat: Statistic, field: Option<Measure>) -> Self {
        self.aggregates.push(Aggregate {
            alias: alias.to_string(),
            stat,
            field,
        });
        self
    }

    pub fn count(self, alias: &str) -> Self {
        self.with(alias, Statistic::Count, None)
    }

    pub fn mean(self, alias: &str, field: Measure) -> Self {
        self.with(alias, Statistic::Mean, Some(field))
    }

    pub fn stddev(self, alias: &str, field: Measure) -> Self {
        self.with(alias, Statistic::StdDev, Some(field))
    }

    pub fn max(self, alias: &str, field: Measure) -> Self {
        self.with(alias, Statistic::Max, Some(field))
    }

    pub fn order_by(mut self, alias: &str, descending: bool) -> Self {
        self.order = Order::Aggregate {
            alias: alias.to_string(),
            descending,
        };
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Checks that every referenced field exists on `stage` records and that
    /// the ordering points at a known alias.
    pub fn check_against(&self, stage: Stage) -> Result<(), PipelineError> {
        self.resolve(stage).map(|_| ())
    }

    /// Validates against `stage` and returns the sort column and direction
    /// when ordering by an aggregate.
    fn resolve(&self, stage: Stage) -> Result<Option<(usize, bool)>, PipelineError> {
        for &dimension in &self.group_by {
            if !stage.has_dimension(dimension) {
                return Err(PipelineError::UnsupportedDimension {
                    dimension: dimension.name(),
                    stage: stage.name(),
                });
            }
        }

        for aggregate in &self.aggregates {
            match (aggregate.stat, aggregate.field) {
                (Statistic::Count, None) => {}
                (_, Some(measure)) if !stage.has_measure(measure) => {
                    return Err(PipelineError::UnsupportedMeasure {
                        measure: measure.name(),
                        stage: stage.name(),
                    });
                }
                (_, Some(_)) => {}
                (stat, None) => {
                    return Err(PipelineError::InvalidConfig(format!(
                        "aggregate `{}` uses {stat:?} without a field",
                        aggregate.alias
                    )));
                }
            }
        }

        match &self.order {
            Order::Key => Ok(None),
            Order::Aggregate { alias, descending } => self
                .aggregates
                .iter()
                .position(|a| &a.alias == alias)
                .map(|column| Some((column, *descending)))
                .ok_or_else(|| PipelineError::UnknownSortAlias(alias.clone())),
        }
    }
}

/// One component of a group key.
///
/// Integers compare numerically and labels as text; a missing value sorts
/// before everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum KeyValue {
    Null,
    Int(i64),
    Bool(bool),
    Label(&'static str),
}

impl std::fmt::Display for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyValue::Null => f.write_str("null"),
            KeyValue::Int(v) => write!(f, "{v}"),
            KeyValue::Bool(v) => write!(f, "{v}"),
            KeyValue::Label(v) => f.write_str(v),
        }
    }
}

/// A computed statistic. `Null` marks an undefined value such as the
/// standard deviation of a single-record group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatValue {
    Count(usize),
    Number(f64),
    Null,
}

impl StatValue {
    pub fn as_f64(self) -> Option<f64> {
        match self {
            StatValue::Count(n) => Some(n as f64),
            StatValue::Number(v) => Some(v),
            StatValue::Null => None,
        }
    }

    fn from_option(value: Option<f64>) -> Self {
        value.map_or(StatValue::Null, StatValue::Number)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub key: Vec<KeyValue>,
    pub values: Vec<StatValue>,
}

impl AggregateRow {
    pub fn count(&self) -> Option<usize> {
        self.values.iter().find_map(|v| match v {
            StatValue::Count(n) => Some(*n),
            _ => None,
        })
    }
}

/// The result of one aggregation request.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateTable {
    pub group_by: Vec<Dimension>,
    pub aliases: Vec<String>,
    pub rows: Vec<AggregateRow>,
}

impl AggregateTable {
    pub fn column(&self, alias: &str) -> Option<usize> {
        self.aliases.iter().position(|a| a == alias)
    }

    pub fn value(&self, row: usize, alias: &str) -> Option<StatValue> {
        let column = self.column(alias)?;
        self.rows.get(row).map(|r| r.values[column])
    }

    /// Column headers: dimension names followed by aggregate aliases.
    pub fn headers(&self) -> Vec<&str> {
        self.group_by
            .iter()
            .map(|d| d.name())
            .chain(self.aliases.iter().map(String::as_str))
            .collect()
    }
}

struct RowView<'a> {
    table: &'a AggregateTable,
    row: &'a AggregateRow,
}

impl Serialize for RowView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.table.headers().len()))?;
        for (dimension, value) in self.table.group_by.iter().zip(&self.row.key) {
            map.serialize_entry(dimension.name(), value)?;
        }
        for (alias, value) in self.table.aliases.iter().zip(&self.row.values) {
            map.serialize_entry(alias, value)?;
        }
        map.end()
    }
}

impl Serialize for AggregateTable {
    /// Serializes as a list of row objects keyed by column name.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.rows.iter().map(|row| RowView { table: self, row }))
    }
}

/// Records that can feed an aggregation.
pub trait Groupable: Sync {
    const STAGE: Stage;

    fn dimension(&self, dimension: Dimension) -> Option<KeyValue>;
    fn measure(&self, measure: Measure) -> Option<f64>;
}

impl Groupable for EnrichedTripRecord {
    const STAGE: Stage = Stage::Enriched;

    fn dimension(&self, dimension: Dimension) -> Option<KeyValue> {
        match dimension {
            Dimension::HourOfDay => Some(KeyValue::Int(self.hour_of_day.into())),
            Dimension::DayOfWeek => Some(KeyValue::Int(self.day_of_week.into())),
            Dimension::PaymentType => Some(self.payment_type.map_or(KeyValue::Null, KeyValue::Int)),
            Dimension::PassengerCount => Some(KeyValue::Int(self.passenger_count)),
            _ => None,
        }
    }

    fn measure(&self, measure: Measure) -> Option<f64> {
        match measure {
            Measure::TripDistance => Some(self.trip_distance),
            Measure::TotalAmount => Some(self.total_amount),
            Measure::TripDurationMin => Some(self.trip_duration_min),
            Measure::FarePerMile => Some(self.fare_per_mile),
            Measure::PassengerCount => Some(self.passenger_count as f64),
            Measure::FarePercentile => None,
        }
    }
}

impl Groupable for AnnotatedTrip {
    const STAGE: Stage = Stage::Annotated;

    fn dimension(&self, dimension: Dimension) -> Option<KeyValue> {
        match dimension {
            Dimension::IsAnomaly => Some(KeyValue::Bool(self.is_anomaly)),
            other => self.trip.dimension(other),
        }
    }

    fn measure(&self, measure: Measure) -> Option<f64> {
        match measure {
            Measure::FarePercentile => Some(self.fare_percentile),
            other => self.trip.measure(other),
        }
    }
}

impl Groupable for SegmentedTrip {
    const STAGE: Stage = Stage::Segmented;

    fn dimension(&self, dimension: Dimension) -> Option<KeyValue> {
        match dimension {
            Dimension::TripType => Some(KeyValue::Label(self.trip_type.label())),
            Dimension::TimePeriod => Some(KeyValue::Label(self.time_period.label())),
            Dimension::DistanceBucket => Some(KeyValue::Label(self.distance_bucket.label())),
            other => self.trip.dimension(other),
        }
    }

    fn measure(&self, measure: Measure) -> Option<f64> {
        self.trip.measure(measure)
    }
}

fn compute(records: &[impl Groupable], members: &[usize], aggregate: &Aggregate) -> StatValue {
    let Some(field) = aggregate.field else {
        return StatValue::Count(members.len());
    };

    let values: Vec<f64> = members
        .iter()
        .filter_map(|&i| records[i].measure(field))
        .collect();

    match aggregate.stat {
        Statistic::Count => StatValue::Count(values.len()),
        Statistic::Mean => StatValue::from_option(mean(&values)),
        Statistic::StdDev => {
            StatValue::from_option(mean(&values).and_then(|avg| stddev(&values, avg)))
        }
        Statistic::Max => StatValue::from_option(max(&values)),
    }
}

/// Nulls sort after every number regardless of direction.
fn compare_stat(a: StatValue, b: StatValue, descending: bool) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => {
            let ordering = x.total_cmp(&y);
            if descending { ordering.reverse() } else { ordering }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Groups `records` by the requested dimensions and computes each aggregate
/// per group. Produces one row per distinct key present in the input.
pub fn aggregate<T: Groupable>(
    records: &[T],
    request: &AggregationRequest,
) -> Result<AggregateTable, PipelineError> {
    let sort = request.resolve(T::STAGE)?;

    let mut groups: BTreeMap<Vec<KeyValue>, Vec<usize>> = BTreeMap::new();
    for (index, record) in records.iter().enumerate() {
        let key = request
            .group_by
            .iter()
            .map(|&d| record.dimension(d).unwrap_or(KeyValue::Null))
            .collect();
        groups.entry(key).or_default().push(index);
    }

    let groups: Vec<(Vec<KeyValue>, Vec<usize>)> = groups.into_iter().collect();
    let mut rows: Vec<AggregateRow> = groups
        .into_par_iter()
        .map(|(key, members)| AggregateRow {
            values: request
                .aggregates
                .iter()
                .map(|aggregate| compute(records, &members, aggregate))
                .collect(),
            key,
        })
        .collect();

    if let Some((column, descending)) = sort {
        // stable: equal values stay in key order
        rows.sort_by(|a, b| compare_stat(a.values[column], b.values[column], descending));
    }

    if let Some(limit) = request.limit {
        rows.truncate(limit);
    }

    debug!(
        stage = T::STAGE.name(),
        input = records.len(),
        groups = rows.len(),
        "Aggregation complete"
    );

    Ok(AggregateTable {
        group_by: request.group_by.clone(),
        aliases: request.aggregates.iter().map(|a| a.alias.clone()).collect(),
        rows,
    })
}
