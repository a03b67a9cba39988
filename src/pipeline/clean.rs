//! Record validation against the business-rule predicates.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, trace, warn};

use crate::config::ValidityThresholds;
use crate::error::{PipelineError, RecordError};
use crate::records::{CleanTripRecord, RawTripRecord};

/// Why a raw record was removed. Only the first failing check is reported.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    Schema(RecordError),
    /// Distance or amount is infinite or NaN.
    NonFinite,
    TooFewPassengers,
    DistanceTooShort,
    DistanceTooLong,
    AmountTooLow,
}

/// Removed records broken down by the check that removed them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RejectionCounts {
    pub schema_violations: usize,
    pub non_finite: usize,
    pub too_few_passengers: usize,
    pub distance_too_short: usize,
    pub distance_too_long: usize,
    pub amount_too_low: usize,
}

impl RejectionCounts {
    fn add(&mut self, rejection: &Rejection) {
        match rejection {
            Rejection::Schema(_) => self.schema_violations += 1,
            Rejection::NonFinite => self.non_finite += 1,
            Rejection::TooFewPassengers => self.too_few_passengers += 1,
            Rejection::DistanceTooShort => self.distance_too_short += 1,
            Rejection::DistanceTooLong => self.distance_too_long += 1,
            Rejection::AmountTooLow => self.amount_too_low += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.schema_violations
            + self.non_finite
            + self.too_few_passengers
            + self.distance_too_short
            + self.distance_too_long
            + self.amount_too_low
    }
}

#[derive(Debug, Clone)]
pub struct CleanOutcome {
    pub records: Vec<CleanTripRecord>,
    pub input_count: usize,
    pub rejections: RejectionCounts,
}

impl CleanOutcome {
    pub fn retained_count(&self) -> usize {
        self.records.len()
    }

    pub fn removed_count(&self) -> usize {
        self.input_count - self.retained_count()
    }

    /// Share of input records removed, in `[0, 1]`.
    pub fn removed_fraction(&self) -> Result<f64, PipelineError> {
        if self.input_count == 0 {
            return Err(PipelineError::EmptyInput);
        }
        Ok(self.removed_count() as f64 / self.input_count as f64)
    }
}

fn required<T: Clone>(value: &Option<T>, field: &'static str) -> Result<T, Rejection> {
    value
        .clone()
        .ok_or(Rejection::Schema(RecordError::SchemaViolation { field }))
}

/// Applies every validity predicate to a single record.
#[allow(clippy::neg_cmp_op_on_partial_ord)]
pub fn validate(
    raw: &RawTripRecord,
    thresholds: &ValidityThresholds,
) -> Result<CleanTripRecord, Rejection> {
    let pickup = required(&raw.pickup, "tpep_pickup_datetime")?;
    let dropoff = required(&raw.dropoff, "tpep_dropoff_datetime")?;
    let passenger_count = required(&raw.passenger_count, "passenger_count")?;
    let trip_distance = required(&raw.trip_distance, "trip_distance")?;
    let total_amount = required(&raw.total_amount, "total_amount")?;

    if !(trip_distance.is_finite() && total_amount.is_finite()) {
        return Err(Rejection::NonFinite);
    }
    if passenger_count < thresholds.min_passengers {
        return Err(Rejection::TooFewPassengers);
    }
    // negated comparisons so NaN never passes
    if !(trip_distance > thresholds.min_distance) {
        return Err(Rejection::DistanceTooShort);
    }
    if !(trip_distance < thresholds.max_distance) {
        return Err(Rejection::DistanceTooLong);
    }
    if !(total_amount >= thresholds.min_amount) {
        return Err(Rejection::AmountTooLow);
    }

    Ok(CleanTripRecord {
        pickup,
        dropoff,
        passenger_count,
        trip_distance,
        total_amount,
        payment_type: raw.payment_type,
    })
}

/// Keeps the records that satisfy all validity predicates and counts the rest.
#[tracing::instrument(skip_all, fields(input = raw.len()))]
pub fn clean_records(raw: &[RawTripRecord], thresholds: &ValidityThresholds) -> CleanOutcome {
    let checked: Vec<Result<CleanTripRecord, Rejection>> = raw
        .par_iter()
        .map(|record| validate(record, thresholds))
        .collect();

    let mut records = Vec::with_capacity(checked.len());
    let mut rejections = RejectionCounts::default();

    for result in checked {
        match result {
            Ok(record) => records.push(record),
            Err(rejection) => {
                trace!(?rejection, "Record removed");
                rejections.add(&rejection);
            }
        }
    }

    let outcome = CleanOutcome {
        records,
        input_count: raw.len(),
        rejections,
    };

    if outcome.input_count == 0 {
        warn!("No records reached the cleaner");
    }
    info!(
        before = outcome.input_count,
        after = outcome.retained_count(),
        removed = outcome.removed_count(),
        schema_violations = rejections.schema_violations,
        "Cleaning complete"
    );

    outcome
}
