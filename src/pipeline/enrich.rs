//! Feature derivation for clean trips.

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::RecordError;
use crate::records::{CleanTripRecord, EnrichedTripRecord};

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

#[derive(Debug, Clone)]
pub struct EnrichOutcome {
    pub records: Vec<EnrichedTripRecord>,
    pub malformed_timestamps: usize,
}

/// Parses a trip timestamp as naive wall-clock time.
///
/// RFC 3339 values with an offset are converted to UTC first.
pub fn parse_timestamp(field: &'static str, value: &str) -> Result<NaiveDateTime, RecordError> {
    let trimmed = value.trim();

    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(parsed);
        }
    }

    DateTime::parse_from_rfc3339(trimmed)
        .map(|parsed| parsed.naive_utc())
        .map_err(|_| RecordError::MalformedTimestamp {
            field,
            value: value.to_string(),
        })
}

/// Derives temporal and ratio features for one clean trip.
pub fn enrich(record: &CleanTripRecord) -> Result<EnrichedTripRecord, RecordError> {
    let pickup_time = parse_timestamp("tpep_pickup_datetime", &record.pickup)?;
    let dropoff_time = parse_timestamp("tpep_dropoff_datetime", &record.dropoff)?;

    // whole epoch seconds on each side, then minutes
    let duration_secs =
        dropoff_time.and_utc().timestamp() - pickup_time.and_utc().timestamp();

    Ok(EnrichedTripRecord {
        pickup_time,
        dropoff_time,
        passenger_count: record.passenger_count,
        trip_distance: record.trip_distance,
        total_amount: record.total_amount,
        payment_type: record.payment_type,
        trip_duration_min: duration_secs as f64 / 60.0,
        hour_of_day: pickup_time.hour(),
        day_of_week: pickup_time.weekday().number_from_sunday(),
        fare_per_mile: record.total_amount / record.trip_distance,
    })
}

/// Enriches every clean trip, dropping and counting those with bad timestamps.
#[tracing::instrument(skip_all, fields(input = records.len()))]
pub fn enrich_records(records: &[CleanTripRecord]) -> EnrichOutcome {
    let derived: Vec<Result<EnrichedTripRecord, RecordError>> =
        records.par_iter().map(enrich).collect();

    let mut enriched = Vec::with_capacity(derived.len());
    let mut malformed_timestamps = 0;

    for result in derived {
        match result {
            Ok(record) => enriched.push(record),
            Err(error) => {
                debug!(%error, "Record dropped during enrichment");
                malformed_timestamps += 1;
            }
        }
    }

    info!(
        enriched = enriched.len(),
        malformed_timestamps, "Enrichment complete"
    );

    EnrichOutcome {
        records: enriched,
        malformed_timestamps,
    }
}
