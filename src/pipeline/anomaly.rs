//! Fare anomaly detection by percentile rank within each pickup hour.
//!
//! Trips are grouped into an index arena keyed by `hour_of_day`. Each
//! partition is sorted by `total_amount` (input position breaks ties, so
//! repeated runs rank identically) and every trip receives
//! `percent_rank = (rank - 1) / (n - 1)`, or 0 when the partition holds a
//! single trip. No rank is final until its whole partition has been seen.

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::{AnomalyConfig, TieRule};
use crate::records::{AnnotatedTrip, EnrichedTripRecord};

#[derive(Debug, Clone)]
pub struct AnomalyOutcome {
    pub records: Vec<AnnotatedTrip>,
    pub partition_count: usize,
    pub anomaly_count: usize,
}

impl AnomalyOutcome {
    pub fn anomalies(&self) -> impl Iterator<Item = &AnnotatedTrip> {
        self.records.iter().filter(|trip| trip.is_anomaly)
    }
}

/// Percent rank of each value within `values`, returned in input order.
pub fn percent_ranks(values: &[f64], ties: TieRule) -> Vec<f64> {
    let n = values.len();
    let mut ranks = vec![0.0; n];
    if n < 2 {
        return ranks;
    }

    let mut order: Vec<usize> = (0..n).collect();
    // stable sort keeps input order among equal values
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let denominator = (n - 1) as f64;
    let mut run_start = 0;
    for (position, &index) in order.iter().enumerate() {
        let rank_position = match ties {
            TieRule::Sequential => position,
            TieRule::Shared => {
                if position > 0 && values[order[position - 1]] != values[index] {
                    run_start = position;
                }
                run_start
            }
        };
        ranks[index] = rank_position as f64 / denominator;
    }

    ranks
}

/// Whether a percentile falls strictly outside the `[low, high]` band.
pub fn is_outlier(percentile: f64, config: &AnomalyConfig) -> bool {
    percentile < config.low || percentile > config.high
}

/// Ranks every trip against its pickup-hour partition and flags outliers.
#[tracing::instrument(skip_all, fields(input = trips.len()))]
pub fn detect_anomalies(trips: &[EnrichedTripRecord], config: &AnomalyConfig) -> AnomalyOutcome {
    let mut partitions: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (index, trip) in trips.iter().enumerate() {
        partitions.entry(trip.hour_of_day).or_default().push(index);
    }

    let partition_list: Vec<&Vec<usize>> = partitions.values().collect();
    let ranked: Vec<Vec<(usize, f64)>> = partition_list
        .par_iter()
        .map(|members| {
            let amounts: Vec<f64> = members.iter().map(|&i| trips[i].total_amount).collect();
            let ranks = percent_ranks(&amounts, config.ties);
            members.iter().copied().zip(ranks).collect()
        })
        .collect();

    let mut percentiles = vec![0.0; trips.len()];
    for (index, percentile) in ranked.into_iter().flatten() {
        percentiles[index] = percentile;
    }

    let records: Vec<AnnotatedTrip> = trips
        .iter()
        .zip(percentiles)
        .map(|(trip, fare_percentile)| AnnotatedTrip {
            trip: *trip,
            fare_percentile,
            is_anomaly: is_outlier(fare_percentile, config),
        })
        .collect();

    let anomaly_count = records.iter().filter(|trip| trip.is_anomaly).count();

    for (hour, members) in &partitions {
        debug!(hour, trips = members.len(), "Partition ranked");
    }
    info!(
        partitions = partitions.len(),
        anomalies = anomaly_count,
        "Anomaly detection complete"
    );

    AnomalyOutcome {
        records,
        partition_count: partitions.len(),
        anomaly_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn trip(hour: u32, amount: f64) -> EnrichedTripRecord {
        let pickup = NaiveDate::from_ymd_opt(2024, 1, 3)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap();
        EnrichedTripRecord {
            pickup_time: pickup,
            dropoff_time: pickup,
            passenger_count: 1,
            trip_distance: 2.0,
            total_amount: amount,
            payment_type: Some(1),
            trip_duration_min: 0.0,
            hour_of_day: hour,
            day_of_week: 4,
            fare_per_mile: amount / 2.0,
        }
    }

    #[test]
    fn test_extreme_fare_is_anomalous() {
        let trips: Vec<_> = [10.0, 20.0, 30.0, 40.0, 1000.0]
            .iter()
            .map(|&a| trip(8, a))
            .collect();

        let outcome = detect_anomalies(&trips, &AnomalyConfig::default());

        let top = &outcome.records[4];
        assert_eq!(top.fare_percentile, 1.0);
        assert!(top.is_anomaly);
        // the cheapest trip ranks 0.0 and is flagged too
        assert_eq!(outcome.records[0].fare_percentile, 0.0);
        assert!(outcome.records[0].is_anomaly);
        assert_eq!(outcome.records[2].fare_percentile, 0.5);
        assert!(!outcome.records[2].is_anomaly);
        assert_eq!(outcome.anomaly_count, 2);
    }

    #[test]
    fn test_single_trip_partition_ranks_zero() {
        let outcome = detect_anomalies(&[trip(3, 55.0)], &AnomalyConfig::default());
        assert_eq!(outcome.records[0].fare_percentile, 0.0);
        assert!(outcome.records[0].is_anomaly);
    }

    #[test]
    fn test_partitions_are_independent() {
        let trips = vec![trip(1, 10.0), trip(2, 5.0), trip(1, 20.0), trip(2, 50.0)];
        let outcome = detect_anomalies(&trips, &AnomalyConfig::default());

        let percentiles: Vec<f64> = outcome.records.iter().map(|t| t.fare_percentile).collect();
        assert_eq!(percentiles, vec![0.0, 0.0, 1.0, 1.0]);
        assert_eq!(outcome.partition_count, 2);
    }

    #[test]
    fn test_sequential_ties_follow_input_order() {
        let ranks = percent_ranks(&[7.0, 7.0, 7.0], TieRule::Sequential);
        assert_eq!(ranks, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_shared_ties_take_lowest_rank() {
        let ranks = percent_ranks(&[5.0, 7.0, 7.0, 9.0, 7.0], TieRule::Shared);
        assert_eq!(ranks, vec![0.0, 0.25, 0.25, 1.0, 0.25]);
    }

    #[test]
    fn test_ranks_are_repeatable_and_bounded() {
        let amounts: Vec<f64> = (0..200).map(|i| ((i * 37) % 53) as f64).collect();
        let first = percent_ranks(&amounts, TieRule::Sequential);
        let second = percent_ranks(&amounts, TieRule::Sequential);

        assert_eq!(first, second);
        assert!(first.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_custom_cutoffs() {
        let config = AnomalyConfig {
            low: 0.3,
            high: 0.7,
            ..Default::default()
        };
        assert!(is_outlier(0.25, &config));
        assert!(!is_outlier(0.3, &config));
        assert!(!is_outlier(0.7, &config));
        assert!(is_outlier(0.75, &config));
    }
}
