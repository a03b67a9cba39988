//! Rule-based trip segmentation.
//!
//! Each category is an ordered [`Cascade`] of `(predicate, label)` rules with
//! a mandatory default. The first matching rule wins, so rule order decides
//! boundary values such as a 5-mile trip.

use rayon::prelude::*;
use tracing::info;

use crate::config::SegmentationConfig;
use crate::records::{DistanceBucket, EnrichedTripRecord, SegmentedTrip, TimePeriod, TripType};

type Predicate = Box<dyn Fn(&EnrichedTripRecord) -> bool + Send + Sync>;

/// Ordered first-match-wins classification rules.
pub struct Cascade<L> {
    rules: Vec<(Predicate, L)>,
    default: L,
}

impl<L: Copy> Cascade<L> {
    pub fn new(default: L) -> Self {
        Self {
            rules: Vec::new(),
            default,
        }
    }

    /// Appends a rule evaluated after all rules added so far.
    pub fn when<F>(mut self, label: L, predicate: F) -> Self
    where
        F: Fn(&EnrichedTripRecord) -> bool + Send + Sync + 'static,
    {
        self.rules.push((Box::new(predicate), label));
        self
    }

    pub fn classify(&self, trip: &EnrichedTripRecord) -> L {
        self.rules
            .iter()
            .find(|(predicate, _)| predicate(trip))
            .map_or(self.default, |(_, label)| *label)
    }
}

/// The three segmentation cascades built from one configuration.
pub struct Segmenter {
    trip_type: Cascade<TripType>,
    time_period: Cascade<TimePeriod>,
    distance_bucket: Cascade<DistanceBucket>,
}

impl Segmenter {
    pub fn new(config: &SegmentationConfig) -> Self {
        let t = config.trip_type;
        let trip_type = Cascade::new(TripType::VeryLong)
            .when(TripType::ShortLocal, move |trip| {
                trip.trip_distance < t.short_max_distance && trip.total_amount < t.short_max_amount
            })
            .when(TripType::MediumLocal, move |trip| {
                trip.trip_distance >= t.short_max_distance
                    && trip.trip_distance < t.medium_max_distance
                    && trip.total_amount < t.medium_max_amount
            })
            .when(TripType::LongDistance, move |trip| {
                trip.trip_distance >= t.medium_max_distance
                    && trip.trip_distance < t.long_max_distance
            });

        let p = config.time_period;
        let time_period = Cascade::new(TimePeriod::Night)
            .when(TimePeriod::Morning, move |trip| {
                (p.morning..p.afternoon).contains(&trip.hour_of_day)
            })
            .when(TimePeriod::Afternoon, move |trip| {
                (p.afternoon..p.evening).contains(&trip.hour_of_day)
            })
            .when(TimePeriod::Evening, move |trip| {
                (p.evening..p.night).contains(&trip.hour_of_day)
            });

        let d = config.distance_buckets;
        let distance_bucket = Cascade::new(DistanceBucket::OverTen)
            .when(DistanceBucket::UpToOne, move |trip| trip.trip_distance <= d.up_to_one)
            .when(DistanceBucket::OneToTwo, move |trip| trip.trip_distance <= d.one_to_two)
            .when(DistanceBucket::TwoToFive, move |trip| trip.trip_distance <= d.two_to_five)
            .when(DistanceBucket::FiveToTen, move |trip| trip.trip_distance <= d.five_to_ten);

        Self {
            trip_type,
            time_period,
            distance_bucket,
        }
    }

    pub fn segment(&self, trip: &EnrichedTripRecord) -> SegmentedTrip {
        SegmentedTrip {
            trip: *trip,
            trip_type: self.trip_type.classify(trip),
            time_period: self.time_period.classify(trip),
            distance_bucket: self.distance_bucket.classify(trip),
        }
    }
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(&SegmentationConfig::default())
    }
}

/// Labels every trip with its trip type, time period, and distance bucket.
#[tracing::instrument(skip_all, fields(input = trips.len()))]
pub fn segment_trips(trips: &[EnrichedTripRecord], config: &SegmentationConfig) -> Vec<SegmentedTrip> {
    let segmenter = Segmenter::new(config);
    let segmented: Vec<SegmentedTrip> = trips.par_iter().map(|trip| segmenter.segment(trip)).collect();

    info!(segmented = segmented.len(), "Segmentation complete");
    segmented
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn trip(hour: u32, distance: f64, amount: f64) -> EnrichedTripRecord {
        let pickup = NaiveDate::from_ymd_opt(2024, 1, 3)
            .unwrap()
            .and_hms_opt(hour, 15, 0)
            .unwrap();
        EnrichedTripRecord {
            pickup_time: pickup,
            dropoff_time: pickup,
            passenger_count: 1,
            trip_distance: distance,
            total_amount: amount,
            payment_type: Some(1),
            trip_duration_min: 0.0,
            hour_of_day: hour,
            day_of_week: 4,
            fare_per_mile: amount / distance,
        }
    }

    #[test]
    fn test_short_local_trip() {
        let s = Segmenter::default().segment(&trip(9, 0.5, 8.0));
        assert_eq!(s.trip_type, TripType::ShortLocal);
    }

    #[test]
    fn test_trip_type_boundaries() {
        let s = Segmenter::default();
        // a sub-mile trip at $10 misses the short rule and every later one
        assert_eq!(s.segment(&trip(9, 0.5, 10.0)).trip_type, TripType::VeryLong);
        assert_eq!(s.segment(&trip(9, 1.0, 10.0)).trip_type, TripType::MediumLocal);
        assert_eq!(s.segment(&trip(9, 4.9, 19.99)).trip_type, TripType::MediumLocal);
        assert_eq!(s.segment(&trip(9, 4.9, 20.0)).trip_type, TripType::VeryLong);
        assert_eq!(s.segment(&trip(9, 5.0, 12.0)).trip_type, TripType::LongDistance);
        assert_eq!(s.segment(&trip(9, 14.99, 80.0)).trip_type, TripType::LongDistance);
        assert_eq!(s.segment(&trip(9, 15.0, 80.0)).trip_type, TripType::VeryLong);
    }

    #[test]
    fn test_time_periods() {
        let s = Segmenter::default();
        assert_eq!(s.segment(&trip(6, 1.0, 9.0)).time_period, TimePeriod::Morning);
        assert_eq!(s.segment(&trip(23, 1.0, 9.0)).time_period, TimePeriod::Night);
        assert_eq!(s.segment(&trip(4, 1.0, 9.0)).time_period, TimePeriod::Night);
        assert_eq!(s.segment(&trip(5, 1.0, 9.0)).time_period, TimePeriod::Morning);
        assert_eq!(s.segment(&trip(12, 1.0, 9.0)).time_period, TimePeriod::Afternoon);
        assert_eq!(s.segment(&trip(17, 1.0, 9.0)).time_period, TimePeriod::Evening);
        assert_eq!(s.segment(&trip(21, 1.0, 9.0)).time_period, TimePeriod::Night);
    }

    #[test]
    fn test_distance_buckets() {
        let s = Segmenter::default();
        let bucket = |d: f64| s.segment(&trip(9, d, 20.0)).distance_bucket;

        assert_eq!(bucket(3.0), DistanceBucket::TwoToFive);
        assert_eq!(bucket(1.0), DistanceBucket::UpToOne);
        assert_eq!(bucket(1.01), DistanceBucket::OneToTwo);
        assert_eq!(bucket(5.0), DistanceBucket::TwoToFive);
        assert_eq!(bucket(10.0), DistanceBucket::FiveToTen);
        assert_eq!(bucket(10.5), DistanceBucket::OverTen);
    }

    #[test]
    fn test_cascade_first_match_wins() {
        let cascade = Cascade::new("default")
            .when("first", |t: &EnrichedTripRecord| t.trip_distance > 1.0)
            .when("second", |t: &EnrichedTripRecord| t.trip_distance > 0.5);

        assert_eq!(cascade.classify(&trip(9, 2.0, 9.0)), "first");
        assert_eq!(cascade.classify(&trip(9, 0.8, 9.0)), "second");
        assert_eq!(cascade.classify(&trip(9, 0.1, 9.0)), "default");
    }

    #[test]
    fn test_configured_thresholds() {
        let mut config = SegmentationConfig::default();
        config.time_period.morning = 7;
        config.distance_buckets.up_to_one = 0.5;

        let s = Segmenter::new(&config);
        assert_eq!(s.segment(&trip(6, 0.8, 9.0)).time_period, TimePeriod::Night);
        assert_eq!(s.segment(&trip(6, 0.8, 9.0)).distance_bucket, DistanceBucket::OneToTwo);
    }

    #[test]
    fn test_segment_trips_keeps_every_trip() {
        let trips: Vec<_> = (0..24).map(|h| trip(h, 0.2 + h as f64, 5.0 + h as f64)).collect();
        let segmented = segment_trips(&trips, &SegmentationConfig::default());
        assert_eq!(segmented.len(), trips.len());
        assert!(segmented.iter().zip(&trips).all(|(s, t)| s.trip == *t));
    }
}
