//! Rate series: the sorted history of one currency pair.

use countervalues_common::Timestamp;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One observed rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatePoint {
    /// When the rate was observed.
    pub timestamp: Timestamp,
    /// Units of `to` for one unit of `from`.
    pub rate: Decimal,
}

impl RatePoint {
    /// Create a new rate point.
    pub fn new(timestamp: Timestamp, rate: Decimal) -> Self {
        Self { timestamp, rate }
    }
}

/// Why a batch of points cannot form a series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesViolation {
    /// A rate was zero or negative.
    NonPositiveRate { timestamp: Timestamp, rate: Decimal },
}

impl std::fmt::Display for SeriesViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeriesViolation::NonPositiveRate { timestamp, rate } => {
                write!(f, "non-positive rate {} at {}", rate, timestamp)
            }
        }
    }
}

/// Ordered rate history for one pair.
///
/// Timestamps are strictly increasing and every rate is positive. Instances are
/// never mutated after construction; merging returns a new series.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateSeries {
    points: Vec<RatePoint>,
}

impl RateSeries {
    /// Build a series from unordered points.
    ///
    /// Points sharing a timestamp collapse to the one appearing last.
    pub fn from_points(points: impl IntoIterator<Item = RatePoint>) -> Result<Self, SeriesViolation> {
        Self::default().merge(points)
    }

    /// Merge new points in, returning the combined series.
    ///
    /// An incoming point replaces an existing point with the same timestamp.
    /// Fails without producing anything if any incoming rate is not positive.
    pub fn merge(&self, incoming: impl IntoIterator<Item = RatePoint>) -> Result<Self, SeriesViolation> {
        let mut incoming: Vec<RatePoint> = incoming.into_iter().collect();

        if let Some(bad) = incoming.iter().find(|p| p.rate <= Decimal::ZERO) {
            return Err(SeriesViolation::NonPositiveRate {
                timestamp: bad.timestamp,
                rate: bad.rate,
            });
        }

        // Stable sort keeps arrival order among equal timestamps, so the last
        // duplicate is the one kept below.
        incoming.sort_by_key(|p| p.timestamp);
        let incoming = dedup_keep_last(incoming);

        let mut merged = Vec::with_capacity(self.points.len() + incoming.len());
        let mut existing = self.points.iter().peekable();
        let mut fresh = incoming.into_iter().peekable();

        loop {
            match (existing.peek(), fresh.peek()) {
                (Some(old), Some(new)) => {
                    if old.timestamp < new.timestamp {
                        merged.push(**old);
                        existing.next();
                    } else if old.timestamp > new.timestamp {
                        merged.push(*new);
                        fresh.next();
                    } else {
                        merged.push(*new);
                        existing.next();
                        fresh.next();
                    }
                }
                (Some(old), None) => {
                    merged.push(**old);
                    existing.next();
                }
                (None, Some(new)) => {
                    merged.push(*new);
                    fresh.next();
                }
                (None, None) => break,
            }
        }

        Ok(Self { points: merged })
    }

    /// All points, oldest first.
    pub fn points(&self) -> &[RatePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Oldest known point.
    pub fn first(&self) -> Option<&RatePoint> {
        self.points.first()
    }

    /// Most recent known point.
    pub fn latest(&self) -> Option<&RatePoint> {
        self.points.last()
    }

    /// Point used for a lookup at `date`.
    ///
    /// Exact match, else the nearest preceding point, else (for dates before
    /// the series starts) the first point. `None` only for an empty series.
    pub fn at(&self, date: Timestamp) -> Option<&RatePoint> {
        let idx = self.points.partition_point(|p| p.timestamp <= date);
        if idx == 0 {
            self.points.first()
        } else {
            self.points.get(idx - 1)
        }
    }

    /// Point used for a lookup, `None` date meaning latest.
    pub fn lookup(&self, date: Option<Timestamp>) -> Option<&RatePoint> {
        match date {
            Some(date) => self.at(date),
            None => self.latest(),
        }
    }
}

fn dedup_keep_last(sorted: Vec<RatePoint>) -> Vec<RatePoint> {
    let mut out: Vec<RatePoint> = Vec::with_capacity(sorted.len());
    for point in sorted {
        match out.last_mut() {
            Some(last) if last.timestamp == point.timestamp => *last = point,
            _ => out.push(point),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn day(n: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    fn btc_usd() -> RateSeries {
        RateSeries::from_points(vec![
            RatePoint::new(day(3), dec!(12000)),
            RatePoint::new(day(1), dec!(10000)),
        ])
        .unwrap()
    }

    #[test]
    fn test_from_points_sorts() {
        let series = btc_usd();
        assert_eq!(series.len(), 2);
        assert_eq!(series.first().unwrap().timestamp, day(1));
        assert_eq!(series.latest().unwrap().timestamp, day(3));
    }

    #[test]
    fn test_duplicate_timestamp_last_wins() {
        let series = RateSeries::from_points(vec![
            RatePoint::new(day(1), dec!(1)),
            RatePoint::new(day(1), dec!(2)),
        ])
        .unwrap();
        assert_eq!(series.points(), &[RatePoint::new(day(1), dec!(2))]);
    }

    #[test]
    fn test_merge_replaces_existing_point() {
        let merged = btc_usd()
            .merge(vec![RatePoint::new(day(3), dec!(12500)), RatePoint::new(day(2), dec!(11000))])
            .unwrap();

        let rates: Vec<_> = merged.points().iter().map(|p| p.rate).collect();
        assert_eq!(rates, vec![dec!(10000), dec!(11000), dec!(12500)]);
    }

    #[test]
    fn test_merge_rejects_non_positive_rate() {
        let original = btc_usd();
        let result = original.merge(vec![RatePoint::new(day(4), dec!(0))]);
        assert!(matches!(result, Err(SeriesViolation::NonPositiveRate { .. })));
        assert_eq!(original, btc_usd());
    }

    #[test]
    fn test_lookup_carry_forward_and_backward() {
        let series = btc_usd();
        assert_eq!(series.at(day(1)).unwrap().rate, dec!(10000));
        assert_eq!(series.at(day(2)).unwrap().rate, dec!(10000));
        assert_eq!(series.at(day(4)).unwrap().rate, dec!(12000));
        assert_eq!(series.at(day(0)).unwrap().rate, dec!(10000));
        assert_eq!(series.lookup(None).unwrap().rate, dec!(12000));
    }

    #[test]
    fn test_empty_series_lookup() {
        let series = RateSeries::default();
        assert!(series.at(day(1)).is_none());
        assert!(series.lookup(None).is_none());
    }

    proptest! {
        #[test]
        fn prop_merge_keeps_timestamps_strictly_increasing(
            first in proptest::collection::vec((0i64..50, 1u32..100_000), 0..40),
            second in proptest::collection::vec((0i64..50, 1u32..100_000), 0..40),
        ) {
            let to_points = |raw: &[(i64, u32)]| {
                raw.iter()
                    .map(|(d, r)| RatePoint::new(day(*d), Decimal::from(*r)))
                    .collect::<Vec<_>>()
            };

            let series = RateSeries::from_points(to_points(&first)).unwrap();
            let merged = series.merge(to_points(&second)).unwrap();

            for window in merged.points().windows(2) {
                prop_assert!(window[0].timestamp < window[1].timestamp);
            }

            // Every timestamp from the second batch carries its last rate.
            for (d, _) in &second {
                let expected = second.iter().rev().find(|(d2, _)| d2 == d).map(|(_, r)| Decimal::from(*r));
                let got = merged.at(day(*d)).map(|p| p.rate);
                prop_assert_eq!(got, expected);
            }
        }
    }
}
