//! Countervalue reports over the current state.

use rust_decimal::Decimal;
use tracing::info;

use countervalues::{
    calculate, calculate_many, rate_at, BatchQuery, CounterValuesState, CountervalueQuery,
    CountervaluesSettings, DataPoint,
};
use countervalues_common::CurrencyPair;

/// Countervalues of one unit for a tracked pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PairReport {
    pub pair: CurrencyPair,
    /// Cached points.
    pub points: usize,
    /// Latest cached rate, unrounded.
    pub rate: Option<Decimal>,
    /// Latest value of one `from` in `to`.
    pub latest: Option<Decimal>,
    /// Latest value of one `to` in `from`.
    pub inverse: Option<Decimal>,
    /// Value of one `from` at evenly spaced dates across the series.
    pub history: Vec<Option<Decimal>>,
    /// Last load of this pair failed.
    pub errored: bool,
}

/// Build a report for every tracked pair, sampling `samples` historical dates.
pub fn build_report(
    state: &CounterValuesState,
    settings: &CountervaluesSettings,
    samples: usize,
) -> Vec<PairReport> {
    settings
        .tracked_pairs
        .iter()
        .map(|pair| {
            let latest = calculate(
                state,
                &CountervalueQuery::new(Decimal::ONE, pair.from.clone(), pair.to.clone()),
            );
            let inverse = calculate(
                state,
                &CountervalueQuery::new(Decimal::ONE, pair.from.clone(), pair.to.clone()).reversed(),
            );

            let history = match state.series(pair) {
                Some(series) => {
                    let timestamps: Vec<_> = series.points().iter().map(|p| p.timestamp).collect();
                    let dates = sample_dates(&timestamps, samples);
                    let points: Vec<DataPoint> =
                        dates.into_iter().map(|d| DataPoint::new(Decimal::ONE, Some(d))).collect();
                    calculate_many(state, &points, &BatchQuery::new(pair.from.clone(), pair.to.clone()))
                }
                None => Vec::new(),
            };

            PairReport {
                pair: pair.clone(),
                points: state.series(pair).map_or(0, |s| s.len()),
                rate: rate_at(state, pair, None),
                latest,
                inverse,
                history,
                errored: state.status(pair).map_or(false, |s| s.is_errored()),
            }
        })
        .collect()
}

fn sample_dates<T: Copy>(dates: &[T], samples: usize) -> Vec<T> {
    if samples == 0 || dates.is_empty() {
        return Vec::new();
    }
    if samples >= dates.len() {
        return dates.to_vec();
    }

    let last = dates.len() - 1;
    (0..samples)
        .map(|i| dates[i * last / (samples - 1).max(1)])
        .collect()
}

/// Log a report.
pub fn log_report(report: &[PairReport]) {
    for entry in report {
        let history: Vec<String> = entry
            .history
            .iter()
            .map(|v| v.map_or_else(|| "-".to_string(), |v| v.to_string()))
            .collect();

        info!(
            pair = %entry.pair,
            points = entry.points,
            rate = ?entry.rate,
            latest = ?entry.latest,
            inverse = ?entry.inverse,
            errored = entry.errored,
            history = %history.join(" "),
            "Countervalue report"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use countervalues::{PairStatus, RatePoint, RateSeries};
    use countervalues_common::{Currency, Timestamp};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn day(n: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    #[test]
    fn test_report_for_cached_and_unknown_pairs() {
        let btc_usd = CurrencyPair::new(Currency::btc(), Currency::usd());
        let eth_usd = CurrencyPair::new(Currency::eth(), Currency::usd());
        let series = RateSeries::from_points(vec![
            RatePoint::new(day(1), dec!(10000)),
            RatePoint::new(day(2), dec!(11000)),
            RatePoint::new(day(3), dec!(12500)),
        ])
        .unwrap();
        let state = CounterValuesState::new().with_pair(
            btc_usd.clone(),
            Some(Arc::new(series)),
            PairStatus::succeeded(day(3)),
        );
        let settings = CountervaluesSettings::new([btc_usd.clone(), eth_usd.clone()]);

        let report = build_report(&state, &settings, 2);

        let btc = report.iter().find(|r| r.pair == btc_usd).unwrap();
        assert_eq!(btc.points, 3);
        assert_eq!(btc.rate, Some(dec!(12500)));
        assert_eq!(btc.latest, Some(dec!(12500)));
        assert_eq!(btc.inverse, Some(dec!(0.00008)));
        assert_eq!(btc.history, vec![Some(dec!(10000)), Some(dec!(12500))]);
        assert!(!btc.errored);

        let eth = report.iter().find(|r| r.pair == eth_usd).unwrap();
        assert_eq!(eth.rate, None);
        assert_eq!(eth.latest, None);
        assert!(eth.history.is_empty());
    }

    #[test]
    fn test_sample_dates() {
        assert_eq!(sample_dates(&[1, 2, 3, 4, 5], 3), vec![1, 3, 5]);
        assert_eq!(sample_dates(&[1, 2], 5), vec![1, 2]);
        assert!(sample_dates(&[1, 2], 0).is_empty());
    }
}
