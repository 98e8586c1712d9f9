//! Point-in-time countervalue lookup and conversion.
//!
//! Every function here is pure and synchronous: the same state and query
//! always give the same answer. `None` means the pair has no cached series,
//! which callers must not confuse with a computed zero.

use countervalues_common::{Currency, CurrencyPair, Timestamp};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::warn;

use crate::series::RateSeries;
use crate::state::CounterValuesState;

/// A single conversion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountervalueQuery {
    /// Amount to convert.
    pub value: Decimal,
    pub from: Currency,
    pub to: Currency,
    /// Moment to value at; `None` uses the latest known rate.
    pub date: Option<Timestamp>,
    /// Interpret `value` as an amount of `to` and return the `from` amount.
    pub reverse: bool,
    /// Skip rounding to the result currency's display precision.
    pub disable_rounding: bool,
}

impl CountervalueQuery {
    /// Create a query for the latest rate with rounding.
    pub fn new(value: Decimal, from: Currency, to: Currency) -> Self {
        Self {
            value,
            from,
            to,
            date: None,
            reverse: false,
            disable_rounding: false,
        }
    }

    /// Value at a specific date.
    pub fn with_date(mut self, date: Timestamp) -> Self {
        self.date = Some(date);
        self
    }

    /// Convert from `to` back into `from`.
    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Return the unrounded value.
    pub fn without_rounding(mut self) -> Self {
        self.disable_rounding = true;
        self
    }

    /// The pair whose series answers this query.
    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(self.from.clone(), self.to.clone())
    }
}

/// Shared part of a batch of conversions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchQuery {
    pub from: Currency,
    pub to: Currency,
    pub reverse: bool,
    pub disable_rounding: bool,
}

impl BatchQuery {
    pub fn new(from: Currency, to: Currency) -> Self {
        Self {
            from,
            to,
            reverse: false,
            disable_rounding: false,
        }
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn without_rounding(mut self) -> Self {
        self.disable_rounding = true;
        self
    }
}

/// One input of [`calculate_many`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataPoint {
    pub value: Decimal,
    pub date: Option<Timestamp>,
}

impl DataPoint {
    pub fn new(value: Decimal, date: Option<Timestamp>) -> Self {
        Self { value, date }
    }
}

/// Convert `query.value` using the cached series for `query.from/query.to`.
pub fn calculate(state: &CounterValuesState, query: &CountervalueQuery) -> Option<Decimal> {
    let series = state.series(&query.pair())?;
    let conversion = Conversion {
        series,
        reverse: query.reverse,
        round_to: rounding_currency(&query.from, &query.to, query.reverse, query.disable_rounding),
    };
    conversion.apply(query.value, query.date)
}

/// Convert every data point with the same pair and options.
///
/// The result has the same length and order as `points`; each entry is
/// computed independently of the others.
pub fn calculate_many(
    state: &CounterValuesState,
    points: &[DataPoint],
    query: &BatchQuery,
) -> Vec<Option<Decimal>> {
    let pair = CurrencyPair::new(query.from.clone(), query.to.clone());
    let Some(series) = state.series(&pair) else {
        return vec![None; points.len()];
    };

    let conversion = Conversion {
        series,
        reverse: query.reverse,
        round_to: rounding_currency(&query.from, &query.to, query.reverse, query.disable_rounding),
    };

    points
        .iter()
        .map(|point| conversion.apply(point.value, point.date))
        .collect()
}

/// Rate that a lookup at `date` would use.
pub fn rate_at(
    state: &CounterValuesState,
    pair: &CurrencyPair,
    date: Option<Timestamp>,
) -> Option<Decimal> {
    state.series(pair)?.lookup(date).map(|p| p.rate)
}

/// A resolved series plus the options that apply to every value.
struct Conversion<'a> {
    series: &'a RateSeries,
    reverse: bool,
    round_to: Option<u32>,
}

impl Conversion<'_> {
    fn apply(&self, value: Decimal, date: Option<Timestamp>) -> Option<Decimal> {
        let rate = self.series.lookup(date)?.rate;

        let converted = if self.reverse {
            value.checked_div(rate)
        } else {
            value.checked_mul(rate)
        };
        let Some(converted) = converted else {
            warn!(%value, %rate, reverse = self.reverse, "Countervalue overflows the decimal range");
            return None;
        };

        Some(match self.round_to {
            Some(dp) => converted.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero),
            None => converted,
        })
    }
}

/// Decimal places of the currency the result is denominated in.
fn rounding_currency(from: &Currency, to: &Currency, reverse: bool, disable_rounding: bool) -> Option<u32> {
    if disable_rounding {
        return None;
    }
    let target = if reverse { from } else { to };
    Some(target.decimal_places())
}
