//! Simulated rate provider.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tracing::debug;

use countervalues::{CountervaluesError, CountervaluesResult, RateFetcher, RatePoint};
use countervalues_common::{Currency, CurrencyPair, Timestamp};

/// Largest move per step, in basis points.
const MAX_STEP_BPS: i64 = 150;

/// Smallest rate the walk can reach.
const RATE_FLOOR: Decimal = Decimal::from_parts(1, 0, 0, false, 8);

/// Rate provider serving a seeded random walk per pair.
///
/// Each pair gets `history` points spaced by `step` the first time it is
/// requested; later requests extend the walk up to the current time.
pub struct SimulatedFeed {
    name: String,
    step: ChronoDuration,
    history: u32,
    latency: Duration,
    failure_rate: Mutex<f64>,
    rng: Mutex<StdRng>,
    walks: Mutex<HashMap<CurrencyPair, Vec<RatePoint>>>,
}

impl SimulatedFeed {
    /// Create a feed. Without a seed the walk is non-reproducible.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            name: "simulated".to_string(),
            step: ChronoDuration::seconds(1),
            history: 600,
            latency: Duration::from_millis(50),
            failure_rate: Mutex::new(0.0),
            rng: Mutex::new(rng),
            walks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_history(mut self, points: u32) -> Self {
        self.history = points.max(1);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Probability that a single pair fetch fails, clamped to `0..=1`.
    pub fn set_failure_rate(&self, rate: f64) {
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        *self.failure_rate.lock() = rate;
    }

    pub fn failure_rate(&self) -> f64 {
        *self.failure_rate.lock()
    }

    /// Extend the walk for `pair` up to `now` and return all of it.
    fn advance(&self, pair: &CurrencyPair, now: Timestamp) -> Vec<RatePoint> {
        let Some(end) = self.align(now) else {
            return Vec::new();
        };

        let mut walks = self.walks.lock();
        let mut rng = self.rng.lock();
        let walk = walks.entry(pair.clone()).or_default();

        let (mut at, mut rate) = match walk.last() {
            Some(last) => (last.timestamp + self.step, last.rate),
            None => {
                let start = end - self.step * (self.history as i32 - 1);
                let rate = starting_rate(pair, &mut rng);
                walk.push(RatePoint::new(start, rate));
                (start + self.step, rate)
            }
        };

        while at <= end {
            rate = next_rate(rate, &mut rng);
            walk.push(RatePoint::new(at, rate));
            at += self.step;
        }

        walk.clone()
    }

    fn align(&self, now: Timestamp) -> Option<Timestamp> {
        let step = self.step.num_seconds().max(1);
        let secs = now.timestamp() - now.timestamp().rem_euclid(step);
        Utc.timestamp_opt(secs, 0).single()
    }
}

#[async_trait]
impl RateFetcher for SimulatedFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        pair: &CurrencyPair,
        since: Option<Timestamp>,
    ) -> CountervaluesResult<Vec<RatePoint>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let failure_rate = self.failure_rate();
        if self.rng.lock().gen_bool(failure_rate) {
            return Err(CountervaluesError::fetch(pair, "simulated provider outage"));
        }

        let points: Vec<RatePoint> = self
            .advance(pair, Utc::now())
            .into_iter()
            .filter(|p| since.map_or(true, |s| p.timestamp >= s))
            .collect();

        debug!(pair = %pair, since = ?since, points = points.len(), "Served simulated rates");
        Ok(points)
    }
}

/// Approximate USD value of one unit, used to seed walks.
fn usd_value(currency: &Currency, rng: &mut StdRng) -> Decimal {
    match currency.code() {
        "USD" | "USDT" | "USDC" => Decimal::ONE,
        "EUR" => Decimal::new(108, 2),
        "GBP" => Decimal::new(127, 2),
        "JPY" => Decimal::new(67, 4),
        "BTC" => Decimal::from(42_000),
        "ETH" => Decimal::from(2_500),
        "XTZ" => Decimal::new(95, 2),
        _ => Decimal::new(rng.gen_range(1..10_000), 2),
    }
}

fn starting_rate(pair: &CurrencyPair, rng: &mut StdRng) -> Decimal {
    let from = usd_value(&pair.from, rng);
    let to = usd_value(&pair.to, rng);
    from.checked_div(to)
        .map(|r| r.round_dp(8))
        .unwrap_or(Decimal::ONE)
        .max(RATE_FLOOR)
}

fn next_rate(rate: Decimal, rng: &mut StdRng) -> Decimal {
    let bps = rng.gen_range(-MAX_STEP_BPS..=MAX_STEP_BPS);
    let factor = Decimal::ONE + Decimal::new(bps, 4);
    rate.checked_mul(factor)
        .map(|r| r.round_dp(8))
        .unwrap_or(rate)
        .max(RATE_FLOOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc_usd() -> CurrencyPair {
        CurrencyPair::new(Currency::btc(), Currency::usd())
    }

    fn feed(seed: u64) -> SimulatedFeed {
        SimulatedFeed::new(Some(seed))
            .with_history(30)
            .with_latency(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_first_fetch_serves_history() {
        let points = feed(7).fetch(&btc_usd(), None).await.unwrap();

        assert!(points.len() >= 30);
        assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(points.iter().all(|p| p.rate > Decimal::ZERO));
    }

    #[tokio::test]
    async fn test_same_seed_same_walk() {
        let now = Utc::now();
        let a = feed(42).advance(&btc_usd(), now);
        let b = feed(42).advance(&btc_usd(), now);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_tail_fetch_respects_since() {
        let feed = feed(1);
        let full = feed.fetch(&btc_usd(), None).await.unwrap();
        let since = full[full.len() - 5].timestamp;

        let tail = feed.fetch(&btc_usd(), Some(since)).await.unwrap();

        assert!(tail.len() >= 5);
        assert!(tail.iter().all(|p| p.timestamp >= since));
        assert_eq!(tail[0], full[full.len() - 5]);
    }

    #[tokio::test]
    async fn test_full_failure_rate_always_fails() {
        let feed = feed(3);
        feed.set_failure_rate(2.0);
        assert_eq!(feed.failure_rate(), 1.0);

        let result = feed.fetch(&btc_usd(), None).await;
        assert!(matches!(result, Err(CountervaluesError::Fetch { .. })));
    }

    #[test]
    fn test_walk_extends_over_time() {
        let feed = feed(5);
        let now = Utc::now();
        let first = feed.advance(&btc_usd(), now);
        let later = feed.advance(&btc_usd(), now + ChronoDuration::seconds(10));

        assert_eq!(later.len(), first.len() + 10);
        assert_eq!(&later[..first.len()], &first[..]);
    }

    #[test]
    fn test_starting_rate_of_inverse_crypto_pair_is_positive() {
        let mut rng = StdRng::seed_from_u64(0);
        let pair = CurrencyPair::new(Currency::jpy(), Currency::btc());
        assert!(starting_rate(&pair, &mut rng) > Decimal::ZERO);
    }
}
