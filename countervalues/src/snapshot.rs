//! Plain snapshot of a countervalues state for storage.
//!
//! Layout:
//!
//! ```json
//! {
//!   "status": { "BTC/USD": { "last_success": "2024-01-03T00:00:00Z", "last_error": null } },
//!   "data":   { "BTC/USD": [["2024-01-01T00:00:00Z", "10000"], ["2024-01-03T00:00:00Z", "12000"]] }
//! }
//! ```
//!
//! Entries are kept as untyped JSON values so one unreadable entry only drops
//! that pair on import instead of failing the whole snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use countervalues_common::{CurrencyPair, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CountervaluesError, CountervaluesResult};
use crate::series::{RatePoint, RateSeries};
use crate::settings::CountervaluesSettings;
use crate::state::{CounterValuesState, PairStatus};

/// Storage-safe form of a [`CounterValuesState`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSnapshot {
    #[serde(default)]
    pub status: BTreeMap<String, Value>,
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
}

impl RawSnapshot {
    /// Whether the snapshot holds no pair status.
    pub fn is_empty(&self) -> bool {
        self.status.is_empty()
    }

    /// Encode as JSON.
    pub fn to_json(&self) -> CountervaluesResult<String> {
        serde_json::to_string(self).map_err(|e| CountervaluesError::Unexpected(e.to_string()))
    }

    /// Decode from JSON. Only the outer shape must be valid here.
    pub fn from_json(json: &str) -> CountervaluesResult<Self> {
        serde_json::from_str(json).map_err(|e| CountervaluesError::CorruptSnapshot {
            key: "<root>".to_string(),
            reason: e.to_string(),
        })
    }
}

/// Export a state. The state itself is left untouched.
pub fn export_snapshot(state: &CounterValuesState) -> RawSnapshot {
    let status = state
        .statuses()
        .iter()
        .filter_map(|(pair, status)| match serde_json::to_value(status) {
            Ok(value) => Some((pair.key(), value)),
            Err(e) => {
                warn!(pair = %pair, error = %e, "Skipping unencodable pair status");
                None
            }
        })
        .collect();

    let data = state
        .data()
        .iter()
        .filter_map(|(pair, series)| {
            let entries: Vec<(Timestamp, Decimal)> =
                series.points().iter().map(|p| (p.timestamp, p.rate)).collect();
            match serde_json::to_value(entries) {
                Ok(value) => Some((pair.key(), value)),
                Err(e) => {
                    warn!(pair = %pair, error = %e, "Skipping unencodable rate series");
                    None
                }
            }
        })
        .collect();

    RawSnapshot { status, data }
}

/// Rebuild a state from a snapshot, keeping only tracked pairs.
///
/// Malformed entries are dropped and logged; they never fail the import.
pub fn import_snapshot(raw: &RawSnapshot, settings: &CountervaluesSettings) -> CounterValuesState {
    let mut status = HashMap::new();
    for (key, value) in &raw.status {
        match decode_status(key, value) {
            Ok((pair, pair_status)) if settings.tracks(&pair) => {
                status.insert(pair, pair_status);
            }
            Ok((pair, _)) => debug!(pair = %pair, "Dropping untracked pair status on import"),
            Err(e) => warn!(error = %e, "Dropping corrupt snapshot status entry"),
        }
    }

    let mut data = HashMap::new();
    for (key, value) in &raw.data {
        match decode_series(key, value) {
            Ok((pair, series)) if settings.tracks(&pair) => {
                if !series.is_empty() {
                    data.insert(pair, Arc::new(series));
                }
            }
            Ok((pair, _)) => debug!(pair = %pair, "Dropping untracked series on import"),
            Err(e) => {
                warn!(error = %e, "Dropping corrupt snapshot series entry");
                // Without its series the status would claim data we do not have.
                if let Ok(pair) = CurrencyPair::from_key(key) {
                    status.remove(&pair);
                }
            }
        }
    }

    debug!(pairs = data.len(), statuses = status.len(), "Imported countervalues snapshot");
    CounterValuesState::from_parts(data, status)
}

fn decode_pair(key: &str) -> CountervaluesResult<CurrencyPair> {
    CurrencyPair::from_key(key).map_err(|e| CountervaluesError::CorruptSnapshot {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn decode_status(key: &str, value: &Value) -> CountervaluesResult<(CurrencyPair, PairStatus)> {
    let pair = decode_pair(key)?;
    let status = PairStatus::deserialize(value).map_err(|e| CountervaluesError::CorruptSnapshot {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    Ok((pair, status))
}

fn decode_series(key: &str, value: &Value) -> CountervaluesResult<(CurrencyPair, RateSeries)> {
    let pair = decode_pair(key)?;
    let entries = Vec::<(Timestamp, Decimal)>::deserialize(value).map_err(|e| {
        CountervaluesError::CorruptSnapshot {
            key: key.to_string(),
            reason: e.to_string(),
        }
    })?;

    let series = RateSeries::from_points(entries.into_iter().map(|(t, r)| RatePoint::new(t, r)))
        .map_err(|violation| CountervaluesError::CorruptSnapshot {
            key: key.to_string(),
            reason: violation.to_string(),
        })?;
    Ok((pair, series))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::{calculate, CountervalueQuery};
    use crate::state::{PairError, PairErrorKind};
    use chrono::{Duration, TimeZone, Utc};
    use countervalues_common::Currency;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn day(n: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    fn btc_usd() -> CurrencyPair {
        CurrencyPair::new(Currency::btc(), Currency::usd())
    }

    fn eth_usd() -> CurrencyPair {
        CurrencyPair::new(Currency::eth(), Currency::usd())
    }

    fn state() -> CounterValuesState {
        let btc = RateSeries::from_points(vec![
            RatePoint::new(day(1), dec!(10000)),
            RatePoint::new(day(3), dec!(12000.5)),
        ])
        .unwrap();
        let eth = RateSeries::from_points(vec![RatePoint::new(day(2), dec!(800))]).unwrap();
        let eth_status = PairStatus {
            last_success: Some(day(2)),
            last_error: Some(PairError {
                kind: PairErrorKind::Fetch,
                message: "timeout".to_string(),
                at: day(3),
            }),
        };

        CounterValuesState::new()
            .with_pair(btc_usd(), Some(Arc::new(btc)), PairStatus::succeeded(day(3)))
            .with_pair(eth_usd(), Some(Arc::new(eth)), eth_status)
    }

    #[test]
    fn test_export_layout() {
        let raw = export_snapshot(&state());

        assert_eq!(
            raw.data["BTC/USD"],
            json!([["2024-01-02T00:00:00Z", "10000"], ["2024-01-04T00:00:00Z", "12000.5"]])
        );
        assert_eq!(raw.status["BTC/USD"]["last_error"], Value::Null);
        assert_eq!(raw.status["ETH/USD"]["last_error"]["kind"], json!("fetch"));
    }

    #[test]
    fn test_import_reproduces_calculations() {
        let original = state();
        let settings = CountervaluesSettings::new([btc_usd(), eth_usd()]);

        let json = export_snapshot(&original).to_json().unwrap();
        let restored = import_snapshot(&RawSnapshot::from_json(&json).unwrap(), &settings);

        assert_eq!(restored, original);
        for d in 0..5 {
            let q = CountervalueQuery::new(dec!(1.5), Currency::btc(), Currency::usd()).with_date(day(d));
            assert_eq!(calculate(&restored, &q), calculate(&original, &q));
        }
    }

    #[test]
    fn test_import_filters_untracked_pairs() {
        let settings = CountervaluesSettings::new([btc_usd()]);

        let restored = import_snapshot(&export_snapshot(&state()), &settings);

        assert!(restored.series(&eth_usd()).is_none());
        assert!(restored.status(&eth_usd()).is_none());
        assert!(restored.series(&btc_usd()).is_some());
    }

    #[test]
    fn test_import_drops_malformed_entries() {
        let raw: RawSnapshot = serde_json::from_value(json!({
            "status": {
                "BTC/USD": { "last_success": "2024-01-04T00:00:00Z", "last_error": null },
                "ETH/USD": { "last_success": 42 },
                "garbage": {}
            },
            "data": {
                "BTC/USD": [["2024-01-04T00:00:00Z", "12000"], ["2024-01-02T00:00:00Z", "10000"]],
                "ETH/USD": [["2024-01-02T00:00:00Z", "-3"]],
                "XTZ/USD": "not a list"
            }
        }))
        .unwrap();
        let xtz_usd = CurrencyPair::new(Currency::new("XTZ"), Currency::usd());
        let settings = CountervaluesSettings::new([btc_usd(), eth_usd(), xtz_usd.clone()]);

        let restored = import_snapshot(&raw, &settings);

        let btc = restored.series(&btc_usd()).unwrap();
        assert_eq!(btc.first().unwrap().rate, dec!(10000));
        assert_eq!(btc.latest().unwrap().rate, dec!(12000));
        assert!(restored.series(&eth_usd()).is_none());
        assert!(restored.status(&eth_usd()).is_none());
        assert!(restored.series(&xtz_usd).is_none());
        assert_eq!(restored.statuses().len(), 1);
    }

    #[test]
    fn test_corrupt_root_is_rejected() {
        let result = RawSnapshot::from_json("[1, 2, 3]");
        assert!(matches!(result, Err(CountervaluesError::CorruptSnapshot { .. })));
    }

    #[test]
    fn test_export_empty_state() {
        let raw = export_snapshot(&CounterValuesState::new());
        assert!(raw.is_empty());
        assert!(raw.data.is_empty());
    }
}
