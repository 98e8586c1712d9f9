//! Currency and currency pair types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CommonError;

/// Separator used in the canonical pair key.
pub const PAIR_KEY_SEPARATOR: char = '/';

/// A currency identified by its ticker code (fiat ISO 4217 or crypto ticker).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    /// Create a currency, rejecting codes that cannot appear in a pair key.
    pub fn parse(code: &str) -> Result<Self, CommonError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(CommonError::InvalidCurrency("empty currency code".to_string()));
        }
        if code.contains(PAIR_KEY_SEPARATOR) || code.chars().any(char::is_whitespace) {
            return Err(CommonError::InvalidCurrency(code.to_string()));
        }
        Ok(Self::new(code))
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Whether the code is usable as one half of a pair key.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && !self.0.contains(PAIR_KEY_SEPARATOR)
            && !self.0.chars().any(char::is_whitespace)
    }

    /// Number of decimal places shown for amounts in this currency.
    ///
    /// This is the smallest-unit granularity countervalues are rounded to.
    pub fn decimal_places(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "VND" => 0,
            "BHD" | "KWD" | "OMR" => 3,
            "XTZ" | "ALGO" | "ATOM" | "XRP" | "TRX" | "USDT" | "USDC" => 6,
            "BTC" | "LTC" | "BCH" | "DOGE" | "DASH" | "ZEC" | "PIVX" | "DGB" | "QTUM" => 8,
            "ETH" | "ETC" => 18,
            _ => 2,
        }
    }

    /// Common currencies
    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn jpy() -> Self {
        Self::new("JPY")
    }

    pub fn btc() -> Self {
        Self::new("BTC")
    }

    pub fn eth() -> Self {
        Self::new("ETH")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An ordered (from, to) currency pair identifying one rate series.
///
/// Equality, hashing and ordering are structural over both codes, so the pair
/// itself is the cache key. [`CurrencyPair::key`] gives its persisted form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Currency being valued.
    pub from: Currency,
    /// Currency the value is expressed in.
    pub to: Currency,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(from: Currency, to: Currency) -> Self {
        Self { from, to }
    }

    /// Get the inverse pair.
    pub fn inverse(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
        }
    }

    /// Canonical, order-stable key: `FROM/TO`.
    pub fn key(&self) -> String {
        format!("{}{}{}", self.from, PAIR_KEY_SEPARATOR, self.to)
    }

    /// Parse a key produced by [`CurrencyPair::key`].
    pub fn from_key(key: &str) -> Result<Self, CommonError> {
        let (from, to) = key
            .split_once(PAIR_KEY_SEPARATOR)
            .ok_or_else(|| CommonError::InvalidPairKey(key.to_string()))?;

        let from = Currency::parse(from).map_err(|_| CommonError::InvalidPairKey(key.to_string()))?;
        let to = Currency::parse(to).map_err(|_| CommonError::InvalidPairKey(key.to_string()))?;

        Ok(Self::new(from, to))
    }

    /// Whether both sides are valid and distinct.
    pub fn is_valid(&self) -> bool {
        self.from.is_valid() && self.to.is_valid() && self.from != self.to
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.from, PAIR_KEY_SEPARATOR, self.to)
    }
}

impl FromStr for CurrencyPair {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_key(s)
    }
}
