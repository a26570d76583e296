//! Currency definitions for the forex feed
//!
//! A `Currency` is a 3-letter ISO code as it appears on the wire.
//! A `CurrencyPair` is directional: (EUR, USD) and (USD, EUR) are different
//! keys, but they describe the same market at reciprocal rates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Three-letter currency code (ASCII, as received)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid currency code {0:?}: expected 3 ASCII letters")]
pub struct InvalidCurrency(pub String);

impl Currency {
    /// Build from raw wire bytes. Rejects anything that is not ASCII alphabetic.
    pub fn from_bytes(bytes: [u8; 3]) -> Result<Self, InvalidCurrency> {
        if bytes.iter().all(|b| b.is_ascii_alphabetic()) {
            Ok(Self(bytes))
        } else {
            Err(InvalidCurrency(String::from_utf8_lossy(&bytes).into_owned()))
        }
    }

    pub fn as_bytes(&self) -> &[u8; 3] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // Only alphabetic ASCII gets in, so this is always valid UTF-8
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl FromStr for Currency {
    type Err = InvalidCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 3] = s
            .as_bytes()
            .try_into()
            .map_err(|_| InvalidCurrency(s.to_string()))?;
        Self::from_bytes(bytes)
    }
}

impl TryFrom<String> for Currency {
    type Error = InvalidCurrency;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered (base, quote) pair. Price is "units of quote per one base".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CurrencyPair {
    pub base: Currency,
    pub quote: Currency,
}

impl CurrencyPair {
    pub fn new(base: Currency, quote: Currency) -> Self {
        Self { base, quote }
    }

    /// The same market seen from the other side
    pub fn reversed(&self) -> Self {
        Self {
            base: self.quote,
            quote: self.base,
        }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// A single observed price
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

impl Quote {
    pub fn new(price: f64, observed_at: DateTime<Utc>) -> Self {
        Self { price, observed_at }
    }

    /// Age relative to `now`. Negative if the feed clock is ahead of ours.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.observed_at
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.age(now) <= window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_parse() {
        let usd: Currency = "USD".parse().unwrap();
        assert_eq!(usd.as_str(), "USD");
        assert_eq!(usd.to_string(), "USD");

        assert!("US".parse::<Currency>().is_err());
        assert!("USDX".parse::<Currency>().is_err());
        assert!("U$D".parse::<Currency>().is_err());
    }

    #[test]
    fn test_pair_is_directional() {
        let eur: Currency = "EUR".parse().unwrap();
        let usd: Currency = "USD".parse().unwrap();

        let pair = CurrencyPair::new(eur, usd);
        assert_ne!(pair, pair.reversed());
        assert_eq!(pair, pair.reversed().reversed());
        assert_eq!(pair.to_string(), "EUR/USD");
    }

    #[test]
    fn test_quote_freshness_boundary() {
        let now = Utc::now();
        let window = chrono::Duration::milliseconds(1500);

        let exact = Quote::new(1.1, now - window);
        let over = Quote::new(1.1, now - window - chrono::Duration::microseconds(1));
        let future = Quote::new(1.1, now + chrono::Duration::seconds(1));

        assert!(exact.is_fresh(now, window));
        assert!(!over.is_fresh(now, window));
        assert!(future.is_fresh(now, window));
    }
}
