//! Core wire-agnostic data model: [`MarketEvent`], [`Candle`], [`Symbol`],
//! and [`Subscription`].

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::timeframe::Timeframe;

/// An upper-cased ticker symbol. Normalizing at construction means every
/// downstream comparison and hash lookup is by-value-correct without each
/// call site remembering to `.to_uppercase()` first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Symbol::new(s)
    }
}

/// The kind of inbound provider observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Trade,
    Bar,
    Quote,
}

/// The provider's own OHLC for a native bar event, passed through without
/// re-aggregation at native timeframe — trades never populate this.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarOhlc {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// One inbound price observation, already decoded from the provider wire
/// format and timestamp-normalized to a UTC instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub symbol: Symbol,
    pub price: Decimal,
    pub volume: i64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub bar_ohlc: Option<BarOhlc>,
}

impl MarketEvent {
    pub fn trade(symbol: Symbol, price: Decimal, volume: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol,
            price,
            volume,
            timestamp,
            kind: EventKind::Trade,
            bar_ohlc: None,
        }
    }

    pub fn bar(symbol: Symbol, ohlc: BarOhlc, volume: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol,
            price: ohlc.close,
            volume,
            timestamp,
            kind: EventKind::Bar,
            bar_ohlc: Some(ohlc),
        }
    }
}

/// An OHLCV candle over one timeframe bucket.
///
/// Invariant (enforced by [`Candle::validate`]): `low <= min(open, close)
/// <= max(open, close) <= high`, `high >= low`, all prices `> 0`, `volume
/// >= 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub bucket_start: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

impl Candle {
    pub fn validate(&self) -> Result<(), String> {
        if self.open <= Decimal::ZERO
            || self.high <= Decimal::ZERO
            || self.low <= Decimal::ZERO
            || self.close <= Decimal::ZERO
        {
            return Err("all prices must be > 0".into());
        }
        if self.high < self.low {
            return Err(format!("high {} < low {}", self.high, self.low));
        }
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        if self.low > body_low {
            return Err(format!("low {} > min(open,close) {}", self.low, body_low));
        }
        if body_high > self.high {
            return Err(format!("max(open,close) {} > high {}", body_high, self.high));
        }
        if self.volume < 0 {
            return Err("volume must be >= 0".into());
        }
        Ok(())
    }
}

/// A sink's live filter: the set of (symbol, timeframe) pairs it wants to
/// receive enriched candles for.
#[derive(Debug, Clone, Default)]
pub struct Subscription {
    pub sink_id: String,
    pub pairs: HashSet<(Symbol, Timeframe)>,
}

impl Subscription {
    pub fn new(sink_id: impl Into<String>) -> Self {
        Self {
            sink_id: sink_id.into(),
            pairs: HashSet::new(),
        }
    }

    pub fn matches(&self, symbol: &Symbol, timeframe: Timeframe) -> bool {
        self.pairs.contains(&(symbol.clone(), timeframe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn symbol_normalizes_case() {
        assert_eq!(Symbol::new("aapl"), Symbol::new("AAPL"));
        assert_eq!(Symbol::new(" aapl ").as_str(), "AAPL");
    }

    fn candle(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            symbol: Symbol::new("AAPL"),
            timeframe: Timeframe::OneMin,
            bucket_start: Utc::now(),
            open,
            high,
            low,
            close,
            volume: 10,
        }
    }

    #[test]
    fn validate_accepts_well_formed_candle() {
        let c = candle(dec!(100), dec!(101.5), dec!(99.75), dec!(99.75));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn validate_rejects_high_below_low() {
        let c = candle(dec!(100), dec!(99), dec!(99.5), dec!(99));
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_positive_price() {
        let c = candle(Decimal::ZERO, dec!(1), dec!(0), dec!(1));
        assert!(c.validate().is_err());
    }
}
