//! Bar (OHLCV) data types.

use crate::error::{QuantError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLCV bar representing price action over a time period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Ticker symbol
    pub symbol: String,

    /// Timestamp (start of bar period, UTC)
    pub ts: DateTime<Utc>,

    /// Opening price
    pub open: f64,

    /// Highest price during period
    pub high: f64,

    /// Lowest price during period
    pub low: f64,

    /// Closing price
    pub close: f64,

    /// Trading volume
    pub volume: f64,

    /// Split/dividend adjusted close, when the source provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjusted_close: Option<f64>,

    /// Split coefficient for the period (1.0 = no split)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_coefficient: Option<f64>,

    /// Dividend paid during the period
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dividend_amount: Option<f64>,
}

impl Bar {
    /// Create a new bar without corporate-action fields.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        ts: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            ts,
            open,
            high,
            low,
            close,
            volume,
            adjusted_close: None,
            split_coefficient: None,
            dividend_amount: None,
        }
    }

    /// Validate the OHLCV invariants:
    /// `low <= min(open, close) <= max(open, close) <= high`, `volume >= 0`,
    /// all prices finite.
    pub fn validate(&self) -> Result<()> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(QuantError::Data(format!(
                "{} @ {}: non-finite price",
                self.symbol, self.ts
            )));
        }
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        if self.low > body_low || body_high > self.high {
            return Err(QuantError::Data(format!(
                "{} @ {}: OHLC out of order (o={} h={} l={} c={})",
                self.symbol, self.ts, self.open, self.high, self.low, self.close
            )));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(QuantError::Data(format!(
                "{} @ {}: invalid volume {}",
                self.symbol, self.ts, self.volume
            )));
        }
        Ok(())
    }

    /// Returns the bar's range (high - low).
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Returns the bar's body size (absolute difference between open and close).
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// Returns true if this is a bullish (green) bar.
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Returns true if this is a bearish (red) bar.
    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Returns true if `price` lies within the bar's [low, high] range.
    pub fn crosses(&self, price: f64) -> bool {
        self.low <= price && price <= self.high
    }
}

/// Validate a whole series: per-bar invariants plus strictly increasing
/// timestamps.
pub fn validate_series(bars: &[Bar]) -> Result<()> {
    for bar in bars {
        bar.validate()?;
    }
    for pair in bars.windows(2) {
        if pair[1].ts <= pair[0].ts {
            return Err(QuantError::Data(format!(
                "{}: timestamps not strictly increasing at {}",
                pair[1].symbol, pair[1].ts
            )));
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn sample_bar() -> Bar {
        Bar::new("SPY", day(0), 100.0, 105.0, 99.0, 103.0, 1_000_000.0)
    }

    #[test]
    fn bar_range_and_body() {
        let bar = sample_bar();
        assert_eq!(bar.range(), 6.0);
        assert_eq!(bar.body(), 3.0);
        assert!(bar.is_bullish());
        assert!(!bar.is_bearish());
    }

    #[test]
    fn valid_bar_passes() {
        assert!(sample_bar().validate().is_ok());
    }

    #[test]
    fn high_below_close_rejected() {
        let mut bar = sample_bar();
        bar.high = 102.0;
        assert!(bar.validate().is_err());
    }

    #[test]
    fn negative_volume_rejected() {
        let mut bar = sample_bar();
        bar.volume = -1.0;
        assert!(bar.validate().is_err());
    }

    #[test]
    fn series_requires_increasing_timestamps() {
        let mut bars = bars_from_closes("T", &[100.0, 101.0, 102.0]);
        bars[2].ts = bars[0].ts;
        assert!(validate_series(&bars).is_err());
    }

    #[test]
    fn crosses_checks_range() {
        let bar = sample_bar();
        assert!(bar.crosses(100.0));
        assert!(bar.crosses(99.0));
        assert!(!bar.crosses(98.9));
    }
}
