//! Data provider trait and the in-memory implementation used by the
//! engine and optimizer. Network-backed providers live outside the core.

use crate::bar::{validate_series, Bar};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors surfaced at the data boundary.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("no data for {symbol} in {start}..{end}")]
    NoDataInRange {
        symbol: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid data: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProviderError> for crate::error::QuantError {
    fn from(e: ProviderError) -> Self {
        crate::error::QuantError::Data(e.to_string())
    }
}

/// The sole data boundary of the core. Bars are delivered sorted
/// ascending by timestamp, one series per symbol.
pub trait DataProvider {
    /// Load bars for `symbol` within `[start, end]` (inclusive).
    fn load(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, ProviderError>;

    /// True when `load` with the same arguments would return bars.
    fn has_data(&self, symbol: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> bool;
}

/// Provider backed by preloaded per-symbol series. Construction validates
/// each series once; loads are range filters.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    bars: HashMap<String, Vec<Bar>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a symbol's bars (must be valid and sorted ascending).
    pub fn with_bars(mut self, symbol: impl Into<String>, bars: Vec<Bar>) -> Result<Self, ProviderError> {
        validate_series(&bars).map_err(|e| ProviderError::Invalid(e.to_string()))?;
        self.bars.insert(symbol.into(), bars);
        Ok(self)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.bars.keys().map(|s| s.as_str())
    }
}

impl DataProvider for InMemoryProvider {
    fn load(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, ProviderError> {
        let series = self
            .bars
            .get(symbol)
            .ok_or_else(|| ProviderError::SymbolNotFound {
                symbol: symbol.to_string(),
            })?;
        let slice: Vec<Bar> = series
            .iter()
            .filter(|b| b.ts >= start && b.ts <= end)
            .cloned()
            .collect();
        if slice.is_empty() {
            return Err(ProviderError::NoDataInRange {
                symbol: symbol.to_string(),
                start,
                end,
            });
        }
        Ok(slice)
    }

    fn has_data(&self, symbol: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.bars
            .get(symbol)
            .map(|series| series.iter().any(|b| b.ts >= start && b.ts <= end))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::test_support::{bars_from_closes, day};

    #[test]
    fn load_filters_by_range() {
        let provider = InMemoryProvider::new()
            .with_bars("SPY", bars_from_closes("SPY", &[100.0, 101.0, 102.0, 103.0]))
            .unwrap();
        let bars = provider.load("SPY", day(1), day(2)).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 101.0);
    }

    #[test]
    fn unknown_symbol_errors() {
        let provider = InMemoryProvider::new();
        assert!(matches!(
            provider.load("XYZ", day(0), day(1)),
            Err(ProviderError::SymbolNotFound { .. })
        ));
        assert!(!provider.has_data("XYZ", day(0), day(1)));
    }

    #[test]
    fn empty_range_errors() {
        let provider = InMemoryProvider::new()
            .with_bars("SPY", bars_from_closes("SPY", &[100.0, 101.0]))
            .unwrap();
        assert!(matches!(
            provider.load("SPY", day(10), day(20)),
            Err(ProviderError::NoDataInRange { .. })
        ));
    }

    #[test]
    fn invalid_series_rejected_at_construction() {
        let mut bars = bars_from_closes("SPY", &[100.0, 101.0]);
        bars[1].ts = bars[0].ts;
        assert!(InMemoryProvider::new().with_bars("SPY", bars).is_err());
    }
}
