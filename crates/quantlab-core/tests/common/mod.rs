//! Shared builders for scenario tests.
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use quantlab_core::bar::Bar;
use quantlab_core::data::InMemoryProvider;
use quantlab_core::engine::BacktestConfig;

/// Timestamp for day `i` of the test calendar.
pub fn day(i: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(i as i64)
}

/// Daily bars from closes (open = previous close, flat range).
pub fn bars_from_closes(symbol: &str, closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let open = if i == 0 { c } else { closes[i - 1] };
            Bar::new(symbol, day(i), open, open.max(c), open.min(c), c, 1_000_000.0)
        })
        .collect()
}

/// Daily bars from (open, high, low, close) tuples.
pub fn bars_from_ohlc(symbol: &str, ohlc: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
    ohlc.iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Bar::new(symbol, day(i), o, h, l, c, 1_000_000.0))
        .collect()
}

pub fn provider_with(symbol: &str, closes: &[f64]) -> InMemoryProvider {
    InMemoryProvider::new()
        .with_bars(symbol, bars_from_closes(symbol, closes))
        .unwrap()
}

pub fn config(symbols: &[&str], capital: f64, days: usize) -> BacktestConfig {
    BacktestConfig::new(
        "scenario",
        symbols.iter().map(|s| s.to_string()).collect(),
        day(0),
        day(days),
        capital,
    )
}
