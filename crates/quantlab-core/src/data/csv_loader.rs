//! CSV bar loader.
//!
//! Expected header:
//! `timestamp,open,high,low,close,volume[,adjusted_close,split_coefficient,dividend_amount]`
//! with ISO-8601 or epoch-seconds timestamps.

use super::provider::ProviderError;
use crate::bar::{validate_series, Bar};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    #[serde(default)]
    adjusted_close: Option<f64>,
    #[serde(default)]
    split_coefficient: Option<f64>,
    #[serde(default)]
    dividend_amount: Option<f64>,
}

/// Load bars for `symbol` from a CSV file.
pub fn load_bars_csv(path: &Path, symbol: &str) -> Result<Vec<Bar>, ProviderError> {
    let content = std::fs::read_to_string(path)?;
    load_bars_csv_str(&content, symbol)
}

/// Load bars for `symbol` from CSV text.
pub fn load_bars_csv_str(content: &str, symbol: &str) -> Result<Vec<Bar>, ProviderError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());
    let mut bars = Vec::new();
    for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = row.map_err(|e| ProviderError::Parse(format!("row {}: {e}", line + 2)))?;
        let ts = parse_timestamp(&row.timestamp)
            .ok_or_else(|| ProviderError::Parse(format!("row {}: bad timestamp {:?}", line + 2, row.timestamp)))?;
        bars.push(Bar {
            symbol: symbol.to_string(),
            ts,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            adjusted_close: row.adjusted_close,
            split_coefficient: row.split_coefficient,
            dividend_amount: row.dividend_amount,
        });
    }
    validate_series(&bars).map_err(|e| ProviderError::Invalid(e.to_string()))?;
    Ok(bars)
}

/// Accepts epoch seconds, RFC 3339, `YYYY-MM-DD HH:MM:SS`, or bare dates.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(epoch) = raw.parse::<i64>() {
        return Utc.timestamp_opt(epoch, 0).single();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}
