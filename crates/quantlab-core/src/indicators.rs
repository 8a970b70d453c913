//! Technical indicators (pure functions, no IO).
//!
//! Key invariant: indicator values at index `t` depend only on bars `0..=t`.
//! Outputs are `Vec<Option<f64>>` (or small structs of the same length as the
//! input) with `None` during the warmup period.

use crate::bar::Bar;

/// Simple moving average of `close` over a fixed window.
pub fn sma_close(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    sma(&closes(bars), window)
}

/// Simple moving average over an arbitrary series.
pub fn sma(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }
    let mut out = vec![None; values.len()];
    let mut sum = 0.0;
    for i in 0..values.len() {
        sum += values[i];
        if i >= window {
            sum -= values[i - window];
        }
        if i + 1 >= window {
            out[i] = Some(sum / window as f64);
        }
    }
    out
}

/// Exponential moving average of `close`, seeded with the SMA of the first
/// `window` values (multiplier k = 2 / (window + 1)).
pub fn ema_close(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    ema(&closes(bars), window)
}

/// Exponential moving average over an arbitrary series.
pub fn ema(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 || values.is_empty() {
        return vec![None; values.len()];
    }
    let mut out = vec![None; values.len()];
    if values.len() < window {
        return out;
    }
    let k = 2.0 / (window as f64 + 1.0);
    let mut prev = values[..window].iter().sum::<f64>() / window as f64;
    out[window - 1] = Some(prev);
    for i in window..values.len() {
        prev = values[i] * k + prev * (1.0 - k);
        out[i] = Some(prev);
    }
    out
}

/// Rate of change: `close[t] / close[t - period] - 1`.
pub fn roc(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; bars.len()];
    }
    let mut out = vec![None; bars.len()];
    for i in period..bars.len() {
        let prev = bars[i - period].close;
        if prev != 0.0 {
            out[i] = Some(bars[i].close / prev - 1.0);
        }
    }
    out
}

/// Relative Strength Index (Wilder smoothing).
///
/// RSI = 100 - 100 / (1 + avg_gain / avg_loss). When the average loss is
/// zero the RSI saturates at 100.
pub fn rsi(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    if period == 0 || bars.len() <= period {
        return vec![None; bars.len()];
    }
    let mut out = vec![None; bars.len()];

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = bars[i].close - bars[i - 1].close;
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = Some(rsi_value(avg_gain, avg_loss));

    let alpha = 1.0 / period as f64;
    for i in period + 1..bars.len() {
        let change = bars[i].close - bars[i - 1].close;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = avg_gain * (1.0 - alpha) + gain * alpha;
        avg_loss = avg_loss * (1.0 - alpha) + loss * alpha;
        out[i] = Some(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

/// Donchian channel values (upper and lower bands).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DonchianChannel {
    pub upper: f64,
    pub lower: f64,
}

/// Donchian channel over the prior `lookback` bars (NOT including the
/// current bar), matching the Turtle breakout convention.
pub fn donchian_channel(bars: &[Bar], lookback: usize) -> Vec<Option<DonchianChannel>> {
    if lookback == 0 {
        return vec![None; bars.len()];
    }
    let mut out = vec![None; bars.len()];
    for (i, slot) in out.iter_mut().enumerate() {
        if i < lookback {
            continue;
        }
        let start = i - lookback;
        let (upper, lower) = bars[start..i]
            .iter()
            .fold((f64::NEG_INFINITY, f64::INFINITY), |(h, l), bar| {
                (h.max(bar.high), l.min(bar.low))
            });
        *slot = Some(DonchianChannel { upper, lower });
    }
    out
}

/// Bollinger band values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bollinger bands: SMA ± `std_mult` population standard deviations.
pub fn bollinger_bands(bars: &[Bar], window: usize, std_mult: f64) -> Vec<Option<BollingerBands>> {
    if window == 0 {
        return vec![None; bars.len()];
    }
    let closes = closes(bars);
    let mut out = vec![None; bars.len()];
    for i in 0..bars.len() {
        if i + 1 < window {
            continue;
        }
        let slice = &closes[i + 1 - window..=i];
        let middle = crate::stats::mean(slice);
        let sd = crate::stats::std_dev(slice);
        out[i] = Some(BollingerBands {
            upper: middle + std_mult * sd,
            middle,
            lower: middle - std_mult * sd,
        });
    }
    out
}

/// Compute True Range for each bar.
///
/// TR = max(high - low, |high - prev_close|, |low - prev_close|);
/// the first bar has no previous close so TR = high - low.
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    if bars.is_empty() {
        return vec![];
    }
    let mut out = Vec::with_capacity(bars.len());
    out.push(bars[0].high - bars[0].low);
    for i in 1..bars.len() {
        let h = bars[i].high;
        let l = bars[i].low;
        let prev_c = bars[i - 1].close;
        out.push((h - l).max((h - prev_c).abs()).max((l - prev_c).abs()));
    }
    out
}

/// Average True Range as a simple moving average of True Range.
pub fn atr(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    sma(&true_range(bars), window)
}

/// Average True Range using Wilder smoothing.
///
/// First ATR = SMA of the first `window` TRs; afterwards
/// `ATR[t] = ATR[t-1] * (window-1)/window + TR[t] / window`.
pub fn atr_wilder(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    if window == 0 || bars.is_empty() {
        return vec![None; bars.len()];
    }
    let tr = true_range(bars);
    let mut out = vec![None; bars.len()];
    if bars.len() < window {
        return out;
    }
    let mut prev = tr[..window].iter().sum::<f64>() / window as f64;
    out[window - 1] = Some(prev);
    let alpha = 1.0 / window as f64;
    for i in window..bars.len() {
        prev = prev * (1.0 - alpha) + tr[i] * alpha;
        out[i] = Some(prev);
    }
    out
}

/// Rolling highest high over the prior `lookback` bars (excluding current).
pub fn rolling_high(bars: &[Bar], lookback: usize) -> Vec<Option<f64>> {
    donchian_channel(bars, lookback)
        .into_iter()
        .map(|c| c.map(|c| c.upper))
        .collect()
}

/// Rolling lowest low over the prior `lookback` bars (excluding current).
pub fn rolling_low(bars: &[Bar], lookback: usize) -> Vec<Option<f64>> {
    donchian_channel(bars, lookback)
        .into_iter()
        .map(|c| c.map(|c| c.lower))
        .collect()
}

fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

/// Moving average type for strategy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MaType {
    Sma,
    Ema,
}
