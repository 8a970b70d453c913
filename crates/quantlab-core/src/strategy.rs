//! Strategy interface and bundled reference strategies.
//!
//! A strategy is a stateful collaborator borrowed by the engine for the
//! duration of a run. It sees bars through `on_bar` (history includes the
//! current bar as its last element) and learns about its own executions
//! through `on_fill`; it owns any position-awareness it needs.

use crate::bar::Bar;
use crate::error::Result;
use crate::fill::Fill;
use crate::indicators::{ema_close, roc, rsi, sma_close, MaType};
use crate::order::OrderSide;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Trading intent of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

/// A trading signal emitted by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub action: SignalAction,
    /// Signal strength in [0, 100].
    pub strength: f64,
    /// Confidence in [0, 100].
    pub confidence: f64,
    pub strategy: String,
    /// Indicator snapshot at signal time.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub indicators: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_amount: Option<f64>,
    pub ts: DateTime<Utc>,
}

impl Signal {
    pub fn new(
        symbol: impl Into<String>,
        action: SignalAction,
        strategy: impl Into<String>,
        ts: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            action,
            strength: 100.0,
            confidence: 100.0,
            strategy: strategy.into(),
            indicators: BTreeMap::new(),
            reasons: Vec::new(),
            entry_price: None,
            stop_loss: None,
            take_profit: None,
            position_size: None,
            risk_amount: None,
            ts,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    pub fn with_indicator(mut self, name: impl Into<String>, value: f64) -> Self {
        self.indicators.insert(name.into(), value);
        self
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.position_size = Some(size);
        self
    }

    pub fn with_stop_loss(mut self, level: f64) -> Self {
        self.stop_loss = Some(level);
        self
    }

    pub fn with_take_profit(mut self, level: f64) -> Self {
        self.take_profit = Some(level);
        self
    }

    /// Order side for an actionable signal; `None` for Hold.
    pub fn order_side(&self) -> Option<OrderSide> {
        match self.action {
            SignalAction::Buy => Some(OrderSide::Buy),
            SignalAction::Sell => Some(OrderSide::Sell),
            SignalAction::Hold => None,
        }
    }
}

/// User-supplied trading logic, invoked by the engine.
pub trait Strategy: Send {
    /// Stable identifier, recorded on signals and closed trades.
    fn name(&self) -> &str;

    /// Called once before the first bar.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Bars required before `on_bar` produces meaningful output.
    fn warmup_period(&self) -> usize {
        0
    }

    /// Called per market-data event. `history` holds every bar of the
    /// symbol seen so far, the current bar last.
    fn on_bar(&mut self, bar: &Bar, history: &[Bar]) -> Result<Option<Signal>>;

    /// Called after each of the strategy's own fills.
    fn on_fill(&mut self, _fill: &Fill) -> Result<()> {
        Ok(())
    }

    /// Called once after the event queue drains.
    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bundled reference strategies
// ---------------------------------------------------------------------------

/// Tracks long exposure per symbol from the strategy's own fills.
#[derive(Debug, Clone, Default)]
struct ExposureTracker {
    long: BTreeMap<String, f64>,
}

impl ExposureTracker {
    fn is_long(&self, symbol: &str) -> bool {
        self.long.get(symbol).copied().unwrap_or(0.0) > 0.0
    }

    fn record(&mut self, fill: &Fill) {
        let entry = self.long.entry(fill.symbol.clone()).or_insert(0.0);
        match fill.side {
            OrderSide::Buy => *entry += fill.quantity,
            OrderSide::Sell => *entry -= fill.quantity,
        }
    }
}

/// Moving-average crossover: long while the fast average is above the slow.
#[derive(Debug, Clone)]
pub struct MaCrossoverStrategy {
    fast: usize,
    slow: usize,
    ma_type: MaType,
    exposure: ExposureTracker,
}

impl MaCrossoverStrategy {
    pub fn new(fast: usize, slow: usize, ma_type: MaType) -> Self {
        Self {
            fast,
            slow,
            ma_type,
            exposure: ExposureTracker::default(),
        }
    }

    fn averages(&self, history: &[Bar]) -> (Option<f64>, Option<f64>) {
        let (fast, slow) = match self.ma_type {
            MaType::Sma => (
                sma_close(history, self.fast),
                sma_close(history, self.slow),
            ),
            MaType::Ema => (
                ema_close(history, self.fast),
                ema_close(history, self.slow),
            ),
        };
        (
            fast.last().copied().flatten(),
            slow.last().copied().flatten(),
        )
    }
}

impl Strategy for MaCrossoverStrategy {
    fn name(&self) -> &str {
        "ma_crossover"
    }

    fn warmup_period(&self) -> usize {
        self.slow
    }

    fn on_bar(&mut self, bar: &Bar, history: &[Bar]) -> Result<Option<Signal>> {
        let (Some(fast), Some(slow)) = self.averages(history) else {
            return Ok(None);
        };
        let long = self.exposure.is_long(&bar.symbol);
        let signal = if fast > slow && !long {
            Some(
                Signal::new(&bar.symbol, SignalAction::Buy, self.name(), bar.ts)
                    .with_indicator("ma_fast", fast)
                    .with_indicator("ma_slow", slow)
                    .with_reason("fast average above slow average"),
            )
        } else if fast < slow && long {
            Some(
                Signal::new(&bar.symbol, SignalAction::Sell, self.name(), bar.ts)
                    .with_indicator("ma_fast", fast)
                    .with_indicator("ma_slow", slow)
                    .with_reason("fast average below slow average"),
            )
        } else {
            None
        };
        Ok(signal)
    }

    fn on_fill(&mut self, fill: &Fill) -> Result<()> {
        self.exposure.record(fill);
        Ok(())
    }
}

/// Time-series momentum: long while the close exceeds the close
/// `lookback` bars ago.
#[derive(Debug, Clone)]
pub struct MomentumStrategy {
    lookback: usize,
    exposure: ExposureTracker,
}

impl MomentumStrategy {
    pub fn new(lookback: usize) -> Self {
        Self {
            lookback,
            exposure: ExposureTracker::default(),
        }
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        "tsmom"
    }

    fn warmup_period(&self) -> usize {
        self.lookback + 1
    }

    fn on_bar(&mut self, bar: &Bar, history: &[Bar]) -> Result<Option<Signal>> {
        let Some(momentum) = roc(history, self.lookback).last().copied().flatten() else {
            return Ok(None);
        };
        let long = self.exposure.is_long(&bar.symbol);
        let signal = if momentum > 0.0 && !long {
            Some(
                Signal::new(&bar.symbol, SignalAction::Buy, self.name(), bar.ts)
                    .with_indicator("momentum", momentum)
                    .with_reason("positive momentum"),
            )
        } else if momentum < 0.0 && long {
            Some(
                Signal::new(&bar.symbol, SignalAction::Sell, self.name(), bar.ts)
                    .with_indicator("momentum", momentum)
                    .with_reason("negative momentum"),
            )
        } else {
            None
        };
        Ok(signal)
    }

    fn on_fill(&mut self, fill: &Fill) -> Result<()> {
        self.exposure.record(fill);
        Ok(())
    }
}

/// RSI mean reversion: buy oversold, exit overbought.
#[derive(Debug, Clone)]
pub struct RsiReversionStrategy {
    period: usize,
    oversold: f64,
    overbought: f64,
    exposure: ExposureTracker,
}

impl RsiReversionStrategy {
    pub fn new(period: usize, oversold: f64, overbought: f64) -> Self {
        Self {
            period,
            oversold,
            overbought,
            exposure: ExposureTracker::default(),
        }
    }
}

impl Strategy for RsiReversionStrategy {
    fn name(&self) -> &str {
        "rsi_reversion"
    }

    fn warmup_period(&self) -> usize {
        self.period + 1
    }

    fn on_bar(&mut self, bar: &Bar, history: &[Bar]) -> Result<Option<Signal>> {
        let Some(value) = rsi(history, self.period).last().copied().flatten() else {
            return Ok(None);
        };
        let long = self.exposure.is_long(&bar.symbol);
        let signal = if value <= self.oversold && !long {
            Some(
                Signal::new(&bar.symbol, SignalAction::Buy, self.name(), bar.ts)
                    .with_indicator("rsi", value)
                    .with_reason("oversold"),
            )
        } else if value >= self.overbought && long {
            Some(
                Signal::new(&bar.symbol, SignalAction::Sell, self.name(), bar.ts)
                    .with_indicator("rsi", value)
                    .with_reason("overbought"),
            )
        } else {
            None
        };
        Ok(signal)
    }

    fn on_fill(&mut self, fill: &Fill) -> Result<()> {
        self.exposure.record(fill);
        Ok(())
    }
}

/// Buys on the first bar of each symbol and holds to the end.
#[derive(Debug, Clone, Default)]
pub struct BuyAndHoldStrategy {
    entered: BTreeMap<String, bool>,
}

impl BuyAndHoldStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for BuyAndHoldStrategy {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn on_bar(&mut self, bar: &Bar, _history: &[Bar]) -> Result<Option<Signal>> {
        if self.entered.get(&bar.symbol).copied().unwrap_or(false) {
            return Ok(None);
        }
        self.entered.insert(bar.symbol.clone(), true);
        Ok(Some(
            Signal::new(&bar.symbol, SignalAction::Buy, self.name(), bar.ts)
                .with_reason("initial entry"),
        ))
    }
}

/// One step of a [`ScriptedStrategy`].
#[derive(Debug, Clone)]
pub struct ScriptedAction {
    /// Zero-based bar index of the symbol at which to act.
    pub bar_index: usize,
    pub action: SignalAction,
    pub quantity: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl ScriptedAction {
    pub fn buy(bar_index: usize) -> Self {
        Self {
            bar_index,
            action: SignalAction::Buy,
            quantity: None,
            stop_loss: None,
            take_profit: None,
        }
    }

    pub fn sell(bar_index: usize) -> Self {
        Self {
            bar_index,
            action: SignalAction::Sell,
            quantity: None,
            stop_loss: None,
            take_profit: None,
        }
    }

    pub fn with_quantity(mut self, quantity: f64) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_stop_loss(mut self, level: f64) -> Self {
        self.stop_loss = Some(level);
        self
    }

    pub fn with_take_profit(mut self, level: f64) -> Self {
        self.take_profit = Some(level);
        self
    }
}

/// Deterministic scripted strategy: emits fixed actions at fixed bar
/// indices. The workhorse of engine scenario tests.
#[derive(Debug, Clone)]
pub struct ScriptedStrategy {
    actions: Vec<ScriptedAction>,
    seen: BTreeMap<String, usize>,
}

impl ScriptedStrategy {
    pub fn new(actions: Vec<ScriptedAction>) -> Self {
        Self {
            actions,
            seen: BTreeMap::new(),
        }
    }
}

impl Strategy for ScriptedStrategy {
    fn name(&self) -> &str {
        "scripted"
    }

    fn on_bar(&mut self, bar: &Bar, _history: &[Bar]) -> Result<Option<Signal>> {
        let index = self.seen.entry(bar.symbol.clone()).or_insert(0);
        let current = *index;
        *index += 1;
        let Some(step) = self.actions.iter().find(|a| a.bar_index == current) else {
            return Ok(None);
        };
        let mut signal = Signal::new(&bar.symbol, step.action, self.name(), bar.ts);
        signal.position_size = step.quantity;
        signal.stop_loss = step.stop_loss;
        signal.take_profit = step.take_profit;
        Ok(Some(signal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::test_support::bars_from_closes;

    fn drive(strategy: &mut dyn Strategy, bars: &[Bar]) -> Vec<Signal> {
        let mut signals = Vec::new();
        for i in 0..bars.len() {
            if let Some(sig) = strategy.on_bar(&bars[i], &bars[..=i]).unwrap() {
                // Pretend the engine filled it immediately at the close.
                let side = sig.order_side().unwrap();
                strategy
                    .on_fill(&Fill {
                        order_id: 0,
                        symbol: sig.symbol.clone(),
                        side,
                        quantity: sig.position_size.unwrap_or(1.0),
                        price: bars[i].close,
                        ts: bars[i].ts,
                        commission: 0.0,
                        slippage: 0.0,
                    })
                    .unwrap();
                signals.push(sig);
            }
        }
        signals
    }

    #[test]
    fn ma_crossover_buys_uptrend_then_sells_downtrend() {
        let mut closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        closes.extend((0..20).map(|i| 119.0 - 2.0 * i as f64));
        let bars = bars_from_closes("T", &closes);
        let mut strategy = MaCrossoverStrategy::new(3, 8, MaType::Sma);
        let signals = drive(&mut strategy, &bars);
        assert!(signals.len() >= 2);
        assert_eq!(signals[0].action, SignalAction::Buy);
        assert_eq!(signals[1].action, SignalAction::Sell);
    }

    #[test]
    fn momentum_goes_long_on_uptrend_only_once() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let bars = bars_from_closes("T", &closes);
        let mut strategy = MomentumStrategy::new(5);
        let signals = drive(&mut strategy, &bars);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].action, SignalAction::Buy);
        assert!(signals[0].indicators["momentum"] > 0.0);
    }

    #[test]
    fn buy_and_hold_emits_one_signal_per_symbol() {
        let bars = bars_from_closes("T", &[100.0, 101.0, 102.0]);
        let mut strategy = BuyAndHoldStrategy::new();
        let signals = drive(&mut strategy, &bars);
        assert_eq!(signals.len(), 1);
    }

    #[test]
    fn scripted_strategy_fires_at_exact_indices() {
        let bars = bars_from_closes("T", &[100.0, 101.0, 102.0, 103.0]);
        let mut strategy = ScriptedStrategy::new(vec![
            ScriptedAction::buy(1).with_quantity(50.0),
            ScriptedAction::sell(3),
        ]);
        let signals = drive(&mut strategy, &bars);
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].action, SignalAction::Buy);
        assert_eq!(signals[0].position_size, Some(50.0));
        assert_eq!(signals[1].action, SignalAction::Sell);
    }

    #[test]
    fn rsi_reversion_buys_after_selloff() {
        let mut closes: Vec<f64> = (0..20).map(|_| 100.0).collect();
        closes.extend((1..=15).map(|i| 100.0 - 2.0 * i as f64));
        let bars = bars_from_closes("T", &closes);
        let mut strategy = RsiReversionStrategy::new(14, 30.0, 70.0);
        let signals = drive(&mut strategy, &bars);
        assert!(!signals.is_empty());
        assert_eq!(signals[0].action, SignalAction::Buy);
    }
}
