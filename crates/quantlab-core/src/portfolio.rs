//! Portfolio state: cash, positions, closed trades, and the equity curve.
//!
//! Accounting conventions:
//! - Fill prices already include slippage (the simulator moves the price in
//!   the worse direction), so slippage totals are informational and never
//!   debited twice.
//! - `market_value` is signed: long positions are assets, short positions
//!   are liabilities. The invariant `equity == cash + Σ market_value` holds
//!   at every equity-curve point.

use crate::bar::Bar;
use crate::error::{QuantError, Result};
use crate::fill::Fill;
use crate::order::OrderSide;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

/// Why a trade was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Signal,
    StopLoss,
    TakeProfit,
    TimeLimit,
    EndOfBacktest,
    StrategyExit,
}

/// An open position. At most one per symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub current_price: f64,
    /// Signed market value: negative for shorts.
    pub market_value: f64,
    pub unrealized_pnl: f64,
    pub unrealized_pnl_pct: f64,
    /// P&L realized by partial reductions of this position.
    pub realized_pnl: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
    pub highest_price: f64,
    pub lowest_price: f64,
    /// Worst unrealized P&L observed while open (≤ 0, dollars).
    pub mae: f64,
    /// Best unrealized P&L observed while open (≥ 0, dollars).
    pub mfe: f64,
    pub entry_commission: f64,
    pub entry_slippage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

impl Position {
    fn mark(&mut self, price: f64) {
        self.current_price = price;
        self.highest_price = self.highest_price.max(price);
        self.lowest_price = self.lowest_price.min(price);
        self.market_value = match self.side {
            PositionSide::Long => self.quantity * price,
            PositionSide::Short => -self.quantity * price,
        };
        self.unrealized_pnl = match self.side {
            PositionSide::Long => (price - self.avg_entry_price) * self.quantity,
            PositionSide::Short => (self.avg_entry_price - price) * self.quantity,
        };
        let basis = self.avg_entry_price * self.quantity;
        self.unrealized_pnl_pct = if basis > 0.0 {
            self.unrealized_pnl / basis
        } else {
            0.0
        };
        self.mae = self.mae.min(self.unrealized_pnl);
        self.mfe = self.mfe.max(self.unrealized_pnl);
    }
}

/// A closed trade. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub quantity: f64,
    pub exit_reason: ExitReason,
    pub gross_pnl: f64,
    /// Entry commission allocated to this exit plus the exit commission.
    pub commission: f64,
    /// Informational: slippage dollars embedded in the fill prices.
    pub slippage: f64,
    pub net_pnl: f64,
    pub return_pct: f64,
    pub mae: f64,
    pub mfe: f64,
    /// Net P&L per dollar of initial stop-loss risk; 0 without a stop.
    pub r_value: f64,
    pub hold_duration_days: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

/// One point of the equity curve, appended per processed bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub ts: DateTime<Utc>,
    pub cash: f64,
    pub positions_value: f64,
    pub equity: f64,
    pub cumulative_return: f64,
    pub daily_return: f64,
    pub drawdown: f64,
}

/// Position metadata carried from the originating order onto fills.
#[derive(Debug, Clone, Default)]
pub struct FillMeta {
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub strategy: Option<String>,
}

/// Owns cash, positions, closed trades, and the equity curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioTracker {
    initial_capital: f64,
    cash: f64,
    positions: HashMap<String, Position>,
    closed_trades: Vec<Trade>,
    equity_curve: Vec<EquityPoint>,
    total_commission: f64,
    total_slippage: f64,
    peak_equity: f64,
    next_trade_id: u64,
    allow_short: bool,
}

impl PortfolioTracker {
    pub fn new(initial_capital: f64, allow_short: bool) -> Self {
        Self {
            initial_capital,
            cash: initial_capital,
            positions: HashMap::new(),
            closed_trades: Vec::new(),
            equity_curve: Vec::new(),
            total_commission: 0.0,
            total_slippage: 0.0,
            peak_equity: initial_capital,
            next_trade_id: 1,
            allow_short,
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn closed_trades(&self) -> &[Trade] {
        &self.closed_trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn total_commission(&self) -> f64 {
        self.total_commission
    }

    pub fn total_slippage(&self) -> f64 {
        self.total_slippage
    }

    pub fn peak_equity(&self) -> f64 {
        self.peak_equity
    }

    /// Sum of signed position market values.
    pub fn positions_value(&self) -> f64 {
        self.positions.values().map(|p| p.market_value).sum()
    }

    /// Current total equity.
    pub fn equity(&self) -> f64 {
        self.cash + self.positions_value()
    }

    /// Sum of closed-trade net P&L.
    pub fn realized_pnl(&self) -> f64 {
        self.closed_trades.iter().map(|t| t.net_pnl).sum()
    }

    /// Entry costs still carried by open positions (not yet allocated to
    /// any closed trade).
    pub fn open_entry_costs(&self) -> f64 {
        self.positions
            .values()
            .map(|p| p.entry_commission + p.entry_slippage)
            .sum()
    }

    /// Apply a fill. Returns the closed trade when the fill fully closes a
    /// position. Rejected fills (insufficient cash, overselling) leave the
    /// portfolio untouched.
    pub fn apply_fill(&mut self, fill: &Fill, meta: &FillMeta) -> Result<Option<Trade>> {
        let existing_side = self.positions.get(&fill.symbol).map(|p| p.side);
        let result = match (fill.side, existing_side) {
            (OrderSide::Buy, None) => self.open_position(fill, PositionSide::Long, meta).map(|_| None),
            (OrderSide::Buy, Some(PositionSide::Long)) => self.increase_position(fill).map(|_| None),
            (OrderSide::Buy, Some(PositionSide::Short)) => self.reduce_position(fill, meta),
            (OrderSide::Sell, Some(PositionSide::Long)) => self.reduce_position(fill, meta),
            (OrderSide::Sell, None) => {
                if self.allow_short {
                    self.open_position(fill, PositionSide::Short, meta).map(|_| None)
                } else {
                    Err(QuantError::Portfolio(format!(
                        "sell of {} without an open position",
                        fill.symbol
                    )))
                }
            }
            (OrderSide::Sell, Some(PositionSide::Short)) => self.increase_position(fill).map(|_| None),
        }?;
        self.total_commission += fill.commission;
        self.total_slippage += fill.slippage;
        Ok(result)
    }

    fn open_position(&mut self, fill: &Fill, side: PositionSide, meta: &FillMeta) -> Result<()> {
        self.settle_cash(fill, side == PositionSide::Long)?;
        let mut position = Position {
            symbol: fill.symbol.clone(),
            side,
            quantity: fill.quantity,
            avg_entry_price: fill.price,
            entry_time: fill.ts,
            current_price: fill.price,
            market_value: 0.0,
            unrealized_pnl: 0.0,
            unrealized_pnl_pct: 0.0,
            realized_pnl: 0.0,
            stop_loss: meta.stop_loss,
            take_profit: meta.take_profit,
            highest_price: fill.price,
            lowest_price: fill.price,
            mae: 0.0,
            mfe: 0.0,
            entry_commission: fill.commission,
            entry_slippage: fill.slippage,
            strategy: meta.strategy.clone(),
        };
        position.mark(fill.price);
        self.positions.insert(fill.symbol.clone(), position);
        Ok(())
    }

    fn increase_position(&mut self, fill: &Fill) -> Result<()> {
        let side = self.positions[&fill.symbol].side;
        self.settle_cash(fill, side == PositionSide::Long)?;
        let position = self
            .positions
            .get_mut(&fill.symbol)
            .ok_or_else(|| QuantError::Critical("position vanished mid-update".into()))?;
        let old_qty = position.quantity;
        let new_qty = old_qty + fill.quantity;
        position.avg_entry_price =
            (old_qty * position.avg_entry_price + fill.quantity * fill.price) / new_qty;
        position.quantity = new_qty;
        position.entry_commission += fill.commission;
        position.entry_slippage += fill.slippage;
        position.mark(fill.price);
        Ok(())
    }

    /// Reduce or fully close a position with an opposing fill.
    fn reduce_position(&mut self, fill: &Fill, meta: &FillMeta) -> Result<Option<Trade>> {
        {
            let position = &self.positions[&fill.symbol];
            if fill.quantity > position.quantity + 1e-9 {
                return Err(QuantError::Portfolio(format!(
                    "{}: fill quantity {} exceeds held quantity {}",
                    fill.symbol, fill.quantity, position.quantity
                )));
            }
        }
        let side = self.positions[&fill.symbol].side;
        // A sell of a long credits cash; a buy-back of a short debits it.
        match side {
            PositionSide::Long => {
                self.cash += fill.quantity * fill.price - fill.commission;
            }
            PositionSide::Short => {
                self.cash -= fill.quantity * fill.price + fill.commission;
            }
        }

        let position = self
            .positions
            .get_mut(&fill.symbol)
            .ok_or_else(|| QuantError::Critical("position vanished mid-update".into()))?;
        let gross = match side {
            PositionSide::Long => (fill.price - position.avg_entry_price) * fill.quantity,
            PositionSide::Short => (position.avg_entry_price - fill.price) * fill.quantity,
        };
        let share = fill.quantity / position.quantity;
        let entry_commission = position.entry_commission * share;
        let entry_slippage = position.entry_slippage * share;
        position.entry_commission -= entry_commission;
        position.entry_slippage -= entry_slippage;

        let commission = entry_commission + fill.commission;
        let net = gross - commission;
        let full_close = (position.quantity - fill.quantity).abs() <= 1e-9;

        if full_close {
            let position = self
                .positions
                .remove(&fill.symbol)
                .ok_or_else(|| QuantError::Critical("position vanished mid-close".into()))?;
            let basis = position.avg_entry_price * fill.quantity;
            let risk = position
                .stop_loss
                .map(|sl| (position.avg_entry_price - sl).abs() * fill.quantity)
                .unwrap_or(0.0);
            let trade = Trade {
                id: self.next_trade_id,
                symbol: fill.symbol.clone(),
                side,
                entry_time: position.entry_time,
                entry_price: position.avg_entry_price,
                exit_time: fill.ts,
                exit_price: fill.price,
                quantity: fill.quantity,
                exit_reason: meta.exit_reason.unwrap_or(ExitReason::Signal),
                gross_pnl: gross,
                commission,
                slippage: entry_slippage + fill.slippage,
                net_pnl: net + position.realized_pnl,
                return_pct: if basis > 0.0 { net / basis } else { 0.0 },
                mae: position.mae,
                mfe: position.mfe,
                r_value: if risk > 0.0 { net / risk } else { 0.0 },
                hold_duration_days: (fill.ts - position.entry_time).num_seconds() as f64
                    / 86_400.0,
                strategy: position.strategy.clone(),
            };
            self.next_trade_id += 1;
            self.closed_trades.push(trade.clone());
            Ok(Some(trade))
        } else {
            position.quantity -= fill.quantity;
            position.realized_pnl += net;
            position.mark(fill.price);
            Ok(None)
        }
    }

    fn settle_cash(&mut self, fill: &Fill, is_long: bool) -> Result<()> {
        if is_long {
            let cost = fill.quantity * fill.price + fill.commission;
            if cost > self.cash + 1e-9 {
                return Err(QuantError::Portfolio(format!(
                    "insufficient cash: need {:.2}, have {:.2}",
                    cost, self.cash
                )));
            }
            self.cash -= cost;
        } else {
            // Opening/increasing a short credits the proceeds.
            self.cash += fill.quantity * fill.price - fill.commission;
        }
        Ok(())
    }

    /// Mark positions to the given prices and append an equity-curve point.
    pub fn update_prices(&mut self, prices: &HashMap<String, f64>, ts: DateTime<Utc>) {
        for (symbol, position) in self.positions.iter_mut() {
            if let Some(&price) = prices.get(symbol) {
                position.mark(price);
            }
        }
        let positions_value = self.positions_value();
        let equity = self.cash + positions_value;
        let prev_equity = self.equity_curve.last().map(|p| p.equity);
        self.peak_equity = self.peak_equity.max(equity);
        let drawdown = if self.peak_equity > 0.0 {
            (self.peak_equity - equity) / self.peak_equity
        } else {
            0.0
        };
        self.equity_curve.push(EquityPoint {
            ts,
            cash: self.cash,
            positions_value,
            equity,
            cumulative_return: if self.initial_capital > 0.0 {
                equity / self.initial_capital - 1.0
            } else {
                0.0
            },
            daily_return: match prev_equity {
                Some(prev) if prev != 0.0 => equity / prev - 1.0,
                _ => 0.0,
            },
            drawdown,
        });
    }

    /// Check whether the bar's range crosses the position's protective
    /// levels. When both cross on the same bar the stop-loss wins
    /// (pessimistic tie break). Returns the reason and trigger level.
    pub fn exit_trigger(&self, bar: &Bar) -> Option<(ExitReason, f64)> {
        let position = self.positions.get(&bar.symbol)?;
        let (stop_hit, target_hit) = match position.side {
            PositionSide::Long => (
                position.stop_loss.filter(|sl| bar.low <= *sl),
                position.take_profit.filter(|tp| bar.high >= *tp),
            ),
            PositionSide::Short => (
                position.stop_loss.filter(|sl| bar.high >= *sl),
                position.take_profit.filter(|tp| bar.low <= *tp),
            ),
        };
        if let Some(sl) = stop_hit {
            return Some((ExitReason::StopLoss, sl));
        }
        if let Some(tp) = target_hit {
            return Some((ExitReason::TakeProfit, tp));
        }
        None
    }

    /// Verify the accounting identity `equity == cash + Σ market_value`
    /// against the last equity point. A violation is a critical error.
    pub fn verify_accounting(&self) -> Result<()> {
        if let Some(point) = self.equity_curve.last() {
            let tolerance = 1e-6 * point.equity.abs().max(1.0);
            let recomputed = point.cash + point.positions_value;
            if (point.equity - recomputed).abs() > tolerance {
                return Err(QuantError::Critical(format!(
                    "equity {} != cash {} + positions {}",
                    point.equity, point.cash, point.positions_value
                )));
            }
        }
        Ok(())
    }
}
