//! Fill simulation: slippage models, commission models, and the per-bar
//! fill policy for every order type.
//!
//! `FillSimulator::simulate` is a pure function of (order, bar, configured
//! models): no randomness, no state. A rejected order simply returns `None`.

use crate::bar::Bar;
use crate::order::{Order, OrderSide, OrderType, TrailingOffset};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An executed fill. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: u64,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    pub ts: DateTime<Utc>,
    /// Commission charged, in dollars.
    pub commission: f64,
    /// Slippage paid versus the raw reference price, in dollars.
    pub slippage: f64,
}

impl Fill {
    /// Notional value of the fill (quantity × price).
    pub fn notional(&self) -> f64 {
        self.quantity * self.price
    }
}

/// Slippage model family. `fraction` returns the fractional price
/// concession `s`; buys pay `reference × (1 + s)`, sells receive
/// `reference × (1 − s)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum SlippageModel {
    /// No slippage.
    None,
    /// Fixed dollar amount per share.
    FixedAmount { amount: f64 },
    /// Fixed basis points of the reference price.
    FixedBps { bps: f64 },
    /// Fixed fraction of the reference price (0.001 = 10 bps).
    Percentage { rate: f64 },
    /// Impact scales with order size as a share of bar volume:
    /// `s = base_rate × (quantity / volume)`, capped at `max_rate`.
    VolumeBased { base_rate: f64, max_rate: f64 },
}

impl SlippageModel {
    pub fn fraction(&self, order: &Order, bar: &Bar, reference: f64) -> f64 {
        let s = match self {
            SlippageModel::None => 0.0,
            SlippageModel::FixedAmount { amount } => {
                if reference > 0.0 {
                    amount / reference
                } else {
                    0.0
                }
            }
            SlippageModel::FixedBps { bps } => bps / 10_000.0,
            SlippageModel::Percentage { rate } => *rate,
            SlippageModel::VolumeBased {
                base_rate,
                max_rate,
            } => {
                if bar.volume > 0.0 {
                    (base_rate * order.quantity / bar.volume).min(*max_rate)
                } else {
                    *max_rate
                }
            }
        };
        s.max(0.0)
    }
}

/// One tier of a tiered commission schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionTier {
    /// Tier applies to notionals at or above this value.
    pub min_notional: f64,
    /// Commission as a fraction of notional.
    pub rate: f64,
}

/// Commission model family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CommissionModel {
    /// No commission.
    None,
    /// Flat dollar amount per order.
    Fixed { amount: f64 },
    /// Dollars per share.
    PerShare { rate: f64 },
    /// Fraction of notional.
    Percentage { rate: f64 },
    /// Notional-banded rates; tiers must be sorted ascending by
    /// `min_notional`, the last matching tier wins.
    Tiered { tiers: Vec<CommissionTier> },
}

impl CommissionModel {
    pub fn calculate(&self, quantity: f64, fill_price: f64) -> f64 {
        let commission = match self {
            CommissionModel::None => 0.0,
            CommissionModel::Fixed { amount } => *amount,
            CommissionModel::PerShare { rate } => rate * quantity,
            CommissionModel::Percentage { rate } => rate * quantity * fill_price,
            CommissionModel::Tiered { tiers } => {
                let notional = quantity * fill_price;
                tiers
                    .iter()
                    .filter(|t| notional >= t.min_notional)
                    .last()
                    .map(|t| t.rate * notional)
                    .unwrap_or(0.0)
            }
        };
        commission.max(0.0)
    }
}

/// Configurable fill simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillSimulator {
    pub slippage: SlippageModel,
    pub commission: CommissionModel,
    /// Market reference price is the bar close when true, else the open.
    pub fill_on_close: bool,
    /// Reject market-style fills larger than
    /// `max_order_size_pct × bar.volume`.
    pub reject_partial_fills: bool,
    pub max_order_size_pct: f64,
}

impl Default for FillSimulator {
    fn default() -> Self {
        Self {
            slippage: SlippageModel::None,
            commission: CommissionModel::None,
            fill_on_close: true,
            reject_partial_fills: false,
            max_order_size_pct: 0.1,
        }
    }
}

impl FillSimulator {
    /// Attempt to fill `order` against `bar`. Returns `None` when the
    /// order does not execute on this bar.
    pub fn simulate(&self, order: &Order, bar: &Bar) -> Option<Fill> {
        match order.order_type {
            OrderType::Market => self.fill_market(order, bar, self.reference_price(bar)),
            OrderType::Limit | OrderType::TakeProfit => self.fill_limit(order, bar),
            OrderType::Stop | OrderType::TrailingStop => {
                let stop = order.stop_price?;
                if !stop_triggered(order.side, stop, bar) {
                    return None;
                }
                // Triggered: executes as a market order at the stop level.
                self.fill_market(order, bar, stop)
            }
            OrderType::StopLimit => {
                let stop = order.stop_price?;
                let limit = order.limit_price?;
                if !stop_triggered(order.side, stop, bar) {
                    return None;
                }
                if !limit_reachable(order.side, limit, bar) {
                    return None;
                }
                let price = favorable_limit_price(order.side, limit, bar.open);
                Some(self.build_fill(order, bar, price, 0.0))
            }
        }
    }

    /// Ratchet a resting trailing stop against a new bar. The stop trails
    /// the high-water mark for sells and the low-water mark for buys.
    pub fn update_trailing_stop(&self, order: &mut Order, bar: &Bar) {
        let Some(offset) = order.trailing else {
            return;
        };
        match order.side {
            OrderSide::Sell => {
                let candidate = bar.high - offset_amount(offset, bar.high);
                order.stop_price = Some(match order.stop_price {
                    Some(existing) => existing.max(candidate),
                    None => candidate,
                });
            }
            OrderSide::Buy => {
                let candidate = bar.low + offset_amount(offset, bar.low);
                order.stop_price = Some(match order.stop_price {
                    Some(existing) => existing.min(candidate),
                    None => candidate,
                });
            }
        }
    }

    fn reference_price(&self, bar: &Bar) -> f64 {
        if self.fill_on_close {
            bar.close
        } else {
            bar.open
        }
    }

    fn fill_market(&self, order: &Order, bar: &Bar, reference: f64) -> Option<Fill> {
        if self.reject_partial_fills && order.quantity > self.max_order_size_pct * bar.volume {
            return None;
        }
        let s = self.slippage.fraction(order, bar, reference);
        let price = match order.side {
            OrderSide::Buy => reference * (1.0 + s),
            OrderSide::Sell => reference * (1.0 - s),
        };
        let slippage_dollars = (price - reference).abs() * order.quantity;
        Some(self.build_fill(order, bar, price, slippage_dollars))
    }

    fn fill_limit(&self, order: &Order, bar: &Bar) -> Option<Fill> {
        let limit = order.limit_price?;
        if !limit_reachable(order.side, limit, bar) {
            return None;
        }
        let price = favorable_limit_price(order.side, limit, bar.open);
        Some(self.build_fill(order, bar, price, 0.0))
    }

    fn build_fill(&self, order: &Order, bar: &Bar, price: f64, slippage: f64) -> Fill {
        Fill {
            order_id: order.id,
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            price,
            ts: bar.ts,
            commission: self.commission.calculate(order.quantity, price),
            slippage,
        }
    }
}

fn stop_triggered(side: OrderSide, stop: f64, bar: &Bar) -> bool {
    match side {
        OrderSide::Buy => bar.high >= stop,
        OrderSide::Sell => bar.low <= stop,
    }
}

fn limit_reachable(side: OrderSide, limit: f64, bar: &Bar) -> bool {
    match side {
        OrderSide::Buy => bar.low <= limit,
        OrderSide::Sell => bar.high >= limit,
    }
}

/// The more favorable of limit price and bar open: a gap through the limit
/// fills at the open, in the caller's favor.
fn favorable_limit_price(side: OrderSide, limit: f64, open: f64) -> f64 {
    match side {
        OrderSide::Buy => limit.min(open),
        OrderSide::Sell => limit.max(open),
    }
}

fn offset_amount(offset: TrailingOffset, mark: f64) -> f64 {
    match offset {
        TrailingOffset::Amount(a) => a,
        TrailingOffset::Percent(p) => mark * p,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::test_support::day;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new("TEST", day(0), open, high, low, close, 1_000_000.0)
    }

    fn market(side: OrderSide, qty: f64) -> Order {
        Order::market(1, "TEST", side, qty, day(0))
    }

    #[test]
    fn market_buy_fills_at_close_by_default() {
        let sim = FillSimulator::default();
        let fill = sim.simulate(&market(OrderSide::Buy, 100.0), &bar(100.0, 105.0, 99.0, 103.0));
        let fill = fill.unwrap();
        assert_eq!(fill.price, 103.0);
        assert_eq!(fill.commission, 0.0);
        assert_eq!(fill.slippage, 0.0);
    }

    #[test]
    fn market_fill_on_open_when_configured() {
        let sim = FillSimulator {
            fill_on_close: false,
            ..FillSimulator::default()
        };
        let fill = sim
            .simulate(&market(OrderSide::Buy, 100.0), &bar(100.0, 105.0, 99.0, 103.0))
            .unwrap();
        assert_eq!(fill.price, 100.0);
    }

    #[test]
    fn slippage_worsens_both_sides() {
        let sim = FillSimulator {
            slippage: SlippageModel::FixedBps { bps: 10.0 },
            ..FillSimulator::default()
        };
        let b = bar(100.0, 105.0, 99.0, 100.0);
        let buy = sim.simulate(&market(OrderSide::Buy, 10.0), &b).unwrap();
        let sell = sim.simulate(&market(OrderSide::Sell, 10.0), &b).unwrap();
        assert!((buy.price - 100.1).abs() < 1e-10);
        assert!((sell.price - 99.9).abs() < 1e-10);
        assert!((buy.slippage - 1.0).abs() < 1e-10); // 0.1 * 10 shares
    }

    #[test]
    fn volume_based_slippage_scales_with_size() {
        let sim = FillSimulator {
            slippage: SlippageModel::VolumeBased {
                base_rate: 0.1,
                max_rate: 0.01,
            },
            ..FillSimulator::default()
        };
        let b = bar(100.0, 100.0, 100.0, 100.0);
        // 10_000 / 1_000_000 = 1% of volume -> s = 0.1 * 0.01 = 0.001
        let fill = sim.simulate(&market(OrderSide::Buy, 10_000.0), &b).unwrap();
        assert!((fill.price - 100.1).abs() < 1e-9);
    }

    #[test]
    fn oversized_market_order_rejected() {
        let sim = FillSimulator {
            reject_partial_fills: true,
            max_order_size_pct: 0.01,
            ..FillSimulator::default()
        };
        let b = bar(100.0, 100.0, 100.0, 100.0);
        assert!(sim.simulate(&market(OrderSide::Buy, 20_000.0), &b).is_none());
        assert!(sim.simulate(&market(OrderSide::Buy, 5_000.0), &b).is_some());
    }

    #[test]
    fn limit_buy_needs_low_at_or_below_limit() {
        let sim = FillSimulator::default();
        let order = market(OrderSide::Buy, 10.0)
            .with_type(OrderType::Limit)
            .with_limit(99.5);
        assert!(sim.simulate(&order, &bar(100.0, 105.0, 100.0, 103.0)).is_none());
        let fill = sim.simulate(&order, &bar(100.0, 105.0, 99.0, 103.0)).unwrap();
        assert_eq!(fill.price, 99.5);
    }

    #[test]
    fn limit_gap_fills_at_open_in_callers_favor() {
        let sim = FillSimulator::default();
        let order = market(OrderSide::Buy, 10.0)
            .with_type(OrderType::Limit)
            .with_limit(100.0);
        // Gaps down through the limit: open 95 is better than 100 for a buy.
        let fill = sim.simulate(&order, &bar(95.0, 98.0, 94.0, 97.0)).unwrap();
        assert_eq!(fill.price, 95.0);
    }

    #[test]
    fn stop_sell_triggers_at_stop_with_slippage() {
        let sim = FillSimulator {
            slippage: SlippageModel::Percentage { rate: 0.001 },
            ..FillSimulator::default()
        };
        let order = market(OrderSide::Sell, 10.0)
            .with_type(OrderType::Stop)
            .with_stop(95.0);
        assert!(sim.simulate(&order, &bar(100.0, 101.0, 96.0, 97.0)).is_none());
        let fill = sim.simulate(&order, &bar(96.0, 96.0, 94.0, 95.0)).unwrap();
        assert!((fill.price - 95.0 * 0.999).abs() < 1e-10);
    }

    #[test]
    fn stop_limit_requires_both_conditions_same_bar() {
        let sim = FillSimulator::default();
        let order = market(OrderSide::Sell, 10.0)
            .with_type(OrderType::StopLimit)
            .with_stop(95.0)
            .with_limit(94.5);
        // Stop triggers (low <= 95) and the limit is reachable (high >= 94.5).
        let fill = sim.simulate(&order, &bar(96.0, 96.0, 94.0, 95.0)).unwrap();
        assert_eq!(fill.price, 96.0); // open above limit: favorable for a sell
        // Stop does not trigger.
        assert!(sim.simulate(&order, &bar(97.0, 98.0, 95.5, 96.0)).is_none());
    }

    #[test]
    fn trailing_stop_ratchets_up_for_sell() {
        let sim = FillSimulator::default();
        let mut order = market(OrderSide::Sell, 10.0)
            .with_type(OrderType::TrailingStop)
            .with_trailing(TrailingOffset::Amount(5.0));
        sim.update_trailing_stop(&mut order, &bar(100.0, 100.0, 99.0, 100.0));
        assert_eq!(order.stop_price, Some(95.0));
        sim.update_trailing_stop(&mut order, &bar(100.0, 110.0, 99.0, 109.0));
        assert_eq!(order.stop_price, Some(105.0));
        // Never loosens.
        sim.update_trailing_stop(&mut order, &bar(104.0, 105.0, 103.0, 104.0));
        assert_eq!(order.stop_price, Some(105.0));
    }

    #[test]
    fn trailing_percent_offset() {
        let sim = FillSimulator::default();
        let mut order = market(OrderSide::Sell, 10.0)
            .with_type(OrderType::TrailingStop)
            .with_trailing(TrailingOffset::Percent(0.10));
        sim.update_trailing_stop(&mut order, &bar(100.0, 100.0, 98.0, 99.0));
        assert_eq!(order.stop_price, Some(90.0));
    }

    #[test]
    fn tiered_commission_picks_matching_band() {
        let model = CommissionModel::Tiered {
            tiers: vec![
                CommissionTier {
                    min_notional: 0.0,
                    rate: 0.002,
                },
                CommissionTier {
                    min_notional: 10_000.0,
                    rate: 0.001,
                },
            ],
        };
        assert!((model.calculate(10.0, 100.0) - 2.0).abs() < 1e-10); // 1k notional
        assert!((model.calculate(200.0, 100.0) - 20.0).abs() < 1e-10); // 20k notional
    }

    #[test]
    fn per_share_and_percentage_commissions() {
        assert_eq!(CommissionModel::PerShare { rate: 0.01 }.calculate(100.0, 50.0), 1.0);
        assert_eq!(
            CommissionModel::Percentage { rate: 0.001 }.calculate(100.0, 50.0),
            5.0
        );
        assert_eq!(CommissionModel::Fixed { amount: 1.5 }.calculate(1.0, 1.0), 1.5);
    }
}
