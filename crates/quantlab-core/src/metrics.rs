//! Performance metrics derived from an equity curve and closed trades.
//!
//! `compute_metrics` is a pure function: identical inputs produce bitwise
//! identical output. Degenerate inputs (no trades, empty curve, zero
//! volatility) yield zeros rather than NaN or infinities, with the single
//! documented exception of `profit_factor` on a loss-free run (sanitized at
//! the reporting boundary).

use crate::portfolio::{EquityPoint, Trade};
use crate::stats::{downside_deviation, mean, std_dev};
use serde::{Deserialize, Serialize};

/// Trading days per year used for annualization.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Performance metrics for a backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PerformanceMetrics {
    // Capital
    pub initial_capital: f64,
    pub final_equity: f64,
    pub trading_days: usize,

    // Returns
    pub total_return: f64,
    pub cagr: f64,
    pub annualized_return: f64,

    // Risk
    pub volatility: f64,
    pub downside_volatility: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub max_drawdown: f64,
    pub max_drawdown_duration_days: f64,

    // Trade statistics
    pub num_trades: usize,
    pub num_winners: usize,
    pub num_losers: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub payoff_ratio: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub avg_holding_period_days: f64,
    pub avg_mae: f64,
    pub avg_mfe: f64,

    // Costs and activity
    pub total_commission: f64,
    pub total_slippage: f64,
    pub turnover: f64,
}

/// Compute all metrics from an equity curve and closed trades.
pub fn compute_metrics(
    equity_curve: &[EquityPoint],
    trades: &[Trade],
    initial_capital: f64,
    total_commission: f64,
    total_slippage: f64,
) -> PerformanceMetrics {
    let mut metrics = PerformanceMetrics {
        initial_capital,
        total_commission,
        total_slippage,
        ..PerformanceMetrics::default()
    };
    compute_trade_stats(&mut metrics, trades);

    if equity_curve.is_empty() {
        metrics.final_equity = initial_capital;
        return metrics;
    }

    let equity: Vec<f64> = equity_curve.iter().map(|p| p.equity).collect();
    let final_equity = *equity.last().unwrap_or(&initial_capital);
    metrics.final_equity = final_equity;
    metrics.trading_days = equity_curve.len();

    metrics.total_return = if initial_capital > 0.0 {
        (final_equity - initial_capital) / initial_capital
    } else {
        0.0
    };

    let days = (equity_curve.last().unwrap().ts - equity_curve.first().unwrap().ts).num_days();
    metrics.cagr = calculate_cagr(initial_capital, final_equity, days as f64);

    let daily_returns: Vec<f64> = equity
        .windows(2)
        .map(|w| if w[0] != 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect();

    metrics.annualized_return = mean(&daily_returns) * TRADING_DAYS_PER_YEAR;
    metrics.volatility = std_dev(&daily_returns) * TRADING_DAYS_PER_YEAR.sqrt();
    metrics.downside_volatility =
        downside_deviation(&daily_returns) * TRADING_DAYS_PER_YEAR.sqrt();
    metrics.sharpe = ratio_or_zero(metrics.annualized_return, metrics.volatility);
    metrics.sortino = ratio_or_zero(metrics.annualized_return, metrics.downside_volatility);

    metrics.max_drawdown = calculate_max_drawdown(&equity);
    metrics.max_drawdown_duration_days = calculate_max_drawdown_duration(equity_curve);
    metrics.calmar = ratio_or_zero(metrics.annualized_return, metrics.max_drawdown);

    // Turnover: traded notional per unit of average capital per year.
    let years = days as f64 / 365.0;
    let traded: f64 = trades
        .iter()
        .map(|t| t.quantity * (t.entry_price + t.exit_price))
        .sum();
    let avg_capital = (initial_capital + final_equity) / 2.0;
    metrics.turnover = if years > 0.0 && avg_capital > 0.0 {
        traded / avg_capital / years
    } else {
        0.0
    };

    metrics
}

fn compute_trade_stats(metrics: &mut PerformanceMetrics, trades: &[Trade]) {
    metrics.num_trades = trades.len();
    if trades.is_empty() {
        return;
    }

    let wins: Vec<f64> = trades.iter().map(|t| t.net_pnl).filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = trades.iter().map(|t| t.net_pnl).filter(|p| *p < 0.0).collect();
    metrics.num_winners = wins.len();
    metrics.num_losers = losses.len();
    metrics.win_rate = wins.len() as f64 / trades.len() as f64;

    metrics.gross_profit = wins.iter().sum();
    metrics.gross_loss = losses.iter().sum::<f64>().abs();
    metrics.profit_factor = if metrics.gross_loss > 0.0 {
        metrics.gross_profit / metrics.gross_loss
    } else if metrics.gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let pnls: Vec<f64> = trades.iter().map(|t| t.net_pnl).collect();
    metrics.expectancy = mean(&pnls);
    metrics.avg_win = mean(&wins);
    metrics.avg_loss = mean(&losses);
    metrics.payoff_ratio = ratio_or_zero(metrics.avg_win, metrics.avg_loss.abs());
    metrics.largest_win = wins.iter().cloned().fold(0.0, f64::max);
    metrics.largest_loss = losses.iter().cloned().fold(0.0, f64::min);

    let (max_wins, max_losses) = streaks(&pnls);
    metrics.max_consecutive_wins = max_wins;
    metrics.max_consecutive_losses = max_losses;

    let holds: Vec<f64> = trades.iter().map(|t| t.hold_duration_days).collect();
    metrics.avg_holding_period_days = mean(&holds);
    let maes: Vec<f64> = trades.iter().map(|t| t.mae).collect();
    let mfes: Vec<f64> = trades.iter().map(|t| t.mfe).collect();
    metrics.avg_mae = mean(&maes);
    metrics.avg_mfe = mean(&mfes);
}

/// CAGR with a 365-day calendar-year exponent.
pub fn calculate_cagr(initial: f64, final_value: f64, days: f64) -> f64 {
    if initial <= 0.0 || final_value <= 0.0 || days <= 0.0 {
        return 0.0;
    }
    (final_value / initial).powf(365.0 / days) - 1.0
}

/// Maximum peak-to-trough fractional decline (positive number).
pub fn calculate_max_drawdown(equity: &[f64]) -> f64 {
    if equity.is_empty() {
        return 0.0;
    }
    let mut peak = equity[0];
    let mut max_dd = 0.0_f64;
    for &value in equity {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            max_dd = max_dd.max((peak - value) / peak);
        }
    }
    max_dd
}

/// Longest run below a prior equity peak, in days.
pub fn calculate_max_drawdown_duration(curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut peak_ts = None;
    let mut max_days = 0.0_f64;
    for point in curve {
        if point.equity >= peak {
            peak = point.equity;
            peak_ts = Some(point.ts);
        } else if let Some(start) = peak_ts {
            let days = (point.ts - start).num_seconds() as f64 / 86_400.0;
            max_days = max_days.max(days);
        }
    }
    max_days
}

fn ratio_or_zero(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

fn streaks(pnls: &[f64]) -> (usize, usize) {
    let mut max_wins = 0;
    let mut max_losses = 0;
    let mut wins = 0;
    let mut losses = 0;
    for &pnl in pnls {
        if pnl > 0.0 {
            wins += 1;
            losses = 0;
        } else if pnl < 0.0 {
            losses += 1;
            wins = 0;
        } else {
            wins = 0;
            losses = 0;
        }
        max_wins = max_wins.max(wins);
        max_losses = max_losses.max(losses);
    }
    (max_wins, max_losses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::test_support::day;
    use crate::portfolio::{ExitReason, PositionSide};

    fn equity_points(values: &[f64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                ts: day(i),
                cash: equity,
                positions_value: 0.0,
                equity,
                cumulative_return: 0.0,
                daily_return: 0.0,
                drawdown: 0.0,
            })
            .collect()
    }

    fn trade(net_pnl: f64, hold_days: f64) -> Trade {
        Trade {
            id: 1,
            symbol: "T".into(),
            side: PositionSide::Long,
            entry_time: day(0),
            entry_price: 100.0,
            exit_time: day(hold_days as usize),
            exit_price: 100.0 + net_pnl / 10.0,
            quantity: 10.0,
            exit_reason: ExitReason::Signal,
            gross_pnl: net_pnl,
            commission: 0.0,
            slippage: 0.0,
            net_pnl,
            return_pct: net_pnl / 1_000.0,
            mae: -10.0,
            mfe: 20.0,
            r_value: 0.0,
            hold_duration_days: hold_days,
            strategy: None,
        }
    }

    #[test]
    fn empty_inputs_are_all_zero() {
        let m = compute_metrics(&[], &[], 10_000.0, 0.0, 0.0);
        assert_eq!(m.total_return, 0.0);
        assert_eq!(m.sharpe, 0.0);
        assert_eq!(m.win_rate, 0.0);
        assert_eq!(m.profit_factor, 0.0);
        assert_eq!(m.expectancy, 0.0);
        assert_eq!(m.final_equity, 10_000.0);
    }

    #[test]
    fn total_return_and_drawdown() {
        let curve = equity_points(&[10_000.0, 11_000.0, 10_500.0, 12_000.0, 9_000.0, 10_000.0]);
        let m = compute_metrics(&curve, &[], 10_000.0, 0.0, 0.0);
        assert!((m.total_return - 0.0).abs() < 1e-12);
        // Peak 12_000 to trough 9_000 = 25%
        assert!((m.max_drawdown - 0.25).abs() < 1e-12);
    }

    #[test]
    fn cagr_matches_closed_form() {
        // Doubling over 365 days is 100% CAGR.
        assert!((calculate_cagr(100.0, 200.0, 365.0) - 1.0).abs() < 1e-9);
        // Negative or zero terminal equity degrades to 0.
        assert_eq!(calculate_cagr(100.0, 0.0, 365.0), 0.0);
    }

    #[test]
    fn zero_volatility_gives_zero_sharpe() {
        let curve = equity_points(&[10_000.0; 10]);
        let m = compute_metrics(&curve, &[], 10_000.0, 0.0, 0.0);
        assert_eq!(m.volatility, 0.0);
        assert_eq!(m.sharpe, 0.0);
        assert_eq!(m.sortino, 0.0);
    }

    #[test]
    fn trade_statistics() {
        let trades = vec![
            trade(100.0, 2.0),
            trade(50.0, 4.0),
            trade(-30.0, 1.0),
            trade(-20.0, 3.0),
            trade(80.0, 2.0),
        ];
        let curve = equity_points(&[10_000.0, 10_180.0]);
        let m = compute_metrics(&curve, &trades, 10_000.0, 0.0, 0.0);
        assert_eq!(m.num_trades, 5);
        assert_eq!(m.num_winners, 3);
        assert_eq!(m.num_losers, 2);
        assert!((m.win_rate - 0.6).abs() < 1e-12);
        assert!((m.gross_profit - 230.0).abs() < 1e-12);
        assert!((m.gross_loss - 50.0).abs() < 1e-12);
        assert!((m.profit_factor - 4.6).abs() < 1e-12);
        assert!((m.expectancy - 36.0).abs() < 1e-12);
        assert_eq!(m.max_consecutive_wins, 2);
        assert_eq!(m.max_consecutive_losses, 2);
        assert!((m.avg_holding_period_days - 2.4).abs() < 1e-12);
        assert_eq!(m.largest_win, 100.0);
        assert_eq!(m.largest_loss, -30.0);
    }

    #[test]
    fn profit_factor_infinite_without_losses() {
        let trades = vec![trade(100.0, 1.0)];
        let curve = equity_points(&[10_000.0, 10_100.0]);
        let m = compute_metrics(&curve, &trades, 10_000.0, 0.0, 0.0);
        assert!(m.profit_factor.is_infinite());
        assert_eq!(m.payoff_ratio, 0.0); // no losses: degenerate 0
    }

    #[test]
    fn drawdown_duration_spans_underwater_stretch() {
        // Underwater from day 1 through day 4.
        let curve = equity_points(&[100.0, 90.0, 95.0, 80.0, 99.0, 101.0]);
        let m = compute_metrics(&curve, &[], 100.0, 0.0, 0.0);
        assert!((m.max_drawdown_duration_days - 4.0).abs() < 1e-9);
    }

    #[test]
    fn metrics_are_idempotent() {
        let curve = equity_points(&[10_000.0, 10_100.0, 9_900.0, 10_300.0]);
        let trades = vec![trade(300.0, 3.0)];
        let a = compute_metrics(&curve, &trades, 10_000.0, 1.0, 2.0);
        let b = compute_metrics(&curve, &trades, 10_000.0, 1.0, 2.0);
        assert_eq!(a, b);
    }
}
