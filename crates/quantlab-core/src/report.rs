//! Result export: JSON trees and flat CSV rows.
//!
//! Every numeric field crossing this boundary is finite; degenerate or
//! non-finite values are reported as 0.

use crate::engine::BacktestResult;
use crate::error::{QuantError, Result};
use crate::metrics::PerformanceMetrics;
use crate::optimize::OptimizationRunResult;
use crate::portfolio::{EquityPoint, Trade};
use serde::Serialize;

fn writer_to_string(writer: csv::Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| QuantError::Data(format!("csv writer: {e}")))?;
    String::from_utf8(bytes).map_err(|e| QuantError::Data(format!("csv utf8: {e}")))
}

/// Non-finite values become 0 at the reporting boundary.
pub fn finite(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// A copy of the metrics with every field guaranteed finite.
pub fn sanitize_metrics(metrics: &PerformanceMetrics) -> PerformanceMetrics {
    let mut out = metrics.clone();
    for field in [
        &mut out.initial_capital,
        &mut out.final_equity,
        &mut out.total_return,
        &mut out.cagr,
        &mut out.annualized_return,
        &mut out.volatility,
        &mut out.downside_volatility,
        &mut out.sharpe,
        &mut out.sortino,
        &mut out.calmar,
        &mut out.max_drawdown,
        &mut out.max_drawdown_duration_days,
        &mut out.win_rate,
        &mut out.profit_factor,
        &mut out.expectancy,
        &mut out.payoff_ratio,
        &mut out.gross_profit,
        &mut out.gross_loss,
        &mut out.avg_win,
        &mut out.avg_loss,
        &mut out.largest_win,
        &mut out.largest_loss,
        &mut out.avg_holding_period_days,
        &mut out.avg_mae,
        &mut out.avg_mfe,
        &mut out.total_commission,
        &mut out.total_slippage,
        &mut out.turnover,
    ] {
        *field = finite(*field);
    }
    out
}

/// Pretty-printed JSON for any serializable result tree.
pub fn to_json_pretty<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Full backtest result as JSON, metrics sanitized.
pub fn backtest_result_json(result: &BacktestResult) -> Result<String> {
    let mut sanitized = result.clone();
    sanitized.metrics = sanitize_metrics(&result.metrics);
    to_json_pretty(&sanitized)
}

/// Flat per-trade CSV rows.
pub fn trades_to_csv(trades: &[Trade]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "id",
        "symbol",
        "side",
        "entry_time",
        "entry_price",
        "exit_time",
        "exit_price",
        "quantity",
        "exit_reason",
        "gross_pnl",
        "commission",
        "slippage",
        "net_pnl",
        "return_pct",
        "mae",
        "mfe",
        "r_value",
        "hold_duration_days",
    ])?;
    for trade in trades {
        writer.write_record([
            trade.id.to_string(),
            trade.symbol.clone(),
            format!("{:?}", trade.side),
            trade.entry_time.to_rfc3339(),
            finite(trade.entry_price).to_string(),
            trade.exit_time.to_rfc3339(),
            finite(trade.exit_price).to_string(),
            finite(trade.quantity).to_string(),
            format!("{:?}", trade.exit_reason),
            finite(trade.gross_pnl).to_string(),
            finite(trade.commission).to_string(),
            finite(trade.slippage).to_string(),
            finite(trade.net_pnl).to_string(),
            finite(trade.return_pct).to_string(),
            finite(trade.mae).to_string(),
            finite(trade.mfe).to_string(),
            finite(trade.r_value).to_string(),
            finite(trade.hold_duration_days).to_string(),
        ])?;
    }
    writer_to_string(writer)
}

/// Flat per-equity-point CSV rows.
pub fn equity_to_csv(curve: &[EquityPoint]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "ts",
        "cash",
        "positions_value",
        "equity",
        "cumulative_return",
        "daily_return",
        "drawdown",
    ])?;
    for point in curve {
        writer.write_record([
            point.ts.to_rfc3339(),
            finite(point.cash).to_string(),
            finite(point.positions_value).to_string(),
            finite(point.equity).to_string(),
            finite(point.cumulative_return).to_string(),
            finite(point.daily_return).to_string(),
            finite(point.drawdown).to_string(),
        ])?;
    }
    writer_to_string(writer)
}

/// Flat per-trial CSV rows for an optimization run.
pub fn trials_to_csv(result: &OptimizationRunResult) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "rank",
        "params",
        "valid",
        "objective",
        "total_return",
        "sharpe",
        "max_drawdown",
        "num_trades",
        "error",
    ])?;
    for (rank, trial) in result.trials.iter().enumerate() {
        let metrics = trial.metrics.as_ref();
        writer.write_record([
            (rank + 1).to_string(),
            trial.id.clone(),
            trial.valid.to_string(),
            finite(trial.objective_value).to_string(),
            metrics.map(|m| finite(m.total_return)).unwrap_or(0.0).to_string(),
            metrics.map(|m| finite(m.sharpe)).unwrap_or(0.0).to_string(),
            metrics.map(|m| finite(m.max_drawdown)).unwrap_or(0.0).to_string(),
            metrics.map(|m| m.num_trades).unwrap_or(0).to_string(),
            trial.error.clone().unwrap_or_default(),
        ])?;
    }
    writer_to_string(writer)
}
