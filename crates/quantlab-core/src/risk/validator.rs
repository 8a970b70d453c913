//! Pre-trade risk validation.
//!
//! Checks run in a fixed order: position size ($), position % of equity,
//! total portfolio risk, position count, sector concentration, correlation
//! cluster, liquidity, per-trade risk. Size-type violations downgrade to
//! `ReduceSize` with a suggested quantity; structural violations reject.

use super::correlation::CorrelationMatrix;
use serde::{Deserialize, Serialize};

/// Portfolio-wide risk limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum position value in dollars.
    pub max_position_value: f64,
    /// Maximum position value as a fraction of equity.
    pub max_position_pct: f64,
    /// Maximum total open risk (distance to stops) as a fraction of
    /// equity.
    pub max_portfolio_risk_pct: f64,
    pub max_positions: usize,
    /// Maximum exposure to one sector as a fraction of equity.
    pub max_sector_pct: f64,
    /// |ρ| above which two symbols count as correlated.
    pub correlation_threshold: f64,
    /// Maximum number of held symbols correlated with the candidate.
    pub max_correlated_positions: usize,
    /// Maximum order size as a fraction of average daily volume.
    pub max_adv_pct: f64,
    /// Maximum single-trade risk as a fraction of equity.
    pub max_trade_risk_pct: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_value: 50_000.0,
            max_position_pct: 0.20,
            max_portfolio_risk_pct: 0.10,
            max_positions: 10,
            max_sector_pct: 0.40,
            correlation_threshold: 0.7,
            max_correlated_positions: 3,
            max_adv_pct: 0.05,
            max_trade_risk_pct: 0.02,
        }
    }
}

/// A currently held position, as the validator sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeldPosition {
    pub symbol: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    /// Dollar loss if the position's stop is hit.
    pub risk: f64,
}

/// Current portfolio snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PortfolioSnapshot {
    pub equity: f64,
    pub positions: Vec<HeldPosition>,
}

/// The trade to validate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedTrade {
    pub symbol: String,
    pub quantity: f64,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_daily_volume: Option<f64>,
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCheck {
    pub name: String,
    pub passed: bool,
    pub observed: f64,
    pub limit: f64,
    pub message: String,
    /// A failing blocking check rejects outright; a failing non-blocking
    /// check can be cured by reducing size.
    pub blocking: bool,
}

/// Risk impact of the trade if executed as proposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RiskImpact {
    pub trade_value: f64,
    pub position_pct: f64,
    pub portfolio_risk_pct_after: f64,
    pub position_count_after: usize,
    pub sector_pct_after: f64,
    pub correlated_positions: usize,
    pub adv_pct: f64,
    pub trade_risk_pct: f64,
}

/// Final decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeDecision {
    Approve,
    ReduceSize,
    Reject,
}

/// Full validation report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub decision: TradeDecision,
    pub blockers: Vec<String>,
    pub warnings: Vec<String>,
    pub checks: Vec<RiskCheck>,
    pub impact: RiskImpact,
    /// Largest quantity passing all size-type checks; set when the
    /// decision is `ReduceSize`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_quantity: Option<f64>,
}

/// Validate a proposed trade against the portfolio and limits.
pub fn validate_trade(
    trade: &ProposedTrade,
    portfolio: &PortfolioSnapshot,
    limits: &RiskLimits,
    correlations: Option<&CorrelationMatrix>,
) -> ValidationReport {
    let mut checks = Vec::with_capacity(8);
    let mut warnings = Vec::new();
    let mut size_caps: Vec<f64> = Vec::new();

    let equity = portfolio.equity.max(0.0);
    let trade_value = trade.quantity * trade.price;
    let per_share_risk = trade
        .stop_loss
        .map(|stop| (trade.price - stop).abs())
        .filter(|r| *r > 0.0);
    let trade_risk = per_share_risk.map(|r| r * trade.quantity);

    // 1. Position size in dollars.
    push_check(
        &mut checks,
        "position_value",
        trade_value,
        limits.max_position_value,
        false,
        format!(
            "position value ${trade_value:.0} vs limit ${:.0}",
            limits.max_position_value
        ),
    );
    if trade.price > 0.0 {
        size_caps.push(limits.max_position_value / trade.price);
    }

    // 2. Position as a share of equity.
    let position_pct = if equity > 0.0 { trade_value / equity } else { f64::INFINITY };
    push_check(
        &mut checks,
        "position_pct",
        position_pct,
        limits.max_position_pct,
        false,
        format!(
            "position {:.1}% of equity vs limit {:.1}%",
            position_pct * 100.0,
            limits.max_position_pct * 100.0
        ),
    );
    if trade.price > 0.0 {
        size_caps.push(equity * limits.max_position_pct / trade.price);
    }

    // 3. Total portfolio risk including this trade.
    let open_risk: f64 = portfolio.positions.iter().map(|p| p.risk).sum();
    let risk_after = open_risk + trade_risk.unwrap_or(0.0);
    let portfolio_risk_pct = if equity > 0.0 { risk_after / equity } else { f64::INFINITY };
    push_check(
        &mut checks,
        "portfolio_risk",
        portfolio_risk_pct,
        limits.max_portfolio_risk_pct,
        false,
        format!(
            "total open risk {:.1}% of equity vs limit {:.1}%",
            portfolio_risk_pct * 100.0,
            limits.max_portfolio_risk_pct * 100.0
        ),
    );
    if let Some(per_share) = per_share_risk {
        let budget = equity * limits.max_portfolio_risk_pct - open_risk;
        size_caps.push((budget / per_share).max(0.0));
    }

    // 4. Position count.
    let already_held = portfolio.positions.iter().any(|p| p.symbol == trade.symbol);
    let count_after = portfolio.positions.len() + usize::from(!already_held);
    push_check(
        &mut checks,
        "position_count",
        count_after as f64,
        limits.max_positions as f64,
        true,
        format!(
            "{count_after} open positions vs limit {}",
            limits.max_positions
        ),
    );

    // 5. Sector concentration.
    let sector_pct = match &trade.sector {
        Some(sector) => {
            let sector_value: f64 = portfolio
                .positions
                .iter()
                .filter(|p| p.sector.as_deref() == Some(sector.as_str()))
                .map(|p| p.value)
                .sum();
            if equity > 0.0 {
                (sector_value + trade_value) / equity
            } else {
                f64::INFINITY
            }
        }
        None => {
            warnings.push(format!("{}: no sector mapping", trade.symbol));
            0.0
        }
    };
    push_check(
        &mut checks,
        "sector_concentration",
        sector_pct,
        limits.max_sector_pct,
        true,
        format!(
            "sector exposure {:.1}% of equity vs limit {:.1}%",
            sector_pct * 100.0,
            limits.max_sector_pct * 100.0
        ),
    );

    // 6. Correlation cluster.
    let correlated = correlations
        .map(|m| {
            portfolio
                .positions
                .iter()
                .filter(|p| {
                    m.get(&trade.symbol, &p.symbol)
                        .map(|rho| rho.abs() > limits.correlation_threshold)
                        .unwrap_or(false)
                })
                .count()
        })
        .unwrap_or(0);
    if correlations.is_none() {
        warnings.push("no correlation matrix supplied".into());
    }
    push_check(
        &mut checks,
        "correlation_cluster",
        correlated as f64,
        limits.max_correlated_positions as f64,
        true,
        format!(
            "{correlated} correlated holdings vs limit {}",
            limits.max_correlated_positions
        ),
    );

    // 7. Liquidity against average daily volume.
    let adv_pct = match trade.avg_daily_volume {
        Some(adv) if adv > 0.0 => {
            size_caps.push(adv * limits.max_adv_pct);
            trade.quantity / adv
        }
        _ => {
            warnings.push(format!("{}: no liquidity data", trade.symbol));
            0.0
        }
    };
    push_check(
        &mut checks,
        "liquidity",
        adv_pct,
        limits.max_adv_pct,
        false,
        format!(
            "order is {:.2}% of ADV vs limit {:.2}%",
            adv_pct * 100.0,
            limits.max_adv_pct * 100.0
        ),
    );

    // 8. Per-trade risk.
    let trade_risk_pct = match trade_risk {
        Some(risk) if equity > 0.0 => risk / equity,
        Some(_) => f64::INFINITY,
        None => {
            warnings.push(format!("{}: no stop-loss, trade risk unknown", trade.symbol));
            0.0
        }
    };
    push_check(
        &mut checks,
        "trade_risk",
        trade_risk_pct,
        limits.max_trade_risk_pct,
        false,
        format!(
            "trade risks {:.2}% of equity vs limit {:.2}%",
            trade_risk_pct * 100.0,
            limits.max_trade_risk_pct * 100.0
        ),
    );
    if let Some(per_share) = per_share_risk {
        size_caps.push(equity * limits.max_trade_risk_pct / per_share);
    }

    let blockers: Vec<String> = checks
        .iter()
        .filter(|c| !c.passed)
        .map(|c| c.message.clone())
        .collect();
    let any_blocking = checks.iter().any(|c| !c.passed && c.blocking);
    let any_sizable = checks.iter().any(|c| !c.passed && !c.blocking);

    let suggested_quantity = if !any_blocking && any_sizable {
        let cap = size_caps
            .iter()
            .fold(f64::INFINITY, |acc, &c| acc.min(c))
            .floor();
        (cap > 0.0 && cap < trade.quantity).then_some(cap)
    } else {
        None
    };

    let decision = if any_blocking {
        TradeDecision::Reject
    } else if any_sizable {
        if suggested_quantity.is_some() {
            TradeDecision::ReduceSize
        } else {
            TradeDecision::Reject
        }
    } else {
        TradeDecision::Approve
    };

    ValidationReport {
        decision,
        blockers,
        warnings,
        impact: RiskImpact {
            trade_value,
            position_pct,
            portfolio_risk_pct_after: portfolio_risk_pct,
            position_count_after: count_after,
            sector_pct_after: sector_pct,
            correlated_positions: correlated,
            adv_pct,
            trade_risk_pct,
        },
        checks,
        suggested_quantity,
    }
}

fn push_check(
    checks: &mut Vec<RiskCheck>,
    name: &str,
    observed: f64,
    limit: f64,
    blocking: bool,
    message: String,
) {
    checks.push(RiskCheck {
        name: name.to_string(),
        passed: observed <= limit,
        observed,
        limit,
        message,
        blocking,
    });
}
