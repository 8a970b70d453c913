//! Portfolio risk analytics: VaR / expected shortfall, correlation,
//! Kelly sizing, Monte Carlo projection, stress tests, and the pre-trade
//! validator.

mod correlation;
mod kelly;
mod montecarlo;
mod stress;
mod validator;
mod var;

pub use correlation::{diversification_ratio, CorrelationMatrix};
pub use kelly::{kelly_criterion, kelly_from_trades, KellyRecommendation, KellySizing};
pub use montecarlo::{cholesky, project_portfolio, MonteCarloConfig, MonteCarloProjection};
pub use stress::{
    predefined_scenarios, run_stress_test, PositionExposure, PositionImpact, StressResult,
    StressScenario,
};
pub use validator::{
    validate_trade, HeldPosition, PortfolioSnapshot, ProposedTrade, RiskCheck, RiskImpact,
    RiskLimits, TradeDecision, ValidationReport,
};
pub use var::{
    historical_var, monte_carlo_var, parametric_var, TailRiskLevel, VarEstimate, VarMethod,
};

use crate::error::QuantError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the risk layer.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("empty return series")]
    EmptyReturns,

    #[error("return series are not aligned: {0}")]
    Misaligned(String),

    #[error("non-finite input: {0}")]
    NonFinite(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("matrix is not positive definite")]
    NotPositiveDefinite,
}

impl From<RiskError> for QuantError {
    fn from(e: RiskError) -> Self {
        QuantError::Risk(e.to_string())
    }
}

/// Aligned per-symbol daily return series: `returns[i][t]` is the return
/// of `symbols[i]` on day `t`. Every series has the same length and only
/// finite entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnsPanel {
    symbols: Vec<String>,
    returns: Vec<Vec<f64>>,
}

impl ReturnsPanel {
    pub fn new(symbols: Vec<String>, returns: Vec<Vec<f64>>) -> Result<Self, RiskError> {
        if symbols.len() != returns.len() {
            return Err(RiskError::Misaligned(format!(
                "{} symbols but {} series",
                symbols.len(),
                returns.len()
            )));
        }
        if returns.is_empty() || returns.iter().any(|r| r.is_empty()) {
            return Err(RiskError::EmptyReturns);
        }
        let len = returns[0].len();
        for (symbol, series) in symbols.iter().zip(returns.iter()) {
            if series.len() != len {
                return Err(RiskError::Misaligned(format!(
                    "{symbol} has {} observations, expected {len}",
                    series.len()
                )));
            }
            if series.iter().any(|r| !r.is_finite()) {
                return Err(RiskError::NonFinite(format!("returns of {symbol}")));
            }
        }
        Ok(Self { symbols, returns })
    }

    /// Build from per-symbol close price series (same alignment rules).
    pub fn from_closes(symbols: Vec<String>, closes: Vec<Vec<f64>>) -> Result<Self, RiskError> {
        let returns = closes
            .iter()
            .map(|series| {
                series
                    .windows(2)
                    .map(|w| if w[0] != 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
                    .collect()
            })
            .collect();
        Self::new(symbols, returns)
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn num_assets(&self) -> usize {
        self.symbols.len()
    }

    pub fn num_observations(&self) -> usize {
        self.returns[0].len()
    }

    pub fn series(&self, symbol: &str) -> Option<&[f64]> {
        self.symbols
            .iter()
            .position(|s| s == symbol)
            .map(|i| self.returns[i].as_slice())
    }

    pub fn series_at(&self, index: usize) -> &[f64] {
        &self.returns[index]
    }

    /// Value weights normalized to sum to 1. Errors when total is 0.
    pub fn weights_from_values(values: &[f64]) -> Result<Vec<f64>, RiskError> {
        let total: f64 = values.iter().sum();
        if total == 0.0 || !total.is_finite() {
            return Err(RiskError::InvalidParameter(
                "position values sum to zero".into(),
            ));
        }
        Ok(values.iter().map(|v| v / total).collect())
    }

    /// Value-weighted portfolio return series `r_t = Σ_i w_i r_{i,t}`.
    pub fn portfolio_returns(&self, weights: &[f64]) -> Result<Vec<f64>, RiskError> {
        if weights.len() != self.num_assets() {
            return Err(RiskError::Misaligned(format!(
                "{} weights for {} assets",
                weights.len(),
                self.num_assets()
            )));
        }
        let n = self.num_observations();
        let mut out = vec![0.0; n];
        for (series, &w) in self.returns.iter().zip(weights.iter()) {
            for (t, r) in series.iter().enumerate() {
                out[t] += w * r;
            }
        }
        Ok(out)
    }
}
