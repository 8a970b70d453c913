//! Value-at-Risk and expected shortfall (historical, parametric, and
//! Monte Carlo estimators).

use super::{ReturnsPanel, RiskError};
use crate::stats::{mean, std_dev};
use rand::distributions::Distribution;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

/// Which estimator produced a [`VarEstimate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarMethod {
    Historical,
    Parametric,
    MonteCarlo,
}

/// Tail-risk interpretation of the CVaR/VaR ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailRiskLevel {
    Normal,
    Moderate,
    High,
}

impl TailRiskLevel {
    fn from_ratio(ratio: f64) -> Self {
        if ratio > 1.5 {
            Self::High
        } else if ratio >= 1.2 {
            Self::Moderate
        } else {
            Self::Normal
        }
    }
}

/// A VaR / CVaR estimate in portfolio currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarEstimate {
    pub method: VarMethod,
    pub confidence: f64,
    pub horizon_days: u32,
    pub value_at_risk: f64,
    pub cvar: f64,
    /// CVaR / VaR; 0 when VaR is 0.
    pub tail_risk_ratio: f64,
    pub tail_risk: TailRiskLevel,
}

impl VarEstimate {
    fn build(
        method: VarMethod,
        confidence: f64,
        horizon_days: u32,
        var_1d: f64,
        cvar_1d: f64,
    ) -> Self {
        let scale = (horizon_days as f64).sqrt();
        let value_at_risk = var_1d * scale;
        let cvar = cvar_1d * scale;
        let tail_risk_ratio = if value_at_risk > 0.0 {
            cvar / value_at_risk
        } else {
            0.0
        };
        Self {
            method,
            confidence,
            horizon_days,
            value_at_risk,
            cvar,
            tail_risk_ratio,
            tail_risk: TailRiskLevel::from_ratio(tail_risk_ratio),
        }
    }
}

fn check_inputs(
    returns: &[f64],
    portfolio_value: f64,
    confidence: f64,
    horizon_days: u32,
) -> Result<(), RiskError> {
    if returns.is_empty() {
        return Err(RiskError::EmptyReturns);
    }
    if returns.iter().any(|r| !r.is_finite()) {
        return Err(RiskError::NonFinite("returns".into()));
    }
    if !(0.0..1.0).contains(&confidence) || confidence <= 0.5 {
        return Err(RiskError::InvalidParameter(format!(
            "confidence must be in (0.5, 1), got {confidence}"
        )));
    }
    if !portfolio_value.is_finite() || portfolio_value <= 0.0 {
        return Err(RiskError::InvalidParameter(format!(
            "portfolio value must be > 0, got {portfolio_value}"
        )));
    }
    if horizon_days == 0 {
        return Err(RiskError::InvalidParameter("horizon must be >= 1 day".into()));
    }
    Ok(())
}

/// Index of the VaR threshold in an ascending sort: the worst
/// `floor((1 − α) × N)` observations form the tail, and the threshold sits
/// at its upper edge.
fn tail_index(n: usize, confidence: f64) -> usize {
    let count = ((1.0 - confidence) * n as f64).floor() as usize;
    count.saturating_sub(1).min(n - 1)
}

/// Historical VaR: the empirical `(1 − α)` quantile of portfolio returns.
/// Multi-day horizons scale by `√T`.
pub fn historical_var(
    portfolio_returns: &[f64],
    portfolio_value: f64,
    confidence: f64,
    horizon_days: u32,
) -> Result<VarEstimate, RiskError> {
    check_inputs(portfolio_returns, portfolio_value, confidence, horizon_days)?;
    let mut sorted = portfolio_returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = tail_index(sorted.len(), confidence);
    let var_1d = (portfolio_value * sorted[idx]).abs();
    let tail = &sorted[..=idx];
    let cvar_1d = (portfolio_value * mean(tail)).abs();
    Ok(VarEstimate::build(
        VarMethod::Historical,
        confidence,
        horizon_days,
        var_1d,
        cvar_1d,
    ))
}

/// z-score for a confidence level. The conventional table values are used
/// for 95% and 99% so results match published figures exactly.
fn z_score(confidence: f64) -> Result<f64, RiskError> {
    if (confidence - 0.95).abs() < 1e-12 {
        return Ok(1.645);
    }
    if (confidence - 0.99).abs() < 1e-12 {
        return Ok(2.326);
    }
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| RiskError::InvalidParameter(format!("normal distribution: {e}")))?;
    Ok(normal.inverse_cdf(confidence))
}

/// Parametric (variance-covariance) VaR: `|V × (z_α σ − μ)|` with daily
/// moments, `√T` horizon scaling. CVaR uses the closed-form normal
/// expected shortfall `V × (σ φ(z) / (1 − α) − μ)`.
pub fn parametric_var(
    portfolio_returns: &[f64],
    portfolio_value: f64,
    confidence: f64,
    horizon_days: u32,
) -> Result<VarEstimate, RiskError> {
    check_inputs(portfolio_returns, portfolio_value, confidence, horizon_days)?;
    let mu = mean(portfolio_returns);
    let sigma = std_dev(portfolio_returns);
    let z = z_score(confidence)?;
    let var_1d = (portfolio_value * (z * sigma - mu)).abs();
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| RiskError::InvalidParameter(format!("normal distribution: {e}")))?;
    let es_factor = normal.pdf(z) / (1.0 - confidence);
    let cvar_1d = (portfolio_value * (sigma * es_factor - mu)).abs();
    Ok(VarEstimate::build(
        VarMethod::Parametric,
        confidence,
        horizon_days,
        var_1d,
        cvar_1d,
    ))
}

/// Monte Carlo VaR: per-asset Normal(μ_i, σ_i) draws aggregated with value
/// weights, then the empirical tail of the simulated distribution.
pub fn monte_carlo_var(
    panel: &ReturnsPanel,
    position_values: &[f64],
    confidence: f64,
    horizon_days: u32,
    iterations: usize,
    seed: u64,
) -> Result<VarEstimate, RiskError> {
    if iterations == 0 {
        return Err(RiskError::InvalidParameter("iterations must be > 0".into()));
    }
    let total_value: f64 = position_values.iter().sum();
    check_inputs(&[0.0], total_value, confidence, horizon_days)?;
    let weights = ReturnsPanel::weights_from_values(position_values)?;
    if weights.len() != panel.num_assets() {
        return Err(RiskError::Misaligned(format!(
            "{} position values for {} assets",
            weights.len(),
            panel.num_assets()
        )));
    }
    let portfolio_value = total_value;

    let distributions: Vec<Normal> = (0..panel.num_assets())
        .map(|i| {
            let series = panel.series_at(i);
            Normal::new(mean(series), std_dev(series).max(1e-12))
                .map_err(|e| RiskError::InvalidParameter(format!("normal distribution: {e}")))
        })
        .collect::<Result<_, _>>()?;

    let mut rng = SmallRng::seed_from_u64(seed);
    let mut simulated = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let mut r = 0.0;
        for (dist, w) in distributions.iter().zip(weights.iter()) {
            r += w * dist.sample(&mut rng);
        }
        simulated.push(r);
    }
    simulated.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let idx = tail_index(simulated.len(), confidence);
    let var_1d = (portfolio_value * simulated[idx]).abs();
    let cvar_1d = (portfolio_value * mean(&simulated[..=idx])).abs();
    Ok(VarEstimate::build(
        VarMethod::MonteCarlo,
        confidence,
        horizon_days,
        var_1d,
        cvar_1d,
    ))
}
