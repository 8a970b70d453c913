//! Named stress scenarios applied to portfolio positions.
//!
//! A scenario shocks each position by its sector's shock (falling back to
//! the market-wide shock), scales volatilities, and floors pairwise
//! correlations, then reports stressed risk figures and a survivability
//! flag.

use super::correlation::CorrelationMatrix;
use super::var::{TailRiskLevel, VarEstimate, VarMethod};
use super::{ReturnsPanel, RiskError};
use crate::metrics::TRADING_DAYS_PER_YEAR;
use crate::stats::{mean, std_dev};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, Normal};
use std::collections::BTreeMap;

/// A named market scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressScenario {
    pub name: String,
    /// Market-wide price shock (fractional, e.g. -0.40).
    pub market_shock: f64,
    /// Multiplier applied to every asset's volatility.
    pub volatility_multiplier: f64,
    /// Pairwise correlations are raised to at least this value.
    pub correlation_floor: f64,
    /// Sector-specific shocks overriding the market shock.
    pub sector_shocks: BTreeMap<String, f64>,
}

impl StressScenario {
    pub fn new(name: impl Into<String>, market_shock: f64, volatility_multiplier: f64, correlation_floor: f64) -> Self {
        Self {
            name: name.into(),
            market_shock,
            volatility_multiplier,
            correlation_floor,
            sector_shocks: BTreeMap::new(),
        }
    }

    pub fn with_sector_shock(mut self, sector: impl Into<String>, shock: f64) -> Self {
        self.sector_shocks.insert(sector.into(), shock);
        self
    }

    /// Shock applied to a position: the sector's shock when mapped,
    /// else the market shock.
    pub fn shock_for(&self, sector: Option<&str>) -> f64 {
        sector
            .and_then(|s| self.sector_shocks.get(s).copied())
            .unwrap_or(self.market_shock)
    }
}

/// The built-in scenario library.
pub fn predefined_scenarios() -> Vec<StressScenario> {
    vec![
        StressScenario::new("2008 Crisis", -0.40, 3.0, 0.80)
            .with_sector_shock("financials", -0.55)
            .with_sector_shock("real_estate", -0.45),
        StressScenario::new("2020 COVID", -0.34, 2.5, 0.70)
            .with_sector_shock("travel", -0.55)
            .with_sector_shock("energy", -0.50)
            .with_sector_shock("technology", -0.25),
        StressScenario::new("2022 Rate Hike", -0.25, 1.8, 0.60)
            .with_sector_shock("technology", -0.33)
            .with_sector_shock("utilities", -0.12),
        StressScenario::new("Flash Crash", -0.09, 4.0, 0.90),
        StressScenario::new("Sector Rotation", 0.0, 1.2, 0.30)
            .with_sector_shock("technology", -0.15)
            .with_sector_shock("energy", 0.12)
            .with_sector_shock("financials", 0.08),
        StressScenario::new("Moderate Correction", -0.10, 1.5, 0.50),
    ]
}

/// A position as seen by the stress tester and pre-trade validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionExposure {
    pub symbol: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
}

impl PositionExposure {
    pub fn new(symbol: impl Into<String>, value: f64) -> Self {
        Self {
            symbol: symbol.into(),
            value,
            sector: None,
        }
    }

    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = Some(sector.into());
        self
    }
}

/// Per-position outcome of a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionImpact {
    pub symbol: String,
    pub value_before: f64,
    pub shock: f64,
    pub value_after: f64,
    pub pnl: f64,
}

/// Full stress-test result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressResult {
    pub scenario: String,
    pub portfolio_value: f64,
    pub stressed_value: f64,
    /// Positive for losses.
    pub loss: f64,
    pub loss_pct: f64,
    pub position_impacts: Vec<PositionImpact>,
    /// Loss under 50% of portfolio value.
    pub survivable: bool,
    /// Present when a returns panel covering every position was supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stressed_var: Option<VarEstimate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stressed_sharpe: Option<f64>,
}

/// Apply a scenario to the given positions. When `panel` covers every
/// position symbol, stressed VaR/CVaR and a stressed Sharpe are included.
pub fn run_stress_test(
    positions: &[PositionExposure],
    scenario: &StressScenario,
    panel: Option<&ReturnsPanel>,
) -> Result<StressResult, RiskError> {
    if positions.is_empty() {
        return Err(RiskError::InvalidParameter("no positions to stress".into()));
    }
    let portfolio_value: f64 = positions.iter().map(|p| p.value).sum();
    if portfolio_value <= 0.0 {
        return Err(RiskError::InvalidParameter(
            "portfolio value must be > 0".into(),
        ));
    }

    let position_impacts: Vec<PositionImpact> = positions
        .iter()
        .map(|p| {
            let shock = scenario.shock_for(p.sector.as_deref());
            let value_after = p.value * (1.0 + shock);
            PositionImpact {
                symbol: p.symbol.clone(),
                value_before: p.value,
                shock,
                value_after,
                pnl: value_after - p.value,
            }
        })
        .collect();

    let stressed_value: f64 = position_impacts.iter().map(|i| i.value_after).sum();
    let loss = portfolio_value - stressed_value;
    let loss_pct = loss / portfolio_value;

    let analytics = panel
        .filter(|panel| {
            positions
                .iter()
                .all(|p| panel.series(&p.symbol).is_some())
        })
        .map(|panel| stressed_analytics(positions, scenario, panel, stressed_value))
        .transpose()?;
    let (stressed_var, stressed_sharpe) = match analytics {
        Some((var, sharpe)) => (Some(var), Some(sharpe)),
        None => (None, None),
    };

    Ok(StressResult {
        scenario: scenario.name.clone(),
        portfolio_value,
        stressed_value,
        loss,
        loss_pct,
        position_impacts,
        survivable: loss_pct < 0.50,
        stressed_var,
        stressed_sharpe,
    })
}

/// Stressed parametric VaR/CVaR and Sharpe: per-asset vols scaled by the
/// multiplier, correlations floored, the market shock amortized into the
/// daily drift.
fn stressed_analytics(
    positions: &[PositionExposure],
    scenario: &StressScenario,
    panel: &ReturnsPanel,
    stressed_value: f64,
) -> Result<(VarEstimate, f64), RiskError> {
    let values: Vec<f64> = positions.iter().map(|p| p.value).collect();
    let weights = ReturnsPanel::weights_from_values(&values)?;
    let series: Vec<&[f64]> = positions
        .iter()
        .map(|p| {
            panel
                .series(&p.symbol)
                .ok_or_else(|| RiskError::Misaligned(format!("panel missing {}", p.symbol)))
        })
        .collect::<Result<_, _>>()?;

    let correlations = CorrelationMatrix::compute(panel, None)?;
    let n = positions.len();
    let mut variance = 0.0;
    for i in 0..n {
        for j in 0..n {
            let rho = if i == j {
                1.0
            } else {
                correlations
                    .get(&positions[i].symbol, &positions[j].symbol)
                    .unwrap_or(0.0)
                    .max(scenario.correlation_floor)
            };
            let vol_i = std_dev(series[i]) * scenario.volatility_multiplier;
            let vol_j = std_dev(series[j]) * scenario.volatility_multiplier;
            variance += weights[i] * weights[j] * vol_i * vol_j * rho;
        }
    }
    let stressed_vol = variance.max(0.0).sqrt();

    let base_mean: f64 = series
        .iter()
        .zip(weights.iter())
        .map(|(s, w)| w * mean(s))
        .sum();
    let stressed_mean = base_mean + scenario.market_shock / TRADING_DAYS_PER_YEAR;

    let confidence = 0.95;
    let z = 1.645;
    let var_1d = (stressed_value * (z * stressed_vol - stressed_mean)).abs();
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| RiskError::InvalidParameter(format!("normal distribution: {e}")))?;
    let cvar_1d =
        (stressed_value * (stressed_vol * normal.pdf(z) / (1.0 - confidence) - stressed_mean))
            .abs();
    let tail_risk_ratio = if var_1d > 0.0 { cvar_1d / var_1d } else { 0.0 };
    let var = VarEstimate {
        method: VarMethod::Parametric,
        confidence,
        horizon_days: 1,
        value_at_risk: var_1d,
        cvar: cvar_1d,
        tail_risk_ratio,
        tail_risk: if tail_risk_ratio > 1.5 {
            TailRiskLevel::High
        } else if tail_risk_ratio >= 1.2 {
            TailRiskLevel::Moderate
        } else {
            TailRiskLevel::Normal
        },
    };

    let sharpe = if stressed_vol > 0.0 {
        stressed_mean * TRADING_DAYS_PER_YEAR / (stressed_vol * TRADING_DAYS_PER_YEAR.sqrt())
    } else {
        0.0
    };
    Ok((var, sharpe))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions() -> Vec<PositionExposure> {
        vec![
            PositionExposure::new("BANK", 40_000.0).with_sector("financials"),
            PositionExposure::new("TECH", 30_000.0).with_sector("technology"),
            PositionExposure::new("MISC", 30_000.0),
        ]
    }

    #[test]
    fn library_contains_the_six_named_scenarios() {
        let names: Vec<String> = predefined_scenarios().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "2008 Crisis",
                "2020 COVID",
                "2022 Rate Hike",
                "Flash Crash",
                "Sector Rotation",
                "Moderate Correction"
            ]
        );
    }

    #[test]
    fn sector_shock_overrides_market_shock() {
        let scenario = predefined_scenarios().remove(0); // 2008 Crisis
        let result = run_stress_test(&positions(), &scenario, None).unwrap();
        let bank = &result.position_impacts[0];
        assert!((bank.shock + 0.55).abs() < 1e-12);
        let misc = &result.position_impacts[2];
        assert!((misc.shock + 0.40).abs() < 1e-12); // falls back to market
        assert!(result.loss > 0.0);
    }

    #[test]
    fn survivability_flag_uses_half_portfolio_threshold() {
        let mild = StressScenario::new("Mild", -0.10, 1.2, 0.3);
        let severe = StressScenario::new("Wipeout", -0.60, 3.0, 0.9);
        assert!(run_stress_test(&positions(), &mild, None).unwrap().survivable);
        assert!(!run_stress_test(&positions(), &severe, None).unwrap().survivable);
    }

    #[test]
    fn sector_rotation_leaves_unmapped_positions_untouched() {
        let rotation = predefined_scenarios().remove(4);
        assert_eq!(rotation.name, "Sector Rotation");
        let result = run_stress_test(&positions(), &rotation, None).unwrap();
        assert_eq!(result.position_impacts[2].shock, 0.0);
        // Tech down, nothing else moves the MISC leg.
        assert!(result.position_impacts[1].pnl < 0.0);
    }

    #[test]
    fn panel_coverage_enables_stressed_analytics() {
        let panel = ReturnsPanel::new(
            vec!["BANK".into(), "TECH".into(), "MISC".into()],
            vec![
                (0..100).map(|i| ((i * 3) % 7) as f64 / 500.0 - 0.006).collect(),
                (0..100).map(|i| ((i * 5) % 11) as f64 / 600.0 - 0.008).collect(),
                (0..100).map(|i| ((i * 7) % 5) as f64 / 400.0 - 0.005).collect(),
            ],
        )
        .unwrap();
        let scenario = predefined_scenarios().remove(5); // Moderate Correction
        let result = run_stress_test(&positions(), &scenario, Some(&panel)).unwrap();
        let var = result.stressed_var.unwrap();
        assert!(var.value_at_risk > 0.0);
        assert!(var.cvar >= var.value_at_risk);
        assert!(result.stressed_sharpe.is_some());

        // Panel missing a symbol: analytics silently omitted.
        let partial = ReturnsPanel::new(
            vec!["BANK".into()],
            vec![(0..100).map(|i| (i % 3) as f64 / 100.0 - 0.01).collect()],
        )
        .unwrap();
        let result = run_stress_test(&positions(), &scenario, Some(&partial)).unwrap();
        assert!(result.stressed_var.is_none());
    }
}
