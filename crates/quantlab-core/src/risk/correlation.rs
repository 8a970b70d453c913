//! Pearson correlation matrix and diversification metrics.

use super::{ReturnsPanel, RiskError};
use crate::stats::{pearson, std_dev};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Symmetric Pearson correlation matrix with unit diagonal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    symbols: Vec<String>,
    matrix: Array2<f64>,
}

impl CorrelationMatrix {
    /// Compute over the trailing `lookback` observations (all when `None`
    /// or when the panel is shorter).
    pub fn compute(panel: &ReturnsPanel, lookback: Option<usize>) -> Result<Self, RiskError> {
        let n = panel.num_assets();
        let observations = panel.num_observations();
        let window = lookback.unwrap_or(observations).min(observations);
        if window < 2 {
            return Err(RiskError::InvalidParameter(
                "correlation needs at least 2 observations".into(),
            ));
        }
        let start = observations - window;
        let mut matrix = Array2::<f64>::eye(n);
        for i in 0..n {
            for j in (i + 1)..n {
                let rho = pearson(&panel.series_at(i)[start..], &panel.series_at(j)[start..]);
                matrix[[i, j]] = rho;
                matrix[[j, i]] = rho;
            }
        }
        Ok(Self {
            symbols: panel.symbols().to_vec(),
            matrix,
        })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.symbols.iter().position(|s| s == a)?;
        let j = self.symbols.iter().position(|s| s == b)?;
        Some(self.matrix[[i, j]])
    }

    /// Pairs with `|ρ| > threshold`, upper triangle only, sorted by
    /// descending magnitude.
    pub fn highly_correlated_pairs(&self, threshold: f64) -> Vec<(String, String, f64)> {
        let n = self.symbols.len();
        let mut pairs = Vec::new();
        for i in 0..n {
            for j in (i + 1)..n {
                let rho = self.matrix[[i, j]];
                if rho.abs() > threshold {
                    pairs.push((self.symbols[i].clone(), self.symbols[j].clone(), rho));
                }
            }
        }
        pairs.sort_by(|a, b| {
            b.2.abs()
                .partial_cmp(&a.2.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        pairs
    }

    /// For one symbol, how many others exceed the correlation threshold.
    pub fn correlated_count(&self, symbol: &str, threshold: f64) -> usize {
        let Some(i) = self.symbols.iter().position(|s| s == symbol) else {
            return 0;
        };
        (0..self.symbols.len())
            .filter(|&j| j != i && self.matrix[[i, j]].abs() > threshold)
            .count()
    }
}

/// Diversification ratio `(Σ w_i σ_i) / σ_portfolio`. A value of 1 means
/// no diversification benefit; higher is better.
pub fn diversification_ratio(
    panel: &ReturnsPanel,
    weights: &[f64],
) -> Result<f64, RiskError> {
    if weights.len() != panel.num_assets() {
        return Err(RiskError::Misaligned(format!(
            "{} weights for {} assets",
            weights.len(),
            panel.num_assets()
        )));
    }
    let weighted_vol: f64 = weights
        .iter()
        .enumerate()
        .map(|(i, w)| w * std_dev(panel.series_at(i)))
        .sum();
    let portfolio_vol = std_dev(&panel.portfolio_returns(weights)?);
    if portfolio_vol == 0.0 {
        return Ok(0.0);
    }
    Ok(weighted_vol / portfolio_vol)
}
