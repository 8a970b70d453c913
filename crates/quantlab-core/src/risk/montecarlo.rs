//! Monte Carlo portfolio projection with optional correlated sampling.
//!
//! Draws are per-asset Normal(μ_i, σ_i); when `correlated` is set the
//! draws are coupled through a Cholesky factor of the sample covariance
//! matrix, so simulated co-movements match the historical panel.

use super::{ReturnsPanel, RiskError};
use crate::stats::{covariance, mean, percentile, std_dev};
use ndarray::Array2;
use rand::distributions::Distribution;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;

/// Monte Carlo projection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    pub iterations: usize,
    pub horizon_days: usize,
    pub seed: u64,
    /// Couple draws through the Cholesky factor of the covariance matrix.
    pub correlated: bool,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            iterations: 10_000,
            horizon_days: 21,
            seed: 42,
            correlated: false,
        }
    }
}

/// Distribution of simulated terminal portfolio values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloProjection {
    pub initial_value: f64,
    pub horizon_days: usize,
    pub iterations: usize,
    pub correlated: bool,
    pub expected_value: f64,
    pub median_value: f64,
    pub percentile_5: f64,
    pub percentile_95: f64,
    pub prob_profit: f64,
    pub prob_loss_over_10pct: f64,
    pub prob_loss_over_20pct: f64,
    /// Deepest per-path drawdown observed across all simulated paths.
    pub worst_drawdown: f64,
}

/// Lower-triangular Cholesky factor of a symmetric positive-definite
/// matrix. Fails with [`RiskError::NotPositiveDefinite`] otherwise.
pub fn cholesky(matrix: &Array2<f64>) -> Result<Array2<f64>, RiskError> {
    let n = matrix.nrows();
    if matrix.ncols() != n {
        return Err(RiskError::InvalidParameter("matrix must be square".into()));
    }
    let mut lower = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = matrix[[i, j]];
            for k in 0..j {
                sum -= lower[[i, k]] * lower[[j, k]];
            }
            if i == j {
                if sum <= 0.0 {
                    return Err(RiskError::NotPositiveDefinite);
                }
                lower[[i, j]] = sum.sqrt();
            } else {
                lower[[i, j]] = sum / lower[[j, j]];
            }
        }
    }
    Ok(lower)
}

/// Sample covariance matrix of the panel (population convention).
fn covariance_matrix(panel: &ReturnsPanel) -> Array2<f64> {
    let n = panel.num_assets();
    let mut cov = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in i..n {
            let c = covariance(panel.series_at(i), panel.series_at(j));
            cov[[i, j]] = c;
            cov[[j, i]] = c;
        }
    }
    cov
}

/// Project the portfolio value distribution over the configured horizon.
pub fn project_portfolio(
    panel: &ReturnsPanel,
    position_values: &[f64],
    config: &MonteCarloConfig,
) -> Result<MonteCarloProjection, RiskError> {
    if config.iterations == 0 || config.horizon_days == 0 {
        return Err(RiskError::InvalidParameter(
            "iterations and horizon must be > 0".into(),
        ));
    }
    let weights = ReturnsPanel::weights_from_values(position_values)?;
    if weights.len() != panel.num_assets() {
        return Err(RiskError::Misaligned(format!(
            "{} position values for {} assets",
            weights.len(),
            panel.num_assets()
        )));
    }
    let initial_value: f64 = position_values.iter().sum();
    let n = panel.num_assets();

    let means: Vec<f64> = (0..n).map(|i| mean(panel.series_at(i))).collect();
    let standard = Normal::new(0.0, 1.0)
        .map_err(|e| RiskError::InvalidParameter(format!("normal distribution: {e}")))?;

    // Either a Cholesky factor (correlated) or a diagonal of vols.
    let factor = if config.correlated {
        cholesky(&covariance_matrix(panel))?
    } else {
        let mut diag = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            diag[[i, i]] = std_dev(panel.series_at(i));
        }
        diag
    };

    let mut rng = SmallRng::seed_from_u64(config.seed);
    let mut terminal = Vec::with_capacity(config.iterations);
    let mut worst_drawdown = 0.0_f64;
    let mut z = vec![0.0; n];
    for _ in 0..config.iterations {
        let mut value = initial_value;
        let mut peak = initial_value;
        let mut path_dd = 0.0_f64;
        for _ in 0..config.horizon_days {
            for slot in z.iter_mut() {
                *slot = standard.sample(&mut rng);
            }
            let mut portfolio_return = 0.0;
            for i in 0..n {
                let mut r = means[i];
                for k in 0..=i {
                    r += factor[[i, k]] * z[k];
                }
                portfolio_return += weights[i] * r;
            }
            value *= 1.0 + portfolio_return;
            peak = peak.max(value);
            if peak > 0.0 {
                path_dd = path_dd.max((peak - value) / peak);
            }
        }
        worst_drawdown = worst_drawdown.max(path_dd);
        terminal.push(value);
    }

    let count_where = |pred: &dyn Fn(f64) -> bool| {
        terminal.iter().filter(|v| pred(**v)).count() as f64 / terminal.len() as f64
    };
    Ok(MonteCarloProjection {
        initial_value,
        horizon_days: config.horizon_days,
        iterations: config.iterations,
        correlated: config.correlated,
        expected_value: mean(&terminal),
        median_value: percentile(&terminal, 0.5),
        percentile_5: percentile(&terminal, 0.05),
        percentile_95: percentile(&terminal, 0.95),
        prob_profit: count_where(&|v| v > initial_value),
        prob_loss_over_10pct: count_where(&|v| v < initial_value * 0.90),
        prob_loss_over_20pct: count_where(&|v| v < initial_value * 0.80),
        worst_drawdown,
    })
}
