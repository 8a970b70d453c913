//! Parameter sensitivity: how strongly each parameter drives the
//! objective across the valid trials of a run, plus cost sensitivity of
//! a single parameter point across a commission ladder.

use super::{Direction, Objective, OptimizationRunResult, Optimizer, ParamSet, ParamValue};
use crate::error::Result;
use crate::fill::CommissionModel;
use crate::stats::{mean, pearson};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sensitivity report for one parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSensitivity {
    pub parameter: String,
    /// `|Pearson correlation|` between parameter value and objective;
    /// `None` for non-numeric parameters or fewer than two distinct
    /// values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<f64>,
    /// Value observed on the best-ranked valid trial.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_value: Option<ParamValue>,
    /// Mean objective per distinct value (all parameters, keyed by the
    /// value's canonical string form).
    pub value_means: BTreeMap<String, f64>,
}

/// Analyze every parameter appearing in the run's trials.
pub fn analyze_sensitivity(result: &OptimizationRunResult) -> Vec<ParameterSensitivity> {
    let valid: Vec<_> = result.trials.iter().filter(|t| t.valid).collect();
    if valid.is_empty() {
        return Vec::new();
    }

    let names: Vec<String> = valid[0].params.keys().cloned().collect();
    let best = result.best();

    names
        .into_iter()
        .map(|name| {
            let mut numeric_pairs: Vec<(f64, f64)> = Vec::new();
            let mut by_value: BTreeMap<String, Vec<f64>> = BTreeMap::new();
            for trial in &valid {
                if let Some(value) = trial.params.get(&name) {
                    by_value
                        .entry(value.to_string())
                        .or_default()
                        .push(trial.objective_value);
                    if let Some(v) = value.as_f64() {
                        numeric_pairs.push((v, trial.objective_value));
                    }
                }
            }

            let correlation = if numeric_pairs.len() == valid.len() && numeric_pairs.len() >= 2 {
                let xs: Vec<f64> = numeric_pairs.iter().map(|(x, _)| *x).collect();
                let ys: Vec<f64> = numeric_pairs.iter().map(|(_, y)| *y).collect();
                Some(pearson(&xs, &ys).abs())
            } else {
                None
            };

            let value_means = by_value
                .into_iter()
                .map(|(value, objectives)| (value, mean(&objectives)))
                .collect();

            ParameterSensitivity {
                best_value: best.and_then(|t| t.params.get(&name).cloned()),
                parameter: name,
                correlation,
                value_means,
            }
        })
        .collect()
}

/// Total return of one parameter point across a ladder of commission
/// levels, with the first break-even (non-positive return) level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostSensitivity {
    pub params: ParamSet,
    pub cost_levels_bps: Vec<f64>,
    pub returns_at_cost: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakeven_cost_bps: Option<f64>,
}

/// Re-run one parameter point with percentage commissions at each of the
/// given basis-point levels.
pub fn compute_cost_sensitivity(
    optimizer: &Optimizer<'_>,
    params: &ParamSet,
    cost_levels_bps: &[f64],
) -> Result<CostSensitivity> {
    let mut returns_at_cost = Vec::with_capacity(cost_levels_bps.len());
    let mut breakeven_cost_bps = None;

    for &bps in cost_levels_bps {
        let mut template = optimizer.template().clone();
        template.fill.commission = CommissionModel::Percentage { rate: bps / 10_000.0 };
        let costed = optimizer.reslice(optimizer.data(), &template);
        let trial = costed.evaluate(params.clone(), Objective::TotalReturn, Direction::Maximize);
        let total_return = if trial.valid { trial.objective_value } else { 0.0 };
        returns_at_cost.push(total_return);
        if breakeven_cost_bps.is_none() && total_return <= 0.0 {
            breakeven_cost_bps = Some(bps);
        }
    }

    Ok(CostSensitivity {
        params: params.clone(),
        cost_levels_bps: cost_levels_bps.to_vec(),
        returns_at_cost,
        breakeven_cost_bps,
    })
}

#[cfg(test)]
mod tests {
    use super::super::{
        Direction, Objective, OptimizationMethod, OptimizationRunResult, ParamSet, TrialResult,
    };
    use super::*;

    fn trial(buy: i64, label: &str, objective: f64) -> TrialResult {
        let mut params = ParamSet::new();
        params.insert("buy_bar".into(), ParamValue::Int(buy));
        params.insert("mode".into(), ParamValue::Text(label.into()));
        TrialResult {
            id: super::super::param_hash(&params),
            params,
            objective_value: objective,
            valid: true,
            metrics: None,
            error: None,
        }
    }

    fn run(trials: Vec<TrialResult>) -> OptimizationRunResult {
        let mut result = OptimizationRunResult {
            method: OptimizationMethod::Grid,
            objective: Objective::TotalReturn,
            direction: Direction::Maximize,
            evaluated: trials.len(),
            trials,
        };
        super::super::rank_trials(&mut result.trials, Direction::Maximize);
        result
    }

    #[test]
    fn numeric_parameter_gets_absolute_correlation() {
        // Objective decreases as buy_bar increases: perfect |correlation|.
        let result = run(vec![
            trial(0, "a", 0.30),
            trial(1, "a", 0.20),
            trial(2, "a", 0.10),
        ]);
        let report = analyze_sensitivity(&result);
        let buy = report.iter().find(|s| s.parameter == "buy_bar").unwrap();
        assert!((buy.correlation.unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(buy.best_value, Some(ParamValue::Int(0)));
    }

    #[test]
    fn discrete_parameter_reports_per_value_means() {
        let result = run(vec![
            trial(0, "fast", 0.30),
            trial(0, "fast", 0.20),
            trial(0, "slow", 0.10),
        ]);
        let report = analyze_sensitivity(&result);
        let mode = report.iter().find(|s| s.parameter == "mode").unwrap();
        assert!(mode.correlation.is_none());
        assert!((mode.value_means["fast"] - 0.25).abs() < 1e-12);
        assert!((mode.value_means["slow"] - 0.10).abs() < 1e-12);
    }

    #[test]
    fn empty_run_produces_empty_report() {
        let result = run(vec![]);
        assert!(analyze_sensitivity(&result).is_empty());
    }

    #[test]
    fn cost_ladder_finds_the_breakeven_level() {
        use super::super::test_support::scripted_builder;
        use crate::bar::test_support::{bars_from_closes, day};
        use crate::engine::BacktestConfig;

        // Gentle uptrend: the round trip earns 3.6% on traded notional,
        // so only the heaviest commission level pushes it below water.
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64 * 0.2).collect();
        let mut data = crate::engine::BarData::new();
        data.insert("T".into(), bars_from_closes("T", &closes));
        let template = BacktestConfig::new("cost", vec!["T".into()], day(0), day(20), 10_000.0);
        let optimizer = Optimizer::new(&data, &template, scripted_builder());

        let mut params = ParamSet::new();
        params.insert("buy_bar".into(), ParamValue::Int(0));
        params.insert("sell_bar".into(), ParamValue::Int(18));

        let ladder = [0.0, 10.0, 50.0, 200.0];
        let result = compute_cost_sensitivity(&optimizer, &params, &ladder).unwrap();

        assert_eq!(result.returns_at_cost.len(), 4);
        assert!(result.returns_at_cost[0] > 0.0);
        // Returns shrink monotonically as costs rise.
        for pair in result.returns_at_cost.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
        assert_eq!(result.breakeven_cost_bps, Some(200.0));
    }
}
