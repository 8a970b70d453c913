//! Optimization scenarios: grid ranking, random-search reproducibility,
//! sensitivity, and walk-forward analysis.

mod common;

use common::*;
use quantlab_core::bar::Bar;
use quantlab_core::engine::BarData;
use quantlab_core::error::{QuantError, Result};
use quantlab_core::fill::Fill;
use quantlab_core::optimize::{
    analyze_sensitivity, grid_search, random_search, run_walk_forward, Direction, Objective,
    OptimizationConfig, Optimizer, ParamSet, ParamValue, ParameterRange, ParameterSpace,
    StrategyBuilder, WalkForwardConfig,
};
use quantlab_core::strategy::{Signal, SignalAction, Strategy};
use std::sync::Arc;

/// Buys when the close reaches `buy_level`, sells when it reaches
/// `sell_level`. One round trip.
struct ThresholdStrategy {
    buy_level: f64,
    sell_level: f64,
    long: bool,
    done: bool,
}

impl ThresholdStrategy {
    fn new(buy_level: f64, sell_level: f64) -> Self {
        Self {
            buy_level,
            sell_level,
            long: false,
            done: false,
        }
    }
}

impl Strategy for ThresholdStrategy {
    fn name(&self) -> &str {
        "threshold"
    }

    fn on_bar(&mut self, bar: &Bar, _history: &[Bar]) -> Result<Option<Signal>> {
        if self.done {
            return Ok(None);
        }
        if !self.long && bar.close >= self.buy_level {
            return Ok(Some(Signal::new(
                &bar.symbol,
                SignalAction::Buy,
                self.name(),
                bar.ts,
            )));
        }
        if self.long && bar.close >= self.sell_level {
            return Ok(Some(Signal::new(
                &bar.symbol,
                SignalAction::Sell,
                self.name(),
                bar.ts,
            )));
        }
        Ok(None)
    }

    fn on_fill(&mut self, fill: &Fill) -> Result<()> {
        match fill.side {
            quantlab_core::order::OrderSide::Buy => self.long = true,
            quantlab_core::order::OrderSide::Sell => {
                self.long = false;
                self.done = true;
            }
        }
        Ok(())
    }
}

fn threshold_builder() -> Arc<StrategyBuilder> {
    Arc::new(|params: &ParamSet| {
        let buy = params
            .get("buy")
            .and_then(ParamValue::as_f64)
            .ok_or_else(|| QuantError::Config("missing buy".into()))?;
        let sell = params
            .get("sell")
            .and_then(ParamValue::as_f64)
            .ok_or_else(|| QuantError::Config("missing sell".into()))?;
        Ok(Box::new(ThresholdStrategy::new(buy, sell)) as Box<dyn Strategy>)
    })
}

fn uptrend_data(days: usize) -> BarData {
    let closes: Vec<f64> = (0..days).map(|i| 90.0 + i as f64 * 0.5).collect();
    let mut data = BarData::new();
    data.insert("T".into(), bars_from_closes("T", &closes));
    data
}

fn threshold_space() -> ParameterSpace {
    let mut space = ParameterSpace::new();
    space.insert(
        "buy".into(),
        ParameterRange::Continuous {
            min: 95.0,
            max: 100.0,
            step: 5.0,
        },
    );
    space.insert(
        "sell".into(),
        ParameterRange::Discrete {
            values: vec![
                ParamValue::Float(105.0),
                ParamValue::Float(110.0),
                ParamValue::Float(115.0),
            ],
        },
    );
    space
}

/// Grid over {buy ∈ [95, 100], sell ∈ [105, 110, 115]} on a monotone
/// uptrend: 6 trials, and the best by total return buys earliest and
/// sells latest.
#[test]
fn scenario_grid_search_ranks_early_buy_late_sell_first() {
    let data = uptrend_data(80);
    let template = config(&["T"], 10_000.0, 80);
    let optimizer = Optimizer::new(&data, &template, threshold_builder());
    let opt =
        OptimizationConfig::new(Objective::TotalReturn, Direction::Maximize, threshold_space());

    let result = grid_search(&optimizer, &opt).unwrap();

    assert_eq!(result.evaluated, 6);
    let best = result.best().unwrap();
    assert_eq!(best.params["buy"], ParamValue::Float(95.0));
    assert_eq!(best.params["sell"], ParamValue::Float(115.0));

    // Sorting law: valid trials first, never improving later in the list.
    let mut seen_invalid = false;
    for pair in result.trials.windows(2) {
        if !pair[0].valid {
            seen_invalid = true;
        }
        if seen_invalid {
            assert!(!pair[1].valid || !pair[0].valid);
        }
        if pair[0].valid && pair[1].valid {
            assert!(pair[0].objective_value >= pair[1].objective_value);
        }
    }
}

#[test]
fn scenario_random_search_is_seed_reproducible() {
    let data = uptrend_data(80);
    let template = config(&["T"], 10_000.0, 80);
    let optimizer = Optimizer::new(&data, &template, threshold_builder());
    let mut opt =
        OptimizationConfig::new(Objective::TotalReturn, Direction::Maximize, threshold_space());
    opt.iterations = 5;
    opt.seed = 2024;

    let a = random_search(&optimizer, &opt).unwrap();
    let b = random_search(&optimizer, &opt).unwrap();
    assert_eq!(
        a.trials.iter().map(|t| &t.id).collect::<Vec<_>>(),
        b.trials.iter().map(|t| &t.id).collect::<Vec<_>>()
    );
}

#[test]
fn scenario_sensitivity_identifies_the_sell_level() {
    let data = uptrend_data(80);
    let template = config(&["T"], 10_000.0, 80);
    let optimizer = Optimizer::new(&data, &template, threshold_builder());
    let opt =
        OptimizationConfig::new(Objective::TotalReturn, Direction::Maximize, threshold_space());
    let result = grid_search(&optimizer, &opt).unwrap();

    let report = analyze_sensitivity(&result);
    let sell = report.iter().find(|s| s.parameter == "sell").unwrap();
    // Higher sell level is strictly better on a monotone uptrend.
    assert!(sell.correlation.unwrap() > 0.9);
    assert_eq!(sell.best_value, Some(ParamValue::Float(115.0)));
    assert_eq!(sell.value_means.len(), 3);
}

#[test]
fn scenario_walk_forward_detects_consistent_uptrend() {
    let data = uptrend_data(400);
    let template = config(&["T"], 10_000.0, 400);
    let optimizer = Optimizer::new(&data, &template, threshold_builder());

    let mut space = ParameterSpace::new();
    space.insert(
        "buy".into(),
        ParameterRange::Integer {
            min: 90,
            max: 110,
            step: 10,
        },
    );
    space.insert(
        "sell".into(),
        ParameterRange::Integer {
            min: 130,
            max: 170,
            step: 20,
        },
    );
    let opt = OptimizationConfig::new(Objective::TotalReturn, Direction::Maximize, space);
    let wf = WalkForwardConfig::new(4, 2, 2, opt);

    let result = run_walk_forward(&optimizer, &wf).unwrap();

    assert!(result.windows.len() >= 3);
    assert_eq!(result.analysis.total_windows, result.windows.len());
    assert!(result.analysis.outperforming_windows <= result.analysis.total_windows);
    assert!((0.0..=100.0).contains(&result.analysis.consistency_score));
}

/// A custom objective replaces the built-in extraction.
#[test]
fn scenario_custom_objective_drives_ranking() {
    let data = uptrend_data(80);
    let template = config(&["T"], 10_000.0, 80);
    // Reward a low drawdown only; penalize return entirely.
    let optimizer = Optimizer::new(&data, &template, threshold_builder())
        .with_custom_objective(Arc::new(|m| -m.max_drawdown));
    let opt = OptimizationConfig::new(Objective::Custom, Direction::Maximize, threshold_space());

    let result = grid_search(&optimizer, &opt).unwrap();
    assert_eq!(result.evaluated, 6);
    assert!(result.best().is_some());
    for trial in &result.trials {
        assert!(trial.objective_value <= 0.0);
    }
}
