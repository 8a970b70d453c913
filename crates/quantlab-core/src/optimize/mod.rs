//! Parameter optimization: grid search, random search, walk-forward
//! analysis, and parameter sensitivity.
//!
//! Parallelism lives only at this outer level: each parameter point owns
//! its engine, portfolio, and queue; bar data is shared read-only.

mod grid;
mod random;
mod sensitivity;
mod walkforward;

pub use grid::grid_search;
pub use random::random_search;
pub use sensitivity::{
    analyze_sensitivity, compute_cost_sensitivity, CostSensitivity, ParameterSensitivity,
};
pub use walkforward::{
    generate_windows, run_walk_forward, OverfittingAnalysis, OverfittingSeverity,
    WalkForwardConfig, WalkForwardResult, WalkForwardWindow, WindowResult, WindowType,
};

use crate::engine::{BacktestConfig, BacktestEngine, BarData};
use crate::error::{QuantError, Result};
use crate::metrics::PerformanceMetrics;
use crate::strategy::Strategy;
use rand::rngs::SmallRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while setting up or running an optimization.
#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("parameter space is empty")]
    EmptySpace,

    #[error("invalid range for {name}: {reason}")]
    InvalidRange { name: String, reason: String },

    #[error("no valid trials were produced")]
    NoValidTrials,

    #[error("walk-forward produced {got} window(s), need at least {needed}")]
    InsufficientWindows { needed: usize, got: usize },
}

impl From<OptimizeError> for QuantError {
    fn from(e: OptimizeError) -> Self {
        QuantError::Config(e.to_string())
    }
}

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Numeric view, for sizing and sensitivity analysis.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Text(_) => None,
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        match self {
            ParamValue::Int(v) if *v >= 0 => Some(*v as usize),
            ParamValue::Float(v) if *v >= 0.0 => Some(*v as usize),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => write!(f, "{v}"),
        }
    }
}

/// A concrete parameter assignment. BTreeMap keeps key order canonical.
pub type ParamSet = BTreeMap<String, ParamValue>;

/// Canonical `key=value|key=value` identifier of a parameter point; used
/// for deduplication and deterministic tie-breaking.
pub fn param_hash(params: &ParamSet) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("|")
}

/// A range of values a parameter may take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterRange {
    /// Explicit value set.
    Discrete { values: Vec<ParamValue> },
    /// Stepped continuous lattice over `[min, max]`.
    Continuous { min: f64, max: f64, step: f64 },
    /// Stepped integer lattice over `[min, max]`.
    Integer { min: i64, max: i64, step: i64 },
}

impl ParameterRange {
    pub fn validate(&self, name: &str) -> std::result::Result<(), OptimizeError> {
        let invalid = |reason: &str| OptimizeError::InvalidRange {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        match self {
            ParameterRange::Discrete { values } => {
                if values.is_empty() {
                    return Err(invalid("empty value set"));
                }
            }
            ParameterRange::Continuous { min, max, step } => {
                if !min.is_finite() || !max.is_finite() || min > max {
                    return Err(invalid("min/max malformed"));
                }
                if *step <= 0.0 {
                    return Err(invalid("step must be > 0"));
                }
            }
            ParameterRange::Integer { min, max, step } => {
                if min > max {
                    return Err(invalid("min > max"));
                }
                if *step <= 0 {
                    return Err(invalid("step must be > 0"));
                }
            }
        }
        Ok(())
    }

    /// Expand to the full lattice (used by grid search).
    pub fn expand(&self) -> Vec<ParamValue> {
        match self {
            ParameterRange::Discrete { values } => values.clone(),
            ParameterRange::Continuous { min, max, step } => {
                let mut out = Vec::new();
                let mut i = 0u64;
                loop {
                    let value = min + i as f64 * step;
                    if value > max + 1e-12 {
                        break;
                    }
                    out.push(ParamValue::Float(value));
                    i += 1;
                }
                out
            }
            ParameterRange::Integer { min, max, step } => (*min..=*max)
                .step_by(*step as usize)
                .map(ParamValue::Int)
                .collect(),
        }
    }

    /// Draw one value from the range's lattice (used by random search).
    pub fn sample(&self, rng: &mut SmallRng) -> ParamValue {
        match self {
            ParameterRange::Discrete { values } => {
                values[rng.gen_range(0..values.len())].clone()
            }
            ParameterRange::Continuous { min, max, step } => {
                let steps = ((max - min) / step).floor() as u64;
                let i = rng.gen_range(0..=steps);
                ParamValue::Float(min + i as f64 * step)
            }
            ParameterRange::Integer { min, max, step } => {
                let steps = (max - min) / step;
                let i = rng.gen_range(0..=steps);
                ParamValue::Int(min + i * step)
            }
        }
    }
}

/// Parameter space: name → range, canonically ordered.
pub type ParameterSpace = BTreeMap<String, ParameterRange>;

/// Objective metric to optimize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    Sharpe,
    Sortino,
    Calmar,
    TotalReturn,
    Cagr,
    ProfitFactor,
    WinRate,
    Expectancy,
    /// Caller-supplied function; see [`Optimizer::with_custom_objective`].
    Custom,
}

impl Objective {
    pub fn extract(&self, metrics: &PerformanceMetrics) -> f64 {
        match self {
            Objective::Sharpe => metrics.sharpe,
            Objective::Sortino => metrics.sortino,
            Objective::Calmar => metrics.calmar,
            Objective::TotalReturn => metrics.total_return,
            Objective::Cagr => metrics.cagr,
            Objective::ProfitFactor => metrics.profit_factor,
            Objective::WinRate => metrics.win_rate,
            Objective::Expectancy => metrics.expectancy,
            Objective::Custom => 0.0,
        }
    }
}

/// Optimization direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Maximize,
    Minimize,
}

impl Direction {
    /// True when `candidate` is strictly better than `incumbent`.
    pub fn improves(&self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Direction::Maximize => candidate > incumbent,
            Direction::Minimize => candidate < incumbent,
        }
    }

    pub fn worst(&self) -> f64 {
        match self {
            Direction::Maximize => f64::NEG_INFINITY,
            Direction::Minimize => f64::INFINITY,
        }
    }
}

/// Method-specific knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    pub objective: Objective,
    pub direction: Direction,
    pub space: ParameterSpace,
    /// Random search: number of sampled points.
    pub iterations: usize,
    /// Random search: PRNG seed.
    pub seed: u64,
    /// Random search: stop after this many consecutive non-improving
    /// samples.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub early_stopping_rounds: Option<usize>,
}

impl OptimizationConfig {
    pub fn new(objective: Objective, direction: Direction, space: ParameterSpace) -> Self {
        Self {
            objective,
            direction,
            space,
            iterations: 100,
            seed: 42,
            early_stopping_rounds: None,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), OptimizeError> {
        if self.space.is_empty() {
            return Err(OptimizeError::EmptySpace);
        }
        for (name, range) in &self.space {
            range.validate(name)?;
        }
        Ok(())
    }
}

/// Outcome of one evaluated parameter point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialResult {
    pub params: ParamSet,
    /// Canonical identifier (`param_hash`).
    pub id: String,
    pub objective_value: f64,
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<PerformanceMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Which search produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMethod {
    Grid,
    Random,
    WalkForward,
}

/// Ranked trials of one optimization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRunResult {
    pub method: OptimizationMethod,
    pub objective: Objective,
    pub direction: Direction,
    /// Trials sorted best-first: valid before invalid, then objective in
    /// the configured direction, ties broken by parameter hash.
    pub trials: Vec<TrialResult>,
    /// Points evaluated (before early stopping trimmed nothing; equals
    /// `trials.len()`).
    pub evaluated: usize,
}

impl OptimizationRunResult {
    /// The best valid trial, if any.
    pub fn best(&self) -> Option<&TrialResult> {
        self.trials.first().filter(|t| t.valid)
    }
}

/// Sort trials best-first, deterministically.
pub(crate) fn rank_trials(trials: &mut [TrialResult], direction: Direction) {
    trials.sort_by(|a, b| {
        b.valid
            .cmp(&a.valid)
            .then_with(|| {
                let ord = a
                    .objective_value
                    .partial_cmp(&b.objective_value)
                    .unwrap_or(std::cmp::Ordering::Equal);
                match direction {
                    Direction::Maximize => ord.reverse(),
                    Direction::Minimize => ord,
                }
            })
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Builds a strategy for a parameter point.
pub type StrategyBuilder = dyn Fn(&ParamSet) -> Result<Box<dyn Strategy>> + Send + Sync;

/// Caller-supplied objective over the metrics struct. Must be total.
pub type CustomObjective = dyn Fn(&PerformanceMetrics) -> f64 + Send + Sync;

/// Drives many backtests over a parameter space. Bar data and the config
/// template are shared read-only; every trial owns its engine state.
pub struct Optimizer<'a> {
    data: &'a BarData,
    template: &'a BacktestConfig,
    build_strategy: Arc<StrategyBuilder>,
    custom_objective: Option<Arc<CustomObjective>>,
}

impl<'a> Optimizer<'a> {
    pub fn new(
        data: &'a BarData,
        template: &'a BacktestConfig,
        build_strategy: Arc<StrategyBuilder>,
    ) -> Self {
        Self {
            data,
            template,
            build_strategy,
            custom_objective: None,
        }
    }

    /// Install the function backing [`Objective::Custom`].
    pub fn with_custom_objective(mut self, objective: Arc<CustomObjective>) -> Self {
        self.custom_objective = Some(objective);
        self
    }

    pub(crate) fn data(&self) -> &'a BarData {
        self.data
    }

    pub(crate) fn template(&self) -> &'a BacktestConfig {
        self.template
    }

    /// A view of the same builder and custom objective over different
    /// data and template (walk-forward window slices).
    pub(crate) fn reslice<'b>(
        &self,
        data: &'b BarData,
        template: &'b BacktestConfig,
    ) -> Optimizer<'b> {
        Optimizer {
            data,
            template,
            build_strategy: Arc::clone(&self.build_strategy),
            custom_objective: self.custom_objective.clone(),
        }
    }

    /// Run one backtest for a parameter point. Failures become invalid
    /// trials rather than aborting the search.
    pub(crate) fn evaluate(
        &self,
        params: ParamSet,
        objective: Objective,
        direction: Direction,
    ) -> TrialResult {
        let id = param_hash(&params);
        let outcome = (self.build_strategy)(&params).and_then(|mut strategy| {
            let mut config = self.template.clone();
            config.id = format!("{}:{}", self.template.id, id);
            let mut engine = BacktestEngine::new(config)?;
            engine.run_with_data(self.data, strategy.as_mut(), Vec::new())
        });
        match outcome {
            Ok(result) => {
                let value = match (objective, &self.custom_objective) {
                    (Objective::Custom, Some(f)) => f(&result.metrics),
                    _ => objective.extract(&result.metrics),
                };
                let valid = value.is_finite();
                TrialResult {
                    id,
                    params,
                    objective_value: if valid { value } else { direction.worst() },
                    valid,
                    metrics: Some(result.metrics),
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(trial = %id, error = %e, "trial failed, marking invalid");
                TrialResult {
                    id,
                    params,
                    objective_value: direction.worst(),
                    valid: false,
                    metrics: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::strategy::{ScriptedAction, ScriptedStrategy};

    /// A builder producing a scripted strategy that buys at a bar index
    /// taken from the `buy_bar` parameter and sells at `sell_bar`.
    pub fn scripted_builder() -> Arc<StrategyBuilder> {
        Arc::new(|params: &ParamSet| {
            let buy = params
                .get("buy_bar")
                .and_then(ParamValue::as_usize)
                .ok_or_else(|| QuantError::Config("missing buy_bar".into()))?;
            let sell = params
                .get("sell_bar")
                .and_then(ParamValue::as_usize)
                .ok_or_else(|| QuantError::Config("missing sell_bar".into()))?;
            Ok(Box::new(ScriptedStrategy::new(vec![
                ScriptedAction::buy(buy).with_quantity(10.0),
                ScriptedAction::sell(sell),
            ])) as Box<dyn Strategy>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, ParamValue)]) -> ParamSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn param_hash_is_canonical() {
        let a = params(&[
            ("slow", ParamValue::Int(20)),
            ("fast", ParamValue::Int(5)),
        ]);
        assert_eq!(param_hash(&a), "fast=5|slow=20");
    }

    #[test]
    fn continuous_range_expands_to_lattice() {
        let range = ParameterRange::Continuous {
            min: 95.0,
            max: 100.0,
            step: 5.0,
        };
        let values = range.expand();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], ParamValue::Float(95.0));
        assert_eq!(values[1], ParamValue::Float(100.0));
    }

    #[test]
    fn integer_range_honors_step() {
        let range = ParameterRange::Integer {
            min: 10,
            max: 20,
            step: 5,
        };
        assert_eq!(
            range.expand(),
            vec![ParamValue::Int(10), ParamValue::Int(15), ParamValue::Int(20)]
        );
    }

    #[test]
    fn range_validation_catches_malformed_inputs() {
        assert!(ParameterRange::Discrete { values: vec![] }
            .validate("x")
            .is_err());
        assert!(ParameterRange::Continuous {
            min: 1.0,
            max: 0.0,
            step: 0.1
        }
        .validate("x")
        .is_err());
        assert!(ParameterRange::Integer {
            min: 0,
            max: 10,
            step: 0
        }
        .validate("x")
        .is_err());
    }

    #[test]
    fn ranking_puts_valid_first_then_objective_then_hash() {
        let mut trials = vec![
            TrialResult {
                params: ParamSet::new(),
                id: "b".into(),
                objective_value: 1.0,
                valid: true,
                metrics: None,
                error: None,
            },
            TrialResult {
                params: ParamSet::new(),
                id: "a".into(),
                objective_value: 1.0,
                valid: true,
                metrics: None,
                error: None,
            },
            TrialResult {
                params: ParamSet::new(),
                id: "c".into(),
                objective_value: 99.0,
                valid: false,
                metrics: None,
                error: Some("boom".into()),
            },
            TrialResult {
                params: ParamSet::new(),
                id: "d".into(),
                objective_value: 2.0,
                valid: true,
                metrics: None,
                error: None,
            },
        ];
        rank_trials(&mut trials, Direction::Maximize);
        let ids: Vec<&str> = trials.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "a", "b", "c"]);
    }

    #[test]
    fn sampling_stays_on_lattice() {
        use rand::SeedableRng;
        let mut rng = SmallRng::seed_from_u64(7);
        let range = ParameterRange::Continuous {
            min: 0.0,
            max: 1.0,
            step: 0.25,
        };
        for _ in 0..100 {
            let v = range.sample(&mut rng).as_f64().unwrap();
            let steps = v / 0.25;
            assert!((steps - steps.round()).abs() < 1e-9);
            assert!((0.0..=1.0).contains(&v));
        }
    }
}
