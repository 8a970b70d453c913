//! Walk-forward analysis: rolling (or anchored) train/test windows with an
//! inner optimization per window, plus overfitting diagnostics on the
//! in-sample vs out-of-sample objective gap.

use super::{
    grid_search, random_search, OptimizationConfig, OptimizeError, Optimizer, ParamSet,
    ParameterRange, TrialResult,
};
use crate::engine::BarData;
use crate::error::Result;
use crate::metrics::PerformanceMetrics;
use crate::stats::{mean, std_dev};
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

/// How the training window moves between folds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    /// Fixed-length training window sliding forward by `step_months`.
    Rolling,
    /// Training window anchored at the overall start, growing each step.
    Anchored,
}

/// Walk-forward configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    pub train_months: u32,
    pub test_months: u32,
    pub step_months: u32,
    pub window_type: WindowType,
    /// Minimum acceptable number of windows.
    pub min_windows: usize,
    /// Inner optimization run on each training slice.
    pub optimization: OptimizationConfig,
}

impl WalkForwardConfig {
    pub fn new(train_months: u32, test_months: u32, step_months: u32, optimization: OptimizationConfig) -> Self {
        Self {
            train_months,
            test_months,
            step_months,
            window_type: WindowType::Rolling,
            min_windows: 1,
            optimization,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), OptimizeError> {
        if self.train_months == 0 || self.test_months == 0 || self.step_months == 0 {
            return Err(OptimizeError::InvalidRange {
                name: "walk_forward".into(),
                reason: "train/test/step months must all be > 0".into(),
            });
        }
        self.optimization.validate()
    }
}

/// One train/test fold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardWindow {
    pub index: usize,
    pub train_start: DateTime<Utc>,
    /// Exclusive.
    pub train_end: DateTime<Utc>,
    pub test_start: DateTime<Utc>,
    /// Exclusive.
    pub test_end: DateTime<Utc>,
}

/// Generate windows until `test_end` would exceed the overall end.
pub fn generate_windows(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    config: &WalkForwardConfig,
) -> Vec<WalkForwardWindow> {
    let mut windows = Vec::new();
    let mut index = 0usize;
    loop {
        let offset = Months::new(config.step_months * index as u32);
        let (train_start, train_end) = match config.window_type {
            WindowType::Rolling => {
                let Some(ts) = start.checked_add_months(offset) else {
                    break;
                };
                let Some(te) = ts.checked_add_months(Months::new(config.train_months)) else {
                    break;
                };
                (ts, te)
            }
            WindowType::Anchored => {
                let Some(te) = start
                    .checked_add_months(Months::new(config.train_months))
                    .and_then(|te| te.checked_add_months(offset))
                else {
                    break;
                };
                (start, te)
            }
        };
        let Some(test_end) = train_end.checked_add_months(Months::new(config.test_months)) else {
            break;
        };
        if test_end > end {
            break;
        }
        windows.push(WalkForwardWindow {
            index,
            train_start,
            train_end,
            test_start: train_end,
            test_end,
        });
        index += 1;
    }
    windows
}

/// Outcome of one walk-forward window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowResult {
    pub window: WalkForwardWindow,
    pub best_params: ParamSet,
    pub best_id: String,
    pub in_sample_objective: f64,
    pub out_of_sample_objective: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_of_sample_metrics: Option<PerformanceMetrics>,
}

/// Severity bands on the absolute in-sample → out-of-sample degradation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverfittingSeverity {
    None,
    Low,
    Moderate,
    High,
    Severe,
}

impl OverfittingSeverity {
    pub fn from_degradation_pct(degradation_pct: f64) -> Self {
        let magnitude = degradation_pct.abs();
        if magnitude < 5.0 {
            Self::None
        } else if magnitude < 15.0 {
            Self::Low
        } else if magnitude < 30.0 {
            Self::Moderate
        } else if magnitude < 50.0 {
            Self::High
        } else {
            Self::Severe
        }
    }
}

/// Aggregate in-sample vs out-of-sample diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverfittingAnalysis {
    pub avg_in_sample: f64,
    pub avg_out_of_sample: f64,
    /// `(oos − is) / is × 100`.
    pub degradation_pct: f64,
    pub severity: OverfittingSeverity,
    pub is_overfitted: bool,
    /// `clamp(100 − 100 × |stdev(oos) / mean(oos)|, 0, 100)`.
    pub consistency_score: f64,
    /// Windows where out-of-sample met or beat in-sample in the
    /// configured direction.
    pub outperforming_windows: usize,
    pub total_windows: usize,
}

impl OverfittingAnalysis {
    pub fn from_windows(windows: &[WindowResult], config: &WalkForwardConfig) -> Self {
        let is_values: Vec<f64> = windows.iter().map(|w| w.in_sample_objective).collect();
        let oos_values: Vec<f64> = windows.iter().map(|w| w.out_of_sample_objective).collect();
        let avg_in_sample = mean(&is_values);
        let avg_out_of_sample = mean(&oos_values);
        let degradation_pct = if avg_in_sample.abs() > 1e-12 {
            (avg_out_of_sample - avg_in_sample) / avg_in_sample * 100.0
        } else {
            0.0
        };
        let severity = OverfittingSeverity::from_degradation_pct(degradation_pct);
        let oos_mean = mean(&oos_values);
        let consistency_score = if oos_mean.abs() > 1e-12 {
            (100.0 - 100.0 * (std_dev(&oos_values) / oos_mean).abs()).clamp(0.0, 100.0)
        } else {
            0.0
        };
        let direction = config.optimization.direction;
        let outperforming_windows = windows
            .iter()
            .filter(|w| {
                w.out_of_sample_objective == w.in_sample_objective
                    || direction.improves(w.out_of_sample_objective, w.in_sample_objective)
            })
            .count();
        Self {
            avg_in_sample,
            avg_out_of_sample,
            degradation_pct,
            severity,
            is_overfitted: severity != OverfittingSeverity::None,
            consistency_score,
            outperforming_windows,
            total_windows: windows.len(),
        }
    }
}

/// Full walk-forward output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardResult {
    pub windows: Vec<WindowResult>,
    pub analysis: OverfittingAnalysis,
}

/// Run walk-forward analysis over the optimizer's data and date range.
pub fn run_walk_forward(
    optimizer: &Optimizer<'_>,
    config: &WalkForwardConfig,
) -> Result<WalkForwardResult> {
    config.validate()?;
    let template = optimizer.template();
    let windows = generate_windows(template.start, template.end, config);
    if windows.len() < config.min_windows.max(1) {
        return Err(OptimizeError::InsufficientWindows {
            needed: config.min_windows.max(1),
            got: windows.len(),
        }
        .into());
    }
    tracing::info!(windows = windows.len(), "starting walk-forward analysis");

    let discrete = config
        .optimization
        .space
        .values()
        .all(|r| !matches!(r, ParameterRange::Continuous { .. }));

    let mut results = Vec::with_capacity(windows.len());
    for window in windows {
        let train = slice_data(optimizer.data(), window.train_start, window.train_end);
        let test = slice_data(optimizer.data(), window.test_start, window.test_end);
        if train.values().all(|bars| bars.is_empty()) || test.values().all(|bars| bars.is_empty())
        {
            tracing::warn!(window = window.index, "skipping window with no data");
            continue;
        }

        let mut train_template = template.clone();
        train_template.id = format!("{}:wf{}:train", template.id, window.index);
        train_template.start = window.train_start;
        train_template.end = window.train_end;
        let train_optimizer = optimizer.reslice(&train, &train_template);

        // Seed partitioned per window so folds are independent but
        // reproducible.
        let mut inner = config.optimization.clone();
        inner.seed = inner.seed.wrapping_add(window.index as u64);
        let inner_result = if discrete {
            grid_search(&train_optimizer, &inner)?
        } else {
            random_search(&train_optimizer, &inner)?
        };
        let Some(best) = inner_result.best().cloned() else {
            tracing::warn!(window = window.index, "no valid in-sample trial, skipping");
            continue;
        };

        let mut test_template = template.clone();
        test_template.id = format!("{}:wf{}:test", template.id, window.index);
        test_template.start = window.test_start;
        test_template.end = window.test_end;
        let test_optimizer = optimizer.reslice(&test, &test_template);
        let oos: TrialResult = test_optimizer.evaluate(
            best.params.clone(),
            config.optimization.objective,
            config.optimization.direction,
        );

        results.push(WindowResult {
            window,
            best_id: best.id.clone(),
            best_params: best.params.clone(),
            in_sample_objective: best.objective_value,
            out_of_sample_objective: oos.objective_value,
            out_of_sample_metrics: oos.metrics,
        });
    }

    if results.is_empty() {
        return Err(OptimizeError::NoValidTrials.into());
    }
    let analysis = OverfittingAnalysis::from_windows(&results, config);
    tracing::info!(
        windows = results.len(),
        degradation_pct = analysis.degradation_pct,
        severity = ?analysis.severity,
        "walk-forward complete"
    );
    Ok(WalkForwardResult {
        windows: results,
        analysis,
    })
}

/// Filter every symbol's bars to `[start, end)`.
fn slice_data(data: &BarData, start: DateTime<Utc>, end: DateTime<Utc>) -> BarData {
    data.iter()
        .map(|(symbol, bars)| {
            (
                symbol.clone(),
                bars.iter()
                    .filter(|b| b.ts >= start && b.ts < end)
                    .cloned()
                    .collect(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::scripted_builder;
    use super::super::{Direction, Objective, ParameterRange, ParameterSpace};
    use super::*;
    use crate::bar::test_support::{bars_from_closes, day};
    use crate::engine::BacktestConfig;

    fn wf_config(window_type: WindowType) -> WalkForwardConfig {
        let mut space = ParameterSpace::new();
        space.insert(
            "buy_bar".into(),
            ParameterRange::Integer {
                min: 0,
                max: 2,
                step: 1,
            },
        );
        space.insert(
            "sell_bar".into(),
            ParameterRange::Integer {
                min: 20,
                max: 40,
                step: 10,
            },
        );
        let optimization =
            OptimizationConfig::new(Objective::TotalReturn, Direction::Maximize, space);
        WalkForwardConfig {
            window_type,
            ..WalkForwardConfig::new(3, 1, 1, optimization)
        }
    }

    #[test]
    fn rolling_windows_slide_by_step() {
        let config = wf_config(WindowType::Rolling);
        let windows = generate_windows(day(0), day(300), &config);
        assert!(windows.len() >= 5);
        let first = windows[0];
        assert_eq!(first.train_start, day(0));
        assert_eq!(first.test_start, first.train_end);
        // Second window starts one step later but keeps the same length.
        let second = windows[1];
        assert!(second.train_start > first.train_start);
        assert_eq!(
            (second.train_end - second.train_start).num_days(),
            (first.train_end - first.train_start).num_days()
        );
        // Every test window ends within the overall range.
        assert!(windows.iter().all(|w| w.test_end <= day(300)));
    }

    #[test]
    fn anchored_windows_grow_from_start() {
        let config = wf_config(WindowType::Anchored);
        let windows = generate_windows(day(0), day(300), &config);
        assert!(windows.len() >= 5);
        assert!(windows.iter().all(|w| w.train_start == day(0)));
        assert!(windows[1].train_end > windows[0].train_end);
    }

    #[test]
    fn severity_bands_match_thresholds() {
        assert_eq!(
            OverfittingSeverity::from_degradation_pct(-3.0),
            OverfittingSeverity::None
        );
        assert_eq!(
            OverfittingSeverity::from_degradation_pct(-10.0),
            OverfittingSeverity::Low
        );
        assert_eq!(
            OverfittingSeverity::from_degradation_pct(-20.0),
            OverfittingSeverity::Moderate
        );
        assert_eq!(
            OverfittingSeverity::from_degradation_pct(-40.0),
            OverfittingSeverity::High
        );
        assert_eq!(
            OverfittingSeverity::from_degradation_pct(-75.0),
            OverfittingSeverity::Severe
        );
    }

    #[test]
    fn walk_forward_runs_end_to_end_on_uptrend() {
        let closes: Vec<f64> = (0..300).map(|i| 100.0 + i as f64 * 0.5).collect();
        let mut data = crate::engine::BarData::new();
        data.insert("T".into(), bars_from_closes("T", &closes));
        let template = BacktestConfig::new("wf", vec!["T".into()], day(0), day(300), 100_000.0);
        let optimizer = Optimizer::new(&data, &template, scripted_builder());

        let config = wf_config(WindowType::Rolling);
        let result = run_walk_forward(&optimizer, &config).unwrap();

        assert!(!result.windows.is_empty());
        assert_eq!(result.analysis.total_windows, result.windows.len());
        assert!(result.analysis.consistency_score >= 0.0);
        assert!(result.analysis.consistency_score <= 100.0);
        // Steady uptrend: every window should profit out of sample.
        assert!(result
            .windows
            .iter()
            .all(|w| w.out_of_sample_objective >= 0.0));
    }

    #[test]
    fn insufficient_history_is_an_error() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let mut data = crate::engine::BarData::new();
        data.insert("T".into(), bars_from_closes("T", &closes));
        let template = BacktestConfig::new("wf", vec!["T".into()], day(0), day(30), 100_000.0);
        let optimizer = Optimizer::new(&data, &template, scripted_builder());
        let config = wf_config(WindowType::Rolling);
        assert!(run_walk_forward(&optimizer, &config).is_err());
    }
}
