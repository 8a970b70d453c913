//! Exhaustive grid search over the Cartesian product of parameter ranges.

use super::{
    rank_trials, OptimizationConfig, OptimizationMethod, OptimizationRunResult, Optimizer,
    ParamSet, ParamValue,
};
use crate::error::Result;
use rayon::prelude::*;

/// Evaluate every point of the parameter lattice in parallel and return
/// the deterministically ranked result.
pub fn grid_search(
    optimizer: &Optimizer<'_>,
    config: &OptimizationConfig,
) -> Result<OptimizationRunResult> {
    config.validate()?;

    let points = cartesian_product(config);
    let total = points.len();
    tracing::info!(
        points = total,
        objective = ?config.objective,
        "starting grid search"
    );

    let mut trials: Vec<_> = points
        .into_par_iter()
        .map(|params| optimizer.evaluate(params, config.objective, config.direction))
        .collect();
    rank_trials(&mut trials, config.direction);

    tracing::info!(
        points = total,
        valid = trials.iter().filter(|t| t.valid).count(),
        "grid search complete"
    );
    Ok(OptimizationRunResult {
        method: OptimizationMethod::Grid,
        objective: config.objective,
        direction: config.direction,
        evaluated: total,
        trials,
    })
}

/// All combinations of the expanded ranges, in canonical key order.
fn cartesian_product(config: &OptimizationConfig) -> Vec<ParamSet> {
    let expanded: Vec<(&String, Vec<ParamValue>)> = config
        .space
        .iter()
        .map(|(name, range)| (name, range.expand()))
        .collect();

    let mut points: Vec<ParamSet> = vec![ParamSet::new()];
    for (name, values) in expanded {
        let mut next = Vec::with_capacity(points.len() * values.len());
        for point in &points {
            for value in &values {
                let mut extended = point.clone();
                extended.insert(name.clone(), value.clone());
                next.push(extended);
            }
        }
        points = next;
    }
    points
}
